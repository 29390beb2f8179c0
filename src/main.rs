fn main() -> anyhow::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_colors(true)
        .with_threads(true)
        .with_local_timestamps()
        .env()
        .init()?;

    let channels = pratique_bridge::BridgeChannels::default();
    pratique_engine::run(channels.engine_rx, channels.engine_tx);
    pratique_console::run(channels.frontend_rx, channels.frontend_tx)
}
