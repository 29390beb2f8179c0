/// Handles an incoming configuration request (see
/// [`pratique_bridge::MessageToEngine::ConfigurationRequest`]).
pub async fn handle_config_request(context: super::AppContextHandle) {
    let config = {
        let state = context.state.read().await;
        state.config.clone()
    };
    context
        .send(pratique_bridge::MessageFromEngine::ConfigurationResponse(config))
        .await;
}
