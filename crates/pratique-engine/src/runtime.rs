//! Backend runtime setup and orchestration.
//!
//! This module wires together configuration, shared state, the remote
//! collaborators, and the message dispatch loop that listens to frontend
//! bridge requests.

use std::{sync::Arc, thread, time::Duration};

use pratique_bridge::{
    MessageFromEngine, MessageToEngine, config::Config, notification::NotificationType,
};
use tokio::sync::{
    RwLock,
    mpsc::{Receiver, Sender},
};

use crate::{
    app::AppContext,
    credit::CreditStore,
    evaluator::GeminiEvaluator,
    state::State,
    store::{LocalCreditStore, ProfileStore},
    transport::gemini::GeminiLiveTransport,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

fn env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| std::env::var(name).ok())
        .filter(|value| !value.trim().is_empty())
}

fn apply_log_level(config: &Config) {
    match config.log_level.parse::<log::LevelFilter>() {
        Ok(level) => log::set_max_level(level),
        Err(_) => log::warn!("Unknown log level {:?}, keeping the default", config.log_level),
    }
}

/// Initialize backend state and start processing frontend messages.
async fn setup_backend(rx: Receiver<MessageToEngine>, tx: Sender<MessageFromEngine>) {
    let (config, config_error) = match crate::config::load_config().await {
        Ok((config, path)) => {
            log::info!("Loaded configuration from {path:?}");
            (config, None)
        }
        Err(err) => {
            log::error!("Failed to load config, using defaults: {err}");
            (Config::default(), Some(err))
        }
    };
    apply_log_level(&config);

    let request_client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|err| {
            log::warn!("Failed to build a tuned HTTP client, using the default one: {err}");
            reqwest::Client::new()
        });

    let api_key = env_var(&["GEMINI_API_KEY", "API_KEY"]);
    if api_key.is_none() {
        log::warn!("No API key found in the environment, sessions will not connect");
    }

    let transport = Arc::new(GeminiLiveTransport::new(
        config.api.live_endpoint.clone(),
        config.api.live_model.clone(),
        api_key.clone(),
        config.engine.connect_timeout(),
    ));
    let evaluator = Arc::new(GeminiEvaluator::new(
        request_client.clone(),
        config.api.evaluation_endpoint.clone(),
        config.api.evaluation_models.clone(),
        api_key,
    ));

    let profile_store = match (config.api.supabase_url.trim(), env_var(&["SUPABASE_ANON_KEY"])) {
        ("", _) => None,
        (_, None) => {
            log::warn!("Profile store is configured but SUPABASE_ANON_KEY is not set");
            None
        }
        (url, Some(anon_key)) => Some(ProfileStore::new(
            request_client.clone(),
            url,
            anon_key,
            env_var(&["PRATIQUE_ACCESS_TOKEN"]),
        )),
    };
    let credit_store: Arc<dyn CreditStore> = match &profile_store {
        Some(store) => Arc::new(store.clone()),
        None => {
            log::info!("No profile store, credits are kept in the local configuration");
            Arc::new(LocalCreditStore)
        }
    };

    let state = Arc::new(RwLock::new(State {
        config,
        request_client,
        active_host: Arc::new(cpal::default_host()), // using default host for now
        transport,
        evaluator,
        credit_store,
        profile_store,
        session: None,
    }));

    let context = Arc::new(AppContext { state, tx });
    if let Some(err) = config_error {
        context
            .send_notification(NotificationType::Warning, format!("Configuração padrão em uso: {err}"))
            .await;
    }
    context.consume_bridge_messages(rx).await;
}

/// Spawn the backend runtime and begin processing bridge messages.
pub fn run(rx: Receiver<MessageToEngine>, tx: Sender<MessageFromEngine>) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("Failed to build the engine runtime: {err}");
                return;
            }
        };
        runtime.block_on(async { setup_backend(rx, tx).await });
    });
}
