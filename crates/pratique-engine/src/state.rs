use std::sync::Arc;

use pratique_bridge::persona::AvatarPersona;

use crate::{credit::CreditStore, evaluator::Evaluator, session::SessionHandle, store::ProfileStore, transport::Transport};

/// The core application state that holds configuration, the remote
/// collaborators and the running session, if any.
///
/// It is designed to be wrapped in thread-safe, async-friendly concurrency
/// primitives (see [`SharedState`]) to allow safe concurrent reads and
/// occasional writes from multiple tasks.
pub struct State {
    /// The loaded application configuration.
    pub config: pratique_bridge::config::Config,
    /// Shared HTTP client for making efficient, pooled requests.
    pub request_client: reqwest::Client,
    pub active_host: Arc<cpal::Host>,
    /// Live conversation transport shared by all sessions.
    pub transport: Arc<dyn Transport>,
    pub evaluator: Arc<dyn Evaluator>,
    /// Where the credit balance is persisted.
    pub credit_store: Arc<dyn CreditStore>,
    /// Hosted profile backend, when configured.
    pub profile_store: Option<ProfileStore>,
    pub session: Option<ActiveSession>,
}

/// A session that was started and has not reported its end yet.
pub struct ActiveSession {
    pub handle: SessionHandle,
    pub persona: AvatarPersona,
}

/// Thread-safe, async-friendly shared reference to the application [`State`].
pub type SharedState = Arc<tokio::sync::RwLock<State>>;
