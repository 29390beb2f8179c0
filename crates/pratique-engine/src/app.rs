//! Application context and message dispatching utilities.
//!
//! The context contains the shared state and provides helpers for sending
//! responses and notifications back to the frontend bridge.

use std::sync::Arc;

use pratique_bridge::{
    MessageFromEngine, MessageToEngine,
    notification::{NotificationMessage, NotificationType},
};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::services;
use crate::state::SharedState;

/// Shared application context passed to services and message handlers.
pub(crate) struct AppContext {
    /// Mutable runtime application state shared across services.
    pub state: SharedState,
    /// Outbound channel to the frontend bridge.
    pub tx: Sender<MessageFromEngine>,
}

impl AppContext {
    /// Read and dispatch messages from the frontend bridge until it closes.
    pub async fn consume_bridge_messages(self: &Arc<Self>, mut rx: Receiver<MessageToEngine>) {
        while let Some(message) = rx.recv().await {
            log::debug!("Got a frontend message: {message:?}");
            self.dispatch_message(message).await;
        }

        // the frontend is gone, do not leave a session running
        services::session_service::handle_end_session_request(self.clone()).await;
    }

    /// Dispatches the received message from frontend down to individual
    /// service handlers.
    async fn dispatch_message(self: &Arc<Self>, message: MessageToEngine) {
        match message {
            MessageToEngine::ConfigurationRequest => {
                services::config_service::handle_config_request(self.clone()).await;
            }
            MessageToEngine::AudioDevicesListRequest => {
                services::audio_service::handle_audio_devices_list_request(self.clone()).await;
            }
            MessageToEngine::SelectAudioDevice(id) => {
                services::audio_service::handle_audio_device_selection(self.clone(), id).await;
            }
            MessageToEngine::PersonasListRequest => {
                services::session_service::handle_personas_list_request(self.clone()).await;
            }
            MessageToEngine::StartSessionRequest { persona } => {
                services::session_service::handle_start_session_request(self.clone(), persona).await;
            }
            MessageToEngine::SendTextRequest(text) => {
                services::session_service::handle_send_text_request(self.clone(), text).await;
            }
            MessageToEngine::SessionStatusRequest => {
                services::session_service::handle_session_status_request(self.clone()).await;
            }
            MessageToEngine::EndSessionRequest => {
                services::session_service::handle_end_session_request(self.clone()).await;
            }
            MessageToEngine::CancelSessionRequest => {
                services::session_service::handle_cancel_session_request(self.clone()).await;
            }
        }
    }

    /// Send a message to the frontend bridge. A closed frontend is logged
    /// and otherwise ignored.
    pub async fn send(&self, message: MessageFromEngine) {
        if self.tx.send(message).await.is_err() {
            log::warn!("Frontend is gone, dropping a message");
        }
    }

    /// Send a notification message to the frontend bridge.
    pub async fn send_notification(
        &self,
        notification_type: NotificationType,
        content: impl Into<String>,
    ) {
        self.send(MessageFromEngine::NotificationMessage(NotificationMessage::new(
            notification_type,
            content,
        )))
        .await;
    }
}
