//! Communication bridge between frontend and session engine.
//!
//! This crate defines the types and protocols used to connect a frontend
//! with the asynchronous engine responsible for audio capture, the live
//! conversation, credit accounting and evaluation.
//!
//! The design is deliberately lightweight and unidirectional:
//! - The frontend sends commands (e.g., start a session, send text, end the
//!   session).
//! - The engine pushes events (e.g., transcript units, status changes,
//!   notifications, the final result).
//!
//! Communication happens over bounded [`tokio::sync::mpsc`] channels wrapped
//! in [`BridgeChannels`], providing back-pressure, async compatibility, and
//! clean separation of concerns.

pub mod audio;
pub mod config;
pub mod evaluation;
pub mod notification;
pub mod persona;
pub mod session;

use tokio::sync::mpsc::{self, Receiver, Sender};

/// Messages emitted by the engine to inform the frontend of state updates.
#[derive(Debug, Clone)]
pub enum MessageFromEngine {
    /// Generic message for all notifications in the application.
    NotificationMessage(notification::NotificationMessage),
    /// Response to the configuration request from the frontend.
    ConfigurationResponse(config::Config),
    AudioDevicesListResponse(Vec<audio::AudioDevice>),
    PersonasListResponse(Vec<persona::AvatarPersona>),
    /// A session was accepted and is connecting.
    SessionStartedResponse {
        persona: persona::AvatarPersona,
        remaining_seconds: u32,
    },
    /// The observable state of the running session changed.
    SessionStatusUpdate(session::SessionStatus),
    /// Response to a status query, with the current output level.
    SessionStatusResponse {
        status: session::SessionStatus,
        output_level: f32,
    },
    /// One coalesced transcript unit.
    TranscriptUpdate { text: String, is_user: bool },
    /// A command could not be carried out.
    SessionErrorResponse(session::SessionError),
    /// The session ended and was evaluated.
    SessionFinished {
        result: evaluation::SessionResult,
        reason: session::EndReason,
        /// Credit balance, in whole minutes, persisted at teardown.
        final_minutes: u32,
    },
    /// The session was abandoned without an evaluation.
    SessionCancelled { final_minutes: u32 },
}

/// Commands issued by the frontend to control or query the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageToEngine {
    /// Request for the application configuration.
    ConfigurationRequest,
    AudioDevicesListRequest,
    /// Selects the input device with the given identifier.
    SelectAudioDevice(String),
    PersonasListRequest,
    /// Starts a session with the named persona, or the configured default.
    StartSessionRequest { persona: Option<String> },
    /// Sends a text turn to the conversation partner.
    SendTextRequest(String),
    /// Queries the state of the running session.
    SessionStatusRequest,
    /// Ends the running session and evaluates it.
    EndSessionRequest,
    /// Abandons the running session without evaluating it.
    CancelSessionRequest,
}

/// Paired `tokio::mpsc` channels for bidirectional communication between
/// frontend and engine.
pub struct BridgeChannels {
    /// Receiver used by the frontend to get messages from the engine.
    pub frontend_rx: Receiver<MessageFromEngine>,
    /// Sender used by the frontend to send commands to the engine.
    pub frontend_tx: Sender<MessageToEngine>,

    /// Receiver used by the engine to get commands from the frontend.
    pub engine_rx: Receiver<MessageToEngine>,
    /// Sender used by the engine to send events/responses to the frontend.
    pub engine_tx: Sender<MessageFromEngine>,
}

impl BridgeChannels {
    /// Creates a new pair of bridged channels with the given buffer capacity.
    pub fn new(buffer: usize) -> Self {
        let (to_engine_tx, to_engine_rx) = mpsc::channel(buffer);
        let (to_frontend_tx, to_frontend_rx) = mpsc::channel(buffer);
        Self {
            frontend_tx: to_engine_tx,
            frontend_rx: to_frontend_rx,
            engine_rx: to_engine_rx,
            engine_tx: to_frontend_tx,
        }
    }
}

impl Default for BridgeChannels {
    fn default() -> Self {
        Self::new(64)
    }
}
