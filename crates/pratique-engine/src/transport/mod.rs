//! Realtime transport to the live conversation service.
//!
//! A transport only knows how to open one logical session and how to
//! normalize whatever the remote service sends into [`InboundEvent`]s. Every
//! attempt carries a fresh [`SessionId`]; the engine drops events whose id
//! is not the current one, so a superseded connection can never touch live
//! state.

pub mod gemini;

use std::fmt;

use futures_util::future::BoxFuture;
use pratique_audio::capture::EncodedFrame;
use pratique_bridge::persona::AvatarVoice;
use pratique_transcript::Role;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

/// Identity of one transport attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// The id that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Normalized messages received from the conversation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A piece of live transcription for either speaker.
    TranscriptFragment { role: Role, text: String },
    /// A piece of synthesized speech, base64 PCM16 LE at 24 kHz.
    AudioFragment { data: String },
    /// The agent stopped speaking because the user barged in.
    Interrupted,
    /// The agent finished its turn.
    TurnComplete,
    /// The connection is gone.
    Closed { reason: Option<String> },
    /// The connection failed.
    Error(String),
}

/// Messages the engine sends over an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Audio(EncodedFrame),
    /// A text turn, used for nudges and typed messages.
    Text(String),
}

/// Everything the remote service needs to start a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub voice: AvatarVoice,
    pub system_instruction: String,
}

/// Errors that can occur while opening a transport session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No API key was found in the environment.
    #[error("missing API key for the live conversation service")]
    MissingApiKey,
    /// The websocket could not be opened or broke during the handshake.
    #[error("websocket failure: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// The setup message could not be serialized or a reply parsed.
    #[error("malformed protocol message: {0}")]
    Protocol(#[from] serde_json::Error),
    /// The handshake did not finish in time.
    #[error("handshake timed out")]
    Timeout,
    /// The service closed the connection before the session was set up.
    #[error("connection closed during setup: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether retrying can possibly help.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::MissingApiKey)
    }
}

/// Inbound event tagged with the attempt it belongs to.
#[derive(Debug)]
pub struct Inbound {
    pub session: SessionId,
    pub event: InboundEvent,
}

/// Delivery side of the inbound event channel, scoped to one attempt.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    session: SessionId,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl TransportEvents {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Hands an event to the engine. Returns `false` once the engine is gone.
    pub fn emit(&self, event: InboundEvent) -> bool {
        self.tx
            .send(Inbound {
                session: self.session,
                event,
            })
            .is_ok()
    }
}

/// An open transport session.
///
/// Dropping the link closes its outbound queue and aborts the background
/// tasks registered with [`TransportLink::with_task`].
#[derive(Debug)]
pub struct TransportLink {
    session: SessionId,
    outbound: mpsc::Sender<OutboundMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(session: SessionId, outbound: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            session,
            outbound,
            tasks: Vec::new(),
        }
    }

    /// Ties a background task to the lifetime of this link.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Queues a message for the wire. Messages are dropped, never buffered
    /// for later, when the queue is full or the link is closed.
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("Outbound queue of session {} is full, dropping", self.session);
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Session {} is closed, dropping outbound message", self.session);
                false
            }
        }
    }

    /// Closes the link.
    pub fn close(self) {
        log::debug!("Closing transport session {}", self.session);
        drop(self);
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Opens logical sessions with the conversation service.
pub trait Transport: Send + Sync + 'static {
    /// Opens a session and resolves once it is ready to accept frames.
    /// Inbound traffic is delivered through `events` until the link drops.
    fn open(
        &self,
        setup: SessionSetup,
        events: TransportEvents,
    ) -> BoxFuture<'static, Result<TransportLink, TransportError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_after_close_are_dropped() {
        let (tx, mut rx) = mpsc::channel(1);
        let link = TransportLink::new(SessionId(1), tx);

        assert!(link.send(OutboundMessage::Text("first".into())));
        assert!(!link.send(OutboundMessage::Text("overflow".into())));
        assert_eq!(rx.recv().await, Some(OutboundMessage::Text("first".into())));

        link.close();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn events_are_tagged_with_their_attempt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = TransportEvents::new(SessionId(7), tx);
        assert!(events.emit(InboundEvent::TurnComplete));

        let inbound = rx.recv().await.unwrap();
        assert_eq!(inbound.session, SessionId(7));
        assert_eq!(inbound.event, InboundEvent::TurnComplete);

        drop(rx);
        assert!(!events.emit(InboundEvent::Interrupted));
    }
}
