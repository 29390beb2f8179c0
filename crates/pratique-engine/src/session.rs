//! The live session actor.
//!
//! A [`LiveSession`] owns everything a running conversation needs: the
//! transport link, the jitter buffer, the transcript aggregator, the credit
//! countdown and the reconnect bookkeeping. It runs as a single task and is
//! driven by commands, transport events, captured frames and a handful of
//! timers. Callers talk to it through a [`SessionHandle`].

use std::{future, pin::Pin, sync::Arc};

use pratique_audio::{
    capture::{CapturePipeline, EncodedFrame},
    playback::{OutputLevel, PlaybackSink},
};
use pratique_bridge::{
    config::EngineTuning,
    evaluation::SessionResult,
    persona::AvatarPersona,
    session::{ConnectionState, EndReason, SessionError, SessionStatus},
};
use pratique_transcript::{TRANSCRIPT_TICK, TranscriptUnit, aggregator::TranscriptAggregator};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, Sleep, interval_at, sleep},
};

use crate::{
    credit::{CreditGovernor, CreditStore, CreditTick, persist_minutes},
    evaluator::{Evaluator, evaluate_or_fallback},
    idle::{IDLE_NUDGE, IdleMonitor},
    jitter::{JitterBuffer, JitterConfig},
    reconnect::{ReconnectController, ReconnectDecision},
    transport::{
        Inbound, InboundEvent, OutboundMessage, SessionId, SessionSetup, Transport, TransportError,
        TransportEvents, TransportLink,
    },
};

/// Captured frames waiting for the actor. Older frames are dropped when the
/// queue is full.
const FRAME_QUEUE: usize = 8;
const COMMAND_QUEUE: usize = 16;
/// Attempts of the closing credit write.
const FINAL_FLUSH_ATTEMPTS: u32 = 2;

/// Everything that describes one session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub persona: AvatarPersona,
    pub display_name: Option<String>,
    /// Tail of the previous conversation with the same persona.
    pub previous_context: Option<String>,
    /// Credits are only persisted for known users.
    pub user_id: Option<String>,
    pub remaining_seconds: u32,
    pub tuning: EngineTuning,
}

/// Collaborators of a session.
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub playback: Box<dyn PlaybackSink>,
    /// Level meter fed by `playback`.
    pub output_level: OutputLevel,
    pub credit_store: Arc<dyn CreditStore>,
    pub evaluator: Arc<dyn Evaluator>,
    /// Microphone pipeline; released when the session is torn down.
    pub capture: Option<CapturePipeline>,
    /// Receiving end of [`frame_channel`].
    pub frames: mpsc::Receiver<EncodedFrame>,
}

/// Events a session reports to its owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Transcript(TranscriptUnit),
    Finished {
        result: SessionResult,
        reason: EndReason,
        final_minutes: u32,
    },
    Cancelled {
        final_minutes: u32,
    },
}

#[derive(Debug)]
enum SessionCommand {
    SendText(String),
    End,
    Cancel,
}

/// Creates the queue that carries captured frames into a session.
pub fn frame_channel() -> (mpsc::Sender<EncodedFrame>, mpsc::Receiver<EncodedFrame>) {
    mpsc::channel(FRAME_QUEUE)
}

/// Caller side of a running session.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    output_level: OutputLevel,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Sends a text turn to the conversation partner.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.commands
            .send(SessionCommand::SendText(text.into()))
            .await
            .map_err(|_| SessionError::NoActiveSession)
    }

    /// Ends the session and evaluates it. Calling it again, or after the
    /// session ended on its own, does nothing.
    pub async fn end(&self) {
        let _ = self.commands.send(SessionCommand::End).await;
    }

    /// Tears the session down without evaluating it.
    pub async fn cancel(&self) {
        let _ = self.commands.send(SessionCommand::Cancel).await;
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// RMS level of the partner's voice as currently played.
    pub fn output_level(&self) -> f32 {
        self.output_level.get()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

type ConnectResult = (SessionId, Result<TransportLink, TransportError>);

pub struct LiveSession {
    params: SessionParams,
    transport: Arc<dyn Transport>,
    credit_store: Arc<dyn CreditStore>,
    evaluator: Arc<dyn Evaluator>,
    capture: Option<CapturePipeline>,
    frames: Option<mpsc::Receiver<EncodedFrame>>,

    jitter: JitterBuffer,
    aggregator: TranscriptAggregator,
    reconnect: ReconnectController,
    idle: IdleMonitor,
    credit: CreditGovernor,

    status: watch::Sender<SessionStatus>,
    events: mpsc::Sender<SessionEvent>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    connected_tx: mpsc::UnboundedSender<ConnectResult>,

    next_session: SessionId,
    connecting: Option<SessionId>,
    connect_task: Option<JoinHandle<()>>,
    link: Option<TransportLink>,
    retry_at: Option<Pin<Box<Sleep>>>,

    active: bool,
    finishing: bool,
    speaking: bool,
    started_at: Instant,
}

impl LiveSession {
    /// Starts a session and begins connecting immediately.
    pub fn start(
        params: SessionParams,
        deps: SessionDeps,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<SessionHandle, SessionError> {
        if params.remaining_seconds == 0 {
            return Err(SessionError::NoCredits);
        }

        let now = Instant::now();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus {
            remaining_seconds: params.remaining_seconds,
            ..SessionStatus::default()
        });

        let output_level = deps.output_level;
        let tuning = &params.tuning;
        let session = Self {
            jitter: JitterBuffer::new(deps.playback, JitterConfig::from(tuning)),
            aggregator: TranscriptAggregator::new(),
            reconnect: ReconnectController::from_tuning(tuning),
            idle: IdleMonitor::new(tuning.idle_threshold(), now),
            credit: CreditGovernor::new(params.remaining_seconds),
            transport: deps.transport,
            credit_store: deps.credit_store,
            evaluator: deps.evaluator,
            capture: deps.capture,
            frames: Some(deps.frames),
            status: status_tx,
            events,
            inbound_tx,
            connected_tx,
            next_session: SessionId(1),
            connecting: None,
            connect_task: None,
            link: None,
            retry_at: None,
            active: true,
            finishing: false,
            speaking: false,
            started_at: now,
            params,
        };

        log::info!("Starting a session with {}", session.params.persona.name);
        let task = tokio::spawn(session.run(commands_rx, inbound_rx, connected_rx));

        Ok(SessionHandle {
            commands: commands_tx,
            status: status_rx,
            output_level,
            task,
        })
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        mut connected: mpsc::UnboundedReceiver<ConnectResult>,
    ) {
        let tuning = self.params.tuning.clone();
        let mut playback_poll = periodic(tuning.playback_poll());
        let mut transcript_tick = periodic(TRANSCRIPT_TICK);
        let mut idle_check = periodic(tuning.idle_check_interval());
        let mut credit_tick = periodic(std::time::Duration::from_secs(1));
        let mut credit_sync = periodic(tuning.credit_sync_interval());

        self.connect();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::SendText(text)) => self.send_text(text),
                    Some(SessionCommand::End) | None => {
                        self.finish(None, EndReason::Manual).await;
                        break;
                    }
                    Some(SessionCommand::Cancel) => {
                        self.cancel().await;
                        break;
                    }
                },
                Some(frame) = recv_or_pending(&mut self.frames) => self.forward_frame(frame),
                Some(event) = inbound.recv() => self.handle_inbound(event),
                Some((session, result)) = connected.recv() => {
                    if self.handle_connected(session, result) {
                        self.discard_queued_frames();
                    }
                }
                _ = playback_poll.tick() => self.poll_playback(),
                _ = transcript_tick.tick() => self.flush_transcript().await,
                _ = idle_check.tick() => self.check_idle(),
                _ = credit_tick.tick() => {
                    if self.tick_credit() {
                        log::info!("Credits exhausted, ending the session");
                        self.finish(Some(0), EndReason::CreditExhausted).await;
                        break;
                    }
                }
                _ = credit_sync.tick() => self.sync_credit(),
                _ = sleep_or_pending(&mut self.retry_at) => {
                    self.retry_at = None;
                    self.connect();
                }
            }
        }

        log::debug!("Session actor stopped");
    }

    fn connect(&mut self) {
        if !self.active || self.finishing {
            return;
        }
        if !self.reconnect.try_begin_connect() {
            log::debug!("A connection attempt is already in flight");
            return;
        }

        let session = self.next_session;
        self.next_session = session.next();
        self.connecting = Some(session);

        let reconnecting = self.reconnect.is_reconnecting();
        self.update_status(|status| {
            status.connection = if reconnecting {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            status.reconnecting = reconnecting;
        });

        log::info!(
            "Connecting session {session} (retry {}/{})",
            self.reconnect.retry_count(),
            self.params.tuning.max_retries
        );
        let setup = SessionSetup {
            voice: self.params.persona.voice,
            system_instruction: self.params.persona.system_instruction(
                self.params.display_name.as_deref(),
                self.params.previous_context.as_deref(),
            ),
        };
        let open = self
            .transport
            .open(setup, TransportEvents::new(session, self.inbound_tx.clone()));
        let connected_tx = self.connected_tx.clone();
        self.connect_task = Some(tokio::spawn(async move {
            let result = open.await;
            let _ = connected_tx.send((session, result));
        }));
    }

    /// Applies the outcome of a connection attempt. Returns whether a link
    /// was opened.
    fn handle_connected(&mut self, session: SessionId, result: Result<TransportLink, TransportError>) -> bool {
        if self.connecting != Some(session) {
            log::debug!("Dropping the outcome of superseded attempt {session}");
            return false;
        }
        self.connecting = None;
        self.connect_task = None;

        if !self.active || self.finishing {
            self.reconnect.release();
            return false;
        }

        match result {
            Ok(link) => {
                self.reconnect.on_open();
                self.jitter.reset();
                self.link = Some(link);
                self.idle.touch(Instant::now());
                self.update_status(|status| {
                    status.connection = ConnectionState::Open;
                    status.reconnecting = false;
                    status.last_error = None;
                });
                log::info!("Session {session} is open");
                true
            }
            Err(err) if !err.is_recoverable() => {
                log::error!("Session {session} cannot be opened: {err}");
                self.reconnect.release();
                self.give_up(SessionError::MissingApiKey);
                false
            }
            Err(err) => {
                log::warn!("Failed to open session {session}: {err}");
                self.handle_drop();
                false
            }
        }
    }

    fn handle_inbound(&mut self, Inbound { session, event }: Inbound) {
        let current = self.link.as_ref().map(TransportLink::session);
        if !self.active || current != Some(session) {
            log::debug!("Dropping an event of stale session {session}");
            return;
        }

        let now = Instant::now();
        match event {
            InboundEvent::TranscriptFragment { role, text } => {
                if self.aggregator.push(role, &text) {
                    self.idle.touch(now);
                }
            }
            InboundEvent::AudioFragment { data } => {
                self.jitter.push_encoded(&data);
                self.refresh_speaking(now);
            }
            InboundEvent::Interrupted => {
                log::debug!("The partner was interrupted");
                self.jitter.reset();
                self.refresh_speaking(now);
            }
            InboundEvent::TurnComplete => {
                self.jitter.finish_turn();
                self.refresh_speaking(now);
            }
            InboundEvent::Closed { reason } => {
                log::warn!(
                    "Session {session} closed: {}",
                    reason.as_deref().unwrap_or("no reason given")
                );
                self.handle_drop();
            }
            InboundEvent::Error(message) => {
                log::warn!("Session {session} failed: {message}");
                self.handle_drop();
            }
        }
    }

    /// Reacts to a lost link or a failed attempt.
    fn handle_drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.jitter.reset();
        self.refresh_speaking(Instant::now());

        match self.reconnect.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                log::warn!(
                    "Reconnecting in {delay:?} (attempt {attempt}/{})",
                    self.params.tuning.max_retries
                );
                self.retry_at = Some(Box::pin(sleep(delay)));
                self.update_status(|status| {
                    status.connection = ConnectionState::Reconnecting;
                    status.reconnecting = true;
                    status.last_error = Some(SessionError::Reconnecting);
                });
            }
            ReconnectDecision::GiveUp => self.give_up(SessionError::ConnectionLost),
        }
    }

    /// Stops the session after an unrecoverable failure. The microphone and
    /// the playback queue are released; the session stays around until the
    /// caller ends or cancels it.
    fn give_up(&mut self, error: SessionError) {
        log::error!("Giving up on the session: {error}");
        self.active = false;
        self.retry_at = None;
        self.release_audio();
        self.speaking = false;
        self.update_status(|status| {
            status.connection = ConnectionState::Closed;
            status.reconnecting = false;
            status.speaking = false;
            status.last_error = Some(error);
        });
    }

    /// Drops the microphone, the frame queue and everything scheduled for
    /// playback.
    fn release_audio(&mut self) {
        self.jitter.reset();
        self.capture = None;
        self.frames = None;
    }

    /// Audio captured while disconnected is stale.
    fn discard_queued_frames(&mut self) {
        if let Some(frames) = self.frames.as_mut() {
            while frames.try_recv().is_ok() {}
        }
    }

    fn forward_frame(&mut self, frame: EncodedFrame) {
        if self.finishing {
            return;
        }
        if let Some(link) = &self.link {
            link.send(OutboundMessage::Audio(frame));
        }
    }

    fn send_text(&mut self, text: String) {
        if self.finishing {
            return;
        }
        match &self.link {
            Some(link) => {
                link.send(OutboundMessage::Text(text));
            }
            None => log::debug!("No open link, dropping a text turn"),
        }
    }

    fn poll_playback(&mut self) {
        let now = Instant::now();
        self.jitter.poll(now);
        self.refresh_speaking(now);
    }

    fn refresh_speaking(&mut self, now: Instant) {
        let speaking = self.jitter.is_speaking(now);
        if speaking == self.speaking {
            return;
        }
        self.speaking = speaking;
        self.idle.touch(now);
        self.update_status(|status| status.speaking = speaking);
    }

    async fn flush_transcript(&mut self) {
        for unit in self.aggregator.tick() {
            let _ = self.events.send(SessionEvent::Transcript(unit)).await;
        }
    }

    fn check_idle(&mut self) {
        let now = Instant::now();
        if self.link.is_none() || self.speaking || self.finishing {
            return;
        }
        if self.idle.check(now) {
            log::info!("Nudging the partner after a silence");
            self.send_text(IDLE_NUDGE.to_string());
        }
    }

    /// Counts one second down while connected. Returns `true` once credit is
    /// exhausted.
    fn tick_credit(&mut self) -> bool {
        if self.link.is_none() || self.finishing {
            return false;
        }

        match self.credit.tick() {
            CreditTick::Exhausted => true,
            CreditTick::Remaining(seconds) => {
                self.update_status(|status| status.remaining_seconds = seconds);
                false
            }
        }
    }

    fn sync_credit(&mut self) {
        if self.finishing {
            return;
        }
        let Some(user_id) = self.params.user_id.clone() else {
            return;
        };
        if let Some(minutes) = self.credit.take_sync() {
            tokio::spawn(persist_minutes(self.credit_store.clone(), user_id, minutes, 1));
        }
    }

    /// Releases the link, the playback queue and the microphone.
    fn disconnect(&mut self) {
        self.active = false;
        self.reconnect.reset();
        self.retry_at = None;
        self.connecting = None;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.release_audio();
        self.speaking = false;
        self.update_status(|status| {
            status.connection = ConnectionState::Closed;
            status.speaking = false;
            status.reconnecting = false;
        });
    }

    /// Writes the closing balance, retrying once.
    async fn flush_final_credit(&mut self, forced: Option<u32>) -> u32 {
        let minutes = self
            .credit
            .take_final(forced)
            .unwrap_or_else(|| self.credit.remaining_minutes());
        if let Some(user_id) = self.params.user_id.clone() {
            persist_minutes(self.credit_store.clone(), user_id, minutes, FINAL_FLUSH_ATTEMPTS).await;
        }
        minutes
    }

    async fn finish(&mut self, forced: Option<u32>, reason: EndReason) {
        if self.finishing {
            return;
        }
        self.finishing = true;
        self.update_status(|status| status.finishing = true);
        self.disconnect();

        // whatever is still buffered becomes part of the record
        self.flush_transcript().await;
        let transcript = self.aggregator.finish().raw().to_string();
        let duration_seconds = self.started_at.elapsed().as_secs_f64();

        let evaluator = self.evaluator.clone();
        let evaluation = evaluate_or_fallback(evaluator.as_ref(), transcript.clone());
        let (final_minutes, evaluation) = tokio::join!(self.flush_final_credit(forced), evaluation);

        log::info!("Session finished ({reason:?}), {final_minutes} minute(-s) left");
        let result = SessionResult {
            evaluation,
            transcript,
            duration_seconds,
            avatar_name: self.params.persona.name.clone(),
        };
        let _ = self
            .events
            .send(SessionEvent::Finished {
                result,
                reason,
                final_minutes,
            })
            .await;
    }

    async fn cancel(&mut self) {
        if self.finishing {
            return;
        }
        self.finishing = true;
        self.update_status(|status| status.finishing = true);
        self.disconnect();

        let final_minutes = self.flush_final_credit(None).await;
        log::info!("Session cancelled, {final_minutes} minute(-s) left");
        let _ = self.events.send(SessionEvent::Cancelled { final_minutes }).await;
    }

    fn update_status(&self, update: impl FnOnce(&mut SessionStatus)) {
        self.status.send_if_modified(|status| {
            let before = status.clone();
            update(status);
            *status != before
        });
    }
}

fn periodic(period: std::time::Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}

async fn sleep_or_pending(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

async fn recv_or_pending<T>(receiver: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => future::pending().await,
    }
}
