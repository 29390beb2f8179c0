#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use futures_util::future::BoxFuture;
use pratique_audio::{
    capture::EncodedFrame,
    playback::{AudioBuffer, OutputLevel, PLAYBACK_SOURCE_RATE, PlaybackError, PlaybackSink, SourceId},
};
use pratique_bridge::{config::EngineTuning, evaluation::Evaluation, persona::persona_by_name};
use pratique_engine::{
    credit::CreditStore,
    evaluator::{EvaluationError, Evaluator},
    session::{LiveSession, SessionDeps, SessionEvent, SessionHandle, SessionParams, frame_channel},
    store::StoreError,
    transport::{
        InboundEvent, OutboundMessage, SessionSetup, Transport, TransportError, TransportEvents,
        TransportLink,
    },
};
use tokio::sync::mpsc;

pub const USER_ID: &str = "user-1";

struct OpenedSession {
    events: TransportEvents,
    outbound: mpsc::Receiver<OutboundMessage>,
    setup: SessionSetup,
}

#[derive(Default)]
struct TransportState {
    attempts: usize,
    opened: Vec<OpenedSession>,
}

/// Transport whose attempts succeed or fail on a script.
#[derive(Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
    successes: Option<usize>,
    missing_key: bool,
}

impl FakeTransport {
    /// Every attempt opens.
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            successes: None,
            missing_key: false,
        }
    }

    /// The first `successes` attempts open, every later one fails.
    pub fn failing_after(successes: usize) -> Self {
        Self {
            successes: Some(successes),
            ..Self::new()
        }
    }

    pub fn missing_key() -> Self {
        Self {
            missing_key: true,
            ..Self::new()
        }
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened.len()
    }

    /// Delivers an event as if it came from the `index`-th opened session.
    pub fn emit(&self, index: usize, event: InboundEvent) {
        let state = self.state.lock().unwrap();
        state.opened[index].events.emit(event);
    }

    /// Everything the engine sent on the `index`-th opened session so far.
    pub fn drain_outbound(&self, index: usize) -> Vec<OutboundMessage> {
        let mut state = self.state.lock().unwrap();
        let mut messages = Vec::new();
        while let Ok(message) = state.opened[index].outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn setup(&self, index: usize) -> SessionSetup {
        self.state.lock().unwrap().opened[index].setup.clone()
    }
}

impl Transport for FakeTransport {
    fn open(
        &self,
        setup: SessionSetup,
        events: TransportEvents,
    ) -> BoxFuture<'static, Result<TransportLink, TransportError>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            if self.missing_key {
                Err(TransportError::MissingApiKey)
            } else if self.successes.is_some_and(|successes| state.opened.len() >= successes) {
                Err(TransportError::Rejected("scripted failure".to_string()))
            } else {
                let (tx, rx) = mpsc::channel(64);
                let link = TransportLink::new(events.session(), tx);
                state.opened.push(OpenedSession {
                    events,
                    outbound: rx,
                    setup,
                });
                Ok(link)
            }
        };
        Box::pin(async move { result })
    }
}

#[derive(Default)]
pub struct SinkState {
    pub now: f64,
    next_id: u64,
    pub scheduled: Vec<(SourceId, f64, f64)>,
    pub finished: Vec<SourceId>,
    pub stop_calls: usize,
}

/// Playback sink with a manually driven clock.
#[derive(Clone, Default)]
pub struct FakeSink(pub Arc<Mutex<SinkState>>);

impl FakeSink {
    pub fn scheduled_starts(&self) -> Vec<f64> {
        self.0.lock().unwrap().scheduled.iter().map(|(_, start, _)| *start).collect()
    }

    pub fn stop_calls(&self) -> usize {
        self.0.lock().unwrap().stop_calls
    }
}

impl PlaybackSink for FakeSink {
    fn sample_rate(&self) -> u32 {
        PLAYBACK_SOURCE_RATE
    }

    fn current_time(&self) -> f64 {
        self.0.lock().unwrap().now
    }

    fn schedule(&mut self, buffer: AudioBuffer, start_time: f64) -> Result<SourceId, PlaybackError> {
        let mut state = self.0.lock().unwrap();
        state.next_id += 1;
        let id = SourceId(state.next_id);
        state.scheduled.push((id, start_time, buffer.duration()));
        Ok(id)
    }

    fn stop_all(&mut self) {
        let mut state = self.0.lock().unwrap();
        state.stop_calls += 1;
        state.finished.clear();
    }

    fn drain_finished(&mut self) -> Vec<SourceId> {
        std::mem::take(&mut self.0.lock().unwrap().finished)
    }
}

/// Credit store that records every write.
#[derive(Clone, Default)]
pub struct FakeStore {
    pub writes: Arc<Mutex<Vec<(String, u32)>>>,
}

impl FakeStore {
    pub fn writes(&self) -> Vec<(String, u32)> {
        self.writes.lock().unwrap().clone()
    }
}

impl CreditStore for FakeStore {
    fn persist_remaining_minutes(
        &self,
        user_id: &str,
        minutes: u32,
    ) -> BoxFuture<'static, Result<(), StoreError>> {
        self.writes.lock().unwrap().push((user_id.to_string(), minutes));
        Box::pin(async { Ok(()) })
    }
}

/// Evaluator that counts its calls and either succeeds or fails.
#[derive(Clone)]
pub struct FakeEvaluator {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeEvaluator {
    pub fn ok() -> Self {
        Self {
            calls: Arc::default(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Evaluator for FakeEvaluator {
    fn evaluate(&self, _transcript: String) -> BoxFuture<'static, Result<Evaluation, EvaluationError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail;
        Box::pin(async move {
            if fail {
                Err(EvaluationError::Exhausted)
            } else {
                Ok(Evaluation::uniform(80, "Muito bem!"))
            }
        })
    }
}

/// A started session together with its fakes.
pub struct Harness {
    pub handle: SessionHandle,
    pub events: mpsc::Receiver<SessionEvent>,
    pub frames: mpsc::Sender<EncodedFrame>,
    pub transport: FakeTransport,
    pub sink: FakeSink,
    pub store: FakeStore,
    pub evaluator: FakeEvaluator,
}

impl Harness {
    pub fn start(remaining_seconds: u32, transport: FakeTransport, evaluator: FakeEvaluator) -> Self {
        let sink = FakeSink::default();
        let store = FakeStore::default();
        let (frames_tx, frames_rx) = frame_channel();
        let (events_tx, events_rx) = mpsc::channel(64);

        let params = SessionParams {
            persona: persona_by_name("Léo").unwrap(),
            display_name: Some("Ana".to_string()),
            previous_context: None,
            user_id: Some(USER_ID.to_string()),
            remaining_seconds,
            tuning: EngineTuning::default(),
        };
        let deps = SessionDeps {
            transport: Arc::new(transport.clone()),
            playback: Box::new(sink.clone()),
            output_level: OutputLevel::default(),
            credit_store: Arc::new(store.clone()),
            evaluator: Arc::new(evaluator.clone()),
            capture: None,
            frames: frames_rx,
        };

        let handle = LiveSession::start(params, deps, events_tx).unwrap();
        Self {
            handle,
            events: events_rx,
            frames: frames_tx,
            transport,
            sink,
            store,
            evaluator,
        }
    }

    /// Waits for the end of the session, skipping transcript units.
    pub async fn next_terminal_event(&mut self) -> SessionEvent {
        loop {
            match self.events.recv().await {
                Some(SessionEvent::Transcript(_)) => continue,
                Some(event) => return event,
                None => panic!("session stopped without a terminal event"),
            }
        }
    }

    /// Transcript units received so far.
    pub fn transcript_units(&mut self) -> Vec<pratique_transcript::TranscriptUnit> {
        let mut units = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let SessionEvent::Transcript(unit) = event {
                units.push(unit);
            }
        }
        units
    }
}

/// Lets spawned tasks and short timers run on the paused clock.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
