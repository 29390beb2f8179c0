mod common;

use std::time::Duration;

use common::{FakeEvaluator, FakeTransport, Harness, USER_ID, settle};
use pratique_audio::{capture::EncodedFrame, pcm::encode_pcm16_base64};
use pratique_bridge::{
    evaluation::Evaluation,
    session::{ConnectionState, EndReason, SessionError},
};
use pratique_engine::{
    idle::IDLE_NUDGE,
    session::SessionEvent,
    transport::{InboundEvent, OutboundMessage},
};
use pratique_transcript::Role;

fn fragment(role: Role, text: &str) -> InboundEvent {
    InboundEvent::TranscriptFragment {
        role,
        text: text.to_string(),
    }
}

/// 0.4 s of silence at the playback source rate.
fn speech_fragment() -> InboundEvent {
    InboundEvent::AudioFragment {
        data: encode_pcm16_base64(&vec![0.0; 9_600]),
    }
}

#[tokio::test(start_paused = true)]
async fn connects_with_the_persona_setup() {
    let harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    let status = harness.handle.status();
    assert_eq!(status.connection, ConnectionState::Open);
    assert_eq!(status.remaining_seconds, 600);
    assert_eq!(harness.transport.attempts(), 1);

    let setup = harness.transport.setup(0);
    assert_eq!(setup.voice.as_str(), "Puck");
    assert!(setup.system_instruction.contains("Ana"));
}

#[tokio::test(start_paused = true)]
async fn ending_twice_evaluates_once() {
    let mut harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    harness.handle.end().await;
    harness.handle.end().await;

    match harness.next_terminal_event().await {
        SessionEvent::Finished {
            result,
            reason,
            final_minutes,
        } => {
            assert_eq!(reason, EndReason::Manual);
            assert_eq!(final_minutes, 10);
            assert_eq!(result.avatar_name, "Léo");
            assert_eq!(result.evaluation, Evaluation::uniform(80, "Muito bem!"));
        }
        event => panic!("unexpected event {event:?}"),
    }

    assert!(harness.events.recv().await.is_none());
    assert_eq!(harness.evaluator.calls(), 1);
    assert_eq!(harness.store.writes(), vec![(USER_ID.to_string(), 10)]);
    assert_eq!(harness.handle.status().connection, ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn reconnects_a_bounded_number_of_times() {
    let harness = Harness::start(600, FakeTransport::failing_after(1), FakeEvaluator::ok());
    settle().await;

    harness.transport.emit(0, InboundEvent::Closed { reason: None });
    settle().await;
    let status = harness.handle.status();
    assert_eq!(status.connection, ConnectionState::Reconnecting);
    assert_eq!(status.last_error, Some(SessionError::Reconnecting));

    // backoff of 1 + 2 + 3 + 4 + 5 seconds
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(harness.transport.attempts(), 6);
    let status = harness.handle.status();
    assert_eq!(status.connection, ConnectionState::Closed);
    assert_eq!(status.last_error, Some(SessionError::ConnectionLost));
    assert!(!status.reconnecting);
    // the microphone and the playback queue are released
    assert!(harness.frames.is_closed());
    assert!(!status.speaking);
    // giving up does not evaluate on its own
    assert_eq!(harness.evaluator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn a_recovered_link_resets_the_retry_budget() {
    let harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    harness.transport.emit(0, InboundEvent::Error("reset by peer".to_string()));
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    assert_eq!(harness.transport.opened(), 2);
    let status = harness.handle.status();
    assert_eq!(status.connection, ConnectionState::Open);
    assert_eq!(status.last_error, None);
}

#[tokio::test(start_paused = true)]
async fn missing_api_key_is_not_retried() {
    let harness = Harness::start(600, FakeTransport::missing_key(), FakeEvaluator::ok());
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(harness.transport.attempts(), 1);
    let status = harness.handle.status();
    assert_eq!(status.connection, ConnectionState::Closed);
    assert_eq!(status.last_error, Some(SessionError::MissingApiKey));
    assert!(harness.frames.is_closed());
}

#[tokio::test(start_paused = true)]
async fn events_of_a_superseded_link_are_ignored() {
    let mut harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    harness.transport.emit(0, InboundEvent::Closed { reason: Some("going away".to_string()) });
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(harness.transport.opened(), 2);

    harness.transport.emit(0, fragment(Role::Agent, "stale"));
    harness.transport.emit(1, fragment(Role::Agent, "fresh"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let units = harness.transcript_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].text, "fresh");
}

#[tokio::test(start_paused = true)]
async fn transcript_fragments_are_coalesced() {
    let mut harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    harness.transport.emit(0, fragment(Role::User, "How are"));
    harness.transport.emit(0, fragment(Role::User, " you?"));
    harness.transport.emit(0, fragment(Role::Agent, "(System: ignored)"));
    harness.transport.emit(0, fragment(Role::Agent, "Great, thanks!"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let units = harness.transcript_units();
    assert_eq!(units.len(), 2);
    assert!(units[0].is_user());
    assert_eq!(units[0].text, "How are you?");
    assert_eq!(units[1].text, "Great, thanks!");

    harness.handle.end().await;
    match harness.next_terminal_event().await {
        SessionEvent::Finished { result, .. } => {
            assert_eq!(result.transcript, "User: How are you?\nAvatar: Great, thanks!\n");
        }
        event => panic!("unexpected event {event:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn speech_is_pre_rolled_and_interrupted() {
    let harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;
    let stops_before = harness.sink.stop_calls();

    harness.transport.emit(0, speech_fragment());
    harness.transport.emit(0, speech_fragment());
    settle().await;
    assert!(harness.sink.scheduled_starts().is_empty());
    assert!(harness.handle.status().speaking);

    harness.transport.emit(0, speech_fragment());
    settle().await;
    let starts = harness.sink.scheduled_starts();
    assert_eq!(starts.len(), 3);
    for (start, expected) in starts.iter().zip([0.1, 0.5, 0.9]) {
        assert!((start - expected).abs() < 1e-6, "{start} != {expected}");
    }

    harness.transport.emit(0, InboundEvent::Interrupted);
    settle().await;
    assert_eq!(harness.sink.stop_calls(), stops_before + 1);
    assert!(!harness.handle.status().speaking);
}

#[tokio::test(start_paused = true)]
async fn short_replies_play_on_turn_complete() {
    let harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    harness.transport.emit(0, speech_fragment());
    harness.transport.emit(0, InboundEvent::TurnComplete);
    settle().await;

    assert_eq!(harness.sink.scheduled_starts().len(), 1);
}

fn texts(messages: Vec<OutboundMessage>) -> Vec<String> {
    messages
        .into_iter()
        .filter_map(|message| match message {
            OutboundMessage::Text(text) => Some(text),
            OutboundMessage::Audio(_) => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn idle_silence_triggers_one_nudge() {
    let harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    tokio::time::sleep(Duration::from_millis(7_500)).await;
    assert!(texts(harness.transport.drain_outbound(0)).is_empty());

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(texts(harness.transport.drain_outbound(0)), vec![IDLE_NUDGE.to_string()]);

    // the idle clock restarted at the nudge
    tokio::time::sleep(Duration::from_millis(6_000)).await;
    assert!(texts(harness.transport.drain_outbound(0)).is_empty());

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(texts(harness.transport.drain_outbound(0)), vec![IDLE_NUDGE.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn no_nudge_while_the_partner_is_speaking() {
    let harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    // the fake sink never finishes these, so they stay in flight
    for _ in 0..3 {
        harness.transport.emit(0, speech_fragment());
    }
    settle().await;
    assert_eq!(harness.sink.scheduled_starts().len(), 3);

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(harness.handle.status().speaking);
    assert!(texts(harness.transport.drain_outbound(0)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn no_nudge_while_reconnecting() {
    let harness = Harness::start(600, FakeTransport::failing_after(1), FakeEvaluator::ok());
    settle().await;
    harness.transport.emit(0, InboundEvent::Closed { reason: None });

    // still inside the backoff of 1 + 2 + 3 + 4 + 5 seconds
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert!(harness.handle.status().reconnecting);
    assert_eq!(harness.transport.opened(), 1);
    assert!(texts(harness.transport.drain_outbound(0)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn outbound_traffic_reaches_the_open_link() {
    let harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;

    let frame = EncodedFrame::from_samples(&[0.0; 4096], 16_000);
    harness.frames.send(frame.clone()).await.unwrap();
    harness.handle.send_text("I like jazz").await.unwrap();
    settle().await;

    assert_eq!(
        harness.transport.drain_outbound(0),
        vec![OutboundMessage::Audio(frame), OutboundMessage::Text("I like jazz".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn credit_exhaustion_ends_the_session_once() {
    let mut harness = Harness::start(3, FakeTransport::new(), FakeEvaluator::ok());

    match harness.next_terminal_event().await {
        SessionEvent::Finished {
            reason,
            final_minutes,
            ..
        } => {
            assert_eq!(reason, EndReason::CreditExhausted);
            assert_eq!(final_minutes, 0);
        }
        event => panic!("unexpected event {event:?}"),
    }

    assert!(harness.events.recv().await.is_none());
    assert_eq!(harness.evaluator.calls(), 1);
    assert_eq!(harness.store.writes(), vec![(USER_ID.to_string(), 0)]);
}

#[tokio::test(start_paused = true)]
async fn credits_are_synced_on_minute_drift() {
    let harness = Harness::start(70, FakeTransport::new(), FakeEvaluator::ok());
    tokio::time::sleep(Duration::from_millis(16_500)).await;

    // the 15 s check sees the balance below one whole minute
    assert_eq!(harness.store.writes(), vec![(USER_ID.to_string(), 0)]);
    assert_eq!(harness.handle.status().remaining_seconds, 54);
}

#[tokio::test(start_paused = true)]
async fn failed_evaluation_falls_back() {
    let mut harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::failing());
    settle().await;
    harness.handle.end().await;

    match harness.next_terminal_event().await {
        SessionEvent::Finished { result, .. } => assert_eq!(result.evaluation, Evaluation::fallback()),
        event => panic!("unexpected event {event:?}"),
    }
    assert_eq!(harness.evaluator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_persists_without_evaluating() {
    let mut harness = Harness::start(600, FakeTransport::new(), FakeEvaluator::ok());
    settle().await;
    harness.handle.cancel().await;

    match harness.next_terminal_event().await {
        SessionEvent::Cancelled { final_minutes } => assert_eq!(final_minutes, 10),
        event => panic!("unexpected event {event:?}"),
    }
    assert_eq!(harness.evaluator.calls(), 0);
    assert_eq!(harness.store.writes(), vec![(USER_ID.to_string(), 10)]);
}
