//! Session lifecycle handlers: start, text turns, status, end and cancel.
//!
//! A started session reports back through a forwarding task that turns
//! [`SessionEvent`]s and status changes into bridge messages and stores the
//! finished session.

use pratique_audio::{
    capture::{CaptureError, CapturePipeline},
    device::{resolve_input_device, resolve_output_device},
    playback::{Mixer, OutputLevel, PlaybackError},
};
use pratique_bridge::{
    MessageFromEngine,
    persona::{builtin_personas, persona_by_name},
    session::SessionError,
};
use tokio::sync::{mpsc, watch};

use crate::{
    session::{LiveSession, SessionDeps, SessionEvent, SessionParams, frame_channel},
    state::ActiveSession,
};

const SESSION_EVENTS_CAPACITY: usize = 64;

fn classify_capture_error(err: CaptureError) -> SessionError {
    match err {
        CaptureError::PermissionDenied => SessionError::PermissionDenied,
        CaptureError::DeviceUnavailable => SessionError::DeviceUnavailable,
        CaptureError::Unknown(_) => SessionError::AudioFailure,
    }
}

fn classify_playback_error(err: PlaybackError) -> SessionError {
    match err {
        PlaybackError::Device(err) => classify_capture_error(CaptureError::from(err)),
        PlaybackError::QueueFull => SessionError::AudioFailure,
    }
}

async fn send_error(context: &super::AppContextHandle, error: SessionError) {
    context.send(MessageFromEngine::SessionErrorResponse(error)).await;
}

/// Handles a personas list request.
pub async fn handle_personas_list_request(context: super::AppContextHandle) {
    context
        .send(MessageFromEngine::PersonasListResponse(builtin_personas()))
        .await;
}

/// Handles a start request: resolves the persona and the credit balance,
/// acquires the audio devices and starts the session actor.
pub async fn handle_start_session_request(context: super::AppContextHandle, persona: Option<String>) {
    let (config, profile_store, transport, evaluator, credit_store, host, running) = {
        let state = context.state.read().await;
        (
            state.config.clone(),
            state.profile_store.clone(),
            state.transport.clone(),
            state.evaluator.clone(),
            state.credit_store.clone(),
            state.active_host.clone(),
            state
                .session
                .as_ref()
                .is_some_and(|session| !session.handle.is_finished()),
        )
    };

    if running {
        send_error(&context, SessionError::SessionActive).await;
        return;
    }

    let persona_name = persona.unwrap_or_else(|| config.profile.default_persona.clone());
    let Some(persona) = persona_by_name(&persona_name) else {
        log::warn!("Unknown persona {persona_name:?}");
        send_error(&context, SessionError::UnknownPersona).await;
        return;
    };

    let user_id = config.profile.user_id.clone();
    let mut remaining_minutes = config.profile.credits_remaining_minutes;
    let mut previous_context = None;
    if let (Some(store), Some(user_id)) = (&profile_store, &user_id) {
        match store.fetch_remaining_minutes(user_id).await {
            Ok(minutes) => remaining_minutes = minutes,
            Err(err) => log::warn!("Using the local credit balance, the profile store failed: {err}"),
        }
        match store.last_session_context(user_id, &persona.name).await {
            Ok(context) => previous_context = context,
            Err(err) => log::warn!("Starting without previous context: {err}"),
        }
    }

    // refused before any hardware is touched
    if remaining_minutes == 0 {
        send_error(&context, SessionError::NoCredits).await;
        return;
    }

    let devices = &config.audio_device_config;
    let input = match resolve_input_device(&host, devices.selected_input_device_id.as_deref()) {
        Ok(input) => input,
        Err(err) => {
            log::error!("Failed to resolve the input device: {err}");
            send_error(&context, classify_capture_error(err.into())).await;
            return;
        }
    };
    let output = match resolve_output_device(&host, devices.selected_output_device_id.as_deref()) {
        Ok(output) => output,
        Err(err) => {
            log::error!("Failed to resolve the output device: {err}");
            send_error(&context, classify_capture_error(err.into())).await;
            return;
        }
    };

    let (frames_tx, frames_rx) = frame_channel();
    let capture = match CapturePipeline::start(&input, move |frame| {
        // a full queue means the session is behind; the frame is dropped
        let _ = frames_tx.try_send(frame);
    }) {
        Ok(capture) => capture,
        Err(err) => {
            log::error!("Failed to start capturing from {input}: {err}");
            send_error(&context, classify_capture_error(err)).await;
            return;
        }
    };

    let output_level = OutputLevel::default();
    let mixer = match Mixer::open(&output, output_level.clone()) {
        Ok(mixer) => mixer,
        Err(err) => {
            log::error!("Failed to open {output} for playback: {err}");
            send_error(&context, classify_playback_error(err)).await;
            return;
        }
    };

    let params = SessionParams {
        persona: persona.clone(),
        display_name: config.profile.display_name.clone(),
        previous_context,
        user_id,
        remaining_seconds: remaining_minutes.saturating_mul(60),
        tuning: config.engine.clone(),
    };
    let deps = SessionDeps {
        transport,
        playback: Box::new(mixer),
        output_level,
        credit_store,
        evaluator,
        capture: Some(capture),
        frames: frames_rx,
    };

    let (events_tx, events_rx) = mpsc::channel(SESSION_EVENTS_CAPACITY);
    let handle = match LiveSession::start(params, deps, events_tx) {
        Ok(handle) => handle,
        Err(err) => {
            send_error(&context, err).await;
            return;
        }
    };
    let status = handle.watch_status();
    let remaining_seconds = handle.status().remaining_seconds;

    {
        let mut state = context.state.write().await;
        state.session = Some(ActiveSession {
            handle,
            persona: persona.clone(),
        });
    }

    tokio::spawn(forward_session_events(context.clone(), events_rx, status));
    context
        .send(MessageFromEngine::SessionStartedResponse {
            persona,
            remaining_seconds,
        })
        .await;
}

async fn forward_session_events(
    context: super::AppContextHandle,
    mut events: mpsc::Receiver<SessionEvent>,
    mut status: watch::Receiver<pratique_bridge::session::SessionStatus>,
) {
    let mut status_open = true;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_session_event(&context, event).await,
                None => break,
            },
            changed = status.changed(), if status_open => match changed {
                Ok(()) => {
                    let update = status.borrow_and_update().clone();
                    context.send(MessageFromEngine::SessionStatusUpdate(update)).await;
                }
                Err(_) => status_open = false,
            },
        }
    }
    log::debug!("Session event forwarding stopped");
}

async fn handle_session_event(context: &super::AppContextHandle, event: SessionEvent) {
    match event {
        SessionEvent::Transcript(unit) => {
            context
                .send(MessageFromEngine::TranscriptUpdate {
                    is_user: unit.is_user(),
                    text: unit.text,
                })
                .await;
        }
        SessionEvent::Finished {
            result,
            reason,
            final_minutes,
        } => {
            let (user_id, profile_store) = release_session(context, final_minutes).await;
            if let (Some(user_id), Some(store)) = (user_id, profile_store) {
                if let Err(err) = store.save_session(&user_id, &result).await {
                    log::error!("Failed to save the session: {err}");
                }
            }
            context
                .send(MessageFromEngine::SessionFinished {
                    result,
                    reason,
                    final_minutes,
                })
                .await;
        }
        SessionEvent::Cancelled { final_minutes } => {
            release_session(context, final_minutes).await;
            context
                .send(MessageFromEngine::SessionCancelled { final_minutes })
                .await;
        }
    }
}

/// Forgets the session and records the closing balance in memory.
async fn release_session(
    context: &super::AppContextHandle,
    final_minutes: u32,
) -> (Option<String>, Option<crate::store::ProfileStore>) {
    let mut state = context.state.write().await;
    state.session = None;
    state.config.profile.credits_remaining_minutes = final_minutes;
    (state.config.profile.user_id.clone(), state.profile_store.clone())
}

/// Forwards a text turn to the running session.
pub async fn handle_send_text_request(context: super::AppContextHandle, text: String) {
    let result = {
        let state = context.state.read().await;
        match &state.session {
            Some(session) => session.handle.send_text(text).await,
            None => Err(SessionError::NoActiveSession),
        }
    };
    if let Err(err) = result {
        send_error(&context, err).await;
    }
}

/// Reports the current session status and output level.
pub async fn handle_session_status_request(context: super::AppContextHandle) {
    let response = {
        let state = context.state.read().await;
        state
            .session
            .as_ref()
            .map(|session| MessageFromEngine::SessionStatusResponse {
                status: session.handle.status(),
                output_level: session.handle.output_level(),
            })
    };
    match response {
        Some(response) => context.send(response).await,
        None => send_error(&context, SessionError::NoActiveSession).await,
    }
}

/// Ends the running session. The result arrives through the forwarding task.
pub async fn handle_end_session_request(context: super::AppContextHandle) {
    let state = context.state.read().await;
    match &state.session {
        Some(session) => {
            log::info!("Ending the session with {}", session.persona.name);
            session.handle.end().await;
        }
        None => log::debug!("No session to end"),
    }
}

/// Abandons the running session, persisting the balance once.
pub async fn handle_cancel_session_request(context: super::AppContextHandle) {
    let cancelled = {
        let state = context.state.read().await;
        match &state.session {
            Some(session) => {
                session.handle.cancel().await;
                true
            }
            None => false,
        }
    };
    if !cancelled {
        send_error(&context, SessionError::NoActiveSession).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_errors_map_to_user_errors() {
        assert_eq!(
            classify_capture_error(CaptureError::PermissionDenied),
            SessionError::PermissionDenied
        );
        assert_eq!(
            classify_capture_error(CaptureError::DeviceUnavailable),
            SessionError::DeviceUnavailable
        );
        assert_eq!(
            classify_capture_error(CaptureError::Unknown("boom".to_string())),
            SessionError::AudioFailure
        );
        assert_eq!(
            classify_playback_error(PlaybackError::QueueFull),
            SessionError::AudioFailure
        );
    }
}
