//! Websocket adapter for the Gemini Live API.
//!
//! The adapter performs the setup handshake, then splits the socket into a
//! writer task fed by the link's outbound queue and a reader task that
//! normalizes server messages into [`InboundEvent`]s. The service may deliver
//! JSON in either text or binary frames.

use std::time::Duration;

use futures_util::{
    SinkExt, StreamExt,
    future::BoxFuture,
    stream::{SplitSink, SplitStream},
};
use pratique_transcript::Role;
use serde::Deserialize;
use serde_json::json;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use super::{
    InboundEvent, OutboundMessage, SessionSetup, Transport, TransportError, TransportEvents,
    TransportLink,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound messages that may wait for the socket before new ones are
/// dropped. A few seconds of audio at one frame per 256 ms.
const OUTBOUND_CAPACITY: usize = 16;

/// Live conversation transport over the Gemini bidirectional websocket.
#[derive(Debug, Clone)]
pub struct GeminiLiveTransport {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl GeminiLiveTransport {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            connect_timeout,
        }
    }
}

impl Transport for GeminiLiveTransport {
    fn open(
        &self,
        setup: SessionSetup,
        events: TransportEvents,
    ) -> BoxFuture<'static, Result<TransportLink, TransportError>> {
        let this = self.clone();
        Box::pin(async move {
            let api_key = this.api_key.ok_or(TransportError::MissingApiKey)?;
            let url = format!("{}?key={api_key}", this.endpoint);
            let setup_message = setup_message(&this.model, &setup);

            log::info!("Opening live session {} with {}", events.session(), this.model);
            let stream = tokio::time::timeout(this.connect_timeout, handshake(url, setup_message))
                .await
                .map_err(|_| TransportError::Timeout)??;

            let (sink, stream) = stream.split();
            let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

            tokio::spawn(write_loop(sink, outbound_rx, events.clone()));
            let reader = tokio::spawn(read_loop(stream, events.clone()));

            Ok(TransportLink::new(events.session(), outbound_tx).with_task(reader))
        })
    }
}

async fn handshake(url: String, setup_message: serde_json::Value) -> Result<WsStream, TransportError> {
    let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    stream.send(Message::Text(setup_message.to_string())).await?;

    while let Some(message) = stream.next().await {
        let payload = match message? {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Close(frame) => {
                let reason = frame
                    .map(|frame| frame.reason.to_string())
                    .unwrap_or_else(|| String::from("no reason given"));
                return Err(TransportError::Rejected(reason));
            }
            _ => continue,
        };

        let message: ServerMessage = serde_json::from_slice(&payload)?;
        if message.setup_complete.is_some() {
            return Ok(stream);
        }
    }

    Err(TransportError::Rejected(String::from("stream ended")))
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    events: TransportEvents,
) {
    while let Some(message) = outbound.recv().await {
        let payload = match message {
            OutboundMessage::Audio(frame) => audio_message(&frame.data, &frame.mime_type()),
            OutboundMessage::Text(text) => text_message(&text),
        };

        if let Err(err) = sink.send(Message::Text(payload.to_string())).await {
            log::warn!("Failed to write to live session {}: {err}", events.session());
            events.emit(InboundEvent::Error(err.to_string()));
            return;
        }
    }

    // the link was dropped
    let _ = sink.send(Message::Close(None)).await;
}

async fn read_loop(mut stream: SplitStream<WsStream>, events: TransportEvents) {
    let reason = loop {
        let payload = match stream.next().await {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => break frame.map(|frame| frame.reason.to_string()),
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                events.emit(InboundEvent::Error(err.to_string()));
                return;
            }
            None => break None,
        };

        let message: ServerMessage = match serde_json::from_slice(&payload) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("Skipping unrecognized server message: {err}");
                continue;
            }
        };

        if message.go_away.is_some() {
            log::warn!("Live session {} is about to be terminated by the server", events.session());
        }

        for event in normalize(message) {
            if !events.emit(event) {
                return;
            }
        }
    };

    events.emit(InboundEvent::Closed { reason });
}

fn setup_message(model: &str, setup: &SessionSetup) -> serde_json::Value {
    json!({
        "setup": {
            "model": model,
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": setup.voice.as_str() }
                    }
                }
            },
            "systemInstruction": {
                "parts": [{ "text": setup.system_instruction }]
            },
            "inputAudioTranscription": {},
            "outputAudioTranscription": {}
        }
    })
}

fn audio_message(data: &str, mime_type: &str) -> serde_json::Value {
    json!({
        "realtimeInput": {
            "mediaChunks": [{ "mimeType": mime_type, "data": data }]
        }
    })
}

fn text_message(text: &str) -> serde_json::Value {
    json!({
        "clientContent": {
            "turns": [{ "role": "user", "parts": [{ "text": text }] }],
            "turnComplete": true
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: Option<String>,
}

/// Maps one server message into engine events, in the order the engine
/// should apply them.
fn normalize(message: ServerMessage) -> Vec<InboundEvent> {
    let Some(content) = message.server_content else {
        return Vec::new();
    };

    let mut events = Vec::new();
    let transcriptions = [
        (Role::Agent, content.output_transcription),
        (Role::User, content.input_transcription),
    ];
    for (role, transcription) in transcriptions {
        if let Some(text) = transcription.and_then(|transcription| transcription.text) {
            if !text.is_empty() {
                events.push(InboundEvent::TranscriptFragment { role, text });
            }
        }
    }

    if let Some(turn) = content.model_turn {
        events.extend(
            turn.parts
                .into_iter()
                .filter_map(|part| part.inline_data)
                .map(|inline| InboundEvent::AudioFragment { data: inline.data }),
        );
    }

    if content.interrupted {
        events.push(InboundEvent::Interrupted);
    }
    if content.turn_complete {
        events.push(InboundEvent::TurnComplete);
    }
    events
}
