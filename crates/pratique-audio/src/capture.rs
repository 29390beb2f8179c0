//! Microphone capture pipeline.
//!
//! The pipeline turns the device's native stream into fixed-size 16 kHz mono
//! frames ready for the wire:
//!
//! ```text
//! cpal callback ─ mix to mono ─ resample to 16 kHz ─▶ ring buffer
//!                                                       │
//!                         framer thread ◀───────────────┘
//!                         fixed 4096-sample frames ─ PCM16 ─ base64 ─▶ on_frame
//! ```
//!
//! The audio callback never blocks: it only mixes, resamples and pushes into
//! the ring buffer. Framing and encoding happen on the framer thread, which
//! hands every [`EncodedFrame`] to the caller's sink.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use ringbuf_blocking::{
    BlockingHeapRb,
    traits::{Consumer, Producer, Split},
};

use crate::{
    device::{DeviceError, HostInputDevice},
    resampler::{AudioResampler, StreamingResampler},
    stream::StreamHandle,
};

/// Sample rate expected by the conversation service for user audio.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Number of samples in one outbound frame (256 ms at 16 kHz).
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// How long the framer sleeps when the ring buffer has no new samples.
const FRAMER_IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Classified reasons why the microphone could not be started.
///
/// The pipeline never retries on its own; the caller decides what to show.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The operating system refused access to the microphone.
    #[error("microphone permission denied")]
    PermissionDenied,
    /// There is no usable input device, or it disappeared.
    #[error("microphone unavailable")]
    DeviceUnavailable,
    /// Any other backend failure.
    #[error("microphone failure: {0}")]
    Unknown(String),
}

impl From<DeviceError> for CaptureError {
    fn from(err: DeviceError) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("not permitted") {
            return Self::PermissionDenied;
        }

        match err {
            DeviceError::NoDefaultDevice(_) | DeviceError::DeviceNotFound(_) => Self::DeviceUnavailable,
            DeviceError::BuildStream(cpal::BuildStreamError::DeviceNotAvailable)
            | DeviceError::BuildStreamConfig(cpal::DefaultStreamConfigError::DeviceNotAvailable)
            | DeviceError::PlayStream(cpal::PlayStreamError::DeviceNotAvailable) => {
                Self::DeviceUnavailable
            }
            _ => Self::Unknown(message),
        }
    }
}

/// One outbound frame of user audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Base64-encoded PCM16 LE samples.
    pub data: String,
    /// Sample rate of the encoded samples.
    pub sample_rate: u32,
}

impl EncodedFrame {
    /// Encodes normalized mono samples captured at `sample_rate`.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self {
            data: crate::pcm::encode_pcm16_base64(samples),
            sample_rate,
        }
    }

    /// MIME type announced to the conversation service.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// A running capture pipeline. Dropping it releases the microphone.
pub struct CapturePipeline {
    stream: StreamHandle,
    running: Arc<AtomicBool>,
    framer: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Acquires the microphone and starts producing frames into `on_frame`.
    ///
    /// The pipeline is not restartable: once dropped, a new one must be
    /// started. Errors are classified and never retried here.
    pub fn start(
        device: &HostInputDevice,
        on_frame: impl FnMut(EncodedFrame) + Send + 'static,
    ) -> Result<Self, CaptureError> {
        let (sample_rate, channels) = device.sample_rate_and_channels()?;
        let target_buffer_size = device.target_buffer_size(CAPTURE_SAMPLE_RATE)?;
        log::info!(
            "Capturing from {device} at {sample_rate} Hz with {channels} channel(-s), buffer size {target_buffer_size}"
        );

        let mut resampler =
            StreamingResampler::<f32>::new(sample_rate, CAPTURE_SAMPLE_RATE, target_buffer_size)
                .map_err(|err| CaptureError::Unknown(err.to_string()))?;

        let ring_buffer = BlockingHeapRb::<f32>::new((CAPTURE_SAMPLE_RATE * 3) as usize);
        let (mut producer, consumer) = ring_buffer.split();

        let running = Arc::new(AtomicBool::new(true));
        let framer = spawn_framer(consumer, running.clone(), on_frame)
            .map_err(|err| CaptureError::Unknown(err.to_string()))?;

        let device = device.clone();
        let stream = crate::stream::spawn_stream_thread("pratique-capture", move || {
            let mut samples_accumulator = vec![0.0f32; target_buffer_size as usize];
            let mut resampled_callback = move |written_data: &[f32]| {
                producer.push_slice(written_data);
            };

            crate::device::open_cpal_input_stream(
                &device,
                CAPTURE_SAMPLE_RATE,
                move |data: &[f32]| {
                    let received_frames = data.len() / channels.max(1) as usize;
                    if received_frames > samples_accumulator.len() {
                        log::warn!(
                            "Resizing the accumulator on the audio thread from {} to {received_frames}",
                            samples_accumulator.len()
                        );
                        samples_accumulator.resize(received_frames, 0.0);
                    }

                    let frames = crate::mixer::mix_to_mono(&mut samples_accumulator, data, channels);
                    if let Err(err) =
                        resampler.process_callback(&samples_accumulator[..frames], &mut resampled_callback)
                    {
                        log::error!("Resampler caught an error: {err:?}, received_frames={received_frames}");
                    }
                },
                |error| log::error!("Input stream error: {error}"),
            )
        });

        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                running.store(false, Ordering::Release);
                let _ = framer.join();
                return Err(err.into());
            }
        };

        Ok(Self {
            stream,
            running,
            framer: Some(framer),
        })
    }

    /// Stops delivering microphone samples without releasing the device.
    pub fn pause(&self) {
        self.stream.pause();
    }

    /// Resumes delivering microphone samples.
    pub fn resume(&self) {
        self.stream.resume();
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(framer) = self.framer.take() {
            if framer.join().is_err() {
                log::error!("Capture framer thread panicked");
            }
        }
    }
}

fn spawn_framer<C>(
    mut consumer: C,
    running: Arc<AtomicBool>,
    mut on_frame: impl FnMut(EncodedFrame) + Send + 'static,
) -> std::io::Result<JoinHandle<()>>
where
    C: Consumer<Item = f32> + Send + 'static,
{
    thread::Builder::new()
        .name("pratique-framer".to_string())
        .spawn(move || {
            let mut frame = FrameAssembler::new(CAPTURE_FRAME_SAMPLES);
            while running.load(Ordering::Acquire) {
                let popped = frame.fill_from(&mut consumer);
                if let Some(samples) = frame.take_full() {
                    on_frame(EncodedFrame::from_samples(samples, CAPTURE_SAMPLE_RATE));
                } else if popped == 0 {
                    thread::sleep(FRAMER_IDLE_SLEEP);
                }
            }
        })
}

/// Accumulates samples until exactly one frame worth is available.
struct FrameAssembler {
    buffer: Vec<f32>,
    filled: usize,
}

impl FrameAssembler {
    fn new(frame_len: usize) -> Self {
        Self {
            buffer: vec![0.0; frame_len],
            filled: 0,
        }
    }

    fn fill_from<C: Consumer<Item = f32>>(&mut self, consumer: &mut C) -> usize {
        let popped = consumer.pop_slice(&mut self.buffer[self.filled..]);
        self.filled += popped;
        popped
    }

    fn take_full(&mut self) -> Option<&[f32]> {
        if self.filled < self.buffer.len() {
            return None;
        }
        self.filled = 0;
        Some(&self.buffer)
    }
}
