//! Scheduled playback of decoded speech against a shared sample clock.
//!
//! Playback is split in two halves connected by lock-free ring buffers:
//! - [`Mixer`] lives with the session and implements [`PlaybackSink`]. It
//!   turns "play this buffer at time T" requests into commands.
//! - [`MixerRenderer`] lives inside the output device callback. It drains the
//!   commands, sums every active voice into the output block, advances the
//!   clock and reports finished voices back.
//!
//! The clock is the number of frames rendered so far, so scheduling times are
//! expressed in seconds of the output device's own timeline.

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};

use crate::{
    device::{DeviceError, HostOutputDevice},
    stream::StreamHandle,
};

/// Sample rate of synthesized speech delivered by the conversation service.
pub const PLAYBACK_SOURCE_RATE: u32 = 24_000;

/// Maximum number of pending mixer commands and finished voice reports.
const QUEUE_CAPACITY: usize = 256;

/// Errors that can occur while scheduling or opening playback.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// The command queue to the audio thread is full; the buffer was dropped.
    #[error("playback queue is full")]
    QueueFull,
    /// The output device could not be opened.
    #[error("failed to open output device: {0}")]
    Device(#[from] DeviceError),
}

/// Identifier of one scheduled playback buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// A decoded, normalized mono audio buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Exact playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Destination for scheduled playback.
///
/// Implementations own a monotonically advancing clock (`current_time`, in
/// seconds) and play each scheduled buffer starting exactly at its start
/// time. Buffers scheduled back to back therefore play gaplessly.
pub trait PlaybackSink: Send {
    /// Sample rate buffers should be delivered at.
    fn sample_rate(&self) -> u32;

    /// Current position of the playback clock, in seconds.
    fn current_time(&self) -> f64;

    /// Schedules `buffer` to start at `start_time` seconds on the clock.
    fn schedule(&mut self, buffer: AudioBuffer, start_time: f64) -> Result<SourceId, PlaybackError>;

    /// Immediately silences every scheduled or playing buffer.
    fn stop_all(&mut self);

    /// Returns the buffers that finished playing naturally since the last
    /// call. Buffers cut off by [`PlaybackSink::stop_all`] are not reported.
    fn drain_finished(&mut self) -> Vec<SourceId>;
}

/// Lock-free RMS level of the most recently rendered output block, readable
/// from any thread. Used to animate the speaking persona.
#[derive(Debug, Clone, Default)]
pub struct OutputLevel(Arc<AtomicU32>);

impl OutputLevel {
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }
}

enum MixerCommand {
    Schedule {
        id: SourceId,
        samples: Vec<f32>,
        start_frame: u64,
    },
    StopAll,
}

struct FinishedVoice {
    id: SourceId,
    interrupted: bool,
    // handed back so deallocation happens off the audio thread
    _samples: Vec<f32>,
}

struct Voice {
    id: SourceId,
    samples: Vec<f32>,
    start_frame: u64,
}

/// Audio-thread half of the playback mixer.
pub struct MixerRenderer {
    commands: HeapCons<MixerCommand>,
    finished: HeapProd<FinishedVoice>,
    voices: Vec<Voice>,
    clock: Arc<AtomicU64>,
    channels: usize,
    level: OutputLevel,
}

impl MixerRenderer {
    /// Fills one interleaved output block and advances the clock by its
    /// frame count.
    pub fn render(&mut self, output: &mut [f32]) {
        while let Some(command) = self.commands.try_pop() {
            match command {
                MixerCommand::Schedule {
                    id,
                    samples,
                    start_frame,
                } => self.voices.push(Voice {
                    id,
                    samples,
                    start_frame,
                }),
                MixerCommand::StopAll => {
                    for voice in self.voices.drain(..) {
                        let _ = self.finished.try_push(FinishedVoice {
                            id: voice.id,
                            interrupted: true,
                            _samples: voice.samples,
                        });
                    }
                }
            }
        }

        output.fill(0.0);
        let frames = output.len() / self.channels;
        let block_start = self.clock.load(Ordering::Acquire);
        let block_end = block_start + frames as u64;

        let mut index = 0;
        while index < self.voices.len() {
            let voice = &self.voices[index];
            if voice.start_frame < block_end {
                let first = voice.start_frame.saturating_sub(block_start) as usize;
                for frame in first..frames {
                    let position = (block_start + frame as u64 - voice.start_frame) as usize;
                    let Some(sample) = voice.samples.get(position) else {
                        break;
                    };
                    for channel in 0..self.channels {
                        output[frame * self.channels + channel] += *sample;
                    }
                }
            }

            let end_frame = voice.start_frame + voice.samples.len() as u64;
            if end_frame <= block_end {
                let voice = self.voices.swap_remove(index);
                let _ = self.finished.try_push(FinishedVoice {
                    id: voice.id,
                    interrupted: false,
                    _samples: voice.samples,
                });
            } else {
                index += 1;
            }
        }

        self.level.set(crate::mixer::rms(output));
        self.clock.store(block_end, Ordering::Release);
    }
}

/// Session half of the playback mixer; implements [`PlaybackSink`].
pub struct Mixer {
    commands: HeapProd<MixerCommand>,
    finished: HeapCons<FinishedVoice>,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
    next_id: u64,
    /// End of the last scheduled buffer, as (seconds, frame).
    tail: Option<(f64, u64)>,
    stream: Option<StreamHandle>,
}

impl Mixer {
    /// Creates a connected mixer/renderer pair without any device attached.
    pub fn new(sample_rate: u32, channels: u16, level: OutputLevel) -> (Self, MixerRenderer) {
        let (command_tx, command_rx) = HeapRb::<MixerCommand>::new(QUEUE_CAPACITY).split();
        let (finished_tx, finished_rx) = HeapRb::<FinishedVoice>::new(QUEUE_CAPACITY).split();
        let clock = Arc::new(AtomicU64::new(0));

        let mixer = Self {
            commands: command_tx,
            finished: finished_rx,
            clock: clock.clone(),
            sample_rate,
            next_id: 0,
            tail: None,
            stream: None,
        };
        let renderer = MixerRenderer {
            commands: command_rx,
            finished: finished_tx,
            voices: Vec::with_capacity(QUEUE_CAPACITY),
            clock,
            channels: channels.max(1) as usize,
            level,
        };
        (mixer, renderer)
    }

    /// Opens the output device at [`PLAYBACK_SOURCE_RATE`] when supported and
    /// starts rendering into it.
    pub fn open(device: &HostOutputDevice, level: OutputLevel) -> Result<Self, PlaybackError> {
        let config = device.preferred_config(PLAYBACK_SOURCE_RATE)?;
        let (mut mixer, mut renderer) = Self::new(config.sample_rate, config.channels, level);
        log::info!(
            "Opening output device {device} at {} Hz with {} channel(-s)",
            config.sample_rate,
            config.channels
        );

        let device = device.clone();
        let stream = crate::stream::spawn_stream_thread("pratique-playback", move || {
            crate::device::open_cpal_output_stream(
                &device,
                &config,
                move |output| renderer.render(output),
                |error| log::error!("Output stream error: {error}"),
            )
        })?;

        mixer.stream = Some(stream);
        Ok(mixer)
    }

    /// Frame a buffer requested at `start_time` starts on. A start within
    /// half a frame of the previous buffer's end continues exactly at its
    /// end frame, so back-to-back buffers never overlap or gap.
    fn start_frame(&self, start_time: f64) -> u64 {
        let rate = self.sample_rate as f64;
        match self.tail {
            Some((end_time, end_frame)) if ((start_time - end_time) * rate).abs() < 0.5 => end_frame,
            _ => (start_time.max(0.0) * rate).round() as u64,
        }
    }

    /// Pauses the output stream, if one is attached.
    pub fn pause(&self) {
        if let Some(stream) = &self.stream {
            stream.pause();
        }
    }

    /// Resumes the output stream, if one is attached.
    pub fn resume(&self) {
        if let Some(stream) = &self.stream {
            stream.resume();
        }
    }
}

impl PlaybackSink for Mixer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, buffer: AudioBuffer, start_time: f64) -> Result<SourceId, PlaybackError> {
        let id = SourceId(self.next_id);
        let start_frame = self.start_frame(start_time);
        let end = (
            start_time + buffer.duration(),
            start_frame + buffer.samples().len() as u64,
        );
        self.commands
            .try_push(MixerCommand::Schedule {
                id,
                samples: buffer.into_samples(),
                start_frame,
            })
            .map_err(|_| PlaybackError::QueueFull)?;
        self.next_id += 1;
        self.tail = Some(end);
        Ok(id)
    }

    fn stop_all(&mut self) {
        self.tail = None;
        if self.commands.try_push(MixerCommand::StopAll).is_err() {
            log::warn!("Playback queue full, stop request dropped");
        }
    }

    fn drain_finished(&mut self) -> Vec<SourceId> {
        let mut ended = Vec::new();
        while let Some(voice) = self.finished.try_pop() {
            if !voice.interrupted {
                ended.push(voice.id);
            }
        }
        ended
    }
}
