//! Playback jitter buffer.
//!
//! Synthesized speech arrives in irregular bursts. While nothing is playing,
//! fragments are held back (pre-roll) until enough audio is buffered, then
//! scheduled as one back-to-back batch slightly in the future. Once playing,
//! every fragment is appended right after the previous one on the playback
//! clock, or shortly after "now" if playback already ran dry.

use std::{collections::HashSet, time::Duration};

use pratique_audio::{
    pcm,
    playback::{AudioBuffer, PLAYBACK_SOURCE_RATE, PlaybackSink, SourceId},
    resampler::FragmentResampler,
};
use pratique_bridge::config::EngineTuning;
use tokio::time::Instant;

/// Tolerance when comparing accumulated durations to the threshold.
const DURATION_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterConfig {
    /// Seconds of audio buffered before the first fragment plays.
    pub pre_roll_threshold: f64,
    /// Seconds between a pre-roll flush and the start of the batch.
    pub pre_roll_offset: f64,
    /// Minimal distance, in seconds, between "now" and a schedule time.
    pub epsilon: f64,
    /// Silence after the last fragment before speech is considered over.
    pub grace: Duration,
}

impl From<&EngineTuning> for JitterConfig {
    fn from(tuning: &EngineTuning) -> Self {
        Self {
            pre_roll_threshold: tuning.pre_roll_threshold().as_secs_f64(),
            pre_roll_offset: tuning.pre_roll_offset().as_secs_f64(),
            epsilon: tuning.schedule_epsilon().as_secs_f64(),
            grace: tuning.speaking_grace(),
        }
    }
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self::from(&EngineTuning::default())
    }
}

pub struct JitterBuffer {
    sink: Box<dyn PlaybackSink>,
    config: JitterConfig,
    resampler: Option<FragmentResampler>,
    pending: Vec<AudioBuffer>,
    pending_duration: f64,
    in_flight: HashSet<SourceId>,
    cursor: Option<f64>,
    grace_until: Option<Instant>,
}

impl JitterBuffer {
    pub fn new(sink: Box<dyn PlaybackSink>, config: JitterConfig) -> Self {
        let output_rate = sink.sample_rate();
        let resampler = if output_rate == PLAYBACK_SOURCE_RATE {
            None
        } else {
            log::info!("Resampling synthesized speech from {PLAYBACK_SOURCE_RATE} Hz to {output_rate} Hz");
            match FragmentResampler::new(PLAYBACK_SOURCE_RATE, output_rate) {
                Ok(resampler) => Some(resampler),
                Err(err) => {
                    log::error!("Failed to create a playback resampler, audio will play off-pitch: {err}");
                    None
                }
            }
        };

        Self {
            sink,
            config,
            resampler,
            pending: Vec::new(),
            pending_duration: 0.0,
            in_flight: HashSet::new(),
            cursor: None,
            grace_until: None,
        }
    }

    /// Decodes an inbound fragment and queues it. Malformed fragments are
    /// logged and skipped. When resampling, part of the fragment may be held
    /// back until the next one arrives or the turn completes.
    pub fn push_encoded(&mut self, data: &str) {
        let samples = match pcm::decode_pcm16_base64(data) {
            Ok(samples) => samples,
            Err(err) => {
                log::warn!("Skipping undecodable audio fragment: {err}");
                return;
            }
        };

        let buffer = match self.resampler.as_mut() {
            Some(resampler) => match resampler.process(&samples) {
                Ok(resampled) => AudioBuffer::new(resampled, self.sink.sample_rate()),
                Err(err) => {
                    log::warn!("Skipping audio fragment that failed to resample: {err}");
                    return;
                }
            },
            None => AudioBuffer::new(samples, PLAYBACK_SOURCE_RATE),
        };
        self.push(buffer);
    }

    /// Queues a decoded buffer for playback.
    pub fn push(&mut self, buffer: AudioBuffer) {
        if buffer.is_empty() {
            return;
        }

        if !self.in_flight.is_empty() {
            let now = self.sink.current_time();
            let start = self.cursor.unwrap_or(now).max(now + self.config.epsilon);
            self.schedule_at(buffer, start);
            return;
        }

        self.pending_duration += buffer.duration();
        self.pending.push(buffer);
        if self.pending_duration + DURATION_TOLERANCE >= self.config.pre_roll_threshold {
            self.flush_pre_roll();
        }
    }

    /// Ends the partner's turn: drains the resampler tail and plays whatever
    /// is still held back in pre-roll.
    pub fn finish_turn(&mut self) {
        let tail = match self.resampler.as_mut().map(FragmentResampler::flush) {
            Some(Ok(tail)) => tail,
            Some(Err(err)) => {
                log::warn!("Dropping the resampled tail of a turn: {err}");
                Vec::new()
            }
            None => Vec::new(),
        };
        let rate = self.sink.sample_rate();
        self.push(AudioBuffer::new(tail, rate));
        self.flush_pre_roll();
    }

    /// Schedules whatever is buffered in pre-roll as one batch.
    pub fn flush_pre_roll(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let start = self.sink.current_time() + self.config.pre_roll_offset;
        log::debug!(
            "Flushing pre-roll of {} fragment(-s), {:.3}s, starting at {start:.3}",
            self.pending.len(),
            self.pending_duration
        );

        self.cursor = Some(start);
        self.pending_duration = 0.0;
        for buffer in std::mem::take(&mut self.pending) {
            let start = self.cursor.unwrap_or(start);
            self.schedule_at(buffer, start);
        }
    }

    fn schedule_at(&mut self, buffer: AudioBuffer, start: f64) {
        let duration = buffer.duration();
        match self.sink.schedule(buffer, start) {
            Ok(id) => {
                self.in_flight.insert(id);
                self.cursor = Some(start + duration);
                self.grace_until = None;
            }
            // the cursor stays put so the next fragment closes the gap
            Err(err) => log::warn!("Failed to schedule an audio fragment at {start:.3}: {err}"),
        }
    }

    /// Collects finished fragments. Starts the grace period when the last
    /// in-flight fragment ends.
    pub fn poll(&mut self, now: Instant) {
        let finished = self.sink.drain_finished();
        if finished.is_empty() {
            return;
        }

        let mut removed = false;
        for id in finished {
            removed |= self.in_flight.remove(&id);
        }
        if removed && self.in_flight.is_empty() {
            self.grace_until = Some(now + self.config.grace);
        }
    }

    /// Whether speech is buffered, playing, or ended less than the grace
    /// period ago.
    pub fn is_speaking(&self, now: Instant) -> bool {
        !self.in_flight.is_empty()
            || !self.pending.is_empty()
            || self.grace_until.is_some_and(|until| now < until)
    }

    /// Silences everything and forgets all scheduling state.
    pub fn reset(&mut self) {
        self.sink.stop_all();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.in_flight.clear();
        self.pending.clear();
        self.pending_duration = 0.0;
        self.cursor = None;
        self.grace_until = None;
    }

    /// Where the next fragment would be appended on the playback clock.
    pub fn cursor(&self) -> Option<f64> {
        self.cursor
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pratique_audio::playback::PlaybackError;

    use super::*;

    #[derive(Default)]
    struct ClockState {
        now: f64,
        next_id: u64,
        scheduled: Vec<(SourceId, f64, f64)>,
        audio: Vec<Vec<f32>>,
        finished: Vec<SourceId>,
        stops: usize,
        fail_next: bool,
        rate: Option<u32>,
    }

    #[derive(Clone, Default)]
    struct ManualSink(Arc<Mutex<ClockState>>);

    impl PlaybackSink for ManualSink {
        fn sample_rate(&self) -> u32 {
            self.0.lock().unwrap().rate.unwrap_or(PLAYBACK_SOURCE_RATE)
        }

        fn current_time(&self) -> f64 {
            self.0.lock().unwrap().now
        }

        fn schedule(&mut self, buffer: AudioBuffer, start_time: f64) -> Result<SourceId, PlaybackError> {
            let mut state = self.0.lock().unwrap();
            if std::mem::take(&mut state.fail_next) {
                return Err(PlaybackError::QueueFull);
            }
            state.next_id += 1;
            let id = SourceId(state.next_id);
            state.scheduled.push((id, start_time, buffer.duration()));
            state.audio.push(buffer.into_samples());
            Ok(id)
        }

        fn stop_all(&mut self) {
            self.0.lock().unwrap().stops += 1;
        }

        fn drain_finished(&mut self) -> Vec<SourceId> {
            std::mem::take(&mut self.0.lock().unwrap().finished)
        }
    }

    fn buffer(seconds: f64) -> AudioBuffer {
        AudioBuffer::new(vec![0.1; (seconds * PLAYBACK_SOURCE_RATE as f64) as usize], PLAYBACK_SOURCE_RATE)
    }

    fn jitter() -> (JitterBuffer, ManualSink) {
        let sink = ManualSink::default();
        (JitterBuffer::new(Box::new(sink.clone()), JitterConfig::default()), sink)
    }

    fn starts(sink: &ManualSink) -> Vec<f64> {
        sink.0.lock().unwrap().scheduled.iter().map(|entry| entry.1).collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-6, "{actual} != {expected}");
    }

    #[test]
    fn pre_roll_batches_then_appends() {
        let (mut jitter, sink) = jitter();
        sink.0.lock().unwrap().now = 2.0;

        jitter.push(buffer(0.4));
        jitter.push(buffer(0.4));
        assert!(starts(&sink).is_empty());
        assert_eq!(jitter.pending(), 2);

        jitter.push(buffer(0.4));
        let scheduled = starts(&sink);
        assert_eq!(scheduled.len(), 3);
        assert_close(scheduled[0], 2.1);
        assert_close(scheduled[1], 2.5);
        assert_close(scheduled[2], 2.9);

        sink.0.lock().unwrap().now = 2.3;
        jitter.push(buffer(0.4));
        assert_close(starts(&sink)[3], 3.3);
    }

    #[test]
    fn late_fragments_are_never_scheduled_in_the_past() {
        let (mut jitter, sink) = jitter();
        jitter.push(buffer(1.0));
        assert_close(starts(&sink)[0], 0.1);

        // the first fragment is still in flight but the clock ran past the cursor
        sink.0.lock().unwrap().now = 5.0;
        jitter.push(buffer(0.2));
        assert_close(starts(&sink)[1], 5.01);
        assert_close(jitter.cursor().unwrap(), 5.21);
    }

    #[test]
    fn turn_complete_flushes_short_replies() {
        let (mut jitter, sink) = jitter();
        jitter.push(buffer(0.3));
        assert!(starts(&sink).is_empty());

        jitter.finish_turn();
        assert_eq!(starts(&sink).len(), 1);
        assert_eq!(jitter.pending(), 0);
    }

    #[test]
    fn resampled_fragments_play_back_to_back() {
        let sink = ManualSink::default();
        sink.0.lock().unwrap().rate = Some(48_000);
        let mut jitter = JitterBuffer::new(Box::new(sink.clone()), JitterConfig::default());

        let fragment = pcm::encode_pcm16_base64(&vec![0.5; 9_599]);
        for _ in 0..4 {
            jitter.push_encoded(&fragment);
        }
        jitter.finish_turn();
        assert_eq!(jitter.pending(), 0);

        let state = sink.0.lock().unwrap();
        for pair in state.scheduled.windows(2) {
            assert_close(pair[1].1, pair[0].1 + pair[0].2);
        }
        let total: f64 = state.scheduled.iter().map(|entry| entry.2).sum();
        assert_close(total, 4.0 * 9_599.0 / 24_000.0);

        let audio = state.audio.concat();
        let interior = &audio[4_096..audio.len() - 4_096];
        assert!(interior.iter().all(|sample| (sample - 0.5).abs() < 0.05));
    }

    #[test]
    fn failed_schedules_do_not_advance_the_cursor() {
        let (mut jitter, sink) = jitter();
        jitter.push(buffer(1.0));
        sink.0.lock().unwrap().fail_next = true;
        jitter.push(buffer(0.5));
        jitter.push(buffer(0.5));

        let scheduled = starts(&sink);
        assert_eq!(scheduled.len(), 2);
        assert_close(scheduled[1], 1.1);
    }

    #[test]
    fn malformed_fragments_are_skipped() {
        let (mut jitter, sink) = jitter();
        jitter.push_encoded("%%%");
        jitter.push_encoded("AQID");
        assert_eq!(jitter.pending(), 0);
        assert!(starts(&sink).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_outlasts_playback_by_the_grace_period() {
        let (mut jitter, sink) = jitter();
        let now = Instant::now();
        assert!(!jitter.is_speaking(now));

        jitter.push(buffer(1.0));
        assert!(jitter.is_speaking(now));

        let id = sink.0.lock().unwrap().scheduled[0].0;
        sink.0.lock().unwrap().finished.push(id);
        jitter.poll(now);
        assert_eq!(jitter.in_flight(), 0);
        assert!(jitter.is_speaking(now + Duration::from_millis(499)));
        assert!(!jitter.is_speaking(now + Duration::from_millis(500)));
    }

    #[test]
    fn reset_forgets_everything() {
        let (mut jitter, sink) = jitter();
        jitter.push(buffer(1.0));
        jitter.push(buffer(0.2));
        jitter.reset();

        assert_eq!(sink.0.lock().unwrap().stops, 1);
        assert_eq!(jitter.in_flight(), 0);
        assert!(jitter.cursor().is_none());

        // the next stretch pre-rolls again
        jitter.push(buffer(0.4));
        assert_eq!(starts(&sink).len(), 2);
        assert_eq!(jitter.pending(), 1);
    }
}
