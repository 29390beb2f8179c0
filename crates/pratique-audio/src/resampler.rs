use rubato::{FftFixedInOut, Resampler, ResamplerConstructionError};

/// Errors that can occur during audio resampling.
///
/// This error type represents failures caused by invalid input/output provided
/// to the resampler.
#[derive(Debug, thiserror::Error)]
pub enum ResamplerError {
    /// Failed to resample the provided audio samples.
    ///
    /// This error is returned when the underlying resampling engine encounters
    /// a failure while processing input samples.
    #[error("failed to resample input samples: {0}")]
    ResampleError(#[from] rubato::ResampleError),
}

/// Real-time audio stream resampler trait.
///
/// This trait defines a common interface for resampling a continuous audio
/// stream in real time. Implementations consume input samples and deliver
/// resampled output through a user-provided callback.
///
/// All implementations are expected to be suitable for real-time audio
/// processing:
/// - They must not allocate memory during processing.
/// - They must be efficient for small and medium buffer sizes (typically
///   15–4096 frames at 48 kHz).
/// - They must be thread-safe.
pub trait AudioResampler<T: rubato::Sample>: Send {
    /// Process an input audio buffer and emit resampled output via a callback.
    ///
    /// The input slice contains mono audio samples (single channel,
    /// non-interleaved). Implementations may consume all or only part of the
    /// input immediately, depending on their internal buffering strategy.
    ///
    /// The provided callback is invoked zero or more times with contiguous
    /// slices of resampled output data.
    ///
    /// # Returns
    /// Returns the total number of output samples written during this call.
    ///
    /// # Errors
    /// Returns [`ResamplerError`] if resampling fails or if the input does not
    /// meet implementation-specific requirements.
    fn process_callback(
        &mut self,
        input: &[T],
        callback: &mut dyn FnMut(&[T]),
    ) -> Result<usize, ResamplerError>;
}

/// FFT-based streaming resampler for arbitrary input and output block sizes.
///
/// This resampler is designed for real-time streaming scenarios where input
/// buffers may arrive in unpredictable sizes, including partial audio frames.
///
/// It internally buffers incoming samples in a FIFO queue and feeds the
/// resampling engine whenever enough data is available. Output samples are
/// produced as soon as possible and delivered via the callback.
pub struct StreamingResampler<T: rubato::Sample> {
    resampler: FftFixedInOut<T>,
    frames_queue: std::collections::VecDeque<T>,

    input_buffer: Vec<T>,
    output_buffer: Vec<T>,
}

impl<T: rubato::Sample> StreamingResampler<T> {
    /// Creates a new FFT-based streaming resampler for mono audio.
    ///
    /// This resampler does not require a fixed number of input samples per
    /// processing call. Any number of input samples may be provided,
    /// including zero or partial frames.
    ///
    /// The `block_size` parameter controls the internal FFT processing size
    /// and therefore affects latency and performance, but it does not impose
    /// any constraints on the public API.
    ///
    /// This function performs internal memory allocations and should be called
    /// during initialization, not from a real-time audio thread.
    ///
    /// # Errors
    /// Returns [`ResamplerConstructionError`] if the resampler cannot be
    /// constructed with the given parameters.
    pub fn new(
        original_rate: u32,
        target_rate: u32,
        block_size: u32,
    ) -> Result<Self, ResamplerConstructionError> {
        let resampler = FftFixedInOut::new(
            original_rate as usize,
            target_rate as usize,
            block_size as usize,
            1, // we're using mono
        )?;

        let raw_input_buffer = resampler.input_buffer_allocate(true);
        let raw_output_buffer = resampler.output_buffer_allocate(true);

        Ok(Self {
            frames_queue: std::collections::VecDeque::with_capacity(block_size as usize * 4),
            input_buffer: raw_input_buffer[0].clone(),
            output_buffer: raw_output_buffer[0].clone(),
            resampler,
        })
    }
}

impl<T: rubato::Sample> StreamingResampler<T> {
    /// Number of input samples the FFT consumes per block.
    pub fn input_block_len(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Delay, in output samples, the FFT filter adds in front of the signal.
    pub fn output_delay(&self) -> usize {
        self.resampler.output_delay()
    }

    /// Discards queued input and the filter state.
    pub fn reset(&mut self) {
        self.frames_queue.clear();
        self.resampler.reset();
    }
}

impl<T: rubato::Sample> AudioResampler<T> for StreamingResampler<T> {
    fn process_callback(
        &mut self,
        input: &[T],
        callback: &mut dyn FnMut(&[T]),
    ) -> Result<usize, ResamplerError> {
        let mut total_written = 0usize;
        self.frames_queue.extend(input);

        loop {
            let wanted_len = self.resampler.input_frames_next();
            if self.frames_queue.len() < wanted_len {
                break;
            }

            if self.input_buffer.len() != wanted_len {
                self.input_buffer.resize(wanted_len, T::zero());
            }

            for (slot, frame_value) in self
                .input_buffer
                .iter_mut()
                .zip(self.frames_queue.drain(..wanted_len))
            {
                *slot = frame_value;
            }

            let input_buffer = &[&self.input_buffer];
            let output_buffer = &mut [&mut self.output_buffer];
            let (_, output_written) =
                self.resampler
                    .process_into_buffer(input_buffer, output_buffer, None)?;

            // don't call callback if nothing was written
            if output_written > 0 {
                callback(&self.output_buffer[..output_written]);
                total_written += output_written;
            }
        }

        Ok(total_written)
    }
}

/// Resamples the speech fragments of one stretch between two fixed rates.
///
/// Consecutive fragments are treated as one continuous signal: input that
/// does not fill an FFT block is carried over to the next fragment instead
/// of being padded, so fragment boundaries add no silence. A fragment may
/// therefore come out shorter or longer than its own rate-converted length,
/// and the first fragments of a stretch may produce nothing at all.
/// [`FragmentResampler::flush`] pads and drains the tail once the stretch
/// ends. The filter delay is trimmed from the start of every stretch.
///
/// Only used when the output device cannot run at the source rate.
pub struct FragmentResampler {
    original_rate: u32,
    target_rate: u32,
    inner: StreamingResampler<f32>,
    /// Input samples fed since the stretch began.
    consumed: u64,
    /// Output samples handed out since the stretch began.
    produced: u64,
    /// Leading delay samples still to be dropped.
    skip: usize,
}

impl FragmentResampler {
    /// Block size handed to the underlying FFT resampler.
    const BLOCK_SIZE: u32 = 1024;

    /// Creates a fragment resampler converting `original_rate` to
    /// `target_rate`. Allocates; call it once per output stream.
    pub fn new(original_rate: u32, target_rate: u32) -> Result<Self, ResamplerConstructionError> {
        let inner = StreamingResampler::new(original_rate, target_rate, Self::BLOCK_SIZE)?;
        Ok(Self {
            original_rate,
            target_rate,
            skip: inner.output_delay(),
            inner,
            consumed: 0,
            produced: 0,
        })
    }

    /// Number of output samples `input_len` input samples map to.
    pub fn output_len(&self, input_len: usize) -> usize {
        self.output_len_of(input_len as u64) as usize
    }

    fn output_len_of(&self, input_len: u64) -> u64 {
        (input_len * self.target_rate as u64).div_ceil(self.original_rate as u64)
    }

    /// Resamples the next fragment of the stretch and returns whatever
    /// output is ready.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, ResamplerError> {
        self.consumed += input.len() as u64;
        let mut output = Vec::new();
        self.feed(input, &mut output)?;
        self.produced += output.len() as u64;
        Ok(output)
    }

    /// Ends the stretch: drains the carried-over input and returns the
    /// remaining output, so the stretch as a whole comes out at exactly
    /// [`FragmentResampler::output_len`] of everything fed. Leaves the
    /// resampler ready for a new stretch.
    pub fn flush(&mut self) -> Result<Vec<f32>, ResamplerError> {
        let expected = self.output_len_of(self.consumed);
        let padding = vec![0.0; self.inner.input_block_len()];
        let mut output = Vec::new();

        while self.produced + (output.len() as u64) < expected {
            if self.feed(&padding, &mut output)? == 0 {
                break;
            }
        }

        output.truncate(expected.saturating_sub(self.produced) as usize);
        self.reset();
        Ok(output)
    }

    /// Drops the carried-over input and starts a new stretch.
    pub fn reset(&mut self) {
        self.inner.reset();
        self.consumed = 0;
        self.produced = 0;
        self.skip = self.inner.output_delay();
    }

    /// Pushes `input` through the FFT resampler, appending the output past
    /// the leading delay. Returns the raw number of samples produced.
    fn feed(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<usize, ResamplerError> {
        let skip = &mut self.skip;
        self.inner.process_callback(input, &mut |written| {
            let dropped = (*skip).min(written.len());
            *skip -= dropped;
            output.extend_from_slice(&written[dropped..]);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_resampler_buffers_partial_input() {
        let mut resampler = StreamingResampler::<f32>::new(48_000, 16_000, 960).unwrap();
        let mut produced = 0usize;
        let written = resampler
            .process_callback(&[0.0; 100], &mut |data| produced += data.len())
            .unwrap();
        assert_eq!(written, 0);
        assert_eq!(produced, 0);

        let written = resampler
            .process_callback(&vec![0.0; 4800], &mut |data| produced += data.len())
            .unwrap();
        assert_eq!(written, produced);
        assert!(produced > 0);
    }

    #[test]
    fn stretch_output_length_follows_rate_ratio() {
        let mut resampler = FragmentResampler::new(24_000, 48_000).unwrap();
        let mut output = resampler.process(&vec![0.25f32; 2400]).unwrap();
        output.extend(resampler.flush().unwrap());
        assert_eq!(output.len(), 4800);
        assert_eq!(resampler.output_len(1), 2);
    }

    #[test]
    fn fragment_boundaries_add_no_silence() {
        let mut resampler = FragmentResampler::new(24_000, 48_000).unwrap();
        let mut output = Vec::new();
        for _ in 0..10 {
            output.extend(resampler.process(&vec![0.5f32; 999]).unwrap());
        }
        output.extend(resampler.flush().unwrap());
        assert_eq!(output.len(), resampler.output_len(9_990));

        // away from the edges of the stretch the signal stays constant
        let margin = 4_096;
        let interior = &output[margin..output.len() - margin];
        let dropouts = interior
            .iter()
            .filter(|sample| (**sample - 0.5).abs() > 0.05)
            .count();
        assert_eq!(dropouts, 0);
    }

    #[test]
    fn reset_starts_a_fresh_stretch() {
        let mut resampler = FragmentResampler::new(24_000, 48_000).unwrap();
        resampler.process(&vec![0.5f32; 700]).unwrap();
        resampler.reset();

        let mut output = resampler.process(&vec![0.5f32; 2400]).unwrap();
        output.extend(resampler.flush().unwrap());
        assert_eq!(output.len(), 4800);
    }
}
