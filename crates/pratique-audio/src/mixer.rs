/// Mixes interleaved multi-channel audio samples down to mono.
///
/// Each output frame is the average of all channels of the matching input
/// frame. The input slice must contain interleaved samples in the form
/// `[C0, C1, ..., Cn, C0, C1, ...]`. The resulting mono samples are written
/// into `samples_accumulator`, which must hold at least
/// `samples_frame_data.len() / channels` samples.
///
/// # Returns
/// Returns the number of mono frames written to `samples_accumulator`.
pub fn mix_to_mono<T>(samples_accumulator: &mut [T], samples_frame_data: &[T], channels: u16) -> usize
where
    T: Copy
        + num_traits::identities::Zero
        + num_traits::FromPrimitive
        + std::ops::Add<Output = T>
        + std::ops::Mul<Output = T>,
{
    let channels = channels.max(1) as usize;
    let frames = (samples_frame_data.len() / channels).min(samples_accumulator.len());
    if channels == 1 {
        samples_accumulator[..frames].copy_from_slice(&samples_frame_data[..frames]);
        return frames;
    }

    let scale = T::from_f32(1.0 / channels as f32).unwrap_or_else(T::zero);
    for (i, frame) in samples_frame_data.chunks_exact(channels).take(frames).enumerate() {
        let sum = frame.iter().fold(T::zero(), |acc, sample| acc + *sample);
        samples_accumulator[i] = sum * scale;
    }
    frames
}

/// Computes the root-mean-square level of a block of samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_frames_are_averaged() {
        let mut out = [0.0f32; 2];
        let written = mix_to_mono(&mut out, &[1.0, 0.0, 0.5, 0.5], 2);
        assert_eq!(written, 2);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn mono_input_is_copied() {
        let mut out = [0.0f32; 3];
        assert_eq!(mix_to_mono(&mut out, &[0.1, 0.2, 0.3], 1), 3);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 8]), 0.0);
        assert!((rms(&[1.0, -1.0]) - 1.0).abs() < f32::EPSILON);
    }
}
