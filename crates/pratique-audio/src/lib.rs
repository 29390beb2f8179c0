//! Audio utilities for the live conversation pipeline.
//!
//! This crate wraps low-level audio building blocks into the pieces a live
//! voice session needs. It focuses on:
//! - Enumerating input/output devices and building streams with `cpal`.
//! - Capturing the microphone as fixed-size 16 kHz mono frames, encoded as
//!   base64 PCM16 for the wire.
//! - Decoding inbound PCM16 fragments back into normalized samples.
//! - Mixing scheduled playback buffers against a shared sample clock.
//! - Resampling mono audio streams with FFT-based resamplers.
//!
//! # Real-time constraints
//! Audio callbacks run on a real-time thread. Avoid allocations, locks, and
//! blocking I/O inside callbacks whenever possible.

pub mod capture;
pub mod device;
pub mod mixer;
pub mod pcm;
pub mod playback;
pub mod resampler;
pub mod stream;

/// A fallback fixed buffer size (in frames) used when the audio device reports
/// an unknown supported buffer size.
///
/// It is used in `target_buffer_size` when `cpal` cannot determine the
/// device's preferred or maximum buffer size.
pub const FIXED_FRAME_COUNT: u32 = 4096;

/// Computes the greatest common divisor (GCD) of two unsigned integers.
///
/// This function implements the classic Euclidean algorithm.
pub(crate) fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let temp = a % b;
        a = b;
        b = temp;
    }
    a
}

/// Rounds `base` to the nearest multiple of `denominator`.
///
/// In case of a tie it rounds upward. A result of zero is bumped to one
/// multiple so the returned buffer size is always usable.
pub(crate) fn find_nearest_to(base: u32, denominator: u32) -> u32 {
    let remainder = base % denominator;
    let nearest = if remainder * 2 <= denominator {
        base - remainder
    } else {
        base - remainder + denominator
    };
    nearest.max(denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_of_common_rates() {
        assert_eq!(gcd(48_000, 16_000), 16_000);
        assert_eq!(gcd(44_100, 16_000), 100);
        assert_eq!(gcd(7, 0), 7);
    }

    #[test]
    fn nearest_multiple_rounds_and_never_returns_zero() {
        assert_eq!(find_nearest_to(4096, 3), 4095);
        assert_eq!(find_nearest_to(4097, 2), 4098);
        assert_eq!(find_nearest_to(100, 441), 441);
    }
}
