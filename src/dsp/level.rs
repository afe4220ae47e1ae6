//! RMS and peak level of 16-bit PCM windows

use serde::{Deserialize, Serialize};

/// Largest positive 16-bit sample value
pub const PCM_S16_MAX_VALUE: i16 = i16::MAX;

/// Magnitude of the most negative 16-bit sample
pub const PCM_S16_MAX_AMPLITUDE: f64 = 32768.0;

/// Convert a 16-bit sample to the range [-1.0, 1.0)
#[inline]
pub fn pcm_to_real(pcm: i16) -> f64 {
    pcm as f64 / PCM_S16_MAX_AMPLITUDE
}

/// Convert a value in [-1.0, 1.0] to a 16-bit sample
#[inline]
pub fn real_to_pcm(real: f64) -> i16 {
    (real.clamp(-1.0, 1.0) * PCM_S16_MAX_VALUE as f64) as i16
}

/// Result of one level calculation
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LevelSample {
    /// Root mean square, 0.0 to 1.0
    pub rms: f64,
    /// Largest absolute sample, 0.0 to 1.0
    pub peak: f64,
    /// Number of samples (not frames) analysed
    pub sample_count: usize,
}

/// Compute RMS and peak over interleaved 16-bit little-endian samples
///
/// All channels are folded together. A trailing odd byte is ignored.
pub fn calculate_level(window: &[u8]) -> LevelSample {
    let mut peak = 0.0_f64;
    let mut sum = 0.0_f64;
    let mut sample_count = 0;

    for bytes in window.chunks_exact(2) {
        let value = pcm_to_real(i16::from_le_bytes([bytes[0], bytes[1]])).abs();
        peak = peak.max(value);
        sum += value * value;
        sample_count += 1;
    }

    if sample_count == 0 {
        return LevelSample::default();
    }

    let rms = (sum / sample_count as f64).sqrt().clamp(0.0, 1.0);
    LevelSample {
        rms,
        peak: peak.min(1.0),
        sample_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_silence() {
        let level = calculate_level(&[0u8; 9600]);
        assert_eq!(level.rms, 0.0);
        assert_eq!(level.peak, 0.0);
        assert_eq!(level.sample_count, 4800);
    }

    #[test]
    fn test_full_scale_alternating() {
        let samples: Vec<i16> = (0..4800)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        let level = calculate_level(&pcm_bytes(&samples));

        assert_relative_eq!(level.peak, 1.0);
        assert_relative_eq!(level.rms, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_half_scale_square() {
        let samples: Vec<i16> = (0..1000)
            .map(|i| if i % 2 == 0 { 16384 } else { -16384 })
            .collect();
        let level = calculate_level(&pcm_bytes(&samples));

        assert_relative_eq!(level.peak, 0.5);
        assert_relative_eq!(level.rms, 0.5);
    }

    #[test]
    fn test_negative_peak_counts() {
        let level = calculate_level(&pcm_bytes(&[0, -8192, 0, 0]));
        assert_relative_eq!(level.peak, 0.25);
    }

    #[test]
    fn test_empty_window() {
        assert_eq!(calculate_level(&[]), LevelSample::default());
        assert_eq!(calculate_level(&[7]), LevelSample::default());
    }

    #[test]
    fn test_pcm_conversion() {
        assert_eq!(pcm_to_real(0), 0.0);
        assert_eq!(pcm_to_real(i16::MIN), -1.0);
        assert_eq!(real_to_pcm(1.0), i16::MAX);
        assert_eq!(real_to_pcm(2.0), i16::MAX);
        assert_eq!(real_to_pcm(-1.0), -i16::MAX);
    }
}
