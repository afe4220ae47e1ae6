//! PCM format description and negotiation
//!
//! The engine only ever streams 16-bit signed little-endian PCM. Negotiation
//! picks the sample rate and channel count; encoding is never negotiated.

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::engine::device::DeviceInfo;
use crate::error::{EngineError, Result};

/// Sample size the engine negotiates for (bits)
pub const NEGOTIATED_SAMPLE_SIZE: u16 = 16;

/// Integer encoding of individual samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    SignedInt,
    UnsignedInt,
    Float,
}

/// Byte order of multi-byte samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Description of an interleaved PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channels per frame
    pub channel_count: u16,
    /// Bits per sample
    pub sample_size: u16,
    pub sample_type: SampleType,
    pub byte_order: ByteOrder,
}

impl AudioFormat {
    /// 16-bit signed little-endian PCM at the given rate and channel count
    pub fn pcm_s16le(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channel_count,
            sample_size: NEGOTIATED_SAMPLE_SIZE,
            sample_type: SampleType::SignedInt,
            byte_order: ByteOrder::LittleEndian,
        }
    }

    /// Whether this is the only encoding the level meter can read
    pub fn is_pcm_s16le(&self) -> bool {
        self.sample_size == 16
            && self.sample_type == SampleType::SignedInt
            && self.byte_order == ByteOrder::LittleEndian
            && self.channel_count > 0
            && self.sample_rate > 0
    }

    /// Bytes occupied by one sample of one channel
    #[inline]
    pub fn bytes_per_sample(&self) -> u64 {
        (self.sample_size / 8) as u64
    }

    /// Bytes occupied by one frame (all channels)
    #[inline]
    pub fn bytes_per_frame(&self) -> u64 {
        self.bytes_per_sample() * self.channel_count as u64
    }

    /// Number of bytes spanned by `duration_us` microseconds of audio
    ///
    /// The result is rounded down to a whole frame.
    pub fn bytes_for_duration(&self, duration_us: u64) -> u64 {
        let frame = self.bytes_per_frame();
        if frame == 0 {
            return 0;
        }
        let bytes = (self.sample_rate as u128 * frame as u128 * duration_us as u128
            / 1_000_000) as u64;
        bytes - bytes % frame
    }

    /// Duration in microseconds of `bytes` bytes of audio
    pub fn duration_for_bytes(&self, bytes: u64) -> u64 {
        let bytes_per_second = self.sample_rate as u64 * self.bytes_per_frame();
        if bytes_per_second == 0 {
            return 0;
        }
        (bytes as u128 * 1_000_000 / bytes_per_second as u128) as u64
    }

    /// Highest representable frequency
    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let endian = match self.byte_order {
            ByteOrder::LittleEndian => "LE",
            ByteOrder::BigEndian => "BE",
        };
        let kind = match self.sample_type {
            SampleType::SignedInt => "signed",
            SampleType::UnsignedInt => "unsigned",
            SampleType::Float => "float",
        };
        let channels = match self.channel_count {
            1 => "mono".to_string(),
            2 => "stereo".to_string(),
            n => format!("{} channels", n),
        };
        write!(
            f,
            "{} Hz {} bit {} {} {}",
            self.sample_rate, self.sample_size, kind, endian, channels
        )
    }
}

/// What the negotiator is asked to find a format for
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormatRequest {
    /// Replaying a file whose header already fixes the format
    File(AudioFormat),
    /// A format was negotiated earlier and is only re-checked
    Fixed { format: AudioFormat, tone: bool },
    /// Live capture from the input device
    Capture,
    /// Synthetic tone; the input device takes no part
    Tone,
}

/// Chooses one PCM format acceptable to both ends of the engine
#[derive(Debug, Clone, Copy)]
pub struct FormatNegotiator<'a> {
    input: &'a DeviceInfo,
    output: &'a DeviceInfo,
}

impl<'a> FormatNegotiator<'a> {
    pub fn new(input: &'a DeviceInfo, output: &'a DeviceInfo) -> Self {
        Self { input, output }
    }

    /// Select a format for the request
    ///
    /// Searching walks sample rates ascending and, per rate, channel counts
    /// ascending; the first pair both devices accept wins. Lowest rate then
    /// lowest channel count is the tie-break and must stay that way.
    pub fn negotiate(&self, request: FormatRequest) -> Result<AudioFormat> {
        match request {
            FormatRequest::File(format) => {
                if format.is_pcm_s16le() && self.output.is_format_supported(&format) {
                    Ok(format)
                } else {
                    Err(EngineError::UnsupportedFileFormat {
                        format: format.to_string(),
                    })
                }
            }
            FormatRequest::Fixed { format, tone } => {
                if self.output.is_format_supported(&format) {
                    Ok(format)
                } else if tone {
                    Err(EngineError::NoSuitableFormat)
                } else {
                    Err(EngineError::NoCommonFormat)
                }
            }
            FormatRequest::Capture => self.search(false).ok_or(EngineError::NoCommonFormat),
            FormatRequest::Tone => self.search(true).ok_or(EngineError::NoSuitableFormat),
        }
    }

    fn search(&self, tone: bool) -> Option<AudioFormat> {
        let sample_rates = candidates(
            (!tone).then_some(self.input.sample_rates.as_slice()),
            &self.output.sample_rates,
        );
        let channel_counts = candidates(
            (!tone).then_some(self.input.channel_counts.as_slice()),
            &self.output.channel_counts,
        );
        debug!(
            "Negotiating over rates {:?} and channel counts {:?}",
            sample_rates, channel_counts
        );

        for &rate in &sample_rates {
            for &channels in &channel_counts {
                let format = AudioFormat::pcm_s16le(rate, channels);
                let input_support = tone || self.input.is_format_supported(&format);
                let output_support = self.output.is_format_supported(&format);
                debug!(
                    "Checking {}: input {} output {}",
                    format, input_support, output_support
                );
                if input_support && output_support {
                    return Some(format);
                }
            }
        }
        None
    }
}

/// Sorted, deduplicated intersection of both sides (or just `output`)
fn candidates<T: Copy + Ord>(input: Option<&[T]>, output: &[T]) -> Vec<T> {
    let mut values: Vec<T> = match input {
        Some(input) => output
            .iter()
            .copied()
            .filter(|v| input.contains(v))
            .collect(),
        None => output.to_vec(),
    };
    values.sort_unstable();
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn device(name: &str, rates: &[u32], channels: &[u16]) -> DeviceInfo {
        DeviceInfo::new(name, rates.to_vec(), channels.to_vec(), vec![16])
    }

    #[test]
    fn test_bytes_for_duration() {
        let format = AudioFormat::pcm_s16le(48000, 1);
        assert_eq!(format.bytes_for_duration(1_000_000), 96_000);
        assert_eq!(format.bytes_for_duration(100_000), 9_600);

        let stereo = AudioFormat::pcm_s16le(44100, 2);
        assert_eq!(stereo.bytes_for_duration(10_000_000), 1_764_000);
    }

    #[test]
    fn test_bytes_for_duration_rounds_to_frames() {
        let format = AudioFormat::pcm_s16le(44100, 2);
        // 1 ms at 44.1 kHz is 44.1 frames
        assert_eq!(format.bytes_for_duration(1_000), 44 * 4);
    }

    #[test]
    fn test_duration_for_bytes() {
        let format = AudioFormat::pcm_s16le(48000, 2);
        assert_eq!(format.duration_for_bytes(192_000), 1_000_000);
    }

    #[test]
    fn test_display() {
        let format = AudioFormat::pcm_s16le(48000, 1);
        assert_eq!(format.to_string(), "48000 Hz 16 bit signed LE mono");
    }

    #[test]
    fn test_scenario_lowest_common_rate_lowest_channels() {
        let input = device("mic", &[44100, 48000], &[1, 2]);
        let output = device("speaker", &[48000, 96000], &[1, 2]);

        let format = FormatNegotiator::new(&input, &output)
            .negotiate(FormatRequest::Capture)
            .unwrap();
        assert_eq!(format, AudioFormat::pcm_s16le(48000, 1));
    }

    #[test_case(&[8000, 16000], &[16000, 8000], &[2, 1], &[1, 2] => (8000, 1); "unsorted lists")]
    #[test_case(&[96000, 44100, 44100], &[44100, 96000], &[2], &[2, 1] => (44100, 2); "duplicates")]
    #[test_case(&[22050, 48000], &[48000], &[1, 2, 4], &[4, 2] => (48000, 2); "single common rate")]
    fn test_tie_break(
        input_rates: &[u32],
        output_rates: &[u32],
        input_channels: &[u16],
        output_channels: &[u16],
    ) -> (u32, u16) {
        let input = device("in", input_rates, input_channels);
        let output = device("out", output_rates, output_channels);
        let format = FormatNegotiator::new(&input, &output)
            .negotiate(FormatRequest::Capture)
            .unwrap();
        (format.sample_rate, format.channel_count)
    }

    #[test]
    fn test_no_common_format() {
        let input = device("mic", &[44100], &[1]);
        let output = device("speaker", &[48000], &[1]);
        let result = FormatNegotiator::new(&input, &output).negotiate(FormatRequest::Capture);
        assert!(matches!(result, Err(EngineError::NoCommonFormat)));
    }

    #[test]
    fn test_tone_ignores_input_device() {
        let input = device("mic", &[8000], &[4]);
        let output = device("speaker", &[96000, 48000], &[2, 1]);
        let format = FormatNegotiator::new(&input, &output)
            .negotiate(FormatRequest::Tone)
            .unwrap();
        assert_eq!(format, AudioFormat::pcm_s16le(48000, 1));
    }

    #[test]
    fn test_tone_without_output_support() {
        let input = device("mic", &[48000], &[1]);
        let output = DeviceInfo::new("speaker", vec![48000], vec![1], vec![24]);
        let result = FormatNegotiator::new(&input, &output).negotiate(FormatRequest::Tone);
        assert!(matches!(result, Err(EngineError::NoSuitableFormat)));
    }

    #[test]
    fn test_file_format_checked_against_output_only() {
        let input = device("mic", &[], &[]);
        let output = device("speaker", &[44100], &[2]);
        let negotiator = FormatNegotiator::new(&input, &output);

        let supported = AudioFormat::pcm_s16le(44100, 2);
        assert_eq!(
            negotiator.negotiate(FormatRequest::File(supported)).unwrap(),
            supported
        );

        let unsupported = AudioFormat::pcm_s16le(22050, 2);
        assert!(matches!(
            negotiator.negotiate(FormatRequest::File(unsupported)),
            Err(EngineError::UnsupportedFileFormat { .. })
        ));
    }

    #[test]
    fn test_fixed_format_rechecked() {
        let input = device("mic", &[48000], &[1]);
        let output = device("speaker", &[44100], &[1]);
        let negotiator = FormatNegotiator::new(&input, &output);
        let format = AudioFormat::pcm_s16le(48000, 1);

        assert!(matches!(
            negotiator.negotiate(FormatRequest::Fixed {
                format,
                tone: false
            }),
            Err(EngineError::NoCommonFormat)
        ));
        assert!(matches!(
            negotiator.negotiate(FormatRequest::Fixed { format, tone: true }),
            Err(EngineError::NoSuitableFormat)
        ));
    }
}
