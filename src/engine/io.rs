//! Audio file handles and synthetic signal generation
//!
//! File-backed playback never loads a whole file. The engine keeps two
//! handles on the same file: one is streamed to the output device, the other
//! is seeked and read to refill the analysis window.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};

use crate::dsp::level::real_to_pcm;
use crate::engine::format::{AudioFormat, ByteOrder, SampleType};
use crate::error::{EngineError, Result};

/// Random access to a stored recording
///
/// Positions passed to [`AudioFile::seek`] are absolute file offsets, so
/// callers add [`AudioFile::header_length`] to a sample-data offset.
pub trait AudioFile {
    /// Length of the sample data in bytes (header excluded)
    fn size(&self) -> u64;
    /// Offset of the first sample byte within the file
    fn header_length(&self) -> u64;
    fn seek(&mut self, position: u64) -> io::Result<()>;
    /// Read sample bytes from the current position, stopping at the end of data
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Format declared by the file header
    fn format(&self) -> AudioFormat;
}

// ============================================================================
// WAV files
// ============================================================================

/// A RIFF/WAVE file read as raw PCM bytes
#[derive(Debug)]
pub struct WavFile {
    path: PathBuf,
    reader: BufReader<File>,
    format: AudioFormat,
    header_length: u64,
    size: u64,
    position: u64,
}

impl WavFile {
    /// Open a WAV file and locate its data chunk
    ///
    /// # Errors
    /// * `FileNotFound` - If the file cannot be opened
    /// * `InvalidAudio` - If the file is not a valid WAV file
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| EngineError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        })?;

        let reader = WavReader::new(BufReader::new(file)).map_err(|e| {
            EngineError::InvalidAudio {
                reason: format!("Failed to open WAV file: {}", e),
                source: Some(Box::new(e)),
            }
        })?;

        let spec = reader.spec();
        let size = reader.len() as u64 * (spec.bits_per_sample as u64 / 8);

        // hound leaves the underlying reader at the first sample byte
        let mut inner = reader.into_inner();
        let header_length = inner.stream_position()?;

        Ok(Self {
            path: path.to_path_buf(),
            reader: inner,
            format: format_from_spec(&spec),
            header_length,
            size,
            position: header_length,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioFile for WavFile {
    fn size(&self) -> u64 {
        self.size
    }

    fn header_length(&self) -> u64 {
        self.header_length
    }

    fn seek(&mut self, position: u64) -> io::Result<()> {
        if position > self.header_length + self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "offset {} is past the end of data at {}",
                    position,
                    self.header_length + self.size
                ),
            ));
        }
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data_end = self.header_length + self.size;
        let remaining = data_end.saturating_sub(self.position) as usize;
        let wanted = buf.len().min(remaining);

        let mut filled = 0;
        while filled < wanted {
            let n = self.reader.read(&mut buf[filled..wanted])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.position += filled as u64;
        Ok(filled)
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

fn format_from_spec(spec: &WavSpec) -> AudioFormat {
    let sample_type = match spec.sample_format {
        SampleFormat::Float => SampleType::Float,
        // 8-bit WAV data is unsigned by definition
        SampleFormat::Int if spec.bits_per_sample == 8 => SampleType::UnsignedInt,
        SampleFormat::Int => SampleType::SignedInt,
    };
    AudioFormat {
        sample_rate: spec.sample_rate,
        channel_count: spec.channels,
        sample_size: spec.bits_per_sample,
        sample_type,
        byte_order: ByteOrder::LittleEndian,
    }
}

// ============================================================================
// In-memory files
// ============================================================================

/// Headerless PCM held in memory
#[derive(Debug, Clone)]
pub struct MemoryAudioFile {
    data: Vec<u8>,
    format: AudioFormat,
    position: u64,
}

impl MemoryAudioFile {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            data,
            format,
            position: 0,
        }
    }
}

impl AudioFile for MemoryAudioFile {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn header_length(&self) -> u64 {
        0
    }

    fn seek(&mut self, position: u64) -> io::Result<()> {
        if position > self.data.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("offset {} is past the end of {} bytes", position, self.data.len()),
            ));
        }
        self.position = position;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.position as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

// ============================================================================
// Export
// ============================================================================

/// Write 16-bit little-endian PCM bytes to a WAV file
///
/// # Errors
/// * `UnsupportedFileFormat` - If `format` is not 16-bit signed LE PCM
pub fn export_wav(path: &Path, format: &AudioFormat, data: &[u8]) -> Result<()> {
    if !format.is_pcm_s16le() {
        return Err(EngineError::UnsupportedFileFormat {
            format: format.to_string(),
        });
    }

    let spec = WavSpec {
        channels: format.channel_count,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec).map_err(hound_io_error)?;
    for bytes in data.chunks_exact(2) {
        let sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        writer.write_sample(sample).map_err(hound_io_error)?;
    }
    writer.finalize().map_err(hound_io_error)?;

    Ok(())
}

fn hound_io_error(e: hound::Error) -> EngineError {
    match e {
        hound::Error::IoError(io) => EngineError::Io(io),
        other => EngineError::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
    }
}

// ============================================================================
// Swept tone
// ============================================================================

/// Synthetic frequency sweep used in place of live capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweptTone {
    /// Frequency of the first frame (Hz)
    pub start_freq: f64,
    /// Frequency reached at the last frame (Hz); 0 means "pick for me"
    pub end_freq: f64,
    /// Peak amplitude, 0.0 to 1.0
    pub amplitude: f64,
}

impl Default for SweptTone {
    fn default() -> Self {
        Self {
            start_freq: 1.0,
            end_freq: 0.0,
            amplitude: 0.9,
        }
    }
}

impl SweptTone {
    pub fn new(start_freq: f64, end_freq: f64, amplitude: f64) -> Self {
        Self {
            start_freq,
            end_freq,
            amplitude,
        }
    }
}

/// Fill `buffer` with a swept tone in 16-bit little-endian PCM
///
/// Every channel of a frame carries the same sample. A trailing partial
/// frame is left untouched.
pub fn generate_swept_tone(tone: &SweptTone, format: &AudioFormat, buffer: &mut [u8]) {
    let frame_bytes = format.bytes_per_frame() as usize;
    if frame_bytes == 0 || format.sample_rate == 0 {
        return;
    }
    let num_frames = buffer.len() / frame_bytes;
    if num_frames == 0 {
        return;
    }

    let two_pi = 2.0 * std::f64::consts::PI;
    let d = two_pi / format.sample_rate as f64;
    // A zero-frequency sine is silence
    let start_freq = if tone.start_freq > 0.0 {
        tone.start_freq
    } else {
        1.0
    };
    let mut phase_step = d * start_freq;
    let phase_step_step = d * (tone.end_freq - start_freq) / num_frames as f64;
    let mut phase = 0.0_f64;

    for frame in buffer.chunks_exact_mut(frame_bytes) {
        let value = real_to_pcm(tone.amplitude * phase.sin()).to_le_bytes();
        for sample in frame.chunks_exact_mut(2) {
            sample.copy_from_slice(&value);
        }
        phase += phase_step;
        while phase > two_pi {
            phase -= two_pi;
        }
        phase_step += phase_step_step;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::level::calculate_level;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn write_fixture(path: &Path, format: &AudioFormat, frames: usize) -> Vec<u8> {
        let mut data = vec![0u8; frames * format.bytes_per_frame() as usize];
        generate_swept_tone(&SweptTone::new(440.0, 440.0, 0.5), format, &mut data);
        export_wav(path, format, &data).unwrap();
        data
    }

    #[test]
    fn test_wav_header_and_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let format = AudioFormat::pcm_s16le(48000, 2);
        write_fixture(&path, &format, 1000);

        let wav = WavFile::open(&path).unwrap();
        assert_eq!(wav.format(), format);
        assert_eq!(wav.size(), 4000);
        assert!(wav.header_length() >= 44);
        let file_len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(wav.header_length() + wav.size(), file_len);
        assert_eq!(wav.path(), path.as_path());
    }

    #[test]
    fn test_wav_seek_and_read_match_written_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let format = AudioFormat::pcm_s16le(8000, 1);
        let data = write_fixture(&path, &format, 500);

        let mut wav = WavFile::open(&path).unwrap();
        wav.seek(wav.header_length() + 100).unwrap();
        let mut buf = vec![0u8; 50];
        assert_eq!(wav.read(&mut buf).unwrap(), 50);
        assert_eq!(&buf[..], &data[100..150]);
    }

    #[test]
    fn test_wav_read_stops_at_end_of_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let format = AudioFormat::pcm_s16le(8000, 1);
        write_fixture(&path, &format, 10);

        let mut wav = WavFile::open(&path).unwrap();
        wav.seek(wav.header_length() + 16).unwrap();
        let mut buf = vec![0u8; 64];
        assert_eq!(wav.read(&mut buf).unwrap(), 4);
        assert_eq!(wav.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_wav_seek_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        let format = AudioFormat::pcm_s16le(8000, 1);
        write_fixture(&path, &format, 10);

        let mut wav = WavFile::open(&path).unwrap();
        assert!(wav.seek(wav.header_length() + 21).is_err());
    }

    #[test]
    fn test_open_missing_file() {
        match WavFile::open(Path::new("/nonexistent/path/audio.wav")) {
            Err(EngineError::FileNotFound { path, .. }) => assert!(path.contains("nonexistent")),
            other => panic!("Expected FileNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not a riff file").unwrap();
        assert!(matches!(
            WavFile::open(&path),
            Err(EngineError::InvalidAudio { .. })
        ));
    }

    #[test]
    fn test_export_rejects_non_pcm16() {
        let dir = tempdir().unwrap();
        let mut format = AudioFormat::pcm_s16le(48000, 1);
        format.sample_size = 24;
        let result = export_wav(&dir.path().join("out.wav"), &format, &[0u8; 6]);
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedFileFormat { .. })
        ));
    }

    #[test]
    fn test_memory_file() {
        let format = AudioFormat::pcm_s16le(8000, 1);
        let mut file = MemoryAudioFile::new((0u8..20).collect(), format);
        assert_eq!(file.header_length(), 0);
        file.seek(15).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(file.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], &[15, 16, 17, 18, 19]);
        assert!(file.seek(21).is_err());
    }

    #[test]
    fn test_swept_tone_duplicates_channels() {
        let format = AudioFormat::pcm_s16le(48000, 2);
        let mut buffer = vec![0u8; 4 * 100];
        generate_swept_tone(&SweptTone::new(1000.0, 1000.0, 1.0), &format, &mut buffer);

        for frame in buffer.chunks_exact(4) {
            assert_eq!(frame[0..2], frame[2..4]);
        }
        // Phase starts at zero
        assert_eq!(&buffer[0..2], &[0, 0]);
    }

    #[test]
    fn test_swept_tone_amplitude() {
        let format = AudioFormat::pcm_s16le(48000, 1);
        let mut buffer = vec![0u8; 2 * 48000];
        generate_swept_tone(&SweptTone::new(100.0, 1000.0, 0.5), &format, &mut buffer);

        let level = calculate_level(&buffer);
        assert_relative_eq!(level.peak, 0.5, epsilon = 0.01);
        // Sine RMS is peak / sqrt(2)
        assert_relative_eq!(level.rms, 0.5 / 2f64.sqrt(), epsilon = 0.01);
    }
}
