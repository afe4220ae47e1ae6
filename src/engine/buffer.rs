//! Audio Buffer Management
//!
//! The engine owns exactly one byte buffer. It is used in one of two ways:
//! - Full: holds up to the configured maximum duration of audio; capture or
//!   tone generation writes into it from offset 0.
//! - Sliding window: holds only the slice of a file around the play
//!   position that analysis needs, refilled from the file on demand.
//!
//! In both modes the valid bytes are `[position, position + data_length)`
//! in stream coordinates.

use log::{debug, warn};

use crate::engine::io::AudioFile;
use crate::error::{EngineError, Result};

/// How the buffer is populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferMode {
    /// Whole recording (or tone) held in memory
    #[default]
    Full,
    /// Partial view of a file, refilled as playback advances
    SlidingWindow,
}

/// A byte range requested by analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    /// Start in stream coordinates; negative while not enough audio has passed
    pub position: i64,
    pub length: u64,
}

impl AnalysisWindow {
    /// The window ending at `end`
    pub fn trailing(end: u64, length: u64) -> Self {
        Self {
            position: end as i64 - length as i64,
            length,
        }
    }

    pub fn end(&self) -> i64 {
        self.position + self.length as i64
    }
}

/// The engine's sample buffer and its valid-data window
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    data: Vec<u8>,
    position: u64,
    data_length: u64,
    mode: BufferMode,
}

impl AudioBuffer {
    /// Create an empty full-mode buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `length` zeroed bytes for capture or tone generation
    pub fn allocate_full(&mut self, length: u64) {
        self.mode = BufferMode::Full;
        self.data = vec![0u8; length as usize];
        self.position = 0;
        self.data_length = 0;
    }

    /// Switch to file-backed operation with nothing buffered yet
    pub fn start_sliding_window(&mut self) {
        self.mode = BufferMode::SlidingWindow;
        self.data.clear();
        self.position = 0;
        self.data_length = 0;
    }

    /// Drop all contents and return to an empty full-mode buffer
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Zero every byte and mark the buffer empty, keeping its allocation
    pub fn zero(&mut self) {
        self.data.fill(0);
        self.data_length = 0;
    }

    /// Fill the whole allocation through `fill` and mark it all valid
    pub fn fill_with(&mut self, fill: impl FnOnce(&mut [u8])) {
        fill(&mut self.data);
        self.position = 0;
        self.data_length = self.data.len() as u64;
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Allocated capacity in bytes
    #[inline]
    pub fn buffer_length(&self) -> u64 {
        self.data.len() as u64
    }

    /// Stream offset of the first valid byte
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of valid bytes starting at [`position`](Self::position)
    #[inline]
    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    /// Stream offset one past the last valid byte
    #[inline]
    pub fn data_end(&self) -> u64 {
        self.position + self.data_length
    }

    pub fn is_full(&self) -> bool {
        self.data_length == self.buffer_length()
    }

    /// The whole allocation, including bytes not yet written
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The valid bytes
    pub fn valid_data(&self) -> &[u8] {
        &self.data[..self.data_length as usize]
    }

    /// Append captured bytes through `read`, which receives the free space
    /// and returns how many bytes it wrote
    ///
    /// Only meaningful in full mode, where the valid data starts at 0.
    pub fn append_with(&mut self, read: impl FnOnce(&mut [u8]) -> usize) -> usize {
        debug_assert_eq!(self.position, 0, "capture into a sliding window");
        let start = self.data_length as usize;
        let written = read(&mut self.data[start..]).min(self.data.len() - start);
        self.data_length += written as u64;
        written
    }

    /// Whether `[position, position + length)` lies inside the valid data
    pub fn contains(&self, position: i64, length: u64) -> bool {
        position >= self.position as i64
            && position as u64 + length <= self.data_end()
    }

    /// Borrow the bytes of an analysis window
    ///
    /// # Errors
    /// * `WindowOutOfBounds` - If any byte of the window is not valid data.
    ///   Callers are expected to check first, so this indicates a bug.
    pub fn window(&self, position: i64, length: u64) -> Result<&[u8]> {
        if !self.contains(position, length) {
            return Err(EngineError::WindowOutOfBounds {
                position: position.max(0) as u64,
                length,
                buffer_position: self.position,
                data_length: self.data_length,
            });
        }
        let start = (position as u64 - self.position) as usize;
        Ok(&self.data[start..start + length as usize])
    }

    /// Whether the buffered slice still serves both analysis windows
    ///
    /// Windows that start before the stream do not need to be resident yet.
    pub fn covers(&self, level: AnalysisWindow, spectrum: AnalysisWindow) -> bool {
        let needed = |w: AnalysisWindow| w.position < 0 || self.contains(w.position, w.length);
        level.length.max(spectrum.length) <= self.data_length && needed(level) && needed(spectrum)
    }

    /// Make the sliding window cover both analysis windows plus `lookahead`
    ///
    /// Returns `Ok(false)` when nothing had to be read. On a failed seek the
    /// buffer is left empty and the error is returned for reporting.
    pub fn refill(
        &mut self,
        file: &mut dyn AudioFile,
        level: AnalysisWindow,
        spectrum: AnalysisWindow,
        lookahead: u64,
    ) -> Result<bool> {
        if self.covers(level, spectrum) {
            return Ok(false);
        }

        self.position = 0;
        self.data_length = 0;

        let file_size = file.size() as i64;
        let read_pos = level.position.min(spectrum.position).max(0);
        let read_end = level.end().max(spectrum.end()).min(file_size).max(read_pos);
        let read_len = (read_end - read_pos) as u64 + lookahead;

        let seek_to = read_pos as u64 + file.header_length();
        if let Err(source) = file.seek(seek_to) {
            warn!("Sliding window seek to {} failed: {}", seek_to, source);
            return Err(EngineError::FileSeek {
                position: seek_to,
                source,
            });
        }

        self.data.resize(read_len as usize, 0);
        let mut filled = 0;
        while filled < self.data.len() {
            let n = file.read(&mut self.data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.position = read_pos as u64;
        self.data_length = filled as u64;

        debug!(
            "Sliding window refilled: position {} length {} (requested {})",
            self.position, self.data_length, read_len
        );
        Ok(true)
    }
}

// ============================================================================
// Tests
// ============================================================================
