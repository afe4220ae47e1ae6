//! Device and stream abstractions consumed by the engine
//!
//! The engine never talks to hardware directly. A backend enumerates
//! devices and opens streams; streams report what happened since the last
//! poll as a list of events, which the engine dispatches on its own
//! context.

use std::fmt;
use std::io::{self, Cursor, Read};

use serde::{Deserialize, Serialize};

use crate::engine::format::{AudioFormat, ByteOrder, SampleType};
use crate::engine::io::AudioFile;
use crate::error::Result;

/// Capabilities of one enumerated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub sample_rates: Vec<u32>,
    pub channel_counts: Vec<u16>,
    pub sample_sizes: Vec<u16>,
}

impl DeviceInfo {
    pub fn new(
        name: impl Into<String>,
        sample_rates: Vec<u32>,
        channel_counts: Vec<u16>,
        sample_sizes: Vec<u16>,
    ) -> Self {
        Self {
            name: name.into(),
            sample_rates,
            channel_counts,
            sample_sizes,
        }
    }

    /// A device with no capabilities, standing in for "no device"
    pub fn null() -> Self {
        Self::new("", Vec::new(), Vec::new(), Vec::new())
    }

    /// Whether the device can stream `format`
    ///
    /// Only signed little-endian integer PCM is ever accepted.
    pub fn is_format_supported(&self, format: &AudioFormat) -> bool {
        format.sample_type == SampleType::SignedInt
            && format.byte_order == ByteOrder::LittleEndian
            && self.sample_rates.contains(&format.sample_rate)
            && self.channel_counts.contains(&format.channel_count)
            && self.sample_sizes.contains(&format.sample_size)
    }
}

/// State reported by a device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StreamState {
    /// Streaming data
    Active,
    /// Paused by the engine
    Suspended,
    /// Not streaming
    #[default]
    Stopped,
    /// Started but currently without data to move
    Idle,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Active => write!(f, "Active"),
            StreamState::Suspended => write!(f, "Suspended"),
            StreamState::Stopped => write!(f, "Stopped"),
            StreamState::Idle => write!(f, "Idle"),
        }
    }
}

/// Faults a stream may report alongside a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceError {
    /// The device could not be opened with the requested format
    Open,
    /// Reading or writing the device failed
    Io,
    /// Data was not supplied fast enough
    Underrun,
    /// The device is unusable
    Fatal,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Open => write!(f, "open error"),
            DeviceError::Io => write!(f, "I/O error"),
            DeviceError::Underrun => write!(f, "underrun"),
            DeviceError::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Something a stream wants the engine to handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    StateChanged(StreamState),
    /// Captured bytes are waiting to be read
    DataReady,
    /// One notify interval of audio has been processed
    Notify,
}

/// A capture stream
pub trait InputStream {
    fn start(&mut self);
    fn suspend(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
    fn state(&self) -> StreamState;
    fn error(&self) -> Option<DeviceError>;
    /// Microseconds of audio processed since start
    fn processed_us(&self) -> u64;
    /// Events raised since the previous poll, oldest first
    fn poll_events(&mut self) -> Vec<StreamEvent>;
    /// Bytes that can be read without blocking
    fn bytes_ready(&self) -> usize;
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// A render stream that pulls its data from a [`PlaybackSource`]
pub trait OutputStream {
    fn start(&mut self, source: PlaybackSource);
    fn suspend(&mut self);
    fn resume(&mut self);
    /// Stop streaming and hand the source back to the caller
    fn stop(&mut self) -> Option<PlaybackSource>;
    fn state(&self) -> StreamState;
    fn error(&self) -> Option<DeviceError>;
    fn processed_us(&self) -> u64;
    fn poll_events(&mut self) -> Vec<StreamEvent>;
}

/// Opens streams on enumerated devices
pub trait AudioBackend {
    fn input_devices(&self) -> Vec<DeviceInfo>;
    fn output_devices(&self) -> Vec<DeviceInfo>;
    fn default_input_device(&self) -> Option<DeviceInfo>;
    fn default_output_device(&self) -> Option<DeviceInfo>;
    fn open_input(
        &self,
        device: &DeviceInfo,
        format: &AudioFormat,
        notify_interval_ms: u64,
    ) -> Result<Box<dyn InputStream>>;
    fn open_output(
        &self,
        device: &DeviceInfo,
        format: &AudioFormat,
        notify_interval_ms: u64,
    ) -> Result<Box<dyn OutputStream>>;
}

/// Data handed to an output stream for playback
pub enum PlaybackSource {
    /// Read-only cursor over a snapshot of the engine buffer
    Memory(Cursor<Vec<u8>>),
    /// File handle already positioned at the start of its sample data
    File(Box<dyn AudioFile>),
}

impl Read for PlaybackSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PlaybackSource::Memory(cursor) => cursor.read(buf),
            PlaybackSource::File(file) => file.read(buf),
        }
    }
}

impl fmt::Debug for PlaybackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackSource::Memory(cursor) => {
                write!(f, "PlaybackSource::Memory({} bytes)", cursor.get_ref().len())
            }
            PlaybackSource::File(file) => write!(f, "PlaybackSource::File({} bytes)", file.size()),
        }
    }
}
