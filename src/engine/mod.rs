//! Audio Engine Module
//!
//! Capture/playback core:
//! - Format negotiation between devices (or a file header)
//! - Sample buffer management, in full and sliding-window modes
//! - Transport state machine and notify-driven analysis scheduling
//! - Device abstraction with a deterministic virtual backend
//! - WAV file handles and swept tone generation

pub mod audio_engine;
pub mod buffer;
pub mod device;
pub mod events;
pub mod format;
pub mod io;
pub mod transport;
pub mod virtual_device;

pub use audio_engine::AudioEngine;
pub use buffer::{AnalysisWindow, AudioBuffer, BufferMode};
pub use device::{
    AudioBackend, DeviceError, DeviceInfo, InputStream, OutputStream, PlaybackSource,
    StreamEvent, StreamState,
};
pub use events::{EngineEvent, EventBus, EventLog};
pub use format::{AudioFormat, ByteOrder, FormatNegotiator, FormatRequest, SampleType};
pub use io::{export_wav, generate_swept_tone, AudioFile, MemoryAudioFile, SweptTone, WavFile};
pub use transport::{Transport, TransportMode, TransportState};
pub use virtual_device::{VirtualBackend, VirtualClock};
