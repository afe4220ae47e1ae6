//! Error handling for Pcmscope
//!
//! Format-negotiation errors are user-facing and carry a short heading for
//! the error-message event. Buffer window violations are programming errors.

use thiserror::Error;

use crate::engine::device::DeviceError;
use crate::engine::transport::TransportMode;

/// Result type alias for Pcmscope operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // Format Negotiation Errors
    #[error("Audio format not supported: {format}")]
    UnsupportedFileFormat { format: String },

    #[error("No output format is available for tone generation")]
    NoSuitableFormat,

    #[error("The input and output devices share no supported format")]
    NoCommonFormat,

    // Device Errors
    #[error("{mode} device reported an error: {error}")]
    DeviceStream {
        mode: TransportMode,
        error: DeviceError,
    },

    #[error("Engine has no negotiated format")]
    NotInitialized,

    // File Errors
    #[error("File not found: {path}")]
    FileNotFound {
        path: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Seek to byte {position} failed")]
    FileSeek {
        position: u64,
        #[source]
        source: std::io::Error,
    },

    // Buffer Errors
    #[error(
        "Window [{position}, {position}+{length}) lies outside valid data \
         [{buffer_position}, {buffer_position}+{data_length})"
    )]
    WindowOutOfBounds {
        position: u64,
        length: u64,
        buffer_position: u64,
        data_length: u64,
    },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::UnsupportedFileFormat { .. } => "UNSUPPORTED_FILE_FORMAT",
            EngineError::NoSuitableFormat => "NO_SUITABLE_FORMAT",
            EngineError::NoCommonFormat => "NO_COMMON_FORMAT",
            EngineError::DeviceStream { .. } => "DEVICE_STREAM_ERROR",
            EngineError::NotInitialized => "NOT_INITIALIZED",
            EngineError::FileNotFound { .. } => "FILE_NOT_FOUND",
            EngineError::InvalidAudio { .. } => "INVALID_AUDIO",
            EngineError::FileSeek { .. } => "FILE_SEEK_ERROR",
            EngineError::WindowOutOfBounds { .. } => "WINDOW_OUT_OF_BOUNDS",
            EngineError::InvalidConfig { .. } => "INVALID_CONFIG",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if the engine can carry on after this error
    ///
    /// A device fault forces a full reset and a window violation is a bug,
    /// so neither counts as recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            EngineError::DeviceStream { .. } => false,
            EngineError::WindowOutOfBounds { .. } => false,
            EngineError::FileSeek { .. } => true,
            EngineError::UnsupportedFileFormat { .. } => true,
            EngineError::NoSuitableFormat => true,
            EngineError::NoCommonFormat => true,
            EngineError::FileNotFound { .. } => true,
            EngineError::InvalidAudio { .. } => true,
            EngineError::InvalidConfig { .. } => true,
            _ => false,
        }
    }

    /// Short heading shown alongside the error detail
    pub fn heading(&self) -> &'static str {
        match self {
            EngineError::UnsupportedFileFormat { .. } => "Audio format not supported",
            EngineError::NoSuitableFormat => "No suitable format found",
            EngineError::NoCommonFormat => "No common input / output format found",
            EngineError::DeviceStream { .. } => "Audio device error",
            EngineError::FileNotFound { .. } => "Could not open file",
            EngineError::InvalidAudio { .. } => "Could not open file",
            EngineError::FileSeek { .. } => "File seek error",
            EngineError::InvalidConfig { .. } => "Invalid configuration",
            _ => "Audio engine error",
        }
    }
}
