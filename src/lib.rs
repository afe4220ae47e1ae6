//! Pcmscope - Audio Capture, Playback and Analysis Engine
//!
//! Pcmscope sits between an audio device (or a recorded WAV file) and a set
//! of real-time visualisations. It:
//! 1. Negotiates one PCM format both the input and output devices accept
//! 2. Records into, and plays back from, a single shared sample buffer
//! 3. Computes RMS/peak level and a frequency spectrum on every notify tick
//!
//! # Architecture
//!
//! The engine is single-threaded and event driven. Device streams queue
//! their events; [`engine::AudioEngine::pump`] dispatches them and publishes
//! [`engine::EngineEvent`]s to subscribers in registration order. Spectrum
//! analysis runs on a background worker and is skipped, never queued, while
//! the worker is busy.

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;

pub use config::EngineConfig;
pub use engine::AudioEngine;
pub use error::{EngineError, Result};
