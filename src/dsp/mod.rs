//! Signal Analysis
//!
//! Level metering over PCM windows and FFT-based spectrum analysis.

pub mod level;
pub mod spectrum;

pub use level::{calculate_level, pcm_to_real, real_to_pcm, LevelSample};
pub use spectrum::{
    FftSpectrumAnalyser, FrequencySpectrum, SpectrumAnalyser, SpectrumBand, SpectrumBin,
};
