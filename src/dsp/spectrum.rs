//! Frequency spectrum of PCM windows
//!
//! Spectrum calculation can take longer than one notify interval, so the
//! engine only ever talks to it through [`SpectrumAnalyser`]: ask whether
//! it is idle, hand over a window, and poll for the result later.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::dsp::level::pcm_to_real;
use crate::engine::format::AudioFormat;

/// Scale applied to the natural log of each bin magnitude
pub const SPECTRUM_ANALYSER_MULTIPLIER: f64 = 0.15;

/// One FFT bin
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectrumBin {
    /// Centre frequency (Hz)
    pub frequency: f64,
    /// Log-scaled amplitude, 0.0 to 1.0
    pub amplitude: f64,
    /// Phase in radians
    pub phase: f64,
    /// The amplitude was above 1.0 before clamping
    pub clipped: bool,
}

/// One display band aggregated from several bins
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectrumBand {
    pub low: f64,
    pub high: f64,
    pub amplitude: f64,
    pub clipped: bool,
}

/// Frequency-domain view of one time-domain window
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrequencySpectrum {
    pub bins: Vec<SpectrumBin>,
}

impl FrequencySpectrum {
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Reduce the bins in `[low, high)` Hz to `count` equal-width bands
    ///
    /// Each band takes the largest amplitude of the bins it covers.
    pub fn bands(&self, low: f64, high: f64, count: usize) -> Vec<SpectrumBand> {
        if count == 0 || high <= low {
            return Vec::new();
        }
        let width = (high - low) / count as f64;
        let mut bands: Vec<SpectrumBand> = (0..count)
            .map(|i| SpectrumBand {
                low: low + width * i as f64,
                high: low + width * (i + 1) as f64,
                ..SpectrumBand::default()
            })
            .collect();

        for bin in &self.bins {
            if bin.frequency < low || bin.frequency >= high {
                continue;
            }
            let index = (((bin.frequency - low) / width) as usize).min(count - 1);
            let band = &mut bands[index];
            band.amplitude = band.amplitude.max(bin.amplitude);
            band.clipped |= bin.clipped;
        }
        bands
    }
}

/// Asynchronous spectrum calculation with at most one request in flight
pub trait SpectrumAnalyser {
    /// True when no calculation is pending
    fn is_ready(&self) -> bool;
    /// Start a calculation over `window`; ignored unless [`is_ready`](Self::is_ready)
    fn calculate(&mut self, window: &[u8], format: &AudioFormat);
    /// Discard any in-flight calculation
    fn cancel(&mut self);
    /// Take the finished spectrum, if one has arrived
    fn poll_result(&mut self) -> Option<FrequencySpectrum>;
}

/// Compute the spectrum of the first channel of `window`
///
/// `num_samples` frames are transformed; a shorter window is zero padded.
pub fn compute_spectrum(
    planner: &mut FftPlanner<f64>,
    window: &[u8],
    format: &AudioFormat,
    num_samples: usize,
) -> FrequencySpectrum {
    let frame_bytes = format.bytes_per_frame() as usize;
    if num_samples < 2 || frame_bytes == 0 {
        return FrequencySpectrum::default();
    }

    let denominator = (num_samples - 1) as f64;
    let mut buffer: Vec<Complex<f64>> = (0..num_samples)
        .map(|i| {
            let offset = i * frame_bytes;
            let sample = window
                .get(offset..offset + 2)
                .map(|b| pcm_to_real(i16::from_le_bytes([b[0], b[1]])))
                .unwrap_or(0.0);
            // Hann window
            let w = 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / denominator).cos());
            Complex::new(sample * w, 0.0)
        })
        .collect();

    let fft = planner.plan_fft_forward(num_samples);
    fft.process(&mut buffer);

    let bins = buffer
        .iter()
        .take(num_samples / 2 + 1)
        .enumerate()
        .map(|(i, c)| {
            let frequency = i as f64 * format.sample_rate as f64 / num_samples as f64;
            let magnitude = c.norm();
            let amplitude = if magnitude > 0.0 {
                SPECTRUM_ANALYSER_MULTIPLIER * magnitude.ln()
            } else {
                0.0
            };
            SpectrumBin {
                frequency,
                amplitude: amplitude.clamp(0.0, 1.0),
                phase: c.arg(),
                clipped: amplitude > 1.0,
            }
        })
        .collect();

    FrequencySpectrum { bins }
}

// ============================================================================
// Background FFT analyser
// ============================================================================

struct Job {
    generation: u64,
    window: Vec<u8>,
    format: AudioFormat,
}

struct Outcome {
    generation: u64,
    spectrum: FrequencySpectrum,
}

/// [`SpectrumAnalyser`] running `rustfft` on a worker thread
///
/// Cancellation bumps a generation counter: the worker skips queued jobs of
/// an older generation and their results are dropped on receipt.
pub struct FftSpectrumAnalyser {
    jobs: Option<Sender<Job>>,
    results: Receiver<Outcome>,
    generation: Arc<AtomicU64>,
    busy: bool,
    worker: Option<JoinHandle<()>>,
}

impl FftSpectrumAnalyser {
    /// Spawn a worker transforming `num_samples` frames per request
    pub fn new(num_samples: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<Outcome>();
        let generation = Arc::new(AtomicU64::new(0));
        let current = Arc::clone(&generation);

        let worker = thread::Builder::new()
            .name("spectrum-analyser".to_string())
            .spawn(move || {
                let mut planner = FftPlanner::new();
                for job in job_rx {
                    if job.generation != current.load(Ordering::Acquire) {
                        debug!("Skipping cancelled spectrum job {}", job.generation);
                        continue;
                    }
                    let spectrum = compute_spectrum(&mut planner, &job.window, &job.format, num_samples);
                    let outcome = Outcome {
                        generation: job.generation,
                        spectrum,
                    };
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });

        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start spectrum worker: {}", e);
                None
            }
        };

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            generation,
            busy: false,
            worker,
        }
    }

    /// Block until the pending result arrives or `timeout` elapses
    pub fn wait_result(&mut self, timeout: Duration) -> Option<FrequencySpectrum> {
        if !self.busy {
            return None;
        }
        loop {
            match self.results.recv_timeout(timeout) {
                Ok(outcome) => {
                    if let Some(spectrum) = self.accept(outcome) {
                        return Some(spectrum);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    fn accept(&mut self, outcome: Outcome) -> Option<FrequencySpectrum> {
        if outcome.generation == self.generation.load(Ordering::Acquire) {
            self.busy = false;
            Some(outcome.spectrum)
        } else {
            None
        }
    }
}

impl SpectrumAnalyser for FftSpectrumAnalyser {
    fn is_ready(&self) -> bool {
        !self.busy && self.worker.is_some()
    }

    fn calculate(&mut self, window: &[u8], format: &AudioFormat) {
        if !self.is_ready() {
            return;
        }
        let Some(jobs) = self.jobs.as_ref() else {
            return;
        };
        let job = Job {
            generation: self.generation.load(Ordering::Acquire),
            window: window.to_vec(),
            format: *format,
        };
        if jobs.send(job).is_ok() {
            self.busy = true;
        } else {
            warn!("Spectrum worker has gone away");
        }
    }

    fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.busy = false;
    }

    fn poll_result(&mut self) -> Option<FrequencySpectrum> {
        while let Ok(outcome) = self.results.try_recv() {
            if let Some(spectrum) = self.accept(outcome) {
                return Some(spectrum);
            }
        }
        None
    }
}

impl Drop for FftSpectrumAnalyser {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loop
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::io::{generate_swept_tone, SweptTone};
    use approx::assert_relative_eq;

    fn tone_window(freq: f64, format: &AudioFormat, frames: usize) -> Vec<u8> {
        let mut window = vec![0u8; frames * format.bytes_per_frame() as usize];
        generate_swept_tone(&SweptTone::new(freq, freq, 0.5), format, &mut window);
        window
    }

    fn loudest(spectrum: &FrequencySpectrum) -> SpectrumBin {
        spectrum
            .bins
            .iter()
            .copied()
            .fold(SpectrumBin::default(), |best, bin| {
                if bin.amplitude > best.amplitude {
                    bin
                } else {
                    best
                }
            })
    }

    #[test]
    fn test_bin_layout() {
        let format = AudioFormat::pcm_s16le(8000, 1);
        let mut planner = FftPlanner::new();
        let spectrum = compute_spectrum(&mut planner, &[0u8; 2048], &format, 1024);

        assert_eq!(spectrum.bins.len(), 513);
        assert_relative_eq!(spectrum.bins[1].frequency, 8000.0 / 1024.0);
        assert_relative_eq!(spectrum.bins[512].frequency, 4000.0);
        assert!(spectrum.bins.iter().all(|b| b.amplitude == 0.0));
    }

    #[test]
    fn test_peak_at_tone_frequency() {
        let format = AudioFormat::pcm_s16le(8000, 1);
        let window = tone_window(1000.0, &format, 4096);
        let mut planner = FftPlanner::new();
        let spectrum = compute_spectrum(&mut planner, &window, &format, 4096);

        let peak = loudest(&spectrum);
        let bin_width = 8000.0 / 4096.0;
        assert!(
            (peak.frequency - 1000.0).abs() <= bin_width,
            "Peak at {} Hz",
            peak.frequency
        );
    }

    #[test]
    fn test_only_first_channel_is_used() {
        let mono = AudioFormat::pcm_s16le(8000, 1);
        let stereo = AudioFormat::pcm_s16le(8000, 2);
        let left = tone_window(500.0, &mono, 1024);

        // Interleave the tone with a silent right channel
        let mut window = Vec::with_capacity(left.len() * 2);
        for sample in left.chunks_exact(2) {
            window.extend_from_slice(sample);
            window.extend_from_slice(&[0, 0]);
        }

        let mut planner = FftPlanner::new();
        let from_mono = compute_spectrum(&mut planner, &left, &mono, 1024);
        let from_stereo = compute_spectrum(&mut planner, &window, &stereo, 1024);
        assert_eq!(from_mono, from_stereo);
    }

    #[test]
    fn test_bands() {
        let spectrum = FrequencySpectrum {
            bins: vec![
                SpectrumBin {
                    frequency: 50.0,
                    amplitude: 0.2,
                    ..SpectrumBin::default()
                },
                SpectrumBin {
                    frequency: 80.0,
                    amplitude: 0.6,
                    ..SpectrumBin::default()
                },
                SpectrumBin {
                    frequency: 950.0,
                    amplitude: 1.0,
                    clipped: true,
                    ..SpectrumBin::default()
                },
                SpectrumBin {
                    frequency: 1500.0,
                    amplitude: 0.9,
                    ..SpectrumBin::default()
                },
            ],
        };

        let bands = spectrum.bands(0.0, 1000.0, 10);
        assert_eq!(bands.len(), 10);
        assert_relative_eq!(bands[0].amplitude, 0.6);
        assert_relative_eq!(bands[9].amplitude, 1.0);
        assert!(bands[9].clipped);
        assert!(bands[1..9].iter().all(|b| b.amplitude == 0.0));
    }

    #[test]
    fn test_worker_round_trip() {
        let format = AudioFormat::pcm_s16le(8000, 1);
        let window = tone_window(1000.0, &format, 1024);
        let mut analyser = FftSpectrumAnalyser::new(1024);

        assert!(analyser.is_ready());
        analyser.calculate(&window, &format);
        assert!(!analyser.is_ready());

        let spectrum = analyser.wait_result(Duration::from_secs(5)).unwrap();
        assert_eq!(spectrum.bins.len(), 513);
        assert!(analyser.is_ready());
    }

    #[test]
    fn test_cancel_drops_result() {
        let format = AudioFormat::pcm_s16le(8000, 1);
        let window = tone_window(1000.0, &format, 1024);
        let mut analyser = FftSpectrumAnalyser::new(1024);

        analyser.calculate(&window, &format);
        analyser.cancel();
        assert!(analyser.is_ready());

        // Whatever the worker produced belongs to the cancelled generation
        std::thread::sleep(Duration::from_millis(50));
        assert!(analyser.poll_result().is_none());
    }
}
