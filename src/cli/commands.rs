//! CLI Command Implementations
//!
//! Every command runs the engine against the virtual backend, advancing its
//! clock one notify interval at a time and printing published events.

use std::path::{Path, PathBuf};

use chrono::Local;
use log::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{
    export_wav, AudioEngine, AudioFile, DeviceInfo, EngineEvent, FormatNegotiator,
    FormatRequest, SweptTone, TransportState, VirtualBackend, VirtualClock, WavFile,
};
use crate::error::{EngineError, Result};

/// How events are written to stdout
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    pub json: bool,
    pub band_low: f64,
    pub band_high: f64,
    pub band_count: usize,
}

impl Printer {
    pub fn new(json: bool, config: &EngineConfig) -> Self {
        Self {
            json,
            band_low: config.spectrum_low_freq,
            band_high: config.spectrum_high_freq,
            band_count: config.spectrum_num_bands,
        }
    }

    /// Render one event, or `None` when it is not worth printing
    pub fn render(&self, event: &EngineEvent<'_>) -> Option<String> {
        if self.json {
            return match event {
                EngineEvent::BufferChanged { .. } => None,
                _ => serde_json::to_string(event).ok(),
            };
        }

        match event {
            EngineEvent::StateChanged { mode, state } => Some(format!("state  {} {}", mode, state)),
            EngineEvent::FormatChanged { format: Some(format) } => {
                Some(format!("format {}", format))
            }
            EngineEvent::LevelChanged(level) if level.sample_count > 0 => Some(format!(
                "level  rms {:.3} peak {:.3} ({} samples)",
                level.rms, level.peak, level.sample_count
            )),
            EngineEvent::SpectrumChanged {
                position, spectrum, ..
            } if !spectrum.is_empty() => {
                let bands = spectrum
                    .bands(self.band_low, self.band_high, self.band_count)
                    .iter()
                    .map(|band| format!("{:.2}", band.amplitude))
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(format!("bands  @{} [{}]", position, bands))
            }
            EngineEvent::InfoMessage { message, .. } => Some(format!("info   {}", message)),
            EngineEvent::ErrorMessage { heading, detail } => {
                Some(format!("error  {}: {}", heading, detail))
            }
            _ => None,
        }
    }
}

fn build_engine(
    backend: VirtualBackend,
    config: EngineConfig,
    printer: Printer,
) -> Result<AudioEngine> {
    let mut engine = AudioEngine::new(Box::new(backend), config)?;
    engine.subscribe(move |event: &EngineEvent<'_>| {
        if let Some(line) = printer.render(event) {
            println!("{}", line);
        }
    });
    Ok(engine)
}

/// Advance the clock tick by tick until the transport stops or `limit_us`
/// of audio has been processed
fn run_transport(engine: &mut AudioEngine, clock: &VirtualClock, limit_us: u64) -> Result<()> {
    let step_us = engine.config().notify_interval_us();
    let mut elapsed_us = 0;
    engine.pump()?;
    while elapsed_us < limit_us && engine.state() != TransportState::Stopped {
        clock.advance_us(step_us);
        elapsed_us += step_us;
        engine.pump()?;
    }
    Ok(())
}

fn seconds_to_us(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1_000_000.0) as u64
}

/// Print the format two described devices would agree on
pub fn negotiate(
    input_rates: Vec<u32>,
    input_channels: Vec<u16>,
    output_rates: Vec<u32>,
    output_channels: Vec<u16>,
    tone: bool,
    json: bool,
) -> Result<()> {
    let input = DeviceInfo::new("input", input_rates, input_channels, vec![16]);
    let output = DeviceInfo::new("output", output_rates, output_channels, vec![16]);
    let request = if tone {
        FormatRequest::Tone
    } else {
        FormatRequest::Capture
    };

    let format = FormatNegotiator::new(&input, &output).negotiate(request)?;
    if json {
        println!("{}", serde_json::to_string(&format)?);
    } else {
        println!("{}", format);
    }
    Ok(())
}

/// Play a swept tone through the virtual output
pub fn tone(
    config: EngineConfig,
    printer: Printer,
    tone: SweptTone,
    seconds: f64,
    export: Option<&Path>,
) -> Result<()> {
    let clock = VirtualClock::new();
    let mut engine = build_engine(VirtualBackend::new(clock.clone()), config, printer)?;

    engine.generate_tone(tone)?;
    if let (Some(path), Some(format)) = (export, engine.format()) {
        export_wav(path, &format, engine.data())?;
        println!("Tone written to {}", path.display());
    }

    engine.start_playback()?;
    run_transport(&mut engine, &clock, seconds_to_us(seconds))?;
    engine.stop_playback();
    Ok(())
}

/// Replay a WAV file in sliding-window mode
pub fn analyze(
    config: EngineConfig,
    printer: Printer,
    file: &Path,
    seconds: Option<f64>,
) -> Result<()> {
    info!("Analyzing {}", file.display());
    let clock = VirtualClock::new();
    let mut engine = build_engine(VirtualBackend::new(clock.clone()), config, printer)?;

    engine.load_file(file)?;
    engine.start_playback()?;
    let limit = seconds.map(seconds_to_us).unwrap_or(u64::MAX);
    run_transport(&mut engine, &clock, limit)?;
    engine.stop_playback();
    Ok(())
}

/// Capture from the virtual input, optionally exporting the result
pub fn record(
    config: EngineConfig,
    printer: Printer,
    seconds: f64,
    signal: Option<&Path>,
    export: Option<Option<PathBuf>>,
) -> Result<()> {
    let clock = VirtualClock::new();
    let mut backend = VirtualBackend::new(clock.clone());
    if let Some(path) = signal {
        backend = backend.with_input_signal(read_signal(path)?);
    }
    let mut engine = build_engine(backend, config, printer)?;

    engine.initialize_record()?;
    engine.start_recording()?;
    run_transport(&mut engine, &clock, seconds_to_us(seconds))?;
    engine.stop_recording();

    if let Some(path) = export {
        let format = engine.format().ok_or(EngineError::NotInitialized)?;
        let path = path.unwrap_or_else(default_capture_path);
        export_wav(&path, &format, engine.data())?;
        println!(
            "Captured {} bytes to {}",
            engine.data_length(),
            path.display()
        );
    }
    Ok(())
}

/// Raw sample bytes of a WAV file, replayed as the capture signal
fn read_signal(path: &Path) -> Result<Vec<u8>> {
    let mut file = WavFile::open(path)?;
    let mut data = vec![0u8; file.size() as usize];
    let mut filled = 0;
    while filled < data.len() {
        let n = file.read(&mut data[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    data.truncate(filled);
    if !file.format().is_pcm_s16le() {
        warn!(
            "Signal {} is {}; replaying its bytes unchanged",
            path.display(),
            file.format()
        );
    }
    Ok(data)
}

fn default_capture_path() -> PathBuf {
    PathBuf::from(format!("capture-{}.wav", Local::now().format("%Y%m%d-%H%M%S")))
}
