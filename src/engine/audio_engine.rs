//! Audio Engine
//!
//! Ties the pieces together: negotiates a format, owns the sample buffer and
//! the device streams, runs the record/playback transport and schedules
//! level and spectrum analysis on every notify tick.
//!
//! Everything runs on the caller's thread. Device streams queue their
//! events and [`AudioEngine::pump`] dispatches them; only the spectrum
//! analyser works in the background.

use std::io::Cursor;
use std::path::Path;

use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::dsp::level::{self, LevelSample};
use crate::dsp::spectrum::{FftSpectrumAnalyser, FrequencySpectrum, SpectrumAnalyser};
use crate::engine::buffer::{AnalysisWindow, AudioBuffer};
use crate::engine::device::{
    AudioBackend, DeviceInfo, InputStream, OutputStream, PlaybackSource, StreamEvent,
};
use crate::engine::events::{EngineEvent, EventBus};
use crate::engine::format::{AudioFormat, FormatNegotiator, FormatRequest};
use crate::engine::io::{generate_swept_tone, AudioFile, SweptTone, WavFile};
use crate::engine::transport::{Transport, TransportMode, TransportState};
use crate::error::{EngineError, Result};

/// How long informational messages stay visible
const INFO_MESSAGE_DURATION_MS: u64 = 5000;

/// A stored recording being replayed
///
/// The playback handle is lent to the output stream while playing and
/// returned when it stops; the analysis handle always stays here.
struct FileSource {
    playback: Option<Box<dyn AudioFile>>,
    analysis: Box<dyn AudioFile>,
}

impl FileSource {
    fn size(&self) -> u64 {
        self.analysis.size()
    }
}

/// Where the engine's audio comes from
enum Source {
    /// Live capture from the input device
    Capture,
    Tone(SweptTone),
    File(FileSource),
}

/// Record/playback engine with level and spectrum analysis
pub struct AudioEngine {
    backend: Box<dyn AudioBackend>,
    config: EngineConfig,

    input_device: DeviceInfo,
    output_device: DeviceInfo,
    input: Option<Box<dyn InputStream>>,
    output: Option<Box<dyn OutputStream>>,
    input_attached: bool,
    output_attached: bool,

    transport: Transport,
    format: Option<AudioFormat>,
    source: Source,
    buffer: AudioBuffer,

    record_position: u64,
    play_position: u64,
    notify_count: u64,

    level_window_length: u64,
    spectrum_window_length: u64,
    level: LevelSample,

    spectrum_analyser: Box<dyn SpectrumAnalyser>,
    spectrum_position: u64,

    events: EventBus,
}

impl AudioEngine {
    /// Create an engine using the backend's default devices and an FFT analyser
    pub fn new(backend: Box<dyn AudioBackend>, config: EngineConfig) -> Result<Self> {
        let analyser = FftSpectrumAnalyser::new(config.spectrum_length_samples);
        Self::with_analyser(backend, config, Box::new(analyser))
    }

    /// Create an engine with a custom spectrum analyser
    pub fn with_analyser(
        backend: Box<dyn AudioBackend>,
        config: EngineConfig,
        spectrum_analyser: Box<dyn SpectrumAnalyser>,
    ) -> Result<Self> {
        config.validate()?;
        let input_device = backend.default_input_device().unwrap_or_else(DeviceInfo::null);
        let output_device = backend
            .default_output_device()
            .unwrap_or_else(DeviceInfo::null);
        info!(
            "Audio engine created (input '{}', output '{}')",
            input_device.name, output_device.name
        );

        Ok(Self {
            backend,
            config,
            input_device,
            output_device,
            input: None,
            output: None,
            input_attached: false,
            output_attached: false,
            transport: Transport::new(),
            format: None,
            source: Source::Capture,
            buffer: AudioBuffer::new(),
            record_position: 0,
            play_position: 0,
            notify_count: 0,
            level_window_length: 0,
            spectrum_window_length: 0,
            level: LevelSample::default(),
            spectrum_analyser,
            spectrum_position: 0,
            events: EventBus::new(),
        })
    }

    /// Register an event handler; handlers run in registration order
    pub fn subscribe(&mut self, handler: impl FnMut(&EngineEvent<'_>) + 'static) {
        self.events.subscribe(handler);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn input_device(&self) -> &DeviceInfo {
        &self.input_device
    }

    pub fn output_device(&self) -> &DeviceInfo {
        &self.output_device
    }

    /// Total playable length: the file's data size in file mode, the
    /// allocated buffer otherwise
    pub fn buffer_length(&self) -> u64 {
        match &self.source {
            Source::File(file) => file.size(),
            _ => self.buffer.buffer_length(),
        }
    }

    /// Stream offset of the first buffered byte
    pub fn buffer_position(&self) -> u64 {
        self.buffer.position()
    }

    pub fn data_length(&self) -> u64 {
        self.buffer.data_length()
    }

    /// Captured or generated bytes (the buffered slice in file mode)
    pub fn data(&self) -> &[u8] {
        self.buffer.valid_data()
    }

    pub fn record_position(&self) -> u64 {
        self.record_position
    }

    pub fn play_position(&self) -> u64 {
        self.play_position
    }

    pub fn level(&self) -> LevelSample {
        self.level
    }

    pub fn level_window_length(&self) -> u64 {
        self.level_window_length
    }

    pub fn spectrum_window_length(&self) -> u64 {
        self.spectrum_window_length
    }

    /// Tone currently loaded, with its resolved end frequency
    pub fn tone(&self) -> Option<SweptTone> {
        match &self.source {
            Source::Tone(tone) => Some(*tone),
            _ => None,
        }
    }

    pub fn is_file_mode(&self) -> bool {
        matches!(self.source, Source::File(_))
    }

    /// Number of notify ticks handled since the transport last started
    pub fn notify_count(&self) -> u64 {
        self.notify_count
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Prepare for live capture from the input device
    pub fn initialize_record(&mut self) -> Result<bool> {
        self.reset();
        self.source = Source::Capture;
        info!("Initializing for capture");
        self.initialize()
    }

    /// Prepare a swept tone in place of captured audio
    pub fn generate_tone(&mut self, tone: SweptTone) -> Result<bool> {
        self.reset();
        self.source = Source::Tone(tone);
        info!(
            "Initializing for tone {} Hz -> {} Hz",
            tone.start_freq, tone.end_freq
        );
        self.initialize()
    }

    /// Open a WAV file for playback and analysis
    pub fn load_file(&mut self, path: &Path) -> Result<bool> {
        let handles = WavFile::open(path).and_then(|playback| {
            let analysis = WavFile::open(path)?;
            Ok((playback, analysis))
        });
        match handles {
            Ok((playback, analysis)) => {
                info!("Loading {}", path.display());
                self.load_file_handles(Box::new(playback), Box::new(analysis))
            }
            Err(e) => {
                self.reset();
                self.publish_error(&e);
                Err(e)
            }
        }
    }

    /// Replay a stored recording given two independent handles on it
    ///
    /// `playback` is streamed to the output device and `analysis` is read
    /// to refill the sliding window.
    pub fn load_file_handles(
        &mut self,
        playback: Box<dyn AudioFile>,
        analysis: Box<dyn AudioFile>,
    ) -> Result<bool> {
        self.reset();
        let format = playback.format();
        if !format.is_pcm_s16le() {
            let e = EngineError::UnsupportedFileFormat {
                format: format.to_string(),
            };
            self.publish_error(&e);
            return Err(e);
        }
        self.source = Source::File(FileSource {
            playback: Some(playback),
            analysis,
        });
        self.buffer.start_sliding_window();
        self.initialize()
    }

    /// Negotiate a format for the current source and set up the streams
    ///
    /// Returns `Ok(true)` when a new format was chosen and the streams were
    /// recreated, `Ok(false)` when the current format still holds.
    ///
    /// # Errors
    /// * `UnsupportedFileFormat` - The output cannot play the loaded file
    /// * `NoSuitableFormat` - The output accepts no format for a tone
    /// * `NoCommonFormat` - Input and output share no format
    /// * `DeviceStream` - A stream could not be opened
    pub fn initialize(&mut self) -> Result<bool> {
        let previous = self.format;
        let result = self.select_format().and_then(|format| {
            if previous == Some(format) {
                Ok(false)
            } else {
                self.prepare(format).map(|_| true)
            }
        });

        match &result {
            Ok(changed) => debug!(
                "Initialized (changed {}): buffer length {} data length {}",
                changed,
                self.buffer_length(),
                self.data_length()
            ),
            Err(e) => {
                warn!("Initialization failed: {}", e);
                self.publish_error(e);
            }
        }
        result
    }

    fn select_format(&mut self) -> Result<AudioFormat> {
        let request = match (&self.source, self.format) {
            (Source::File(file), _) => FormatRequest::File(file.analysis.format()),
            (source, Some(format)) => FormatRequest::Fixed {
                format,
                tone: matches!(source, Source::Tone(_)),
            },
            (Source::Tone(_), None) => FormatRequest::Tone,
            (Source::Capture, None) => FormatRequest::Capture,
        };

        let negotiated =
            FormatNegotiator::new(&self.input_device, &self.output_device).negotiate(request);
        match negotiated {
            Ok(format) => {
                self.set_format(Some(format));
                Ok(format)
            }
            Err(e) => {
                self.set_format(None);
                Err(e)
            }
        }
    }

    /// Allocate the buffer for `format` and open the device streams
    fn prepare(&mut self, format: AudioFormat) -> Result<()> {
        self.reset_audio_devices();

        let notify_ms = self.config.notify_interval_ms;
        let high_freq = self.config.spectrum_high_freq;
        let tone = match &mut self.source {
            Source::Tone(tone) => {
                if tone.end_freq == 0.0 {
                    tone.end_freq = high_freq.min(format.nyquist());
                }
                Some(*tone)
            }
            _ => None,
        };

        if self.is_file_mode() {
            self.emit(EngineEvent::BufferLengthChanged {
                length: self.buffer_length(),
            });
            self.emit(EngineEvent::DataLengthChanged {
                length: self.data_length(),
            });
            self.emit_buffer_changed(0, 0);
            self.set_record_position(self.buffer_length(), false);
        } else {
            self.buffer
                .allocate_full(format.bytes_for_duration(self.config.buffer_duration_us));
            self.emit(EngineEvent::BufferLengthChanged {
                length: self.buffer.buffer_length(),
            });
            if let Some(tone) = tone {
                self.buffer
                    .fill_with(|bytes| generate_swept_tone(&tone, &format, bytes));
                self.emit(EngineEvent::DataLengthChanged {
                    length: self.buffer.data_length(),
                });
                self.emit_buffer_changed(0, self.buffer.data_length());
                self.set_record_position(self.buffer.buffer_length(), false);
            } else {
                self.emit_buffer_changed(0, 0);
                self.input = Some(
                    self.backend
                        .open_input(&self.input_device, &format, notify_ms)?,
                );
            }
        }

        self.output = Some(
            self.backend
                .open_output(&self.output_device, &format, notify_ms)?,
        );
        info!("Format set to {}", format);
        Ok(())
    }

    /// Use a different capture device
    ///
    /// The format is negotiated again from scratch.
    pub fn set_input_device(&mut self, device: DeviceInfo) -> Result<bool> {
        if device.name == self.input_device.name {
            return Ok(false);
        }
        info!("Input device changed to '{}'", device.name);
        self.input_device = device;
        self.renegotiate()
    }

    /// Use a different playback device
    pub fn set_output_device(&mut self, device: DeviceInfo) -> Result<bool> {
        if device.name == self.output_device.name {
            return Ok(false);
        }
        info!("Output device changed to '{}'", device.name);
        self.output_device = device;
        self.renegotiate()
    }

    fn renegotiate(&mut self) -> Result<bool> {
        self.stop_recording();
        self.stop_playback();
        self.set_format(None);
        self.initialize()
    }

    // ========================================================================
    // Reset
    // ========================================================================

    /// Stop everything and forget the format, source and buffer contents
    pub fn reset(&mut self) {
        self.stop_recording();
        self.stop_playback();
        self.set_transport(TransportMode::Input, TransportState::Stopped);
        self.set_format(None);
        self.source = Source::Capture;
        self.buffer.clear();
        self.emit(EngineEvent::BufferLengthChanged { length: 0 });
        self.emit(EngineEvent::DataLengthChanged { length: 0 });
        self.reset_audio_devices();
    }

    /// Release both streams and zero playback state
    pub fn reset_audio_devices(&mut self) {
        self.input = None;
        self.input_attached = false;
        if let Some(mut output) = self.output.take() {
            // Keep the playback handle; the stream owning it is going away
            let returned = output.stop();
            self.restore_playback(returned);
        }
        self.output_attached = false;
        self.set_record_position(0, false);
        self.set_play_position(0, false);
        self.spectrum_position = 0;
        self.set_level(LevelSample::default());
    }

    fn restore_playback(&mut self, returned: Option<PlaybackSource>) {
        if let (Some(PlaybackSource::File(handle)), Source::File(file)) =
            (returned, &mut self.source)
        {
            file.playback = Some(handle);
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start (or resume) capturing into the buffer
    pub fn start_recording(&mut self) -> Result<()> {
        if self.input.is_none() {
            return Err(EngineError::NotInitialized);
        }

        if self.transport.is_suspended_in(TransportMode::Input) {
            if let Some(input) = self.input.as_mut() {
                input.resume();
            }
            return Ok(());
        }

        self.cancel_spectrum();
        self.buffer.zero();
        self.set_record_position(0, true);
        self.stop_playback();
        // Published once the stream reports Active
        self.transport
            .transition(TransportMode::Input, self.transport.state());
        self.input_attached = true;
        self.notify_count = 0;
        self.emit(EngineEvent::DataLengthChanged { length: 0 });
        if let Some(input) = self.input.as_mut() {
            input.start();
        }
        info!("Recording started");
        Ok(())
    }

    /// Start (or resume) playing the buffer or the loaded file
    pub fn start_playback(&mut self) -> Result<()> {
        if self.output.is_none() {
            return Err(EngineError::NotInitialized);
        }

        if self.transport.is_suspended_in(TransportMode::Output) {
            if let Some(output) = self.output.as_mut() {
                // Some devices report a stale suspended state; cycle it
                output.suspend();
                output.resume();
            }
            return Ok(());
        }

        self.cancel_spectrum();
        self.set_play_position(0, true);
        self.stop_recording();
        // Published once the stream reports Active
        self.transport
            .transition(TransportMode::Output, self.transport.state());
        self.output_attached = true;
        self.notify_count = 0;

        let source = match &mut self.source {
            Source::File(file) => {
                let mut handle = file.playback.take().ok_or(EngineError::NotInitialized)?;
                if let Err(e) = handle.seek(handle.header_length()) {
                    file.playback = Some(handle);
                    return Err(e.into());
                }
                self.buffer.start_sliding_window();
                PlaybackSource::File(handle)
            }
            _ => PlaybackSource::Memory(Cursor::new(self.buffer.as_bytes().to_vec())),
        };
        if let Some(output) = self.output.as_mut() {
            output.start(source);
        }
        info!("Playback started");
        Ok(())
    }

    /// Pause whichever transport is streaming
    pub fn suspend(&mut self) {
        if !self.transport.is_active() {
            return;
        }
        match self.transport.mode() {
            TransportMode::Input => {
                if let Some(input) = self.input.as_mut() {
                    input.suspend();
                }
            }
            TransportMode::Output => {
                if let Some(output) = self.output.as_mut() {
                    output.suspend();
                }
            }
        }
    }

    /// Halt capture and detach from the input stream
    ///
    /// State changes the stream raised while stopping are handled before
    /// detaching, so nothing arrives later against a reset buffer.
    pub fn stop_recording(&mut self) {
        let pending = match self.input.as_mut() {
            Some(input) => {
                input.stop();
                input.poll_events()
            }
            None => return,
        };
        if self.input_attached {
            self.drain_state_changes(TransportMode::Input, pending);
        }
        self.input_attached = false;
    }

    /// Halt playback, detach from the output stream and rewind
    pub fn stop_playback(&mut self) {
        let (returned, pending) = match self.output.as_mut() {
            Some(output) => {
                let returned = output.stop();
                (returned, output.poll_events())
            }
            None => return,
        };
        self.restore_playback(returned);
        if self.output_attached {
            self.drain_state_changes(TransportMode::Output, pending);
        }
        self.output_attached = false;
        self.set_play_position(0, false);
    }

    fn drain_state_changes(&mut self, from: TransportMode, pending: Vec<StreamEvent>) {
        for event in pending {
            if let StreamEvent::StateChanged(state) = event {
                self.handle_state_changed(from, state);
            }
        }
    }

    /// Move the transport to `(mode, state)`, publishing when it changed
    pub fn set_transport(&mut self, mode: TransportMode, state: TransportState) {
        if self.transport.transition(mode, state) {
            self.emit(EngineEvent::StateChanged { mode, state });
        }
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    /// Dispatch everything the streams and the spectrum analyser produced
    /// since the last call
    ///
    /// # Errors
    /// * `WindowOutOfBounds` - Analysis asked for bytes outside the valid
    ///   data, which is a bug
    /// * `Io` - Reading the analysis file failed
    pub fn pump(&mut self) -> Result<()> {
        if self.input_attached {
            let events = self
                .input
                .as_mut()
                .map(|input| input.poll_events())
                .unwrap_or_default();
            for event in events {
                if !self.input_attached {
                    break;
                }
                match event {
                    StreamEvent::StateChanged(state) => {
                        self.handle_state_changed(TransportMode::Input, state)
                    }
                    StreamEvent::DataReady => self.handle_data_ready(),
                    StreamEvent::Notify => self.handle_notify()?,
                }
            }
        }

        if self.output_attached {
            let events = self
                .output
                .as_mut()
                .map(|output| output.poll_events())
                .unwrap_or_default();
            for event in events {
                if !self.output_attached {
                    break;
                }
                match event {
                    StreamEvent::StateChanged(state) => {
                        self.handle_state_changed(TransportMode::Output, state)
                    }
                    StreamEvent::DataReady => {}
                    StreamEvent::Notify => self.handle_notify()?,
                }
            }
        }

        while let Some(spectrum) = self.spectrum_analyser.poll_result() {
            self.publish_spectrum(self.spectrum_position, self.spectrum_window_length, spectrum);
        }
        Ok(())
    }

    fn handle_state_changed(&mut self, from: TransportMode, state: TransportState) {
        if state == TransportState::Idle && self.output_at_file_end() {
            debug!("File playback reached end of data");
            self.stop_playback();
            return;
        }

        if state == TransportState::Stopped {
            let fault = match from {
                TransportMode::Input => self.input.as_ref().and_then(|s| s.error()),
                TransportMode::Output => self.output.as_ref().and_then(|s| s.error()),
            };
            if let Some(fault) = fault {
                let e = EngineError::DeviceStream {
                    mode: from,
                    error: fault,
                };
                error!("{}; resetting engine", e);
                self.publish_error(&e);
                self.reset();
                return;
            }
        }

        self.set_transport(self.transport.mode(), state);
    }

    fn output_at_file_end(&self) -> bool {
        let (Source::File(file), Some(format), Some(output)) =
            (&self.source, self.format, self.output.as_ref())
        else {
            return false;
        };
        format.bytes_for_duration(output.processed_us()) >= file.size()
    }

    /// Move captured bytes from the input stream into the buffer
    fn handle_data_ready(&mut self) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        let ready = input.bytes_ready();
        let read = self.buffer.append_with(|space| {
            let n = ready.min(space.len());
            input.read(&mut space[..n])
        });

        if read > 0 {
            self.emit(EngineEvent::DataLengthChanged {
                length: self.buffer.data_length(),
            });
        }
        if self.buffer.is_full() {
            info!("Capture buffer full; stopping recording");
            self.stop_recording();
        }
    }

    // ========================================================================
    // Analysis scheduling
    // ========================================================================

    /// Handle one notify tick of the streaming transport
    fn handle_notify(&mut self) -> Result<()> {
        let Some(format) = self.format else {
            return Ok(());
        };
        self.notify_count += 1;

        match self.transport.mode() {
            TransportMode::Input => self.notify_input(&format),
            TransportMode::Output => self.notify_output(&format),
        }
    }

    fn notify_input(&mut self, format: &AudioFormat) -> Result<()> {
        let processed = self.input.as_ref().map_or(0, |s| s.processed_us());
        let position = format
            .bytes_for_duration(processed)
            .min(self.buffer.buffer_length());
        self.set_record_position(position, false);

        let data_length = self.buffer.data_length();
        if data_length >= self.level_window_length {
            self.calculate_level(data_length - self.level_window_length)?;
        }
        if data_length >= self.spectrum_window_length {
            self.calculate_spectrum(data_length - self.spectrum_window_length)?;
        }
        self.emit_buffer_changed(0, data_length);
        Ok(())
    }

    fn notify_output(&mut self, format: &AudioFormat) -> Result<()> {
        let processed = self.output.as_ref().map_or(0, |s| s.processed_us());
        let position = format.bytes_for_duration(processed);
        self.set_play_position(position.min(self.buffer_length()), false);

        let level_window = AnalysisWindow::trailing(position, self.level_window_length);
        let spectrum_window = AnalysisWindow::trailing(position, self.spectrum_window_length);

        if let Source::File(file) = &mut self.source {
            let lookahead = format.bytes_for_duration(self.config.waveform_window_us);
            let file_size = file.size();
            let mut skip_analysis = false;
            match self.buffer.refill(
                file.analysis.as_mut(),
                level_window,
                spectrum_window,
                lookahead,
            ) {
                Ok(true) => {
                    self.emit_buffer_changed(self.buffer.position(), self.buffer.data_length())
                }
                Ok(false) => {}
                Err(e @ EngineError::FileSeek { .. }) => {
                    warn!("Skipping analysis for this tick: {}", e);
                    self.emit(EngineEvent::InfoMessage {
                        message: e.to_string(),
                        duration_ms: INFO_MESSAGE_DURATION_MS,
                    });
                    self.emit_buffer_changed(self.buffer.position(), self.buffer.data_length());
                    skip_analysis = true;
                }
                Err(e) => return Err(e),
            }
            if position >= file_size {
                debug!("Play position {} reached end of file data", position);
                self.stop_playback();
            }
            if skip_analysis {
                return Ok(());
            }
        } else if position >= self.buffer.data_length() {
            debug!("Play position {} reached end of buffered data", position);
            self.stop_playback();
        }

        if level_window.position >= 0
            && self.buffer.contains(level_window.position, level_window.length)
        {
            self.calculate_level(level_window.position as u64)?;
        }
        if spectrum_window.position >= 0
            && self
                .buffer
                .contains(spectrum_window.position, spectrum_window.length)
        {
            self.calculate_spectrum(spectrum_window.position as u64)?;
        }
        Ok(())
    }

    /// Compute RMS and peak over the level window starting at `position`
    pub fn calculate_level(&mut self, position: u64) -> Result<()> {
        let window = self
            .buffer
            .window(position as i64, self.level_window_length)
            .map_err(|e| {
                error!("Level window rejected: {}", e);
                e
            })?;
        let sample = level::calculate_level(window);
        debug!(
            "Level at {}: rms {:.4} peak {:.4}",
            position, sample.rms, sample.peak
        );
        self.set_level(sample);
        Ok(())
    }

    /// Hand the spectrum window starting at `position` to the analyser
    ///
    /// Skipped while the analyser is still busy with an earlier window.
    pub fn calculate_spectrum(&mut self, position: u64) -> Result<()> {
        let Some(format) = self.format else {
            return Err(EngineError::NotInitialized);
        };
        let window = self
            .buffer
            .window(position as i64, self.spectrum_window_length)
            .map_err(|e| {
                error!("Spectrum window rejected: {}", e);
                e
            })?;

        if self.spectrum_analyser.is_ready() {
            self.spectrum_position = position;
            self.spectrum_analyser.calculate(window, &format);
            debug!("Spectrum requested at {}", position);
        } else {
            debug!("Spectrum analyser busy; skipping window at {}", position);
        }
        Ok(())
    }

    fn cancel_spectrum(&mut self) {
        self.spectrum_analyser.cancel();
        self.publish_spectrum(0, 0, FrequencySpectrum::default());
    }

    // ========================================================================
    // Published state
    // ========================================================================

    fn set_format(&mut self, format: Option<AudioFormat>) {
        let changed = self.format != format;
        self.format = format;
        self.level_window_length = format
            .map(|f| f.bytes_for_duration(self.config.level_window_us))
            .unwrap_or(0);
        self.spectrum_window_length = format
            .map(|f| self.config.spectrum_length_samples as u64 * f.bytes_per_frame())
            .unwrap_or(0);
        if changed {
            self.emit(EngineEvent::FormatChanged { format });
        }
    }

    fn set_record_position(&mut self, position: u64, force: bool) {
        let changed = self.record_position != position;
        self.record_position = position;
        if changed || force {
            self.emit(EngineEvent::RecordPositionChanged { position });
        }
    }

    fn set_play_position(&mut self, position: u64, force: bool) {
        let changed = self.play_position != position;
        self.play_position = position;
        if changed || force {
            self.emit(EngineEvent::PlayPositionChanged { position });
        }
    }

    fn set_level(&mut self, sample: LevelSample) {
        self.level = sample;
        self.emit(EngineEvent::LevelChanged(sample));
    }

    fn publish_spectrum(&mut self, position: u64, length: u64, spectrum: FrequencySpectrum) {
        self.emit(EngineEvent::SpectrumChanged {
            position,
            length,
            spectrum,
        });
    }

    fn publish_error(&mut self, e: &EngineError) {
        self.emit(EngineEvent::ErrorMessage {
            heading: e.heading().to_string(),
            detail: e.to_string(),
        });
    }

    fn emit_buffer_changed(&mut self, position: u64, length: u64) {
        self.events.emit(&EngineEvent::BufferChanged {
            position,
            length,
            data: self.buffer.as_bytes(),
        });
    }

    fn emit(&mut self, event: EngineEvent<'_>) {
        self.events.emit(&event);
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::EventLog;
    use crate::engine::io::MemoryAudioFile;
    use crate::engine::virtual_device::{VirtualBackend, VirtualClock};

    fn engine() -> (AudioEngine, VirtualBackend, EventLog) {
        let backend = VirtualBackend::new(VirtualClock::new());
        let mut engine =
            AudioEngine::new(Box::new(backend.clone()), EngineConfig::default()).unwrap();
        let log = EventLog::new();
        engine.subscribe(log.handler());
        (engine, backend, log)
    }

    #[test]
    fn test_initialize_record_negotiates_lowest_common_format() {
        let (mut engine, _, _) = engine();
        assert!(engine.initialize_record().unwrap());
        assert_eq!(engine.format(), Some(AudioFormat::pcm_s16le(44100, 1)));
        // 10 s at 44100 Hz mono 16 bit
        assert_eq!(engine.buffer_length(), 882_000);
        assert_eq!(engine.level_window_length(), 8820);
        assert_eq!(engine.spectrum_window_length(), 8192);
    }

    #[test]
    fn test_initialize_twice_keeps_format() {
        let (mut engine, _, _) = engine();
        assert!(engine.initialize_record().unwrap());
        assert!(!engine.initialize().unwrap());
    }

    #[test]
    fn test_format_changed_precedes_buffer_length() {
        let (mut engine, _, log) = engine();
        engine.initialize_record().unwrap();

        let events = log.events();
        let format_at = events
            .iter()
            .position(|e| matches!(e, EngineEvent::FormatChanged { format: Some(_) }))
            .unwrap();
        let length_at = events
            .iter()
            .position(|e| {
                matches!(e, EngineEvent::BufferLengthChanged { length } if *length > 0)
            })
            .unwrap();
        assert!(format_at < length_at);
    }

    #[test]
    fn test_tone_fills_buffer_and_resolves_end_frequency() {
        let (mut engine, _, _) = engine();
        engine.generate_tone(SweptTone::default()).unwrap();

        assert_eq!(engine.data_length(), engine.buffer_length());
        assert_eq!(engine.record_position(), engine.buffer_length());
        assert_eq!(engine.tone().unwrap().end_freq, 1000.0);
        assert!(engine.data().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_no_common_format_publishes_error() {
        let clock = VirtualClock::new();
        let backend = VirtualBackend::new(clock)
            .with_input_device(DeviceInfo::new("mic", vec![8000], vec![1], vec![16]));
        let mut engine = AudioEngine::new(Box::new(backend), EngineConfig::default()).unwrap();
        let log = EventLog::new();
        engine.subscribe(log.handler());

        let result = engine.initialize_record();
        assert!(matches!(result, Err(EngineError::NoCommonFormat)));
        assert_eq!(engine.format(), None);
        assert_eq!(
            log.count(|e| matches!(e, EngineEvent::ErrorMessage { .. })),
            1
        );
    }

    #[test]
    fn test_start_without_initialize_fails() {
        let (mut engine, _, _) = engine();
        assert!(matches!(
            engine.start_recording(),
            Err(EngineError::NotInitialized)
        ));
        assert!(matches!(
            engine.start_playback(),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn test_suspend_and_resume_recording() {
        let (mut engine, backend, _) = engine();
        engine.initialize_record().unwrap();
        engine.start_recording().unwrap();
        engine.pump().unwrap();
        backend.clock().advance_ms(200);
        engine.pump().unwrap();

        engine.suspend();
        engine.pump().unwrap();
        assert_eq!(engine.state(), TransportState::Suspended);
        let recorded = engine.data_length();

        backend.clock().advance_ms(300);
        engine.pump().unwrap();
        assert_eq!(engine.data_length(), recorded);

        engine.start_recording().unwrap();
        engine.pump().unwrap();
        assert_eq!(engine.state(), TransportState::Active);
        backend.clock().advance_ms(100);
        engine.pump().unwrap();
        assert!(engine.data_length() > recorded);
    }

    #[test]
    fn test_rejects_non_pcm16_file() {
        let (mut engine, _, _) = engine();
        let mut format = AudioFormat::pcm_s16le(48000, 1);
        format.sample_size = 8;
        let handle = || Box::new(MemoryAudioFile::new(vec![0; 100], format));

        let result = engine.load_file_handles(handle(), handle());
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedFileFormat { .. })
        ));
        assert!(!engine.is_file_mode());
    }

    #[test]
    fn test_calculate_level_rejects_window_outside_data() {
        let (mut engine, _, _) = engine();
        engine.initialize_record().unwrap();
        assert!(matches!(
            engine.calculate_level(0),
            Err(EngineError::WindowOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_reset_clears_everything() {
        let (mut engine, _, log) = engine();
        engine.generate_tone(SweptTone::default()).unwrap();
        log.clear();

        engine.reset();
        assert_eq!(engine.format(), None);
        assert_eq!(engine.buffer_length(), 0);
        assert_eq!(engine.data_length(), 0);
        assert_eq!(engine.record_position(), 0);
        assert_eq!(engine.play_position(), 0);
        assert_eq!(engine.tone(), None);

        let events = log.events();
        assert!(events.contains(&EngineEvent::FormatChanged { format: None }));
        assert!(events.contains(&EngineEvent::BufferLengthChanged { length: 0 }));
        assert!(events.contains(&EngineEvent::RecordPositionChanged { position: 0 }));
    }

    #[test]
    fn test_output_device_change_renegotiates() {
        let (mut engine, _, _) = engine();
        engine.initialize_record().unwrap();

        let speaker = DeviceInfo::new("Other Speaker", vec![48000], vec![2], vec![16]);
        let mic = DeviceInfo::new("Other Mic", vec![48000], vec![2], vec![16]);
        engine.set_input_device(mic).unwrap();
        assert!(engine.set_output_device(speaker).unwrap());
        assert_eq!(engine.format(), Some(AudioFormat::pcm_s16le(48000, 2)));
    }
}
