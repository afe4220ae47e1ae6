//! Deterministic device backend driven by a manually advanced clock
//!
//! Streams measure processed time against a shared [`VirtualClock`] instead
//! of hardware. Nothing happens until the clock is advanced and the engine
//! is pumped, which makes transport and scheduling behaviour reproducible.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::Read;
use std::rc::Rc;

use log::debug;

use crate::engine::device::{
    AudioBackend, DeviceError, DeviceInfo, InputStream, OutputStream, PlaybackSource,
    StreamEvent, StreamState,
};
use crate::engine::format::AudioFormat;
use crate::engine::transport::TransportMode;
use crate::error::{EngineError, Result};

/// Shared monotonic time source in microseconds
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now_us: Rc<Cell<u64>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_us(&self) -> u64 {
        self.now_us.get()
    }

    pub fn advance_us(&self, us: u64) {
        self.now_us.set(self.now_us.get() + us);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}

/// Processed-time bookkeeping shared by both stream kinds
#[derive(Debug)]
struct StreamTimer {
    clock: VirtualClock,
    notify_interval_us: u64,
    accumulated_us: u64,
    running_since: Option<u64>,
    notified: u64,
    /// Processed time stops here once the source runs dry
    frozen_at: Option<u64>,
}

impl StreamTimer {
    fn new(clock: VirtualClock, notify_interval_ms: u64) -> Self {
        Self {
            clock,
            notify_interval_us: notify_interval_ms.max(1) * 1000,
            accumulated_us: 0,
            running_since: None,
            notified: 0,
            frozen_at: None,
        }
    }

    fn restart(&mut self) {
        self.accumulated_us = 0;
        self.notified = 0;
        self.frozen_at = None;
        self.running_since = Some(self.clock.now_us());
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated_us += self.clock.now_us() - since;
        }
    }

    fn run(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(self.clock.now_us());
        }
    }

    fn processed_us(&self) -> u64 {
        let running = self
            .running_since
            .map(|since| self.clock.now_us() - since)
            .unwrap_or(0);
        let processed = self.accumulated_us + running;
        match self.frozen_at {
            Some(limit) => processed.min(limit),
            None => processed,
        }
    }

    /// Notify events owed since the last call
    fn due_notifies(&mut self) -> u64 {
        let due = self.processed_us() / self.notify_interval_us;
        let owed = due.saturating_sub(self.notified);
        self.notified = due.max(self.notified);
        owed
    }
}

// ============================================================================
// Input
// ============================================================================

/// Capture stream replaying a fixed signal (silence when empty)
#[derive(Debug)]
pub struct VirtualInput {
    format: AudioFormat,
    signal: Rc<Vec<u8>>,
    timer: StreamTimer,
    state: StreamState,
    error: Option<DeviceError>,
    delivered: u64,
    pending: VecDeque<StreamEvent>,
    fault: Rc<Cell<Option<DeviceError>>>,
}

impl VirtualInput {
    fn set_state(&mut self, state: StreamState) {
        if self.state != state {
            self.state = state;
            self.pending.push_back(StreamEvent::StateChanged(state));
        }
    }

    fn available(&self) -> u64 {
        self.format
            .bytes_for_duration(self.timer.processed_us())
            .saturating_sub(self.delivered)
    }
}

impl InputStream for VirtualInput {
    fn start(&mut self) {
        self.error = None;
        self.delivered = 0;
        self.timer.restart();
        self.set_state(StreamState::Active);
    }

    fn suspend(&mut self) {
        if matches!(self.state, StreamState::Active | StreamState::Idle) {
            self.timer.pause();
            self.set_state(StreamState::Suspended);
        }
    }

    fn resume(&mut self) {
        if self.state == StreamState::Suspended {
            self.timer.run();
            self.set_state(StreamState::Active);
        }
    }

    fn stop(&mut self) {
        self.timer.pause();
        self.set_state(StreamState::Stopped);
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn error(&self) -> Option<DeviceError> {
        self.error
    }

    fn processed_us(&self) -> u64 {
        self.timer.processed_us()
    }

    fn poll_events(&mut self) -> Vec<StreamEvent> {
        if let Some(fault) = self.fault.take() {
            if self.state != StreamState::Stopped {
                debug!("Virtual input failing with {}", fault);
                self.timer.pause();
                self.error = Some(fault);
                self.set_state(StreamState::Stopped);
            }
        }

        let mut events: Vec<StreamEvent> = self.pending.drain(..).collect();
        if self.state == StreamState::Active {
            if self.available() > 0 {
                events.push(StreamEvent::DataReady);
            }
            for _ in 0..self.timer.due_notifies() {
                events.push(StreamEvent::Notify);
            }
        }
        events
    }

    fn bytes_ready(&self) -> usize {
        self.available() as usize
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.available() as usize);
        if self.signal.is_empty() {
            buf[..n].fill(0);
        } else {
            let len = self.signal.len() as u64;
            for (i, byte) in buf[..n].iter_mut().enumerate() {
                *byte = self.signal[((self.delivered + i as u64) % len) as usize];
            }
        }
        self.delivered += n as u64;
        n
    }
}

// ============================================================================
// Output
// ============================================================================

/// Render stream consuming its source at real-time rate
#[derive(Debug)]
pub struct VirtualOutput {
    format: AudioFormat,
    timer: StreamTimer,
    state: StreamState,
    error: Option<DeviceError>,
    source: Option<PlaybackSource>,
    consumed: u64,
    pending: VecDeque<StreamEvent>,
    /// Source ran dry; Idle is reported after this poll's notifies
    pending_idle: bool,
    fault: Rc<Cell<Option<DeviceError>>>,
    scratch: Vec<u8>,
}

impl VirtualOutput {
    fn set_state(&mut self, state: StreamState) {
        if self.state != state {
            self.state = state;
            self.pending.push_back(StreamEvent::StateChanged(state));
        }
    }

    /// Pull from the source everything that should have played by now
    fn consume(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let target = self.format.bytes_for_duration(self.timer.processed_us());
        let mut exhausted = false;
        while self.consumed < target {
            let want = ((target - self.consumed) as usize).min(self.scratch.len());
            match source.read(&mut self.scratch[..want]) {
                Ok(0) | Err(_) => {
                    exhausted = true;
                    break;
                }
                Ok(n) => self.consumed += n as u64,
            }
        }
        if exhausted {
            self.timer.frozen_at = Some(self.format.duration_for_bytes(self.consumed));
            self.pending_idle = true;
        }
    }
}

impl OutputStream for VirtualOutput {
    fn start(&mut self, source: PlaybackSource) {
        self.error = None;
        self.consumed = 0;
        self.pending_idle = false;
        self.source = Some(source);
        self.timer.restart();
        self.set_state(StreamState::Active);
    }

    fn suspend(&mut self) {
        if matches!(self.state, StreamState::Active | StreamState::Idle) {
            self.timer.pause();
            self.set_state(StreamState::Suspended);
        }
    }

    fn resume(&mut self) {
        if self.state == StreamState::Suspended {
            self.timer.run();
            self.set_state(StreamState::Active);
        }
    }

    fn stop(&mut self) -> Option<PlaybackSource> {
        self.timer.pause();
        self.set_state(StreamState::Stopped);
        self.source.take()
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn error(&self) -> Option<DeviceError> {
        self.error
    }

    fn processed_us(&self) -> u64 {
        self.timer.processed_us()
    }

    fn poll_events(&mut self) -> Vec<StreamEvent> {
        if let Some(fault) = self.fault.take() {
            if self.state != StreamState::Stopped {
                debug!("Virtual output failing with {}", fault);
                self.timer.pause();
                self.error = Some(fault);
                self.set_state(StreamState::Stopped);
            }
        }

        if self.state == StreamState::Active {
            self.consume();
        }

        let mut events: Vec<StreamEvent> = self.pending.drain(..).collect();
        if matches!(self.state, StreamState::Active | StreamState::Idle) {
            for _ in 0..self.timer.due_notifies() {
                events.push(StreamEvent::Notify);
            }
        }
        if self.pending_idle {
            // The partial last period is reported too
            if self.timer.processed_us() % self.timer.notify_interval_us != 0 {
                events.push(StreamEvent::Notify);
            }
            self.pending_idle = false;
            self.state = StreamState::Idle;
            events.push(StreamEvent::StateChanged(StreamState::Idle));
        }
        events
    }
}

// ============================================================================
// Backend
// ============================================================================

/// Backend handing out [`VirtualInput`] and [`VirtualOutput`] streams
///
/// Clones share the clock, the capture signal and the fault switches.
#[derive(Debug, Clone)]
pub struct VirtualBackend {
    clock: VirtualClock,
    input_device: DeviceInfo,
    output_device: DeviceInfo,
    signal: Rc<Vec<u8>>,
    input_fault: Rc<Cell<Option<DeviceError>>>,
    output_fault: Rc<Cell<Option<DeviceError>>>,
}

impl VirtualBackend {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            input_device: DeviceInfo::new(
                "Virtual Microphone",
                vec![8000, 16000, 44100, 48000],
                vec![1, 2],
                vec![8, 16],
            ),
            output_device: DeviceInfo::new(
                "Virtual Speaker",
                vec![44100, 48000, 96000],
                vec![1, 2],
                vec![16],
            ),
            signal: Rc::new(Vec::new()),
            input_fault: Rc::new(Cell::new(None)),
            output_fault: Rc::new(Cell::new(None)),
        }
    }

    pub fn with_input_device(mut self, device: DeviceInfo) -> Self {
        self.input_device = device;
        self
    }

    pub fn with_output_device(mut self, device: DeviceInfo) -> Self {
        self.output_device = device;
        self
    }

    /// PCM bytes the input replays in a loop
    pub fn with_input_signal(mut self, signal: Vec<u8>) -> Self {
        self.signal = Rc::new(signal);
        self
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Make the next poll of the `mode` stream stop with `error`
    pub fn inject_fault(&self, mode: TransportMode, error: DeviceError) {
        match mode {
            TransportMode::Input => self.input_fault.set(Some(error)),
            TransportMode::Output => self.output_fault.set(Some(error)),
        }
    }
}

impl AudioBackend for VirtualBackend {
    fn input_devices(&self) -> Vec<DeviceInfo> {
        vec![self.input_device.clone()]
    }

    fn output_devices(&self) -> Vec<DeviceInfo> {
        vec![self.output_device.clone()]
    }

    fn default_input_device(&self) -> Option<DeviceInfo> {
        Some(self.input_device.clone())
    }

    fn default_output_device(&self) -> Option<DeviceInfo> {
        Some(self.output_device.clone())
    }

    fn open_input(
        &self,
        device: &DeviceInfo,
        format: &AudioFormat,
        notify_interval_ms: u64,
    ) -> Result<Box<dyn InputStream>> {
        if !device.is_format_supported(format) {
            return Err(EngineError::DeviceStream {
                mode: TransportMode::Input,
                error: DeviceError::Open,
            });
        }
        Ok(Box::new(VirtualInput {
            format: *format,
            signal: Rc::clone(&self.signal),
            timer: StreamTimer::new(self.clock.clone(), notify_interval_ms),
            state: StreamState::Stopped,
            error: None,
            delivered: 0,
            pending: VecDeque::new(),
            fault: Rc::clone(&self.input_fault),
        }))
    }

    fn open_output(
        &self,
        device: &DeviceInfo,
        format: &AudioFormat,
        notify_interval_ms: u64,
    ) -> Result<Box<dyn OutputStream>> {
        if !device.is_format_supported(format) {
            return Err(EngineError::DeviceStream {
                mode: TransportMode::Output,
                error: DeviceError::Open,
            });
        }
        Ok(Box::new(VirtualOutput {
            format: *format,
            timer: StreamTimer::new(self.clock.clone(), notify_interval_ms),
            state: StreamState::Stopped,
            error: None,
            source: None,
            consumed: 0,
            pending: VecDeque::new(),
            fault: Rc::clone(&self.output_fault),
            scratch: vec![0u8; 16 * 1024],
            pending_idle: false,
        }))
    }
}
