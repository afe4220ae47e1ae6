//! Notifications published by the engine
//!
//! Handlers are called synchronously, in registration order, on the
//! engine's own context. Consumers may rely on that ordering (for example,
//! format-changed always precedes the buffer-length change it causes).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::dsp::level::LevelSample;
use crate::dsp::spectrum::FrequencySpectrum;
use crate::engine::format::AudioFormat;
use crate::engine::transport::{TransportMode, TransportState};

/// Something observable happened inside the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent<'a> {
    StateChanged {
        mode: TransportMode,
        state: TransportState,
    },
    /// `None` when the engine was reset
    FormatChanged { format: Option<AudioFormat> },
    BufferLengthChanged { length: u64 },
    DataLengthChanged { length: u64 },
    RecordPositionChanged { position: u64 },
    PlayPositionChanged { position: u64 },
    LevelChanged(LevelSample),
    /// `position`/`length` describe the window the spectrum came from
    SpectrumChanged {
        position: u64,
        length: u64,
        spectrum: FrequencySpectrum,
    },
    /// Raw samples for waveform rendering, valid for the handler call only
    BufferChanged {
        position: u64,
        length: u64,
        #[serde(skip)]
        data: &'a [u8],
    },
    InfoMessage { message: String, duration_ms: u64 },
    ErrorMessage { heading: String, detail: String },
}

impl EngineEvent<'_> {
    /// Copy of the event that can outlive the handler call
    ///
    /// Buffer contents are not kept; only their position and length.
    pub fn detached(&self) -> EngineEvent<'static> {
        match self {
            EngineEvent::StateChanged { mode, state } => EngineEvent::StateChanged {
                mode: *mode,
                state: *state,
            },
            EngineEvent::FormatChanged { format } => EngineEvent::FormatChanged { format: *format },
            EngineEvent::BufferLengthChanged { length } => {
                EngineEvent::BufferLengthChanged { length: *length }
            }
            EngineEvent::DataLengthChanged { length } => {
                EngineEvent::DataLengthChanged { length: *length }
            }
            EngineEvent::RecordPositionChanged { position } => {
                EngineEvent::RecordPositionChanged {
                    position: *position,
                }
            }
            EngineEvent::PlayPositionChanged { position } => EngineEvent::PlayPositionChanged {
                position: *position,
            },
            EngineEvent::LevelChanged(level) => EngineEvent::LevelChanged(*level),
            EngineEvent::SpectrumChanged {
                position,
                length,
                spectrum,
            } => EngineEvent::SpectrumChanged {
                position: *position,
                length: *length,
                spectrum: spectrum.clone(),
            },
            EngineEvent::BufferChanged {
                position, length, ..
            } => EngineEvent::BufferChanged {
                position: *position,
                length: *length,
                data: &[],
            },
            EngineEvent::InfoMessage {
                message,
                duration_ms,
            } => EngineEvent::InfoMessage {
                message: message.clone(),
                duration_ms: *duration_ms,
            },
            EngineEvent::ErrorMessage { heading, detail } => EngineEvent::ErrorMessage {
                heading: heading.clone(),
                detail: detail.clone(),
            },
        }
    }
}

type Handler = Box<dyn FnMut(&EngineEvent<'_>)>;

/// Ordered list of event handlers
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Handler>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it runs after every handler registered before it
    pub fn subscribe(&mut self, handler: impl FnMut(&EngineEvent<'_>) + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn emit(&mut self, event: &EngineEvent<'_>) {
        for handler in &mut self.handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Subscriber that keeps a detached copy of every event
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<EngineEvent<'static>>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler to pass to [`EventBus::subscribe`]
    pub fn handler(&self) -> impl FnMut(&EngineEvent<'_>) + 'static {
        let events = Rc::clone(&self.events);
        move |event: &EngineEvent<'_>| events.borrow_mut().push(event.detached())
    }

    pub fn events(&self) -> Vec<EngineEvent<'static>> {
        self.events.borrow().clone()
    }

    /// Number of recorded events matching `predicate`
    pub fn count(&self, predicate: impl Fn(&EngineEvent<'static>) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| predicate(e)).count()
    }

    pub fn levels(&self) -> Vec<LevelSample> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::LevelChanged(level) => Some(*level),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}
