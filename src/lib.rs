// src/lib.rs
//
// Library entry point. The core is platform-free and driven by the native
// sanity run and tests; `wasm` binds it to a browser page.

mod bridge;
mod config;
mod controls;
mod deck;
mod device;
mod error;
mod loader;
mod position;
mod sim;
mod state;
mod surface;
mod waveform;

#[cfg(feature = "web")]
pub mod wasm;

// Re-export key types for Rust consumers
pub use bridge::{Delivery, MessageCallback, ParameterBridge, ParameterCallback, RetryPolicy};
pub use config::DeckConfig;
pub use controls::{
    ControlBinding, ControlKind, ControlTarget, Layout, ProgressBinding, SliderDrag,
    WaveformBinding, parse_number_box, rotary_id, step_box_id, step_button_id, step_element_id,
    step_slider_id,
};
pub use deck::{Deck, UiEvent};
pub use device::{Device, DeviceEvent, EventSink};
pub use error::{DeckError, DeckResult, LogFailure};
pub use loader::{GraphDescription, RuntimeLoad, RuntimeRegistry, encode_uri_component, runtime_url};
pub use position::{PositionGroup, PositionOrigin, PositionTracker, PositionUpdate};
pub use sim::{MemoryCanvas, MemorySurface, SAMPLE_PATCH, SimDevice};
pub use state::{
    Command, DeviceSession, Sequence, SequenceDef, SequenceStore, SessionState, StepKind,
    ValueRange,
};
pub use surface::{Canvas, Surface};
pub use waveform::{TraceColumn, WaveformView, min_max_trace, rasterize};
