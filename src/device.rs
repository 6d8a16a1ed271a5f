// src/device.rs
//
// The seam between the front-end and the externally loaded device.
//
// The device is opaque: it exposes named scalar parameters, named data
// buffers and tagged message ports. Notifications travel back as
// `DeviceEvent`s on a channel owned by the deck.

use std::sync::mpsc::Sender;

use crate::error::DeckResult;

/// Something the device reported on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A parameter changed (from the UI or from automation inside the graph).
    ParameterChanged { name: String, value: f64 },

    /// A tagged message arrived on an outport.
    Message { tag: String, payload: Vec<f64> },
}

/// Where a device publishes its events.
pub type EventSink = Sender<DeviceEvent>;

/// A live device instance.
///
/// Reads and writes are synchronous in effect; change notification is not,
/// so callers should not expect an event to be queued before a write returns.
pub trait Device {
    /// Current value of a parameter, or `None` if the device has no such
    /// parameter.
    fn parameter(&self, name: &str) -> Option<f64>;

    /// Write a parameter.
    ///
    /// Fails with `ParameterNotFound` for unknown names.
    fn set_parameter(&mut self, name: &str, value: f64) -> DeckResult<()>;

    /// Send a tagged message carrying an ordered numeric payload.
    fn send_message(&mut self, tag: &str, payload: &[f64]) -> DeckResult<()>;

    /// Snapshot of a named data buffer.
    fn data_buffer(&self, name: &str) -> Option<Vec<f32>>;

    /// Every parameter id the device exposes, checked against the layout
    /// on activation.
    fn parameter_names(&self) -> Vec<String>;
}
