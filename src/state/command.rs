// Commands from the UI to the device.
//
// Commands are the ONLY way the UI mutates device state. They are either
// applied immediately or queued by the bridge until the device exists.

use crate::device::Device;
use crate::error::DeckResult;

/// A command from the UI to the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Write a named parameter.
    SetParameter { name: String, value: f64 },

    /// Send a tagged message, e.g. a full sequence snapshot.
    SendMessage { tag: String, payload: Vec<f64> },
}

impl Command {
    /// Two commands with the same target overwrite each other while queued.
    pub fn same_target(&self, other: &Command) -> bool {
        match (self, other) {
            (Command::SetParameter { name: a, .. }, Command::SetParameter { name: b, .. }) => {
                a == b
            }
            (Command::SendMessage { tag: a, .. }, Command::SendMessage { tag: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            Command::SetParameter { name, value } => format!("set {name} = {value}"),
            Command::SendMessage { tag, payload } => {
                format!("send {tag} ({} values)", payload.len())
            }
        }
    }

    pub fn apply<D: Device>(&self, device: &mut D) -> DeckResult<()> {
        match self {
            Command::SetParameter { name, value } => device.set_parameter(name, *value),
            Command::SendMessage { tag, payload } => device.send_message(tag, payload),
        }
    }
}
