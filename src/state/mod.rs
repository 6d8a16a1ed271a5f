// src/state/mod.rs
//
// Declarative state layer for UI interaction.
//
// This module contains the *desired* state of the device as the page sees
// it. The UI manipulates these freely, and the bridge synchronizes them to
// the live device.
//
// Key principles:
// - The sequence store is the single source of truth for step grids
// - Mutations reach the device only through Commands
// - The session owns the device handle; nothing else keeps one

mod command;
mod param_info;
mod sequence;
mod session;

pub use command::*;
pub use param_info::*;
pub use sequence::*;
pub use session::*;
