//! Domain events and commands (storage-agnostic contracts).

pub mod command;
pub mod event;

pub use command::Command;
pub use event::{DecodeEvent, Event, EventDecodeError};
