//! Keyboard event conversion for keysync
//!
//! Turns native hardware key events into a normalized key-event protocol and
//! keeps the downstream pipeline's modifier state synchronized with the host.
//!
//! The [`Converter`] is the entry point. It owns every piece of mutable state:
//! the press records, the last synchronized modifier flags, and the table of
//! responses still waiting for an acknowledgment.

mod converter;
mod correlator;
mod error;
mod event;
mod guard;
mod keys;
mod modifiers;
mod pressing;
mod resolver;
mod tables;

pub use converter::{Converter, KeyEventSink};
pub use correlator::{ResponseCorrelator, ResponseId};
pub use error::ConverterError;
pub use event::{HardwareEvent, HardwareEventKind, KeyEventKind, OutboundKeyEvent};
pub use guard::{AckCallback, CallbackGuard};
pub use keys::{KeyPlane, LogicalKey, PhysicalKey};
pub use modifiers::{ModifierSync, ModifierTransition};
pub use pressing::PressState;
pub use resolver::{event_text, KeyResolver};
pub use tables::{KeyTables, KeyTablesBuilder};
