//! keysync daemon internals
//!
//! Reads a keyboard through evdev, emulates the host's view of it, runs the
//! events through a [`keysync_core::Converter`] and serves the result on a
//! Unix socket.

pub mod device;
pub mod host;
pub mod transport;
