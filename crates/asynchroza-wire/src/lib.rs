//! # Asynchroza Wire
//!
//! Binary frame codec shared by the dispatcher and its consumers.
//!
//! ```text
//! offset 0: version   (1 byte, must equal PROTO_VERSION)
//! offset 1: command   (1 byte: 0=PROCESS, 1=ACK)
//! offset 2: length    (4 bytes, little-endian payload length)
//! offset 6: payload   (UTF-8 bytes, `length` long)
//! ```
//!
//! Consumers acknowledge a delivery by patching the command byte of the frame they
//! received ([`acknowledge_in_place`]) and sending the same bytes back. The payload is
//! never re-encoded, so the acknowledger sees exactly what was distributed.

mod commands;
mod frame;

pub use commands::Command;
pub use frame::{Decoded, acknowledge_in_place, decode, encode};

use thiserror::Error;

/// Protocol version written into every frame
pub const PROTO_VERSION: u8 = 1;

/// Size of the fixed frame header (version + command + length)
pub const HEADER_LEN: usize = 6;

/// Encoding and decoding failures.
///
/// None of these are fatal to a connection: the offending frame is dropped and the
/// stream keeps going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    #[error("Payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),

    #[error("Invalid version: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    #[error("Frame truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}
