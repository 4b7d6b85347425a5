//! Error definitions for the NGATCIL stack

use thiserror::Error;

/// NGATCIL error types.
///
/// Every fallible operation in the stack returns one of these; there is no
/// shared "last error" state anywhere in the library.
#[derive(Error, Debug)]
pub enum CilError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to resolve host {0:?}")]
    Resolve(String),

    #[error("Partial send: {sent} of {expected} bytes")]
    PartialSend { sent: usize, expected: usize },

    #[error("Received {got} bytes, expected {expected}")]
    RecvLength { got: usize, expected: usize },

    #[error("Packet is {got} bytes, expected {expected}")]
    PacketLength { got: usize, expected: usize },

    #[error("Unknown packet class {0}")]
    UnknownClass(i32),

    #[error("Packet class {got} does not match expected class {expected}")]
    ClassMismatch { got: i32, expected: i32 },

    #[error("Packet service {got:#x} does not match expected service {expected:#x}")]
    ServiceMismatch { got: i32, expected: i32 },

    #[error("Packet command {got:#x} does not match expected command {expected:#x}")]
    CommandMismatch { got: i32, expected: i32 },

    #[error("Guide packet checksum {got} does not match computed {computed}")]
    Checksum { got: u16, computed: u16 },

    #[error("Pixel value {0} out of range 0.0..=1023.0")]
    PixelRange(f32),

    #[error("Guide position {0} out of range -9999.99..=9999.99")]
    PositionRange(f32),

    #[error("Guide timecode {0} out of range 0.01..=9999.99")]
    TimecodeRange(f32),

    #[error("Invalid guide packet status character {0:?}")]
    StatusChar(char),

    #[error("Malformed guide packet field {field}: {text:?}")]
    GuideField { field: &'static str, text: String },

    #[error("Unknown SDB datum id {0}")]
    UnknownOid(i32),
}

/// Result type alias for NGATCIL operations
pub type CilResult<T> = Result<T, CilError>;
