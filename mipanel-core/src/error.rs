//! Error types for the panel control core.

use crate::command::CmdSetId;
use crate::transport::TransportError;

/// Errors that can occur while driving a panel.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// The panel (or the link to it) has not been initialized yet.
    #[error("Panel not initialized")]
    NotReady,

    /// The vendor feature block is disabled in the panel configuration.
    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    /// A command set was never configured for the current mode.
    #[error("Command set {0} not configured")]
    NotFound(CmdSetId),

    /// A configured index points outside a command set or a payload.
    #[error("Index {index} out of range for {set} (limit {limit})")]
    IndexOutOfRange {
        /// The command set being addressed.
        set: CmdSetId,
        /// The offending index.
        index: usize,
        /// First invalid value for `index`.
        limit: usize,
    },

    /// A patch site does not hold the expected opcode.
    #[error("Unexpected opcode 0x{found:02X} in {set}, expected 0x{expected:02X}")]
    InvalidOpcode {
        /// The command set being patched.
        set: CmdSetId,
        /// The opcode the caller asked for.
        expected: u8,
        /// The opcode found at `payload[0]`.
        found: u8,
    },

    /// The underlying transfer failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A calibration table has not been read from the panel yet.
    #[error("Calibration table {0} not ready")]
    TableNotReady(&'static str),

    /// A read was attempted without the read-intent flag.
    #[error("Read operation not permitted")]
    PermissionDenied,

    /// Calibration checksum kept mismatching until the retry budget ran out.
    #[error("Checksum mismatch after {attempts} attempts")]
    ChecksumMismatch {
        /// How many full read passes were made.
        attempts: u32,
    },

    /// Malformed diagnostic input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The panel configuration is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The panel configuration is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred (e.g., reading a configuration file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
