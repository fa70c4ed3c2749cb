//! Kea staging and transport error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the staging store and the DHCP transports.
#[derive(Debug, Error)]
pub enum KeaError {
    /// The server could not be reached or spoke an unexpected protocol.
    #[error("DHCP server error: {0}")]
    Transport(String),

    /// The server accepted the command but rejected its content.
    #[error("command \"{command}\" returns \"{text}\"")]
    Rejected { command: String, text: String },

    /// Another item already holds this value.
    #[error("duplicate value: {0}")]
    DuplicateValue(String),

    /// No subnet is bound to this prefix ID.
    #[error("subnet ID {0} not found")]
    SubnetNotFound(u64),

    /// The subnet bound to this prefix ID has another network address.
    #[error("subnet {current} ≠ {requested}")]
    SubnetMismatch { current: String, requested: String },

    /// An item lacks a key the operation cannot do without.
    #[error("missing mandatory {item} key: {key}")]
    MissingKey {
        item: &'static str,
        key: &'static str,
    },

    /// A pool is neither a `start-end` range nor a network.
    #[error("invalid pool \"{0}\"")]
    InvalidPool(String),

    #[error("invalid DHCP server URL \"{0}\": must start with http://, https:// or file://")]
    InvalidUrl(String),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An item or document does not fit the Kea schema.
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

impl KeaError {
    /// Content rejected by the server; the working snapshot was rolled back.
    pub fn is_rejection(&self) -> bool {
        matches!(self, KeaError::Rejected { .. })
    }

    /// Failures that call for a full subnet resync instead of an update.
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            KeaError::SubnetNotFound(_) | KeaError::SubnetMismatch { .. }
        )
    }

    /// Failures of the transport itself, fatal to the current operation.
    pub fn is_transport(&self) -> bool {
        matches!(self, KeaError::Transport(_) | KeaError::Io { .. })
    }
}

/// Result type for Kea operations.
pub type Result<T> = std::result::Result<T, KeaError>;
