//! Error types for the gateway.
//!
//! Startup paths (configuration loading, static role assignment) return these
//! errors. Pipeline stages log and drop instead of propagating.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the gateway error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file missing or malformed
    #[error("configuration error in {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    /// A configuration value parsed but is not usable
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Two interfaces claim the same role
    #[error("role {role} assigned to both {first} and {second}")]
    RoleConflict {
        role: String,
        first: String,
        second: String,
    },

    /// External command used to configure an interface failed
    #[error("`{program}` failed for {iface}: {status}")]
    Command {
        program: &'static str,
        iface: String,
        status: String,
    },

    /// I/O errors from sockets, devices and sysfs
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline stage thread terminated abnormally
    #[error("pipeline stage `{0}` terminated unexpectedly")]
    StageFailed(String),
}

impl Error {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
