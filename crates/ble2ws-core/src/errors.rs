//! Error codes and the bridge error type.

use crate::protocol::ErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Undecodable or ill-formed message.
pub const PROTOCOL_ERROR: &str = "ProtocolError";
/// Integer `type` that is not a command.
pub const UNKNOWN_COMMAND_ERROR: &str = "UnknownCommandError";
/// Missing or malformed command arguments.
pub const VALIDATION_ERROR: &str = "ValidationError";
/// Conflicting scan request.
pub const ADAPTER_BUSY_ERROR: &str = "AdapterBusyError";
/// Device or attribute absent, or discovery not yet performed.
pub const NOT_FOUND_ERROR: &str = "NotFoundError";
/// Link failure or operation against a device that is not connected.
pub const CONNECTION_ERROR: &str = "ConnectionError";
/// Operation did not finish in time.
pub const TIMEOUT_ERROR: &str = "TimeoutError";
/// Pairing or authorization denied.
pub const PERMISSION_ERROR: &str = "PermissionError";
/// Radio absent or disabled.
pub const ADAPTER_UNAVAILABLE_ERROR: &str = "AdapterUnavailableError";
/// Unexpected failure inside the bridge.
pub const INTERNAL_ERROR: &str = "InternalError";

/// Error reported to clients in an error response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The frame could not be decoded into a command.
    #[error("{message}")]
    Protocol {
        /// Description of what is wrong.
        message: String,
    },

    /// The `type` field does not name a command.
    #[error("{message}")]
    UnknownCommand {
        /// Description.
        message: String,
    },

    /// A command argument is missing or has the wrong shape.
    #[error("{message}")]
    Validation {
        /// Description of the offending argument.
        message: String,
    },

    /// The radio is already scanning on behalf of another request.
    #[error("{message}")]
    AdapterBusy {
        /// Description.
        message: String,
    },

    /// A device, service, characteristic or descriptor was not found.
    #[error("{message}")]
    NotFound {
        /// Description.
        message: String,
    },

    /// The link failed or the device is not connected.
    #[error("{message}")]
    Connection {
        /// Description.
        message: String,
    },

    /// The operation exceeded its deadline.
    #[error("{message}")]
    Timeout {
        /// Description.
        message: String,
    },

    /// The platform refused pairing or access.
    #[error("{message}")]
    Permission {
        /// Description.
        message: String,
    },

    /// The radio is powered off or missing.
    #[error("{message}")]
    AdapterUnavailable {
        /// Description.
        message: String,
    },

    /// A bug or unexpected failure in the bridge itself.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl BridgeError {
    /// Build a [`BridgeError::Protocol`].
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Build a [`BridgeError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Build a [`BridgeError::AdapterBusy`].
    pub fn busy(message: impl Into<String>) -> Self {
        Self::AdapterBusy {
            message: message.into(),
        }
    }

    /// Build a [`BridgeError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Build a [`BridgeError::Connection`].
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Build a [`BridgeError::Timeout`].
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Build a [`BridgeError::AdapterUnavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::AdapterUnavailable {
            message: message.into(),
        }
    }

    /// Build a [`BridgeError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol { .. } => PROTOCOL_ERROR,
            Self::UnknownCommand { .. } => UNKNOWN_COMMAND_ERROR,
            Self::Validation { .. } => VALIDATION_ERROR,
            Self::AdapterBusy { .. } => ADAPTER_BUSY_ERROR,
            Self::NotFound { .. } => NOT_FOUND_ERROR,
            Self::Connection { .. } => CONNECTION_ERROR,
            Self::Timeout { .. } => TIMEOUT_ERROR,
            Self::Permission { .. } => PERMISSION_ERROR,
            Self::AdapterUnavailable { .. } => ADAPTER_UNAVAILABLE_ERROR,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
        }
    }
}
