//! Error types for the LwM2M client

use thiserror::Error;

use crate::path::Path;
use crate::value::ValueKind;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum Lwm2mError {
    /// Exchange retransmissions exhausted without a reply
    #[error("transport timeout: no reply after {attempts} transmissions")]
    TransportTimeout {
        /// Number of times the message was put on the wire
        attempts: u8,
    },

    /// Peer answered an exchange with a reset message
    #[error("exchange reset by peer")]
    TransportReset,

    /// Server returned an error response code
    #[error("request rejected by server: {0}")]
    ProtocolReject(String),

    /// Resource not found (maps to CoAP 4.04)
    #[error("resource not found: {0}")]
    ResourceNotFound(Path),

    /// Value kind does not match the resource schema (maps to CoAP 4.00)
    #[error("type mismatch on {path}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Target resource
        path: Path,
        /// Kind declared by the schema
        expected: ValueKind,
        /// Kind supplied by the caller
        actual: ValueKind,
    },

    /// Write attempted on a resource without network write access (maps to CoAP 4.05)
    #[error("resource is read-only: {0}")]
    ReadOnly(Path),

    /// Read attempted on a resource without network read access (maps to CoAP 4.05)
    #[error("resource is not readable: {0}")]
    NotReadable(Path),

    /// Execute attempted on a non-executable resource (maps to CoAP 4.05)
    #[error("resource is not executable: {0}")]
    NotExecutable(Path),

    /// Object already registered or instance already present
    #[error("already exists: {0}")]
    AlreadyExists(Path),

    /// Observation token already in use
    #[error("observation already active for token")]
    AlreadyObserving,

    /// No observation registered for the given token
    #[error("observation not found")]
    ObservationNotFound,

    /// Malformed LwM2M path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Payload decoding error (TLV, SenML, text)
    #[error("decode error: {0}")]
    Decode(String),

    /// Payload encoding error
    #[error("encode error: {0}")]
    Encode(String),

    /// Unsupported content format (maps to CoAP 4.15)
    #[error("unsupported content format: {0}")]
    UnsupportedContentFormat(u16),

    /// Requested representation cannot be produced (maps to CoAP 4.06)
    #[error("not acceptable: {0}")]
    NotAcceptable(u16),

    /// Mandatory object missing or empty before registration
    #[error("mandatory object {0} has no instance")]
    MissingMandatoryObject(u16),

    /// Registration could not be established
    #[error("registration failed: {0}")]
    Registration(String),

    /// IO error (socket operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup configuration errors
///
/// Kept apart from [`Lwm2mError`]: these only ever abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is not valid JSON or misses a required key
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A recognized key carries an unusable value
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// Offending configuration key
        key: &'static str,
        /// Human-readable reason
        reason: String,
    },
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Lwm2mError>;
