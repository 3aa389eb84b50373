//! Error taxonomy shared by every component (§7). The dispatcher is the
//! single translator from these into CoAP response codes; engines never
//! propagate them outward, only absorb them as state transitions.

use crate::value::ValueKind;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("no resource-instance at {path}")]
    PathNotFound { path: String },

    #[error("path is not addressable: {path}")]
    PathInvalid { path: String },

    #[error("type mismatch at {path}: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        path: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("definition invalid: {reason}")]
    DefinitionInvalid { reason: String },

    #[error("no definition for {path}")]
    NotDefined { path: String },

    #[error("method not allowed at {path}")]
    MethodNotAllowed { path: String },

    #[error("access denied for short-server-id {short_server_id} at {path}")]
    AccessDenied { short_server_id: u16, path: String },

    #[error("{path} already exists")]
    AlreadyExists { path: String },

    #[error("cardinality exceeded at {path}")]
    CardinalityExceeded { path: String },

    #[error("payload malformed: {reason}")]
    PayloadMalformed { reason: String },

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(u16),

    #[error("timeout waiting for response to {context}")]
    Timeout { context: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Programmer-error constructor. Panics in debug builds per §7/§7a;
    /// still returns a value in release so a bad definition source can't
    /// bring the process down.
    pub fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        debug_assert!(false, "internal error: {msg}");
        CoreError::Internal(msg)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("endpoint_name must not be empty")]
    MissingEndpointName,

    #[error("exactly one of bootstrap_server_uri or factory_bootstrap_config must be set")]
    AmbiguousBootstrapSource,

    #[error("object_definition_sources[{index}] failed to parse: {reason}")]
    BadDefinitionSource { index: usize, reason: String },
}
