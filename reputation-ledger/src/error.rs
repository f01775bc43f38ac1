//! Error types for the ledger
//!
//! Every variant maps onto one HTTP-equivalent status so the request layer
//! can surface ledger failures without inspecting messages.

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced user, question, answer or vote does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Actor is not the owner of the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request conflicts with current state (duplicate vote, closed question)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation is never allowed for this actor (voting on own answer)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Owner cannot afford the requested priority level
    #[error("Insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits {
        /// Credits the request would charge
        requested: i64,
        /// Credits held by the owner at request time
        available: i64,
    },

    /// Field-scoped validation failure
    #[error("Invalid {field}: {message}")]
    Validation {
        /// Offending request field
        field: &'static str,
        /// Human readable reason
        message: String,
    },

    /// Lock could not be acquired within the configured timeout
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Storage error (RocksDB or injected store failure)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by the request layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 404
    NotFound,
    /// 403
    Forbidden,
    /// 400, plain message
    BadRequest,
    /// 400, field-scoped message
    Validation,
    /// 500
    Internal,
}

/// JSON body handed back to clients
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// `error` or `validation_error`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Message string, or `{field: message}` for validation errors
    pub msg: Value,
}

impl Error {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Conflict(_) | Error::InvalidOperation(_) => ErrorKind::BadRequest,
            Error::InsufficientCredits { .. } | Error::Validation { .. } => ErrorKind::Validation,
            Error::LockTimeout(_)
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::BadRequest | ErrorKind::Validation => 400,
            ErrorKind::Internal => 500,
        }
    }

    /// True when the caller sent a request that can never succeed as-is
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }

    /// Field the error is scoped to, if any
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Error::InsufficientCredits { .. } => Some("priority_level"),
            Error::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Response body; internal details are never exposed
    pub fn body(&self) -> ErrorBody {
        match self {
            Error::InsufficientCredits { .. } => ErrorBody {
                kind: "validation_error",
                msg: json!({
                    "priority_level": "You don't have enough credits to set this priority level"
                }),
            },
            Error::Validation { field, message } => {
                let mut msg = Map::new();
                msg.insert((*field).to_string(), Value::from(message.as_str()));
                ErrorBody {
                    kind: "validation_error",
                    msg: Value::Object(msg),
                }
            }
            Error::NotFound(_) => ErrorBody {
                kind: "error",
                msg: Value::from("Resource not found"),
            },
            Error::Forbidden(_) => ErrorBody {
                kind: "error",
                msg: Value::from("You are not allowed to modify this resource"),
            },
            Error::Conflict(msg) | Error::InvalidOperation(msg) => ErrorBody {
                kind: "error",
                msg: Value::from(msg.as_str()),
            },
            _ => ErrorBody {
                kind: "error",
                msg: Value::from("Internal server error"),
            },
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
