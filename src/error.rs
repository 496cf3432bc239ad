//! Error types for hostsession.
//!
//! Every fallible operation in the crate returns [`Result`]. Transport and
//! protocol breakdowns are folded into the single [`Error::Protocol`] variant,
//! which keeps the SOAP request and response documents around for diagnosis.
//! A remote command that exits with a non-zero code is not an error.

use thiserror::Error;

/// Result type alias for hostsession operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by [`Error::Protocol`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for hostsession.
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied value broke a documented precondition.
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// The connection cannot perform the requested operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Transport or protocol failure.
    #[error("{message}")]
    Protocol {
        /// Human readable description
        message: String,
        /// Outbound document, if the failure happened during an exchange
        request: Option<String>,
        /// Inbound document, if one was received
        response: Option<String>,
        /// Underlying cause
        #[source]
        source: Option<BoxError>,
    },

    /// A wait was cancelled before the process completed.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// The object is not in a state that allows the call.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Every candidate name for a temporary file was already taken.
    #[error(
        "Cannot generate a unique temporary file name (prefix '{prefix}', suffix '{suffix}') after {attempts} attempts"
    )]
    TempNameExhausted {
        /// Requested prefix
        prefix: String,
        /// Requested suffix
        suffix: String,
        /// Number of candidates tried
        attempts: u32,
    },

    /// A connection option is missing or malformed.
    #[error("Invalid connection option '{key}': {message}")]
    InvalidOption {
        /// Option key
        key: String,
        /// What was wrong with it
        message: String,
    },

    /// No connection constructor is registered under this protocol name.
    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    /// I/O error on a local stream or file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a protocol fault with only a message.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
            request: None,
            response: None,
            source: None,
        }
    }

    /// Attach the outbound document to a protocol fault.
    ///
    /// Other variants are returned unchanged.
    pub fn with_request(self, document: impl Into<String>) -> Self {
        match self {
            Error::Protocol {
                message,
                response,
                source,
                ..
            } => Error::Protocol {
                message,
                request: Some(document.into()),
                response,
                source,
            },
            other => other,
        }
    }

    /// Attach the inbound document to a protocol fault.
    pub fn with_response(self, document: impl Into<String>) -> Self {
        match self {
            Error::Protocol {
                message,
                request,
                source,
                ..
            } => Error::Protocol {
                message,
                request,
                response: Some(document.into()),
                source,
            },
            other => other,
        }
    }

    /// Attach an underlying cause to a protocol fault.
    pub fn with_source(self, cause: impl Into<BoxError>) -> Self {
        match self {
            Error::Protocol {
                message,
                request,
                response,
                ..
            } => Error::Protocol {
                message,
                request,
                response,
                source: Some(cause.into()),
            },
            other => other,
        }
    }

    /// Create an option error.
    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Outbound SOAP document of a protocol fault.
    pub fn request_document(&self) -> Option<&str> {
        match self {
            Error::Protocol { request, .. } => request.as_deref(),
            _ => None,
        }
    }

    /// Inbound SOAP document of a protocol fault.
    pub fn response_document(&self) -> Option<&str> {
        match self {
            Error::Protocol { response, .. } => response.as_deref(),
            _ => None,
        }
    }

    /// Whether this is the unified protocol fault.
    ///
    /// I/O failures and interrupted waits count as well; [`Error::Interrupted`]
    /// stays a separate variant so callers can tell cancellation apart.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::Protocol { .. } | Error::Io(_) | Error::Interrupted(_)
        )
    }
}
