//! Error types for the Aggregate submission client.
//!
//! One crate-wide error enum covers template handling, authentication,
//! and transport. Every variant is terminal except [`OdkError::FormNotFound`],
//! which a caller can recover from by uploading the form definition first.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`OdkError`].
pub type Result<T> = std::result::Result<T, OdkError>;

/// Main error type for Aggregate submission operations.
#[derive(Error, Debug)]
pub enum OdkError {
    // ─────────────────────────────────────────────────────────────
    // Template Errors
    // ─────────────────────────────────────────────────────────────
    /// Template XML unparseable or structurally invalid.
    #[error("Malformed XForm template: {message}")]
    MalformedTemplate {
        /// Error description.
        message: String,
    },

    /// A field path the template does not define.
    #[error("Field \"{path}\" not found in form \"{form}\"")]
    FieldNotFound {
        /// The path that was requested.
        path: String,
        /// Instance root name of the form.
        form: String,
    },

    /// A value with no canonical text representation.
    #[error("Cannot convert value for field \"{path}\": {detail}")]
    UnconvertibleValue {
        /// The path the value was meant for.
        path: String,
        /// What the value was.
        detail: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Authentication Errors
    // ─────────────────────────────────────────────────────────────
    /// The server's digest challenge could not be understood.
    #[error("Malformed authentication challenge: {message}")]
    MalformedChallenge {
        /// Error description.
        message: String,
    },

    /// The server demands authentication but no credentials are configured.
    #[error("Server requires authentication; username and password must be provided")]
    CredentialsRequired,

    /// The server rejected the digest response.
    #[error("Authentication failed: server rejected the digest response")]
    AuthenticationFailed,

    /// Authenticated, but the account may not post forms.
    #[error("User \"{username}\" is not allowed to post forms")]
    Forbidden {
        /// The rejected account.
        username: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Connection Errors
    // ─────────────────────────────────────────────────────────────
    /// The submission endpoint does not exist on the server.
    #[error("Could not connect: path \"{path}\" not found on server")]
    EndpointNotFound {
        /// The configured root path.
        path: String,
    },

    /// The probe returned a status outside the protocol.
    #[error("Could not connect: unexpected status {status}")]
    UnknownConnection {
        /// HTTP status received.
        status: u16,
    },

    /// Connection-level failure (refused, DNS, TLS).
    #[error("Transport error: {message}")]
    Transport {
        /// Error description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<reqwest::Error>,
    },

    // ─────────────────────────────────────────────────────────────
    // Submission Errors
    // ─────────────────────────────────────────────────────────────
    /// The server has no form matching the submitted form id.
    #[error("Form not found on server")]
    FormNotFound,

    /// The server refused the submission.
    #[error("Submission rejected with status {status}: {body}")]
    SubmissionRejected {
        /// HTTP status received.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Input Errors
    // ─────────────────────────────────────────────────────────────
    /// File I/O error.
    #[error("File operation failed for '{path}': {message}")]
    Io {
        /// File path, empty when unknown.
        path: PathBuf,
        /// Error description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<std::io::Error>,
    },

    /// JSON defaults file unparseable.
    #[error("Failed to parse JSON: {message}")]
    Json {
        /// Error description.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// CSV bulk file structurally invalid.
    #[error("Invalid CSV data at line {line}: {message}")]
    Csv {
        /// 1-based line number.
        line: usize,
        /// Error description.
        message: String,
    },

    /// Server URL unparseable or unsupported.
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidServerUrl {
        /// The URL that was rejected.
        url: String,
        /// Reason for rejection.
        reason: String,
    },
}

impl OdkError {
    /// Create a malformed template error.
    pub fn template(message: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            message: message.into(),
        }
    }

    /// Create a field-not-found error.
    pub fn field_not_found(path: impl Into<String>, form: impl Into<String>) -> Self {
        Self::FieldNotFound {
            path: path.into(),
            form: form.into(),
        }
    }

    /// Create an unconvertible value error.
    pub fn unconvertible(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::UnconvertibleValue {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Create a malformed challenge error.
    pub fn challenge(message: impl Into<String>) -> Self {
        Self::MalformedChallenge {
            message: message.into(),
        }
    }

    /// Create a transport error without an underlying cause.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a file I/O error with the path that failed.
    pub fn io_with_path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a CSV error at a given 1-based line.
    pub fn csv(line: usize, message: impl Into<String>) -> Self {
        Self::Csv {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid server URL error.
    pub fn invalid_server_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidServerUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Check if a caller can recover from this error.
    ///
    /// Only [`OdkError::FormNotFound`] qualifies: the submission itself was
    /// well-formed and will be accepted once the form definition exists on
    /// the server.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::FormNotFound)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FROM IMPLEMENTATIONS
// ═══════════════════════════════════════════════════════════════════════════════

impl From<reqwest::Error> for OdkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<std::io::Error> for OdkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for OdkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}
