use thiserror::Error;

use crate::packet::DecodeError;

/// Why the gateway refused a request. Checks run in declaration order and stop
/// at the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    InvalidKey,
    SignatureMismatch,
    QuotaExceeded,
}

impl AuthRejection {
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::InvalidKey => "Invalid or inactive key",
            Self::SignatureMismatch => "Signature mismatch",
            Self::QuotaExceeded => "Quota exceeded",
        }
    }
}

impl std::fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no network credentials configured")]
    MissingCredentials,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected response to {command}: {response}")]
    Protocol { command: String, response: String },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("unauthorized: {0}")]
    Authorization(AuthRejection),

    #[error("repository name already in use: {0}")]
    OwnershipConflict(String),

    #[error("key id collision")]
    KeyIdCollision,

    #[error("not found")]
    NotFound,
}

impl Error {
    pub(crate) fn protocol(command: &str, response: &str) -> Self {
        Self::Protocol {
            command: command.to_string(),
            response: response.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
