//! Error types for Posture Agent

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Classification of a failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// External call exceeded its time bound
    Timeout,
    /// External command missing or exited unsuccessfully
    CommandFailed,
    /// Output could not be interpreted
    ParseFailed,
    /// Insufficient privileges
    PermissionDenied,
    /// Anything else, including a panicking provider
    Unknown,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::CommandFailed => write!(f, "command failed"),
            Self::ParseFailed => write!(f, "parse failed"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single probe failure, before it is attributed to a provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProbeError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::CommandFailed, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::ParseFailed, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::PermissionDenied, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unknown, message)
    }

    /// Attribute this failure to a named provider
    pub fn for_provider(self, provider: impl Into<String>) -> ProviderError {
        ProviderError {
            provider: provider.into(),
            source: self,
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::permission_denied(err.to_string()),
            io::ErrorKind::TimedOut => Self::timeout(err.to_string()),
            io::ErrorKind::InvalidData => Self::parse(err.to_string()),
            _ => Self::unknown(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

/// A fact provider failed; recorded in the envelope, never escalated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{provider}: {source}")]
pub struct ProviderError {
    pub provider: String,
    #[source]
    pub source: ProbeError,
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        self.source.kind
    }

    pub fn message(&self) -> &str {
        &self.source.message
    }
}

/// Configuration could not be used; the agent falls back to defaults
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Envelope could not be delivered
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Envelope serialization failed
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Server answered with a non-retryable status
    #[error("Rejected with HTTP {status}")]
    Rejected { status: u16 },

    /// Every attempt of the retry budget failed
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    /// Non-retryable transport failure (bad URL, TLS setup, ...)
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Fatal agent error; ends the run loop
#[derive(Error, Debug)]
pub enum AgentError {
    /// Two providers (or a provider and the envelope header) share a topic
    #[error("Topic collision: {0}")]
    TopicCollision(String),

    /// Scheduler asked to transition from a state that does not allow it
    #[error("Invalid scheduler state: cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    /// Strict configuration loading failed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The delivery client could not be constructed
    #[error("Delivery setup failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
