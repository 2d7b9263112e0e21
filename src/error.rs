//! Error types for kvwatch-config.

use std::fmt;

/// Result type alias for kvwatch-config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur while building or running a watch session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The watch feed answered with a non-success status.
    #[error(
        "Watch feed returned status {code} ({message}). Possible bad token, missing or unauthorized prefix: {namespace}"
    )]
    TransportStatus {
        /// HTTP-style status code reported by the feed
        code: u16,
        /// Status message reported by the feed
        message: String,
        /// Namespace prefix the session was watching
        namespace: String,
    },

    /// The watch feed reported a connection-level failure.
    #[error("Watch feed error: {0}")]
    TransportError(String),

    /// Required keys are missing and the active policy refuses to continue.
    #[error("Required keys missing: {}", .0.join(", "))]
    MissingRequiredKeys(Vec<String>),

    /// A required key is missing and no last-good value exists for it.
    #[error("Required key missing with no previous value: {0}")]
    MissingKeyNoPreviousValue(String),

    /// The configured missing-key policy name is not recognized.
    #[error("Unknown missing-key policy {rule}={value}")]
    UnknownPolicy {
        /// Which rule carried the bad value (startup or update)
        rule: &'static str,
        /// The unrecognized policy name
        value: String,
    },

    /// Session configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load settings from a source.
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    /// Failed to deserialize a snapshot or settings.
    #[error("Failed to deserialize configuration: {0}")]
    DeserializationError(String),

    /// The session is already watching.
    #[error("Watch session is already running")]
    AlreadyWatching,

    /// An observation was submitted from inside a subscriber callback.
    #[error("Observation submitted from a subscriber callback of the same session")]
    ReentrantObservation,

    /// The session halted after a fatal error and cannot be restarted.
    #[error("Watch session halted after a fatal error")]
    Halted,
}

impl ConfigError {
    /// Whether this error is terminal for the watch session.
    ///
    /// Fatal errors are returned to the caller instead of exiting the process,
    /// so the application decides whether to terminate, restart, or degrade.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingRequiredKeys(_)
                | Self::MissingKeyNoPreviousValue(_)
                | Self::UnknownPolicy { .. }
                | Self::Halted
        )
    }
}

/// Severity attached to every reported event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Reported, processing continues.
    Warn,
    /// Reported, the session halts.
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warn => f.write_str("WARN"),
            Self::Fatal => f.write_str("FATAL"),
        }
    }
}

/// Distinguishable code for every abnormal condition the session reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Feed answered with a non-200 status.
    #[serde(rename = "NON_HTTP_200")]
    NonHttp200,
    /// Feed connection error.
    ClientErr,
    /// Keys missing under the `exit` policy.
    MissingKeyExit,
    /// Keys missing under the `warn` policy.
    MissingKeyWarn,
    /// Keys missing under the `skip` policy.
    MissingKeySkip,
    /// A missing key was filled from the last-good snapshot.
    MissingKeyUsedPrevVal,
    /// A missing key had no last-good value to fall back to.
    MissingKeyNoPrevVal,
    /// The policy name is not recognized.
    UnknownConfig,
}

impl ErrorCode {
    /// The wire name of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NonHttp200 => "NON_HTTP_200",
            Self::ClientErr => "CLIENT_ERR",
            Self::MissingKeyExit => "MISSING_KEY_EXIT",
            Self::MissingKeyWarn => "MISSING_KEY_WARN",
            Self::MissingKeySkip => "MISSING_KEY_SKIP",
            Self::MissingKeyUsedPrevVal => "MISSING_KEY_USED_PREV_VAL",
            Self::MissingKeyNoPrevVal => "MISSING_KEY_NO_PREV_VAL",
            Self::UnknownConfig => "UNKNOWN_CONFIG",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to error subscribers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorInfo {
    /// What happened.
    pub code: ErrorCode,
    /// Whether the session keeps running.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl ErrorInfo {
    /// Create a warn-level report.
    pub fn warn(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warn,
            message: message.into(),
        }
    }

    /// Create a fatal report.
    pub fn fatal(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Fatal,
            message: message.into(),
        }
    }

    /// Whether this report halts the session.
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)
    }
}

impl From<&ConfigError> for ErrorInfo {
    fn from(err: &ConfigError) -> Self {
        match err {
            ConfigError::TransportStatus { .. } => Self::warn(ErrorCode::NonHttp200, err.to_string()),
            ConfigError::TransportError(_) => Self::warn(ErrorCode::ClientErr, err.to_string()),
            ConfigError::MissingRequiredKeys(_) => {
                Self::fatal(ErrorCode::MissingKeyExit, err.to_string())
            }
            ConfigError::MissingKeyNoPreviousValue(_) => {
                Self::fatal(ErrorCode::MissingKeyNoPrevVal, err.to_string())
            }
            _ => Self::fatal(ErrorCode::UnknownConfig, err.to_string()),
        }
    }
}
