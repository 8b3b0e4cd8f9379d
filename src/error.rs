//! Error types for streval.
//!
//! Failures are scoped to the smallest unit they affect (one artifact, one
//! case). [`ErrorKind`] is the serializable tag that reports carry for a
//! failed unit, so a batch never has to drop an entry silently.

use serde::{Deserialize, Serialize};

/// Top-level error enum for the library cores.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("current text of {artifact} does not start with its provide code")]
    PrefixMismatch { artifact: String },

    #[error("service unavailable after {attempts} tries: {message}")]
    ServiceUnavailable { attempts: u32, message: String },

    #[error("invalid weights {weights:?}: {reason}")]
    InvalidWeights { weights: [f64; 4], reason: String },

    #[error("{metric} could not parse input: {message}")]
    ParseFailure {
        metric: &'static str,
        message: String,
    },

    #[error("artifact store corrupt for {artifact}: {message}")]
    StoreCorrupt { artifact: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::NotFound(_) => ErrorKind::NotFound,
            EvalError::PrefixMismatch { .. } => ErrorKind::PrefixMismatch,
            EvalError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            EvalError::InvalidWeights { .. } => ErrorKind::InvalidWeights,
            EvalError::ParseFailure { .. } => ErrorKind::ParseFailure,
            EvalError::StoreCorrupt { .. } => ErrorKind::StoreCorrupt,
            EvalError::Config(_) => ErrorKind::Config,
            EvalError::Io(_) | EvalError::Json(_) => ErrorKind::Io,
        }
    }
}

/// Error classification attached to failed artifacts and cases in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    PrefixMismatch,
    ServiceUnavailable,
    /// Expected outcome of a candidate that does not compile. Never an `Err`.
    ValidationFailed,
    InvalidWeights,
    ParseFailure,
    StoreCorrupt,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::PrefixMismatch => "PrefixMismatch",
            ErrorKind::ServiceUnavailable => "ServiceUnavailable",
            ErrorKind::ValidationFailed => "ValidationFailed",
            ErrorKind::InvalidWeights => "InvalidWeights",
            ErrorKind::ParseFailure => "ParseFailure",
            ErrorKind::StoreCorrupt => "StoreCorrupt",
            ErrorKind::Config => "Config",
            ErrorKind::Io => "Io",
        }
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_json_errors_classify_as_io() {
        let io = EvalError::from(std::io::Error::other("disk gone"));
        assert_eq!(io.kind(), ErrorKind::Io);

        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(EvalError::from(json).kind(), ErrorKind::Io);
    }

    #[test]
    fn kind_serializes_as_variant_name() {
        let encoded = serde_json::to_string(&ErrorKind::PrefixMismatch).unwrap();
        assert_eq!(encoded, "\"PrefixMismatch\"");
        assert_eq!(ErrorKind::ServiceUnavailable.as_str(), "ServiceUnavailable");
    }
}
