//! Error types for coderun.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::SessionId;

/// Errors that can occur while orchestrating a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Language {language} is not supported: {reason}")]
    UnsupportedLanguage { language: String, reason: String },

    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build failed:\n{0}")]
    BuildFailed(String),

    #[error("Failed to start `{program}`: {message}")]
    SpawnFailed { program: String, message: String },

    #[error("No active process for session {0}")]
    NoActiveProcess(SessionId),
}

impl Error {
    /// Wraps an IO error with a short description of what was being attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the caller-facing category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownLanguage(_) | Error::InvalidFileName(_) | Error::Config(_) => {
                ErrorKind::Config
            }
            Error::UnsupportedLanguage { .. } => ErrorKind::UnsupportedLanguage,
            Error::Io { .. } => ErrorKind::Io,
            Error::BuildFailed(_) => ErrorKind::BuildFailed,
            Error::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            Error::NoActiveProcess(_) => ErrorKind::NoActiveProcess,
        }
    }
}

/// Serializable error category carried on `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Io,
    BuildFailed,
    SpawnFailed,
    UnsupportedLanguage,
    NoActiveProcess,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::BuildFailed => "build_failed",
            ErrorKind::SpawnFailed => "spawn_failed",
            ErrorKind::UnsupportedLanguage => "unsupported_language",
            ErrorKind::NoActiveProcess => "no_active_process",
        };
        f.write_str(name)
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::UnknownLanguage("cobol".into()).kind(), ErrorKind::Config);
        assert_eq!(Error::InvalidFileName("../x".into()).kind(), ErrorKind::Config);
        assert_eq!(Error::BuildFailed("oops".into()).kind(), ErrorKind::BuildFailed);
        assert_eq!(
            Error::NoActiveProcess(SessionId::from("s1")).kind(),
            ErrorKind::NoActiveProcess
        );
        let io = Error::io("writing main.py", std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert!(io.to_string().contains("writing main.py"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::BuildFailed).unwrap();
        assert_eq!(json, "\"build_failed\"");
        assert_eq!(ErrorKind::SpawnFailed.to_string(), "spawn_failed");
    }
}
