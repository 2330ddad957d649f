//! Session identity and lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one run slot (for example one open output panel).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a form of the id that is safe to use as a single path component.
    ///
    /// ASCII alphanumerics, `-` and `_` pass through; every other byte is
    /// written as `%XX`, so distinct ids never map to the same directory.
    pub fn path_component(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                out.push(char::from(byte));
            } else {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
        // A lone `%` never comes out of the escaping above.
        if out.is_empty() {
            out.push('%');
        }
        out
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a session.
///
/// `AwaitingInputHint` is advisory: it never blocks the process or gates
/// writes to its input, it only drives the "program may want input" affordance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Staging,
    Building,
    Running,
    AwaitingInputHint,
    Exited {
        code: Option<i32>,
    },
    Failed {
        reason: String,
    },
    Killed,
}

impl SessionState {
    /// True while a process (or its build) may still be running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Staging
                | SessionState::Building
                | SessionState::Running
                | SessionState::AwaitingInputHint
        )
    }

    /// True once the last run has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Exited { .. } | SessionState::Failed { .. } | SessionState::Killed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Staging => f.write_str("staging"),
            SessionState::Building => f.write_str("building"),
            SessionState::Running => f.write_str("running"),
            SessionState::AwaitingInputHint => f.write_str("awaiting input"),
            SessionState::Exited { code: Some(code) } => write!(f, "exited ({code})"),
            SessionState::Exited { code: None } => f.write_str("exited (signal)"),
            SessionState::Failed { reason } => write!(f, "failed: {reason}"),
            SessionState::Killed => f.write_str("killed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_component_passthrough() {
        assert_eq!(SessionId::from("panel-1_a").path_component(), "panel-1_a");
    }

    #[test]
    fn test_path_component_escapes_separators() {
        assert_eq!(SessionId::from("a/b").path_component(), "a%2Fb");
        assert_eq!(SessionId::from("..").path_component(), "%2E%2E");
        assert_ne!(
            SessionId::from("a/b").path_component(),
            SessionId::from("a_b").path_component()
        );
    }

    #[test]
    fn test_path_component_empty_id_is_distinct() {
        let empty = SessionId::from("").path_component();
        assert!(!empty.is_empty());
        assert_ne!(empty, SessionId::from("\0").path_component());
        assert_ne!(empty, SessionId::from("%").path_component());
        assert_eq!(SessionId::from("\0").path_component(), "%00");
    }

    #[test]
    fn test_state_predicates() {
        assert!(SessionState::Running.is_active());
        assert!(SessionState::AwaitingInputHint.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(SessionState::Exited { code: Some(0) }.is_terminal());
        assert!(SessionState::Killed.is_terminal());
        assert!(!SessionState::Building.is_terminal());
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_value(SessionState::Exited { code: Some(2) }).unwrap();
        assert_eq!(json["state"], "exited");
        assert_eq!(json["code"], 2);
    }
}
