//! Events emitted by the session registry to its caller.

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, SessionId};

/// Which stream a chunk of text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
    /// Echo of text written to the process's input.
    Stdin,
}

/// One chunk of console I/O for a single process generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub session_id: SessionId,
    /// Increments every time the session starts a new process.
    pub generation: u64,
    pub stream: StreamKind,
    pub text: String,
    /// Starts at 0 for each generation, increments by one per event.
    pub seq: u64,
}

/// Everything the registry reports back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    Output(OutputEvent),
    InputRequested {
        session_id: SessionId,
    },
    InputRequestCleared {
        session_id: SessionId,
    },
    Exited {
        session_id: SessionId,
        code: Option<i32>,
    },
    Error {
        session_id: SessionId,
        kind: ErrorKind,
        message: String,
    },
}

impl RunnerEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            RunnerEvent::Output(output) => &output.session_id,
            RunnerEvent::InputRequested { session_id }
            | RunnerEvent::InputRequestCleared { session_id }
            | RunnerEvent::Exited { session_id, .. }
            | RunnerEvent::Error { session_id, .. } => session_id,
        }
    }

    pub fn as_output(&self) -> Option<&OutputEvent> {
        match self {
            RunnerEvent::Output(output) => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_event_json_shape() {
        let event = RunnerEvent::Output(OutputEvent {
            session_id: SessionId::from("s1"),
            generation: 1,
            stream: StreamKind::Stderr,
            text: "boom\n".to_string(),
            seq: 4,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "output");
        assert_eq!(json["stream"], "stderr");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn test_session_id_accessor() {
        let event = RunnerEvent::Exited {
            session_id: SessionId::from("panel"),
            code: Some(0),
        };
        assert_eq!(event.session_id().as_str(), "panel");
        assert!(event.as_output().is_none());
    }

    #[test]
    fn test_error_event_roundtrip() {
        let event = RunnerEvent::Error {
            session_id: SessionId::from("s"),
            kind: ErrorKind::NoActiveProcess,
            message: "nothing running".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: RunnerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
