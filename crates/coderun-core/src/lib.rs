//! # coderun-core
//!
//! Runs user-authored source files through per-language build and run
//! pipelines and streams their console I/O back to the caller.
//!
//! This crate provides:
//! - Language profiles and the registry that resolves and detects them
//! - Staging and cleanup of per-session artifacts
//! - The launcher that builds and spawns programs from command templates
//! - A heuristic classifier that spots prompts waiting on stdin
//! - The session registry that keeps one live program per session

pub mod classifier;
mod config;
pub mod launcher;
mod process;
pub mod profile;
mod session;
pub mod stager;

pub use classifier::{DEFAULT_INPUT_CUES, InputClassifier};
pub use config::{ENV_BUILD_TIMEOUT, ENV_WORK_DIR, RunnerConfig};
pub use launcher::Launcher;
pub use process::ProcessHandle;
pub use profile::{LanguageProfile, ProfileRegistry, RunTarget, builtin_profiles};
pub use session::{Launched, RunRequest, SessionInfo, SessionRegistry};
pub use stager::{ArtifactStager, StagedArtifact, validate_file_name};

pub use coderun_proto::{
    Error, ErrorKind, OutputEvent, Result, RunnerEvent, SessionId, SessionState, StreamKind,
};
