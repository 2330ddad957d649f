//! Runner configuration.
//!
//! Loaded from YAML, then overlaid with `CODERUN_*` environment variables.

use crate::classifier::{DEFAULT_INPUT_CUES, InputClassifier};
use crate::launcher::DEFAULT_BUILD_TIMEOUT;
use crate::profile::{LanguageProfile, ProfileRegistry};
use coderun_proto::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding [`RunnerConfig::work_dir`].
pub const ENV_WORK_DIR: &str = "CODERUN_WORK_DIR";
/// Environment variable overriding [`RunnerConfig::build_timeout_secs`].
pub const ENV_BUILD_TIMEOUT: &str = "CODERUN_BUILD_TIMEOUT_SECS";

const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 500;

fn default_build_timeout_secs() -> u64 {
    DEFAULT_BUILD_TIMEOUT.as_secs()
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

fn default_input_cues() -> Vec<String> {
    DEFAULT_INPUT_CUES.iter().map(|cue| (*cue).to_string()).collect()
}

/// Settings for a [`SessionRegistry`](crate::SessionRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Root under which every session gets its own directory.
    /// Defaults to a per-process directory in the system temp dir.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,

    /// How long output pumps may keep draining after the process exited.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Lowercase cues that mark an output chunk as a prompt.
    #[serde(default = "default_input_cues")]
    pub input_cues: Vec<String>,

    /// Profiles added to, or replacing, the built-in set.
    #[serde(default)]
    pub languages: Vec<LanguageProfile>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            build_timeout_secs: default_build_timeout_secs(),
            drain_timeout_ms: default_drain_timeout_ms(),
            input_cues: default_input_cues(),
            languages: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Parses a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Config(format!("invalid YAML: {e}")))
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: invalid YAML: {e}", path.display())))
    }

    /// Applies `CODERUN_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides using `lookup` in place of the process environment.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_WORK_DIR).filter(|dir| !dir.trim().is_empty()) {
            self.work_dir = Some(PathBuf::from(dir));
        }
        if let Some(raw) = lookup(ENV_BUILD_TIMEOUT) {
            self.build_timeout_secs = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_BUILD_TIMEOUT} must be a whole number, got {raw:?}"))
            })?;
        }
        Ok(self)
    }

    /// Checks everything that can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.build_timeout_secs == 0 {
            return Err(Error::Config("build_timeout_secs must be positive".to_string()));
        }
        for profile in &self.languages {
            profile.validate()?;
        }
        InputClassifier::new(&self.input_cues)?;
        Ok(())
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Work root, falling back to `<tmp>/coderun-<pid>`.
    pub fn resolved_work_dir(&self) -> PathBuf {
        let dir = self.work_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("coderun-{}", std::process::id()))
        });
        // Children run with their session directory as cwd.
        std::path::absolute(&dir).unwrap_or(dir)
    }

    /// Built-in profiles overlaid with [`RunnerConfig::languages`].
    pub fn profile_registry(&self) -> Result<ProfileRegistry> {
        ProfileRegistry::with_overrides(&self.languages)
    }

    pub fn classifier(&self) -> Result<InputClassifier> {
        InputClassifier::new(&self.input_cues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.build_timeout(), Duration::from_secs(60));
        assert_eq!(config.drain_timeout(), Duration::from_millis(500));
        assert_eq!(config.input_cues.len(), DEFAULT_INPUT_CUES.len());
        assert!(config.resolved_work_dir().is_absolute());
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = RunnerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RunnerConfig::default());
    }

    #[test]
    fn test_yaml_with_language_override() {
        let yaml = r"
work_dir: /tmp/coderun-test
build_timeout_secs: 5
input_cues: [gimme]
languages:
  - key: python
    display_name: PyPy
    extensions: ['.py']
    run_command: pypy3 -u {source}
    default_file_name: main.py
";
        let config = RunnerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.work_dir, Some(PathBuf::from("/tmp/coderun-test")));
        assert_eq!(config.build_timeout_secs, 5);
        assert_eq!(config.input_cues, vec!["gimme".to_string()]);

        let registry = config.profile_registry().unwrap();
        assert_eq!(registry.resolve("python").unwrap().display_name, "PyPy");
        assert!(config.classifier().unwrap().needs_input("gimme more"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = RunnerConfig::from_yaml("build_timeout: 5").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("coderun.yml");
        std::fs::write(&path, "drain_timeout_ms: 50\n").unwrap();

        let config = RunnerConfig::from_file(&path).unwrap();
        assert_eq!(config.drain_timeout(), Duration::from_millis(50));

        let missing = RunnerConfig::from_file(temp.path().join("nope.yml")).unwrap_err();
        assert_eq!(missing.kind(), coderun_proto::ErrorKind::Io);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([(ENV_WORK_DIR, "/srv/coderun"), (ENV_BUILD_TIMEOUT, " 12 ")]);
        let config = RunnerConfig::default()
            .with_overrides_from(|name| env.get(name).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.work_dir, Some(PathBuf::from("/srv/coderun")));
        assert_eq!(config.build_timeout_secs, 12);

        let err = RunnerConfig::default()
            .with_overrides_from(|name| (name == ENV_BUILD_TIMEOUT).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = RunnerConfig {
            build_timeout_secs: 0,
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
