//! Build and run pipelines driven by language profiles.
//!
//! Command templates are split on whitespace first and placeholders are
//! substituted per token afterwards, so a staged path containing spaces stays
//! a single argument. No shell is involved at any point.

use crate::process::ProcessHandle;
use crate::profile::{LanguageProfile, RunTarget};
use crate::stager::StagedArtifact;
use coderun_proto::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Default limit for a single build step.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(60);

/// Values available to command templates for one staged artifact.
#[derive(Debug, Clone)]
struct Placeholders {
    source: String,
    output: String,
    name: String,
    dir: String,
    intermediate: Option<String>,
    target: String,
}

impl Placeholders {
    fn lookup(&self, placeholder: &str) -> Option<Option<&str>> {
        let value = match placeholder {
            "source" => Some(self.source.as_str()),
            "output" => Some(self.output.as_str()),
            "name" => Some(self.name.as_str()),
            "dir" => Some(self.dir.as_str()),
            "target" => Some(self.target.as_str()),
            "intermediate" => self.intermediate.as_deref(),
            _ => return None,
        };
        Some(value)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Path of the executable a build step writes for `artifact`.
pub fn output_path(artifact: &StagedArtifact) -> PathBuf {
    artifact
        .dir()
        .join(format!("{}{}", artifact.stem(), std::env::consts::EXE_SUFFIX))
}

fn uses_placeholder(template: &str, name: &str) -> bool {
    template.contains(&format!("{{{name}}}"))
}

/// Renders one template into program + arguments.
fn render(template: &str, values: &Placeholders, profile: &LanguageProfile) -> Result<Vec<String>> {
    template
        .split_whitespace()
        .map(|token| render_token(token, values, profile))
        .collect()
}

fn render_token(token: &str, values: &Placeholders, profile: &LanguageProfile) -> Result<String> {
    let mut rendered = String::with_capacity(token.len());
    let mut rest = token;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}').map(|offset| open + offset) else {
            break;
        };
        rendered.push_str(&rest[..open]);
        let placeholder = &rest[open + 1..close];
        match values.lookup(placeholder) {
            Some(Some(value)) => rendered.push_str(value),
            Some(None) => {
                return Err(Error::UnsupportedLanguage {
                    language: profile.key.clone(),
                    reason: format!(
                        "template uses {{{placeholder}}} but the profile has no intermediate_extension"
                    ),
                });
            }
            None => {
                return Err(Error::Config(format!(
                    "language {}: unknown placeholder {{{placeholder}}} in {token:?}",
                    profile.key
                )));
            }
        }
        rest = &rest[close + 1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

/// Turns a profile plus a staged artifact into a running process.
#[derive(Debug, Clone)]
pub struct Launcher {
    build_timeout: Duration,
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_TIMEOUT)
    }
}

impl Launcher {
    pub fn new(build_timeout: Duration) -> Self {
        Self { build_timeout }
    }

    pub fn build_timeout(&self) -> Duration {
        self.build_timeout
    }

    /// Checks the profile against the artifact and records derived paths
    /// (binary, intermediates) so cleanup knows about them before the build
    /// has even started.
    pub fn prepare(&self, profile: &LanguageProfile, artifact: &mut StagedArtifact) -> Result<()> {
        let build = self.build_template(profile)?;

        if profile.run_target == RunTarget::Binary && build.is_none() {
            return Err(Error::UnsupportedLanguage {
                language: profile.key.clone(),
                reason: "binary run target requires a build step".to_string(),
            });
        }

        let produces_output = build.is_some_and(|template| uses_placeholder(template, "output"))
            || profile.run_target == RunTarget::Binary;
        if produces_output {
            artifact.set_binary(output_path(artifact));
        }
        if let Some(ext) = &profile.intermediate_extension {
            let path = artifact.dir().join(format!("{}{ext}", artifact.stem()));
            artifact.add_intermediate(path);
        }

        // Surface template errors before anything is executed.
        let values = self.placeholders(profile, artifact);
        if let Some(template) = build {
            render(template, &values, profile)?;
        }
        render(&profile.run_command, &values, profile)?;
        Ok(())
    }

    fn build_template<'a>(&self, profile: &'a LanguageProfile) -> Result<Option<&'a str>> {
        if !profile.has_build_step {
            return Ok(None);
        }
        match profile.build_command.as_deref() {
            Some(template) if !template.trim().is_empty() => Ok(Some(template)),
            _ => Err(Error::UnsupportedLanguage {
                language: profile.key.clone(),
                reason: "has_build_step is set but no build_command is configured".to_string(),
            }),
        }
    }

    fn placeholders(&self, profile: &LanguageProfile, artifact: &StagedArtifact) -> Placeholders {
        let source = path_string(artifact.source());
        let output = path_string(&output_path(artifact));
        let name = artifact.stem();
        let target = match profile.run_target {
            RunTarget::Source => source.clone(),
            RunTarget::Binary => output.clone(),
            RunTarget::LogicalName => name.clone(),
        };
        let intermediate = profile
            .intermediate_extension
            .as_ref()
            .map(|ext| path_string(&artifact.dir().join(format!("{name}{ext}"))));

        Placeholders {
            source,
            output,
            name,
            dir: path_string(artifact.dir()),
            intermediate,
            target,
        }
    }

    /// Runs the build step to completion. No-op for interpreted profiles.
    ///
    /// A non-zero exit or a timeout yields [`Error::BuildFailed`] carrying the
    /// combined compiler output verbatim.
    pub async fn build(&self, profile: &LanguageProfile, artifact: &StagedArtifact) -> Result<()> {
        let Some(template) = self.build_template(profile)? else {
            return Ok(());
        };
        let argv = render(template, &self.placeholders(profile, artifact), profile)?;
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::Config(format!(
                "language {} has an empty build command",
                profile.key
            )));
        };

        debug!(language = %profile.key, program = %program, ?args, "Running build step");

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(artifact.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.build_timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!(program = %program, error = %e, "Failed to start build");
                return Err(Error::SpawnFailed {
                    program: program.clone(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::BuildFailed(format!(
                    "{program} timed out after {}s",
                    self.build_timeout.as_secs_f64()
                )));
            }
        };

        if output.status.success() {
            info!(language = %profile.key, "Build succeeded");
            return Ok(());
        }

        let mut diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stderr));
        if diagnostics.trim().is_empty() {
            diagnostics = format!("{program} exited with {}", output.status);
        }
        debug!(language = %profile.key, status = %output.status, "Build failed");
        Err(Error::BuildFailed(diagnostics))
    }

    /// Spawns the run command with `args` appended as whitespace-split words.
    ///
    /// The returned handle still owns all of its pipes.
    pub fn spawn(
        &self,
        profile: &LanguageProfile,
        artifact: &StagedArtifact,
        args: &str,
    ) -> Result<ProcessHandle> {
        let argv = render(
            &profile.run_command,
            &self.placeholders(profile, artifact),
            profile,
        )?;
        let Some((program, template_args)) = argv.split_first() else {
            return Err(Error::Config(format!(
                "language {} has an empty run command",
                profile.key
            )));
        };

        let mut command = Command::new(program);
        command
            .args(template_args)
            .args(args.split_whitespace())
            .current_dir(artifact.dir())
            .stdin(if profile.supports_input {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            error!(program = %program, error = %e, "Failed to spawn program");
            Error::SpawnFailed {
                program: program.clone(),
                message: e.to_string(),
            }
        })?;

        let handle = ProcessHandle::new(child, program.clone());
        info!(language = %profile.key, program = %program, pid = ?handle.pid(), "Spawned program");
        Ok(handle)
    }

    /// Prepare, build (if needed) and spawn in one call.
    pub async fn launch(
        &self,
        profile: &LanguageProfile,
        artifact: &mut StagedArtifact,
        args: &str,
    ) -> Result<ProcessHandle> {
        self.prepare(profile, artifact)?;
        self.build(profile, artifact).await?;
        self.spawn(profile, artifact, args)
    }
}
