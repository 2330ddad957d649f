//! Terminal rendering of runner events and language listings.

use colored::Colorize;
use coderun_core::{ErrorKind, LanguageProfile, RunnerEvent, StreamKind};
use std::sync::Arc;

/// Where a rendered piece of text should be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Stdout,
    Stderr,
}

/// Renders one event, or `None` for events the terminal already shows.
pub fn render_event(event: &RunnerEvent) -> Option<(Sink, String)> {
    match event {
        RunnerEvent::Output(output) => match output.stream {
            StreamKind::Stdout => Some((Sink::Stdout, output.text.clone())),
            StreamKind::Stderr => Some((Sink::Stderr, output.text.red().to_string())),
            // The terminal echoed the line while it was typed.
            StreamKind::Stdin => None,
        },
        RunnerEvent::InputRequested { .. } => {
            Some((Sink::Stderr, "⏎ ".dimmed().to_string()))
        }
        RunnerEvent::InputRequestCleared { .. } => None,
        RunnerEvent::Exited { .. } => None,
        RunnerEvent::Error { kind, message, .. } => {
            let line = match kind {
                ErrorKind::NoActiveProcess => {
                    format!("{}\n", "No running program to receive input".yellow())
                }
                _ => format!("{} {message}\n", "error:".red().bold()),
            };
            Some((Sink::Stderr, line))
        }
    }
}

/// Plain-text table of profiles.
pub fn languages_table<'a>(profiles: impl Iterator<Item = &'a Arc<LanguageProfile>>) -> String {
    let rows: Vec<[String; 4]> = profiles
        .map(|profile| {
            let mut names = vec![profile.key.clone()];
            names.extend(profile.aliases.iter().cloned());
            [
                names.join(", "),
                profile.display_name.clone(),
                profile
                    .extensions
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
                if profile.has_build_step {
                    "compiled".to_string()
                } else {
                    "interpreted".to_string()
                },
            ]
        })
        .collect();

    let header = ["KEY", "NAME", "EXTENSIONS", "KIND"].map(str::to_string);
    let mut widths = header.clone().map(|h| h.len());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(&header).chain(&rows) {
        let line: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderun_core::{OutputEvent, ProfileRegistry, SessionId};

    fn output(stream: StreamKind, text: &str) -> RunnerEvent {
        RunnerEvent::Output(OutputEvent {
            session_id: SessionId::from("cli"),
            generation: 1,
            stream,
            text: text.to_string(),
            seq: 0,
        })
    }

    #[test]
    fn test_stdout_is_passed_through_verbatim() {
        let rendered = render_event(&output(StreamKind::Stdout, "Enter your name: "));
        assert_eq!(
            rendered,
            Some((Sink::Stdout, "Enter your name: ".to_string()))
        );
    }

    #[test]
    fn test_stderr_goes_to_stderr_and_echo_is_hidden() {
        let (sink, text) = render_event(&output(StreamKind::Stderr, "oops\n")).unwrap();
        assert_eq!(sink, Sink::Stderr);
        assert!(text.contains("oops"));
        assert!(render_event(&output(StreamKind::Stdin, "Ada\n")).is_none());
    }

    #[test]
    fn test_errors_are_rendered() {
        let event = RunnerEvent::Error {
            session_id: SessionId::from("cli"),
            kind: ErrorKind::BuildFailed,
            message: "Build failed:\nmain.c:1: error".to_string(),
        };
        let (sink, text) = render_event(&event).unwrap();
        assert_eq!(sink, Sink::Stderr);
        assert!(text.contains("main.c:1: error"));
    }

    #[test]
    fn test_languages_table_lists_every_profile() {
        let registry = ProfileRegistry::builtin();
        let table = languages_table(registry.iter());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), registry.len() + 1);
        assert!(lines[0].starts_with("KEY"));
        assert!(table.contains("cpp, c++, cxx, cc"));
        assert!(table.contains(".py"));
        assert!(table.contains("interpreted"));
    }
}
