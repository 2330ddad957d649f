//! # coderun
//!
//! Binary entry point for coderun.
//!
//! This crate provides:
//! - CLI argument parsing using `clap`
//! - Logging and configuration setup
//! - `coderun run` to build and run a file interactively
//! - `coderun languages`, `coderun detect` and `coderun new` for profile lookups

mod display;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coderun_core::{RunRequest, RunnerConfig, RunnerEvent, SessionId, SessionRegistry};
use display::Sink;
use std::fs;
use std::io::{IsTerminal, Write, stderr, stdout};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Config file picked up from the current directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "coderun.yml";

/// Color output mode for terminal display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect if stdout is a TTY
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl ColorMode {
    fn should_use_colors(self) -> bool {
        match self {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => stdout().is_terminal() && stderr().is_terminal(),
        }
    }
}

/// Output format for the languages command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for programmatic access
    Json,
}

/// coderun - build and run source files with interactive console I/O
#[derive(Parser, Debug)]
#[command(name = "coderun", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to ./coderun.yml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Color output mode (auto, always, never)
    #[arg(long, value_enum, default_value_t = ColorMode::Auto, global = true)]
    color: ColorMode,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build (if needed) and run a source file, forwarding terminal input
    Run(RunArgs),

    /// List the known languages
    Languages(LanguagesArgs),

    /// Print the language detected from a file name
    Detect(DetectArgs),

    /// Write a language's starter template
    New(NewArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Source file to run
    file: PathBuf,

    /// Language key or alias (detected from the extension by default)
    #[arg(short, long)]
    lang: Option<String>,

    /// Session id to run under
    #[arg(long, default_value = "cli")]
    session: String,

    /// Arguments passed to the program
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Parser, Debug)]
struct LanguagesArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Parser, Debug)]
struct DetectArgs {
    /// File name to inspect
    file: PathBuf,
}

#[derive(Parser, Debug)]
struct NewArgs {
    /// Language key or alias
    lang: String,

    /// File to create (defaults to the language's default file name)
    #[arg(short, long)]
    name: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(short, long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so program output on stdout stays clean.
    let default_filter = if cli.verbose {
        "coderun_core=debug,coderun_cli=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(stderr)
        .init();

    colored::control::set_override(cli.color.should_use_colors());

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            let code = run_command(&config, args).await?;
            std::process::exit(code);
        }
        Commands::Languages(args) => languages_command(&config, args),
        Commands::Detect(args) => detect_command(&config, &args),
        Commands::New(args) => new_command(&config, args),
    }
}

fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    let config = match path {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
            RunnerConfig::from_file(DEFAULT_CONFIG_FILE)
                .with_context(|| format!("Failed to load {DEFAULT_CONFIG_FILE}"))?
        }
        None => RunnerConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}

fn write_sink(sink: Sink, text: &str) {
    // A closed terminal is not worth failing the run over.
    let _ = match sink {
        Sink::Stdout => {
            let mut out = stdout().lock();
            out.write_all(text.as_bytes()).and_then(|()| out.flush())
        }
        Sink::Stderr => {
            let mut err = stderr().lock();
            err.write_all(text.as_bytes()).and_then(|()| err.flush())
        }
    };
}

async fn run_command(config: &RunnerConfig, args: RunArgs) -> Result<i32> {
    let source = fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let file_name = file_name_of(&args.file)?;

    let (registry, mut events) = SessionRegistry::new(config)?;

    let language = match args.lang {
        Some(lang) => lang,
        None => registry
            .profiles()
            .detect(&file_name)
            .map(|profile| profile.key.clone())
            .with_context(|| {
                format!("Cannot detect the language of {file_name}; pass --lang")
            })?,
    };

    let id = SessionId::new(args.session);
    let request = RunRequest::new(language, source)
        .file_name(file_name)
        .args(args.args.join(" "));

    if let Err(e) = registry.run(&id, request).await {
        registry.shutdown_all().await;
        return Err(e.into());
    }

    let input_registry = registry.clone();
    let input_id = id.clone();
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut forwarding = true;
        while let Ok(Some(line)) = lines.next_line().await {
            if input_registry.send_input(&input_id, &line).await.is_err() {
                forwarding = false;
                break;
            }
        }
        // End of terminal input is end of the program's input too.
        if forwarding {
            let _ = input_registry.close_input(&input_id).await;
        }
        debug!("Input forwarding stopped");
    });

    let code = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(RunnerEvent::Exited { code, .. }) => break code.unwrap_or(1),
                Some(event) => {
                    if let Some((sink, text)) = display::render_event(&event) {
                        write_sink(sink, &text);
                    }
                }
                None => break 1,
            },
            _ = tokio::signal::ctrl_c() => {
                write_sink(Sink::Stderr, "\n");
                break 130;
            }
        }
    };

    input.abort();
    registry.shutdown_all().await;
    Ok(code)
}

fn languages_command(config: &RunnerConfig, args: LanguagesArgs) -> Result<()> {
    let profiles = config.profile_registry()?;
    match args.format {
        OutputFormat::Table => print!("{}", display::languages_table(profiles.iter())),
        OutputFormat::Json => {
            let list: Vec<_> = profiles.iter().map(|profile| profile.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
    }
    Ok(())
}

fn detect_command(config: &RunnerConfig, args: &DetectArgs) -> Result<()> {
    let file_name = file_name_of(&args.file)?;
    let profile = config
        .profile_registry()?
        .detect(&file_name)
        .with_context(|| format!("No language matches {file_name}"))?;
    println!("{}", profile.key);
    Ok(())
}

fn new_command(config: &RunnerConfig, args: NewArgs) -> Result<()> {
    let profile = config.profile_registry()?.resolve(&args.lang)?;
    let path = args
        .name
        .unwrap_or_else(|| PathBuf::from(&profile.default_file_name));

    if path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    fs::write(&path, &profile.template)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {} ({})", path.display(), profile.display_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse_program_arguments() {
        let cli = Cli::try_parse_from([
            "coderun", "run", "main.py", "--lang", "py", "--", "-x", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.file, PathBuf::from("main.py"));
                assert_eq!(args.lang.as_deref(), Some("py"));
                assert_eq!(args.session, "cli");
                assert_eq!(args.args, vec!["-x", "2"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["coderun", "languages", "--color", "never", "-v"]).unwrap();
        assert_eq!(cli.color, ColorMode::Never);
        assert!(cli.verbose);
        assert!(!cli.color.should_use_colors());
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of(Path::new("src/main.rs")).unwrap(), "main.rs");
        assert!(file_name_of(Path::new("/")).is_err());
    }
}
