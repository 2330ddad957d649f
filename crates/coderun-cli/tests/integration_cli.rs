//! Integration tests for the `coderun` binary.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn coderun(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_coderun"));
    command
        .current_dir(dir)
        .env("CODERUN_WORK_DIR", dir.join("work"))
        .env_remove("RUST_LOG")
        .arg("--color")
        .arg("never");
    command
}

fn run_ok(dir: &Path, args: &[&str]) -> String {
    let output = coderun(dir)
        .args(args)
        .output()
        .expect("Failed to execute coderun");
    assert!(
        output.status.success(),
        "coderun {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_languages_json_lists_builtins() {
    let temp = TempDir::new().expect("temp dir");
    let stdout = run_ok(temp.path(), &["languages", "--format", "json"]);
    let list: Vec<serde_json::Value> = serde_json::from_str(&stdout).expect("JSON list");
    let keys: Vec<&str> = list.iter().filter_map(|p| p["key"].as_str()).collect();
    for key in ["c", "cpp", "python", "java", "shell"] {
        assert!(keys.contains(&key), "missing {key}");
    }
}

#[test]
fn test_detect() {
    let temp = TempDir::new().expect("temp dir");
    assert_eq!(run_ok(temp.path(), &["detect", "hello.cpp"]).trim(), "cpp");

    let output = coderun(temp.path())
        .args(["detect", "notes.txt"])
        .output()
        .expect("Failed to execute coderun");
    assert!(!output.status.success());
}

#[test]
fn test_new_refuses_to_overwrite() {
    let temp = TempDir::new().expect("temp dir");
    run_ok(temp.path(), &["new", "python"]);
    let created = std::fs::read_to_string(temp.path().join("main.py")).expect("main.py");
    assert!(created.contains("input("));

    let output = coderun(temp.path())
        .args(["new", "py"])
        .output()
        .expect("Failed to execute coderun");
    assert!(!output.status.success());

    run_ok(temp.path(), &["new", "py", "--force", "--name", "other.py"]);
    assert!(temp.path().join("other.py").exists());
}

#[test]
fn test_config_file_adds_language() {
    let temp = TempDir::new().expect("temp dir");
    std::fs::write(
        temp.path().join("coderun.yml"),
        "languages:\n  - key: lua\n    display_name: Lua\n    extensions: ['.lua']\n    run_command: lua {source}\n    default_file_name: main.lua\n",
    )
    .expect("write config");
    assert_eq!(run_ok(temp.path(), &["detect", "x.lua"]).trim(), "lua");
}

#[cfg(unix)]
#[test]
fn test_run_exit_code_and_arguments() {
    let temp = TempDir::new().expect("temp dir");
    std::fs::write(
        temp.path().join("script.sh"),
        "echo \"out $1\"\necho \"err $2\" >&2\nexit 4\n",
    )
    .expect("write script");

    let output: Output = coderun(temp.path())
        .args(["run", "script.sh", "--", "a", "b"])
        .stdin(Stdio::null())
        .output()
        .expect("Failed to execute coderun");

    assert_eq!(output.status.code(), Some(4));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "out a\n");
    assert!(String::from_utf8_lossy(&output.stderr).contains("err b"));
    assert!(!temp.path().join("work").exists());
}

#[cfg(unix)]
#[test]
fn test_run_forwards_input() {
    let temp = TempDir::new().expect("temp dir");
    std::fs::write(
        temp.path().join("greet.sh"),
        "printf 'Enter your name: '\nread -r name\necho \"Hello, $name!\"\n",
    )
    .expect("write script");

    let mut child = coderun(temp.path())
        .args(["run", "greet.sh"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn coderun");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"Ada\n")
        .expect("write input");
    let output = child.wait_with_output().expect("wait");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Enter your name: "));
    assert!(stdout.contains("Hello, Ada!"));
    // Input is echoed by the terminal, not by coderun.
    assert!(!stdout.contains("Ada\nHello"));
}

#[cfg(unix)]
#[test]
fn test_run_closes_program_stdin_at_end_of_input() {
    let temp = TempDir::new().expect("temp dir");
    std::fs::write(temp.path().join("upper.sh"), "tr a-z A-Z\necho done\n")
        .expect("write script");

    let mut child = coderun(temp.path())
        .args(["run", "upper.sh"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn coderun");
    let mut stdin = child.stdin.take().expect("stdin");
    stdin.write_all(b"one\ntwo\n").expect("write input");
    drop(stdin);
    let output = child.wait_with_output().expect("wait");

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "ONE\nTWO\ndone\n");
}

#[test]
fn test_unknown_language_fails() {
    let temp = TempDir::new().expect("temp dir");
    std::fs::write(temp.path().join("prog.txt"), "hi").expect("write file");
    let output = coderun(temp.path())
        .args(["run", "prog.txt", "--lang", "cobol"])
        .stdin(Stdio::null())
        .output()
        .expect("Failed to execute coderun");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cobol"));
}
