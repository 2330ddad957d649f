//! Handle to one spawned user program.
//!
//! The launcher hands out a `ProcessHandle` with all three pipes still
//! attached; the session registry takes the streams it needs before the
//! program has a chance to produce output that nobody is reading.

use std::io;
use std::process::ExitStatus;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tracing::debug;

#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;

/// A spawned process plus its not-yet-subscribed streams.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    program: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessHandle {
    pub(crate) fn new(mut child: Child, program: String) -> Self {
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        Self {
            child,
            pid,
            program,
            stdin,
            stdout,
            stderr,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Program that was executed (first word of the rendered run command).
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Waits for the process to exit. Safe to call again after it returned.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Sends SIGKILL to every process left in the program's process group.
    ///
    /// The group outlives its leader, so this also reaches background jobs
    /// of a program that already exited. Errors (an empty group) are ignored.
    pub fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            debug!(pid, "Sending SIGKILL to process group");
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }

    /// Forcefully terminates the process group and reaps the process.
    ///
    /// Killing an already exited process only sweeps its group.
    pub async fn kill(&mut self) -> io::Result<()> {
        self.kill_group();
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        match self.child.start_kill() {
            Ok(()) => {}
            // Raced with a natural exit.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        let status = self.child.wait().await?;
        debug!(pid = ?self.pid, ?status, "Process killed");
        Ok(())
    }
}
