//! Process execution: synchronous capture and line-streamed child processes.

use std::io::BufRead;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;

use crate::error::UtilError;

/// Structured output from a captured command execution.
#[derive(Debug)]
pub struct ExecOutput {
    /// Standard output as a string.
    pub stdout: String,
    /// Standard error as a string.
    pub stderr: String,
    /// Whether the command exited successfully.
    pub success: bool,
    /// The exit code, if the process was not killed by a signal.
    pub exit_code: Option<i32>,
}

/// Callback invoked with each line read from a child process stream.
pub type LineCallback = Box<dyn FnMut(String) + Send>;

/// A process execution surface, injected so the engine never spawns
/// children directly.
pub trait ProcessExecutor: std::fmt::Debug + Send + Sync {
    /// Run `argv` to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit code is **not** an error; check `ExecOutput::success`.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned (e.g. binary not found).
    fn execute(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<ExecOutput, UtilError>;

    /// Spawn `argv` and stream its output line by line.
    ///
    /// Each stream is drained to EOF on its own OS thread; the callbacks are
    /// invoked from those threads as lines arrive.
    ///
    /// # Errors
    /// Returns an error if the process cannot be spawned.
    fn spawn_streaming(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        env: &[(String, String)],
        on_stdout_line: LineCallback,
        on_stderr_line: LineCallback,
    ) -> Result<ProcessHandle, UtilError>;
}

/// A handle to a streamed child process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    drains: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Wait for the process to exit and for both streams to be fully drained.
    ///
    /// Returns the exit code, or `None` if the process was killed by a signal.
    ///
    /// # Errors
    /// Returns an error if waiting on the child fails.
    pub fn wait(&mut self) -> Result<Option<i32>, UtilError> {
        let status = self
            .child
            .wait()
            .map_err(|source| UtilError::CommandExec { source })?;
        for drain in self.drains.drain(..) {
            let _ = drain.join();
        }
        Ok(status.code())
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate the process. Errors from an already-exited child are ignored.
    pub fn kill(&mut self) {
        let _ = self.child.kill();
    }
}

/// The real executor, backed by `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProcessExecutor;

fn build_command(
    argv: &[String],
    cwd: Option<&Path>,
    env: &[(String, String)],
) -> Result<Command, UtilError> {
    let Some(program) = argv.first() else {
        return Err(UtilError::CommandExec {
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
        });
    };
    let mut cmd = Command::new(program);
    cmd.args(argv.get(1..).unwrap_or_default());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    Ok(cmd)
}

fn drain_lines<R: std::io::Read + Send + 'static>(
    reader: R,
    mut on_line: LineCallback,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let buffered = std::io::BufReader::new(reader);
        for line in buffered.lines() {
            match line {
                Ok(line) => on_line(line),
                Err(_) => break,
            }
        }
    })
}

impl ProcessExecutor for HostProcessExecutor {
    fn execute(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        env: &[(String, String)],
    ) -> Result<ExecOutput, UtilError> {
        let mut cmd = build_command(argv, cwd, env)?;
        let output = cmd
            .output()
            .map_err(|source| UtilError::CommandExec { source })?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            exit_code: output.status.code(),
        })
    }

    fn spawn_streaming(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        env: &[(String, String)],
        on_stdout_line: LineCallback,
        on_stderr_line: LineCallback,
    ) -> Result<ProcessHandle, UtilError> {
        let mut cmd = build_command(argv, cwd, env)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|source| UtilError::CommandExec { source })?;

        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain_lines(stdout, on_stdout_line));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain_lines(stderr, on_stderr_line));
        }

        Ok(ProcessHandle { child, drains })
    }
}
