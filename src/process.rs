//! External process capability.
//!
//! Every rsync, ssh and pager invocation goes through [`ProcessRunner`], so the
//! command pipelines can be exercised with scripted results instead of a live
//! server.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DeployError;

/// A program plus its argument vector. Arguments are passed to the OS as-is;
/// no shell ever parses them locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote a word for a POSIX shell. Words made only of safe characters are
/// returned untouched.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));

    if safe {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a non-zero exit into [`DeployError::RemoteOperationFailed`]
    pub fn check(self, command: &CommandLine) -> Result<Self, DeployError> {
        if self.success() {
            Ok(self)
        } else {
            Err(self.failure(command))
        }
    }

    /// Describe this output as a failure of `command`
    pub fn failure(&self, command: &CommandLine) -> DeployError {
        let stderr = self.stderr_text();
        let output = if stderr.trim().is_empty() {
            self.stdout_text()
        } else {
            stderr
        };

        DeployError::RemoteOperationFailed {
            command: command.to_string(),
            code: self.exit_code,
            output: output.trim().to_string(),
        }
    }
}

/// Runs external programs on behalf of the pipelines
pub trait ProcessRunner {
    /// Run to completion with captured output, optionally feeding `stdin`
    fn run(&self, command: &CommandLine, stdin: Option<&[u8]>) -> Result<ProcessOutput>;

    /// Run attached to the terminal and return the exit code
    fn run_interactive(&self, command: &CommandLine) -> Result<i32>;

    /// Like [`ProcessRunner::run`] but a non-zero exit is an error
    fn run_checked(&self, command: &CommandLine, stdin: Option<&[u8]>) -> Result<ProcessOutput> {
        let output = self.run(command, stdin)?;
        Ok(output.check(command)?)
    }
}

/// Shared flag set by the Ctrl-C handler
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Install the process-wide Ctrl-C handler and return its flag.
    ///
    /// The child process receives the same SIGINT and stops on its own; the
    /// runner notices the flag once the child has exited.
    pub fn install() -> Result<Self> {
        let interrupt = Self::default();
        let flag = Arc::clone(&interrupt.0);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
        .context("Failed to set Ctrl+C handler")?;
        Ok(interrupt)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// [`ProcessRunner`] backed by `std::process::Command`
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    interrupt: Interrupt,
}

impl SystemRunner {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    fn check_interrupt(&self) -> Result<()> {
        if self.interrupt.triggered() {
            return Err(DeployError::Interrupted.into());
        }
        Ok(())
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandLine, stdin: Option<&[u8]>) -> Result<ProcessOutput> {
        log::debug!("$ {command}");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run '{}'", command.program))?;

        // Feed stdin from a separate thread so a chatty child cannot deadlock
        // against a full stdout pipe.
        let output = std::thread::scope(|scope| {
            if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
                scope.spawn(move || {
                    if let Err(e) = pipe.write_all(data) {
                        log::warn!("Failed to write to child stdin: {e}");
                    }
                });
            }
            child.wait_with_output()
        })
        .with_context(|| format!("Failed to wait for '{}'", command.program))?;

        self.check_interrupt()?;

        Ok(ProcessOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn run_interactive(&self, command: &CommandLine) -> Result<i32> {
        log::debug!("$ {command}");

        let status = Command::new(&command.program)
            .args(&command.args)
            .status()
            .with_context(|| format!("Failed to run '{}'", command.program))?;

        self.check_interrupt()?;

        Ok(status.code().unwrap_or(-1))
    }
}
