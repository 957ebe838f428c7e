//! Local command execution.
//!
//! Every local tool invocation (mirror clients, svnadmin, chgrp) goes through
//! a [`CommandRunner`] so strategies can be exercised with a recording fake.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

/// A program plus its arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
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

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process died from a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// One-line failure description for error details.
    pub fn describe_failure(&self, spec: &CommandSpec) -> String {
        let status = match self.status {
            Some(code) => format!("exit {code}"),
            None => "killed by signal".to_string(),
        };
        let stderr = self.stderr_text();
        if stderr.is_empty() {
            format!("`{}` failed ({})", spec, status)
        } else {
            format!(
                "`{}` failed ({}): {}",
                spec,
                status,
                crate::core::output::compact_line(&stderr, 240)
            )
        }
    }
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput>;

    /// Runs `spec` with `input` streamed to its stdin.
    fn run_with_stdin(&self, spec: &CommandSpec, input: &mut dyn Read)
    -> io::Result<CommandOutput>;
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandOutput> {
        tracing::debug!(command = %spec, "running local command");
        let output = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn run_with_stdin(
        &self,
        spec: &CommandSpec,
        input: &mut dyn Read,
    ) -> io::Result<CommandOutput> {
        tracing::debug!(command = %spec, "running local command with streamed input");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both output pipes while we feed stdin, otherwise a chatty
        // child blocks on a full pipe and never reads the rest of its input.
        let stdout_handle = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_handle = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let copy_result = match child.stdin.take() {
            Some(mut stdin) => io::copy(input, &mut stdin).and_then(|_| stdin.flush()),
            None => Err(io::Error::other("child stdin was not captured")),
        };

        let status = child.wait()?;
        let stdout = stdout_handle
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        let stderr = stderr_handle
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();

        // A child that exits early closes its stdin; report its status rather
        // than the broken pipe.
        if let Err(e) = copy_result {
            if status.success() || e.kind() != io::ErrorKind::BrokenPipe {
                return Err(e);
            }
        }

        Ok(CommandOutput {
            status: status.code(),
            stdout,
            stderr,
        })
    }
}
