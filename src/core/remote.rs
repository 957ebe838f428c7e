//! Remote command channel.
//!
//! Every remote inspection and operation (listing, verifying, hot-copying,
//! dumping, archiving) runs through [`RemoteChannel::execute`] or
//! [`RemoteChannel::execute_to`]. Only the exit status drives control flow;
//! stderr is carried along for error details.

use crate::core::config::SshConfig;
use crate::core::error::RepokeepError;
use crate::core::output::compact_line;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread;

/// ssh reserves exit status 255 for its own connection failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone, Default)]
pub struct RemoteOutput {
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    /// Bytes streamed into the sink by `execute_to`.
    pub streamed: u64,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn describe_failure(&self, argv: &[&str]) -> String {
        let status = match self.status {
            Some(code) => format!("exit {code}"),
            None => "killed by signal".to_string(),
        };
        if self.stderr.trim().is_empty() {
            format!("`{}` failed ({})", argv.join(" "), status)
        } else {
            format!(
                "`{}` failed ({}): {}",
                argv.join(" "),
                status,
                compact_line(&self.stderr, 240)
            )
        }
    }
}

pub trait RemoteChannel: Send + Sync {
    fn host(&self) -> &str;

    /// Runs `argv` on the remote host and captures its stdout.
    fn execute(&self, argv: &[&str]) -> Result<RemoteOutput, RepokeepError>;

    /// Runs `argv` on the remote host, streaming stdout into `sink`.
    fn execute_to(&self, argv: &[&str], sink: &mut dyn Write)
    -> Result<RemoteOutput, RepokeepError>;

    /// ssh command line, with this channel's options, for local clients that
    /// open their own tunnel to the host (`SVN_SSH`). `None` when the host
    /// is reached without ssh.
    fn tunnel_command(&self) -> Option<String> {
        None
    }
}

/// Builds the channel for the configured host.
pub fn channel_for(host: &str, ssh: &SshConfig) -> Box<dyn RemoteChannel> {
    if host == "localhost" {
        Box::new(LocalChannel)
    } else {
        Box::new(SshChannel::new(host, ssh))
    }
}

/// Executes commands over an already-authenticated ssh transport.
#[derive(Debug, Clone)]
pub struct SshChannel {
    host: String,
    options: Vec<String>,
}

impl SshChannel {
    pub fn new(host: &str, cfg: &SshConfig) -> Self {
        let mut options = vec![
            "-oBatchMode=yes".to_string(),
            format!("-oConnectTimeout={}", cfg.connect_timeout_secs),
            format!("-oServerAliveInterval={}", cfg.server_alive_secs),
        ];
        options.extend(cfg.options.iter().cloned());
        Self {
            host: host.to_string(),
            options,
        }
    }

    fn command(&self, argv: &[&str]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.options)
            .arg(&self.host)
            .arg("--")
            .arg(remote_command_line(argv));
        cmd
    }

    fn check_transport(&self, out: RemoteOutput) -> Result<RemoteOutput, RepokeepError> {
        if out.status == Some(SSH_CONNECTION_FAILURE) {
            return Err(RepokeepError::RemoteUnreachable {
                host: self.host.clone(),
                detail: compact_line(&out.stderr, 240),
            });
        }
        Ok(out)
    }

    fn unreachable(&self, e: io::Error) -> RepokeepError {
        RepokeepError::RemoteUnreachable {
            host: self.host.clone(),
            detail: format!("cannot spawn ssh: {e}"),
        }
    }
}

impl RemoteChannel for SshChannel {
    fn host(&self) -> &str {
        &self.host
    }

    fn tunnel_command(&self) -> Option<String> {
        let mut line = String::from("ssh");
        for option in &self.options {
            line.push(' ');
            line.push_str(&shell_quote(option));
        }
        Some(line)
    }

    fn execute(&self, argv: &[&str]) -> Result<RemoteOutput, RepokeepError> {
        tracing::debug!(host = %self.host, command = %argv.join(" "), "remote execute");
        let output = self
            .command(argv)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.unreachable(e))?;
        self.check_transport(RemoteOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            streamed: 0,
        })
    }

    fn execute_to(
        &self,
        argv: &[&str],
        sink: &mut dyn Write,
    ) -> Result<RemoteOutput, RepokeepError> {
        tracing::debug!(host = %self.host, command = %argv.join(" "), "remote stream");
        let mut cmd = self.command(argv);
        let out = stream_command(&mut cmd, sink).map_err(|e| self.unreachable(e))?;
        self.check_transport(out)
    }
}

/// Runs commands on this machine. Used when the "remote" host is localhost.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalChannel;

impl RemoteChannel for LocalChannel {
    fn host(&self) -> &str {
        "localhost"
    }

    fn execute(&self, argv: &[&str]) -> Result<RemoteOutput, RepokeepError> {
        let (program, args) = split_argv(argv)?;
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RepokeepError::RemoteUnreachable {
                host: "localhost".to_string(),
                detail: format!("cannot spawn `{program}`: {e}"),
            })?;
        Ok(RemoteOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            streamed: 0,
        })
    }

    fn execute_to(
        &self,
        argv: &[&str],
        sink: &mut dyn Write,
    ) -> Result<RemoteOutput, RepokeepError> {
        let (program, args) = split_argv(argv)?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        stream_command(&mut cmd, sink).map_err(|e| RepokeepError::RemoteUnreachable {
            host: "localhost".to_string(),
            detail: format!("cannot run `{program}`: {e}"),
        })
    }
}

fn split_argv<'a>(argv: &'a [&'a str]) -> Result<(&'a str, &'a [&'a str]), RepokeepError> {
    argv.split_first()
        .map(|(program, args)| (*program, args))
        .ok_or_else(|| RepokeepError::Config("empty remote command".to_string()))
}

/// Spawns `cmd` and copies its stdout into `sink` until EOF.
fn stream_command(cmd: &mut Command, sink: &mut dyn Write) -> io::Result<RemoteOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr_handle = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    let copied = match child.stdout.take() {
        Some(mut stdout) => io::copy(&mut stdout, sink),
        None => Err(io::Error::other("remote stdout was not captured")),
    };
    if copied.is_err() {
        let _ = child.kill();
    }
    let status = child.wait()?;
    let stderr = stderr_handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default();
    let streamed = copied?;
    sink.flush()?;

    Ok(RemoteOutput {
        status: status.code(),
        stdout: Vec::new(),
        stderr,
        streamed,
    })
}

/// Joins argv into one POSIX shell command line for the remote side.
pub fn remote_command_line(argv: &[&str]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
