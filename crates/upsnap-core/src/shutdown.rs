//! Remote shutdown.
//!
//! Devices are shut down with the owner-supplied [`ShutdownMethod`]:
//!
//! - `ssh`: the system OpenSSH client in batch mode (key-based auth only,
//!   never prompts), running a command such as `sudo shutdown -h now`.
//! - `command`: an arbitrary local shell command, for targets that speak
//!   something other than SSH (`net rpc shutdown`, IPMI tools, ...).
//!
//! # Failure Classification
//!
//! | Outcome | Error |
//! |---------|-------|
//! | exit 0 | success |
//! | ssh exit 255, auth message on stderr | [`Error::Auth`] |
//! | ssh exit 255, anything else | [`Error::Connect`] |
//! | session exceeds the timeout | [`Error::Connect`] |
//! | any other non-zero exit | [`Error::Command`] |
//!
//! Nothing is retried; the caller reports the error to the operator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use upsnap_types::{Device, ShutdownMethod};

use crate::error::{Error, Result};

/// Default time allowed for a whole shutdown session.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Exit status the OpenSSH client uses for its own (non-remote) failures.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Stderr fragments that mean the credentials were rejected.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "too many authentication failures",
    "host key verification failed",
    "no supported authentication methods",
];

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs a program to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

#[async_trait]
impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        (**self).run(program, args).await
    }
}

/// Runs commands as child processes. Children are killed if the run is
/// dropped, so a timed-out session leaves nothing behind.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::config(format!("'{program}' was not found in PATH"))
                }
                _ => Error::Io(e),
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Issues shutdown instructions to devices.
#[derive(Debug, Clone)]
pub struct ShutdownDispatcher<R = ProcessRunner> {
    runner: R,
    timeout: Duration,
}

impl ShutdownDispatcher<ProcessRunner> {
    /// Create a dispatcher that spawns real processes.
    pub fn new(timeout: Duration) -> Self {
        Self::with_runner(ProcessRunner, timeout)
    }
}

impl<R: CommandRunner> ShutdownDispatcher<R> {
    /// Create a dispatcher with a custom runner.
    pub fn with_runner(runner: R, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Access the runner.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Session timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Shut `device` down using its configured method.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the device has no shutdown method or it is incomplete
    /// - [`Error::InvalidAddress`] if the device address is unusable
    /// - [`Error::Connect`], [`Error::Auth`], [`Error::Command`] as classified above
    pub async fn shutdown(&self, device: &Device) -> Result<()> {
        let method = device.shutdown.as_ref().ok_or_else(|| {
            Error::config(format!(
                "device '{}' has no shutdown method configured",
                device.name
            ))
        })?;

        let (program, args) = build_invocation(&device.ip, method, self.timeout)?;
        debug!("Shutting down {} with {} {:?}", device.name, program, args);

        let output = match timeout(self.timeout, self.runner.run(program, &args)).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("Shutdown session to {} timed out", device.ip);
                return Err(Error::connect(
                    &device.ip,
                    format!("session timed out after {:?}", self.timeout),
                ));
            }
        };

        match classify(method, &device.ip, output) {
            Ok(()) => {
                info!("Shutdown issued to {} ({})", device.name, device.ip);
                Ok(())
            }
            Err(e) => {
                warn!("Shutdown of {} failed: {}", device.name, e);
                Err(e)
            }
        }
    }
}

/// Build the program and arguments for a shutdown method.
fn build_invocation(
    host: &str,
    method: &ShutdownMethod,
    session_timeout: Duration,
) -> Result<(&'static str, Vec<String>)> {
    match method {
        ShutdownMethod::Ssh {
            user,
            port,
            identity_file,
            command,
        } => {
            if host.is_empty() || host.starts_with('-') || host.contains(char::is_whitespace) {
                return Err(Error::invalid_address(format!("unusable host '{host}'")));
            }
            if user.is_empty() || user.starts_with('-') || user.contains(['@', ' ']) {
                return Err(Error::config(format!("invalid SSH user '{user}'")));
            }
            if command.trim().is_empty() {
                return Err(Error::config("SSH shutdown command is empty"));
            }

            let connect_timeout = session_timeout.as_secs().clamp(1, 30);
            let mut args = vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                format!("ConnectTimeout={connect_timeout}"),
                "-o".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
                "-p".to_string(),
                port.to_string(),
            ];
            if let Some(identity) = identity_file {
                args.push("-i".to_string());
                args.push(identity.clone());
            }
            args.push(format!("{user}@{host}"));
            args.push(command.clone());
            Ok(("ssh", args))
        }
        ShutdownMethod::Command { command } => {
            if command.trim().is_empty() {
                return Err(Error::config("shutdown command is empty"));
            }
            if cfg!(windows) {
                Ok(("cmd", vec!["/C".to_string(), command.clone()]))
            } else {
                Ok(("sh", vec!["-c".to_string(), command.clone()]))
            }
        }
    }
}

/// Map a finished session to the error taxonomy.
fn classify(method: &ShutdownMethod, host: &str, output: CommandOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }

    let is_ssh = matches!(method, ShutdownMethod::Ssh { .. });
    if is_ssh && output.status == Some(SSH_CLIENT_FAILURE) {
        let stderr = output.stderr.to_lowercase();
        if AUTH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(Error::Auth {
                host: host.to_string(),
                reason: output.stderr,
            });
        }
        return Err(Error::connect(host, output.stderr));
    }

    Err(Error::Command {
        host: host.to_string(),
        status: output.status,
        stderr: output.stderr,
    })
}
