//! One-shot and streaming remote command execution
//!
//! All libssh2 calls are blocking and run on the tokio blocking pool. A
//! command holds its session's mutex for the duration, which is also what
//! keeps the pool from handing the same session to a second command.
//!
//! Each invocation carries a hard time ceiling; exceeding it closes the
//! channel and surfaces a timeout, which callers account as a command
//! failure.

use crate::pool::SharedSession;
use crate::process::ChannelHandle;
use fleetcp_types::{Error, Result};
use ssh2::Channel;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Poll interval while a non-blocking channel has nothing to read
const IDLE_POLL: Duration = Duration::from_millis(25);

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Decoded stdout
    pub stdout: String,
    /// Decoded stderr
    pub stderr: String,
    /// Exit status reported by the remote shell
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Map a nonzero exit to a command error carrying stderr
    pub fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            let message = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };
            Err(Error::command(self.exit_code, message))
        }
    }
}

/// Quote a value for a POSIX shell command line
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Executes commands over pooled sessions
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    command_timeout: Duration,
}

impl RemoteExecutor {
    /// Create an executor with the given per-command ceiling
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    /// Per-command ceiling
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Run a command to completion and capture its output
    pub async fn run(&self, session: SharedSession, command: String) -> Result<CommandOutput> {
        self.run_inner(session, command, None, None).await
    }

    /// Run a command under a registered channel handle, streaming stdout
    /// chunks to `on_chunk` as they arrive.
    ///
    /// The handle's cancel flag is polled by the read loop; when raised,
    /// the channel is closed and the command reports cancellation. The
    /// handle is marked finished on every exit path.
    pub async fn run_supervised<F>(
        &self,
        session: SharedSession,
        command: String,
        handle: ChannelHandle,
        on_chunk: F,
    ) -> Result<CommandOutput>
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.run_inner(session, command, Some(handle), Some(Box::new(on_chunk)))
            .await
    }

    async fn run_inner(
        &self,
        session: SharedSession,
        command: String,
        handle: Option<ChannelHandle>,
        on_chunk: Option<Box<dyn FnMut(&str) + Send>>,
    ) -> Result<CommandOutput> {
        let timeout = self.command_timeout;
        trace!("Executing remote command: {}", command);
        let result = tokio::task::spawn_blocking(move || {
            let outcome = exec_blocking(&session, &command, timeout, handle.as_ref(), on_chunk);
            if let Some(handle) = handle {
                handle.mark_finished();
            }
            outcome
        })
        .await
        .map_err(|e| Error::other(format!("Exec task failed: {}", e)))??;

        debug!("Remote command finished with exit {}", result.exit_code);
        Ok(result)
    }
}

fn exec_blocking(
    session: &SharedSession,
    command: &str,
    timeout: Duration,
    handle: Option<&ChannelHandle>,
    on_chunk: Option<Box<dyn FnMut(&str) + Send>>,
) -> Result<CommandOutput> {
    let guard = session.lock().unwrap_or_else(|e| e.into_inner());

    let mut channel = guard
        .channel_session()
        .map_err(|e| Error::other(format!("channel open: {}", e)))?;
    channel
        .exec(command)
        .map_err(|e| Error::other(format!("exec: {}", e)))?;

    guard.set_blocking(false);
    let outcome = pump_channel(&mut channel, timeout, handle, on_chunk);
    // The session goes back into the pool; leave it in blocking mode.
    guard.set_blocking(true);

    match outcome {
        Ok((stdout, stderr)) => {
            channel.close().ok();
            channel
                .wait_close()
                .map_err(|e| Error::other(format!("wait_close: {}", e)))?;
            let exit_code = channel
                .exit_status()
                .map_err(|e| Error::other(format!("exit_status: {}", e)))?;
            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code,
            })
        }
        Err(err) => {
            channel.close().ok();
            Err(err)
        }
    }
}

/// Drain stdout and stderr until EOF, cancellation, or the time ceiling.
fn pump_channel(
    channel: &mut Channel,
    timeout: Duration,
    handle: Option<&ChannelHandle>,
    mut on_chunk: Option<Box<dyn FnMut(&str) + Send>>,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let started = Instant::now();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let mut progressed = false;

        match channel.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stdout.extend_from_slice(&buf[..n]);
                if let Some(cb) = on_chunk.as_mut() {
                    cb(&String::from_utf8_lossy(&buf[..n]));
                }
                progressed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::other(format!("channel read: {}", e))),
        }

        match channel.stderr().read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(Error::other(format!("channel stderr read: {}", e))),
        }

        if channel.eof() && !progressed {
            return Ok((stdout, stderr));
        }

        if handle.is_some_and(ChannelHandle::is_cancel_requested) {
            return Err(Error::Cancelled);
        }

        if started.elapsed() > timeout {
            return Err(Error::timeout(timeout.as_secs()));
        }

        if !progressed {
            std::thread::sleep(IDLE_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain_values_untouched() {
        assert_eq!(shell_quote("/srv/data/file.txt"), "/srv/data/file.txt");
        assert_eq!(shell_quote("v1.2-rc3"), "v1.2-rc3");
    }

    #[test]
    fn test_shell_quote_wraps_specials() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("x$(rm)"), "'x$(rm)'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_command_output_into_result() {
        let ok = CommandOutput {
            stdout: "done".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(ok.into_result().is_ok());

        let failed = CommandOutput {
            stdout: String::new(),
            stderr: "rsync: connection refused".to_string(),
            exit_code: 255,
        };
        let err = failed.into_result().unwrap_err();
        assert!(matches!(
            err,
            Error::Command {
                exit_code: 255,
                ..
            }
        ));
    }
}
