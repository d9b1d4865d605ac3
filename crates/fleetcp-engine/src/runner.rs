//! Launches built commands locally or remotely and supervises them
//!
//! Every launched unit registers in the process registry under its
//! (transfer, part) key before any output is read, so cancellation and the
//! watchdog always see it. Local children go into their own process group
//! so termination reaches the whole pipeline.

use crate::command::CommandRun;
use crate::hosts::HostRegistry;
use crate::transfer::CancelToken;
use fleetcp_remote::{
    ChannelHandle, CommandOutput, ProcessHandle, ProcessRegistry, RemoteExecutor, SessionPool,
    SubprocessHandle,
};
use fleetcp_types::{Error, PartId, Result, TransferId};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

/// Runs one command at a time per call, wherever it needs to run
#[derive(Debug, Clone)]
pub struct CommandRunner {
    hosts: Arc<HostRegistry>,
    pool: Arc<SessionPool>,
    registry: Arc<ProcessRegistry>,
    executor: RemoteExecutor,
    command_timeout: Duration,
}

impl CommandRunner {
    /// Create a runner over the shared services
    pub fn new(
        hosts: Arc<HostRegistry>,
        pool: Arc<SessionPool>,
        registry: Arc<ProcessRegistry>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            hosts,
            pool,
            registry,
            executor: RemoteExecutor::new(command_timeout),
            command_timeout,
        }
    }

    /// Run a command to completion, streaming stdout chunks to `on_chunk`.
    ///
    /// Returns the captured output; a nonzero exit is still `Ok` here so
    /// callers can inspect stderr before classifying the failure.
    pub async fn run<F>(
        &self,
        transfer: TransferId,
        part: PartId,
        run: CommandRun,
        cancel: &CancelToken,
        on_chunk: F,
    ) -> Result<CommandOutput>
    where
        F: FnMut(&str) + Send + 'static,
    {
        match run {
            CommandRun::NoOp => Ok(CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            }),
            CommandRun::Local(argv) => {
                self.run_local(transfer, part, argv, cancel, on_chunk).await
            }
            CommandRun::Remote { host, command } => {
                self.run_remote(transfer, part, host, command, cancel, on_chunk)
                    .await
            }
        }
    }

    async fn run_local<F>(
        &self,
        transfer: TransferId,
        part: PartId,
        argv: Vec<String>,
        cancel: &CancelToken,
        mut on_chunk: F,
    ) -> Result<CommandOutput>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::validation("empty command"))?;
        trace!("Spawning local command: {:?}", argv);

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| Error::other(format!("spawn {}: {}", program, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::other("child exited before registration"))?;
        let handle = SubprocessHandle::new(pid);
        self.registry
            .register(transfer, part.clone(), ProcessHandle::Subprocess(handle.clone()));

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::other("child stdout not captured"))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| Error::other("child stderr not captured"))?;

        let stdout_task = tokio::spawn(async move {
            let mut collected = String::new();
            let mut buf = [0u8; 8192];
            while let Ok(n) = stdout_pipe.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                on_chunk(&chunk);
                collected.push_str(&chunk);
            }
            collected
        });
        let stderr_task = tokio::spawn(async move {
            let mut collected = Vec::new();
            let mut buf = [0u8; 8192];
            while let Ok(n) = stderr_pipe.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                collected.extend_from_slice(&buf[..n]);
            }
            String::from_utf8_lossy(&collected).into_owned()
        });

        let outcome = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| Error::other(format!("wait: {}", e)))
            }
            () = cancel.cancelled() => {
                handle.terminate(false).await;
                let _ = child.wait().await;
                handle.mark_finished();
                self.registry.finalize_part(transfer, &part);
                return Err(Error::Cancelled);
            }
            () = tokio::time::sleep(self.command_timeout) => {
                handle.terminate(true).await;
                let _ = child.wait().await;
                handle.mark_finished();
                self.registry.finalize_part(transfer, &part);
                return Err(Error::timeout(self.command_timeout.as_secs()));
            }
        };
        handle.mark_finished();
        self.registry.finalize_part(transfer, &part);

        let status = outcome?;
        let stdout = stdout_task
            .await
            .map_err(|e| Error::other(format!("stdout task: {}", e)))?;
        let stderr = stderr_task
            .await
            .map_err(|e| Error::other(format!("stderr task: {}", e)))?;
        let exit_code = status.code().unwrap_or(-1);
        debug!("Local command exited {}: {}", exit_code, program);
        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn run_remote<F>(
        &self,
        transfer: TransferId,
        part: PartId,
        host: String,
        command: String,
        cancel: &CancelToken,
        on_chunk: F,
    ) -> Result<CommandOutput>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let server = self
            .hosts
            .find(&host)
            .cloned()
            .ok_or_else(|| Error::validation(format!("unknown host: {}", host)))?;
        let session = self.pool.acquire(&server).await?;

        let handle = ChannelHandle::new();
        self.registry.register(
            transfer,
            part.clone(),
            ProcessHandle::RemoteChannel(handle.clone()),
        );

        // Bridge the transfer's cancel token to the channel's cooperative
        // cancel flag for as long as the command runs.
        let bridge = {
            let cancel = cancel.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                handle.request_cancel();
            })
        };

        let result = self
            .executor
            .run_supervised(session, command, handle, on_chunk)
            .await;
        bridge.abort();
        self.registry.finalize_part(transfer, &part);
        result
    }
}
