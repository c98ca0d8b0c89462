//! `CommandRunner` backed by `tokio::process`.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;

use crate::ports::CommandRunner;

/// Spawns real processes and kills them when their timeout fires, so a
/// stuck `systemctl` or `ping` cannot stall the monitor loop.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TokioCommandRunner;

impl TokioCommandRunner {
    async fn collect(mut child: Child, program: &str, timeout: Duration) -> Result<Output> {
        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                Ok(Output {
                    status: status.with_context(|| format!("waiting for {program}"))?,
                    stdout,
                    stderr,
                })
            } => result,
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                anyhow::bail!("{program} timed out after {}s", timeout.as_secs())
            }
        }
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        Self::collect(child, program, timeout).await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        if let Some(mut handle) = child.stdin.take() {
            handle
                .write_all(stdin)
                .await
                .with_context(|| format!("writing stdin of {program}"))?;
            // Dropping the handle closes the pipe so the child sees EOF.
        }
        Self::collect(child, program, timeout).await
    }
}
