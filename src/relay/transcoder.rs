use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One transcoding subprocess bundled with its log drain. The drain
/// task keeps stdout/stderr flowing so the process can never stall on
/// a full pipe, and it is cancelled as part of teardown rather than
/// left to exit on EOF.
pub(crate) struct Transcoder {
    child: Child,
    stdin: Option<ChildStdin>,
    drain: JoinHandle<()>,
}

impl Transcoder {
    pub async fn launch(program: &str, args: &[String], tag: &str) -> anyhow::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("transcoder stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("transcoder stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("transcoder stderr unavailable"))?;

        let out_tag = tag.to_string();
        let err_tag = tag.to_string();
        let drain = tokio::spawn(async move {
            let stdout_lines = async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("transcoder [{}]: {}", out_tag, line);
                }
            };
            let stderr_lines = async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.contains("error") || line.contains("Error") {
                        error!("transcoder [{}]: {}", err_tag, line);
                    } else {
                        debug!("transcoder [{}]: {}", err_tag, line);
                    }
                }
            };
            tokio::join!(stdout_lines, stderr_lines);
        });

        Ok(Transcoder {
            child,
            stdin: Some(stdin),
            drain,
        })
    }

    /// Forward one frame to the subprocess, in arrival order.
    pub async fn write(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        if let Ok(Some(status)) = self.child.try_wait() {
            anyhow::bail!("transcoder exited: {}", status);
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("transcoder input already closed"))?;
        stdin.write_all(frame).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close input to signal end-of-stream, give the process a grace
    /// period to flush to the streaming server, then force-kill.
    pub async fn shutdown(mut self, grace: Duration) {
        drop(self.stdin.take());
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => info!("transcoder exited: {}", status),
            Ok(Err(err)) => warn!("transcoder wait error: {}", err),
            Err(_) => {
                warn!("transcoder did not exit within grace period, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
        self.drain.abort();
    }

    /// Immediate termination, no grace period.
    pub async fn kill(mut self) {
        drop(self.stdin.take());
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.drain.abort();
    }
}
