use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::TranscodeError;

/// Transcoder output is noisy; only lines carrying these markers reach the
/// server log.
static STDERR_FILTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error|fail").unwrap());

/// Where a supervised transcoder is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Running,
    /// Exit code, or `None` when terminated by signal.
    Exited(Option<i32>),
}

/// Outcome of waiting for the master playlist to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    StartupFailed(Option<i32>),
    TimedOut,
}

/// A running transcoder.
///
/// The child is owned by a waiter task that publishes the exit code on a
/// watch channel and listens for the kill signal; dropping the handle closes
/// the signal channel, which also kills the child.
#[derive(Debug)]
pub struct TranscoderHandle {
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<ExitState>,
    waiter: JoinHandle<()>,
}

impl TranscoderHandle {
    pub fn exit_state(&self) -> ExitState {
        *self.exit_rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.exit_state(), ExitState::Running)
    }

    /// Kill the transcoder and wait until the process is reaped.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.waiter.await;
    }
}

/// Spawn the transcoder with prepared arguments.
pub fn spawn(program: &Path, args: &[String]) -> Result<TranscoderHandle, TranscodeError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TranscodeError::SpawnFailed(format!("{}: {e}", program.display())))?;

    info!(program = %program.display(), ?args, "spawned transcoder");

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(tail_stderr(stderr));
    }

    let (kill_tx, kill_rx) = oneshot::channel();
    let (exit_tx, exit_rx) = watch::channel(ExitState::Running);
    let waiter = tokio::spawn(supervise(child, kill_rx, exit_tx));

    Ok(TranscoderHandle {
        kill_tx: Some(kill_tx),
        exit_rx,
        waiter,
    })
}

async fn supervise(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<ExitState>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // fires on an explicit kill or when the handle is dropped
        _ = &mut kill_rx => {
            let _ = child.start_kill();
            child.wait().await
        }
    };
    match status {
        Ok(status) => {
            if status.success() {
                info!("transcoder completed");
            } else {
                warn!(code = ?status.code(), "transcoder exited abnormally");
            }
            let _ = exit_tx.send(ExitState::Exited(status.code()));
        }
        Err(e) => {
            warn!(error = %e, "failed waiting for transcoder");
            let _ = exit_tx.send(ExitState::Exited(None));
        }
    }
}

async fn tail_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if STDERR_FILTER.is_match(&line) {
            warn!(target: "transcoder", "{line}");
        }
    }
}

/// Poll for the master playlist until it appears, the transcoder dies, or
/// the deadline passes. The playlist is checked before the exit state so a
/// transcoder that finished a short source still counts as ready.
pub async fn wait_until_ready(
    handle: &TranscoderHandle,
    master_playlist: &Path,
    poll_interval: Duration,
    deadline: Duration,
) -> Readiness {
    let started = tokio::time::Instant::now();
    loop {
        if master_playlist.exists() {
            return Readiness::Ready;
        }
        if let ExitState::Exited(code) = handle.exit_state() {
            return Readiness::StartupFailed(code);
        }
        if started.elapsed() >= deadline {
            return Readiness::TimedOut;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> TranscoderHandle {
        spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), script.to_string()],
        )
        .unwrap()
    }

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sg_sup_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn playlist_appearance_means_ready() {
        let dir = scratch("ready");
        let master = dir.join("main.m3u8");
        let handle = sh("sleep 5");

        std::fs::write(&master, "#EXTM3U\n").unwrap();
        let readiness = wait_until_ready(
            &handle,
            &master,
            Duration::from_millis(20),
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(readiness, Readiness::Ready);
        assert!(handle.is_running());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn early_exit_reports_startup_failure() {
        let dir = scratch("fail");
        let handle = sh("exit 7");
        let readiness = wait_until_ready(
            &handle,
            &dir.join("main.m3u8"),
            Duration::from_millis(20),
            Duration::from_secs(2),
        )
        .await;
        assert_eq!(readiness, Readiness::StartupFailed(Some(7)));
    }

    #[tokio::test]
    async fn deadline_expiry_times_out() {
        let dir = scratch("timeout");
        let handle = sh("sleep 5");
        let readiness = wait_until_ready(
            &handle,
            &dir.join("main.m3u8"),
            Duration::from_millis(20),
            Duration::from_millis(150),
        )
        .await;
        assert_eq!(readiness, Readiness::TimedOut);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_reaps_the_child() {
        let handle = sh("sleep 30");
        assert!(handle.is_running());
        let mut exit_rx = handle.exit_rx.clone();
        handle.shutdown().await;
        // the waiter has published a terminal state by the time shutdown returns
        assert!(matches!(*exit_rx.borrow_and_update(), ExitState::Exited(_)));
    }
}
