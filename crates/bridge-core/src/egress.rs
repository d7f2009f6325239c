//! Egress process supervision
//!
//! One external process per active session reads the session-description
//! file and republishes the bridged stream. Its output is scanned line by
//! line for a ready marker; its exit is reported back to the manager, which
//! treats an exit it did not ask for like a client disconnect.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::EgressConfig;
use crate::errors::{BridgeError, Result};

/// How an egress process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// The stop was requested by the orchestrator
    pub expected: bool,
    /// The process ignored the interrupt and was killed
    pub forced: bool,
}

impl ExitReport {
    fn from_status(status: ExitStatus, expected: bool, forced: bool) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            expected,
            forced,
        }
    }

    /// Exit code 0 without a signal; anything else may have left a
    /// truncated recording or stream behind
    pub fn is_clean(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// Exit notification delivered to the manager
#[derive(Debug, Clone)]
pub struct EgressExit {
    pub session_id: String,
    pub report: ExitReport,
}

/// Serializable view of a running egress process
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressSnapshot {
    pub pid: Option<u32>,
    pub program: String,
    pub target_url: String,
    pub sdp_path: PathBuf,
    pub ready: bool,
    pub started_at: DateTime<Utc>,
}

/// Handle to one supervised egress process
#[derive(Debug)]
pub struct EgressProcess {
    session_id: String,
    pid: Option<u32>,
    program: String,
    target_url: String,
    sdp_path: PathBuf,
    started_at: DateTime<Utc>,
    ready: Arc<AtomicBool>,
    ready_rx: watch::Receiver<bool>,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: Option<JoinHandle<Option<ExitReport>>>,
}

impl EgressProcess {
    /// Spawn the configured program for `sdp_path`. Exits are reported on
    /// `exits`.
    pub fn spawn(
        config: &EgressConfig,
        session_id: &str,
        sdp_path: &Path,
        exits: mpsc::UnboundedSender<EgressExit>,
    ) -> Result<Self> {
        let args = config.render_args(sdp_path);
        tracing::info!("Starting egress for session {}: {} {}", session_id, config.program, args.join(" "));

        let mut command = Command::new(&config.program);
        command
            .args(&args)
            // Config keys arrive case-folded; variables like GST_DEBUG are upper case
            .envs(config.env.iter().map(|(k, v)| (k.to_uppercase(), v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| BridgeError::egress(session_id, format!("failed to spawn {}: {}", config.program, e)))?;
        let pid = child.id();

        let ready = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = watch::channel(false);
        let watcher = ReadyWatcher {
            session_id: session_id.to_string(),
            marker: config.ready_marker.clone(),
            settle: config.settle_delay(),
            seen: Arc::new(AtomicBool::new(false)),
            ready: ready.clone(),
            ready_tx: Arc::new(ready_tx),
        };

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(watcher.clone().scan(stdout, "stdout")));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(watcher.scan(stderr, "stderr")));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            child,
            session_id.to_string(),
            config.stop_timeout(),
            stop_rx,
            readers,
            exits,
        ));

        tracing::debug!("Egress for session {} running as pid {:?}", session_id, pid);

        Ok(Self {
            session_id: session_id.to_string(),
            pid,
            program: config.program.clone(),
            target_url: config.target_url.clone(),
            sdp_path: sdp_path.to_path_buf(),
            started_at: Utc::now(),
            ready,
            ready_rx,
            stop_tx: Some(stop_tx),
            monitor: Some(monitor),
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// The ready marker was seen and the settle delay has passed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Wait until ready, up to `timeout`. False if the process exited or
    /// the timeout passed first.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready_rx.clone();
        matches!(tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await, Ok(Ok(_)))
    }

    pub fn snapshot(&self) -> EgressSnapshot {
        EgressSnapshot {
            pid: self.pid,
            program: self.program.clone(),
            target_url: self.target_url.clone(),
            sdp_path: self.sdp_path.clone(),
            ready: self.is_ready(),
            started_at: self.started_at,
        }
    }

    /// Interrupt the process and wait for it to exit. Returns `None` if the
    /// exit could not be observed.
    pub async fn stop(mut self) -> Option<ExitReport> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // Fails when the process is already gone; the monitor has the report
            let _ = stop_tx.send(());
        }
        let monitor = self.monitor.take()?;
        match monitor.await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Egress monitor for session {} failed: {}", self.session_id, e);
                None
            }
        }
    }
}

impl Drop for EgressProcess {
    fn drop(&mut self) {
        // The monitor sees the closed channel and stops the process
        if self.monitor.is_some() {
            tracing::debug!("Egress handle for session {} dropped without stop", self.session_id);
        }
    }
}

#[derive(Debug, Clone)]
struct ReadyWatcher {
    session_id: String,
    marker: String,
    settle: Duration,
    seen: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    ready_tx: Arc<watch::Sender<bool>>,
}

impl ReadyWatcher {
    async fn scan<R>(self, stream: R, name: &'static str)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(session_id = %self.session_id, "egress {}: {}", name, line);
                    if !self.marker.is_empty() && line.contains(&self.marker) && !self.seen.swap(true, Ordering::SeqCst)
                    {
                        self.arm();
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Egress {} of session {} unreadable: {}", name, self.session_id, e);
                    break;
                }
            }
        }
    }

    /// Settle delay absorbs startup jitter after the marker line
    fn arm(&self) {
        let watcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(watcher.settle).await;
            watcher.ready.store(true, Ordering::SeqCst);
            let _ = watcher.ready_tx.send(true);
            tracing::info!("Egress for session {} is live", watcher.session_id);
        });
    }
}

async fn monitor(
    mut child: Child,
    session_id: String,
    stop_timeout: Duration,
    stop_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    exits: mpsc::UnboundedSender<EgressExit>,
) -> Option<ExitReport> {
    let outcome = tokio::select! {
        status = child.wait() => status.map(|s| ExitReport::from_status(s, false, false)),
        _ = stop_rx => graceful_stop(&mut child, &session_id, stop_timeout).await,
    };

    for reader in readers {
        reader.abort();
    }

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Lost track of egress process for session {}: {}", session_id, e);
            return None;
        }
    };

    if report.is_clean() {
        tracing::info!("Egress for session {} exited cleanly", session_id);
    } else {
        tracing::warn!(
            "Egress for session {} exited with code {:?} signal {:?}, output may be corrupt",
            session_id,
            report.code,
            report.signal
        );
    }

    let _ = exits.send(EgressExit {
        session_id,
        report,
    });
    Some(report)
}

/// Interrupt, wait up to `stop_timeout`, then kill
async fn graceful_stop(child: &mut Child, session_id: &str, stop_timeout: Duration) -> std::io::Result<ExitReport> {
    interrupt(child, session_id);
    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(status) => Ok(ExitReport::from_status(status?, true, false)),
        Err(_) => {
            tracing::warn!(
                "Egress for session {} ignored interrupt for {:?}, killing",
                session_id,
                stop_timeout
            );
            child.kill().await?;
            let status = child.wait().await?;
            Ok(ExitReport::from_status(status, true, true))
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &Child, session_id: &str) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            tracing::warn!("Failed to interrupt egress for session {}: {}", session_id, e);
        }
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child, session_id: &str) {
    tracing::debug!("No interrupt signal on this platform, egress for {} will be killed", session_id);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn script(body: &str) -> EgressConfig {
        EgressConfig {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), body.to_string(), "egress".to_string(), "{sdp}".to_string()],
            env: BTreeMap::new(),
            target_url: "rtmp://127.0.0.1/live/test".to_string(),
            ready_marker: "PLAYING".to_string(),
            settle_delay_ms: 50,
            stop_timeout_ms: 500,
            sdp_dir: None,
        }
    }

    #[tokio::test]
    async fn test_marker_sets_ready_after_settle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = script("echo starting; echo 'Setting pipeline to PLAYING' >&2; sleep 5");
        let egress = EgressProcess::spawn(&config, "s1", Path::new("/tmp/x.sdp"), tx).unwrap();

        assert!(!egress.is_ready());
        assert!(egress.wait_ready(Duration::from_secs(3)).await);
        assert!(egress.is_ready());
        assert!(egress.snapshot().ready);

        let report = egress.stop().await.unwrap();
        assert!(report.expected);
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = script("exit 3");
        let _egress = EgressProcess::spawn(&config, "s2", Path::new("/tmp/x.sdp"), tx).unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await.unwrap().unwrap();
        assert_eq!(exit.session_id, "s2");
        assert_eq!(exit.report.code, Some(3));
        assert!(!exit.report.expected);
        assert!(!exit.report.is_clean());
    }

    #[tokio::test]
    async fn test_interrupt_lets_process_exit_cleanly() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = script("trap 'exit 0' INT; while true; do sleep 0.05; done");
        let egress = EgressProcess::spawn(&config, "s3", Path::new("/tmp/x.sdp"), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = egress.stop().await.unwrap();
        assert!(report.is_clean());
        assert!(!report.forced);
    }

    #[tokio::test]
    async fn test_stubborn_process_is_killed() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = script("trap '' INT; while true; do sleep 0.05; done");
        let egress = EgressProcess::spawn(&config, "s4", Path::new("/tmp/x.sdp"), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let report = egress.stop().await.unwrap();
        assert!(report.forced);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = script("true");
        config.program = "/nonexistent/egress-binary".to_string();
        let err = EgressProcess::spawn(&config, "s5", Path::new("/tmp/x.sdp"), tx).unwrap_err();
        assert!(matches!(err, BridgeError::EgressProcess { .. }));
    }
}
