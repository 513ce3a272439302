use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::args::{self, MASTER_PLAYLIST};
use crate::device::DeviceClass;
use crate::hls;
use crate::probe::{self, AudioTrack, ProbeReport};
use crate::strategy::{self, Mode, ModeKind};
use crate::supervisor::{self, ExitState, Readiness, TranscoderHandle};
use crate::{EngineConfig, TranscodeError};

/// One gateway session, keyed by the client-chosen ID.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Directory owned by this session: `<hls_root>/<id>`.
    pub dir: PathBuf,
    pub source_url: Option<String>,
    pub mode: Option<ModeKind>,
    pub last_heartbeat: Instant,
    /// Once set, every later start in this session skips pass-through.
    pub force_transcode: bool,
    transcoder: Option<TranscoderHandle>,
    /// Set by eviction while stale references may still exist; readers treat
    /// an evicted session as gone.
    evicted: bool,
}

impl Session {
    fn new(id: &str, dir: PathBuf) -> Self {
        Self {
            id: id.to_string(),
            dir,
            source_url: None,
            mode: None,
            last_heartbeat: Instant::now(),
            force_transcode: false,
            transcoder: None,
            evicted: false,
        }
    }

    pub fn master_playlist_path(&self) -> PathBuf {
        self.dir.join(MASTER_PLAYLIST)
    }

    pub fn has_transcoder(&self) -> bool {
        self.transcoder.is_some()
    }

    fn is_idle(&self, timeout: std::time::Duration) -> bool {
        self.last_heartbeat.elapsed() > timeout
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Result of a `start` call, reported back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    pub resumed: bool,
    pub mode: ModeKind,
}

/// Heartbeat response payload.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub encoded_duration: f64,
    pub live_edge_time: f64,
}

/// The streaming session engine: the only shared mutable state in the
/// gateway. The map mutex is held briefly; long operations run under the
/// per-session mutex only.
pub struct SessionEngine {
    config: EngineConfig,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Wipe and recreate the HLS root. Sessions from a previous process do
    /// not survive a restart.
    pub async fn reset_root(&self) -> Result<(), TranscodeError> {
        match tokio::fs::remove_dir_all(&self.config.hls_root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.config.hls_root).await?;
        Ok(())
    }

    /// Probe a source within the configured response budget.
    pub async fn probe_source(&self, url: &str) -> Result<ProbeReport, TranscodeError> {
        match tokio::time::timeout(self.config.probe_timeout, probe::probe(&self.config, url))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TranscodeError::ProbeFailed(format!(
                "inspector exceeded {:?}",
                self.config.probe_timeout
            ))),
        }
    }

    pub async fn lookup(&self, id: &str) -> Option<SharedSession> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Return the session for `id`, creating it (and its directory) on first
    /// use. Session IDs become path components, so anything that could
    /// escape the HLS root is rejected.
    pub async fn get_or_create(&self, id: &str) -> Result<SharedSession, TranscodeError> {
        validate_session_id(id)?;
        loop {
            match self.lookup(id).await {
                Some(shared) => {
                    if !shared.lock().await.evicted {
                        return Ok(shared);
                    }
                    // raced with eviction: drop the stale entry, start over
                    self.unregister(id, &shared).await;
                }
                None => {
                    let dir = self.config.hls_root.join(id);
                    tokio::fs::create_dir_all(&dir).await?;
                    let created: SharedSession = Arc::new(Mutex::new(Session::new(id, dir)));
                    let mut map = self.sessions.lock().await;
                    let entry = map.entry(id.to_string()).or_insert(created).clone();
                    return Ok(entry);
                }
            }
        }
    }

    /// Handle a `start` request. Linearized per session: the per-session
    /// lock is held from the first mutation through readiness, so two starts
    /// for one session observe each other in arrival order.
    pub async fn start(
        &self,
        id: &str,
        url: &str,
        device: DeviceClass,
        force_transcode: bool,
        user_agent: &str,
    ) -> Result<StartOutcome, TranscodeError> {
        let mut session = loop {
            let shared = self.get_or_create(id).await?;
            let guard = shared.clone().lock_owned().await;
            if !guard.evicted {
                break guard;
            }
        };

        if force_transcode {
            session.force_transcode = true;
        }

        if session.source_url.as_deref() == Some(url) {
            if let Some(handle) = &session.transcoder {
                if handle.is_running() {
                    return Ok(StartOutcome {
                        resumed: true,
                        mode: session.mode.unwrap_or(ModeKind::FullTranscode),
                    });
                }
                info!(session_id = %id, "transcoder died since readiness; restarting");
            }
        }

        // a new source or a dead transcoder: clear the old handle before
        // anything else so a failure below leaves the session idle
        if let Some(handle) = session.transcoder.take() {
            handle.shutdown().await;
        }
        session.source_url = Some(url.to_string());
        session.mode = None;

        let report = match self.probe_source(url).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(session_id = %id, error = %e, "probe failed; assuming full transcode");
                None
            }
        };

        let mode = strategy::select(report.as_ref(), device, session.force_transcode);
        if let Mode::NativeDirect = mode {
            session.mode = Some(ModeKind::NativeDirect);
            info!(session_id = %id, "source is natively playable; proxying");
            return Ok(StartOutcome {
                resumed: false,
                mode: ModeKind::NativeDirect,
            });
        }

        let tracks: Vec<AudioTrack> = report
            .as_ref()
            .map(|r| r.audio.clone())
            .unwrap_or_default();

        match self.run_transcoder(&mut session, url, &mode, &tracks, user_agent).await {
            Ok(()) => {
                session.mode = Some(mode.kind());
                Ok(StartOutcome {
                    resumed: false,
                    mode: mode.kind(),
                })
            }
            Err(e) if mode.is_speculative() => {
                warn!(
                    session_id = %id,
                    mode = %mode.kind(),
                    error = %e,
                    "speculative mode failed; falling back to full transcode"
                );
                session.force_transcode = true;
                let fallback = strategy::select(report.as_ref(), device, true);
                self.run_transcoder(&mut session, url, &fallback, &tracks, user_agent)
                    .await?;
                session.mode = Some(fallback.kind());
                Ok(StartOutcome {
                    resumed: false,
                    mode: fallback.kind(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Spawn the transcoder for `mode` and wait for its master playlist.
    async fn run_transcoder(
        &self,
        session: &mut Session,
        url: &str,
        mode: &Mode,
        tracks: &[AudioTrack],
        user_agent: &str,
    ) -> Result<(), TranscodeError> {
        let master = session.master_playlist_path();
        // a playlist left by a previous run must not satisfy the poll
        match tokio::fs::remove_file(&master).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let cmd_args = args::build_args(
            url,
            user_agent,
            mode,
            tracks,
            &session.dir,
            self.config.segment_secs,
        );
        let handle = supervisor::spawn(&self.config.ffmpeg_path, &cmd_args)?;

        let deadline = if mode.is_speculative() {
            self.config.ready_timeout_speculative
        } else {
            self.config.ready_timeout_full
        };
        let readiness = supervisor::wait_until_ready(
            &handle,
            &master,
            self.config.ready_poll_interval,
            deadline,
        )
        .await;

        match readiness {
            Readiness::Ready => {
                info!(session_id = %session.id, mode = %mode.kind(), "transcoder ready");
                session.transcoder = Some(handle);
                Ok(())
            }
            Readiness::StartupFailed(code) => {
                handle.shutdown().await;
                Err(TranscodeError::StartupFailed { code })
            }
            Readiness::TimedOut => {
                handle.shutdown().await;
                Err(TranscodeError::ReadyTimeout(deadline))
            }
        }
    }

    /// Update the heartbeat and report encoding progress. `None` means the
    /// session does not exist (or was evicted underneath the caller).
    pub async fn ping(&self, id: &str) -> Option<SessionProgress> {
        let shared = self.lookup(id).await?;
        let mut session = shared.lock().await;
        if session.evicted {
            return None;
        }
        session.last_heartbeat = Instant::now();

        // observe a transcoder that died after readiness; the next start respawns
        if let Some(handle) = &session.transcoder {
            if let ExitState::Exited(code) = handle.exit_state() {
                if code == Some(0) {
                    info!(session_id = %id, "transcoder finished; clearing handle");
                } else {
                    warn!(session_id = %id, ?code, "transcoder died; clearing handle");
                }
                session.transcoder = None;
            }
        }

        let dir = session.dir.clone();
        drop(session);

        let encoded = hls::encoded_duration_in_dir(&dir).await;
        Some(SessionProgress {
            encoded_duration: encoded,
            live_edge_time: hls::live_edge(encoded),
        })
    }

    /// Kill the session's transcoder. The session record and its directory
    /// are retained so a later start can resume; only eviction removes them.
    pub async fn stop(&self, id: &str) -> bool {
        let Some(shared) = self.lookup(id).await else {
            return false;
        };
        let mut session = shared.lock().await;
        if let Some(handle) = session.transcoder.take() {
            handle.shutdown().await;
            info!(session_id = %id, "transcoder stopped");
        }
        true
    }

    /// Kill, delete the directory, and drop the map entry.
    pub async fn remove(&self, id: &str) -> bool {
        let Some(shared) = self.lookup(id).await else {
            return false;
        };
        let mut session = shared.lock().await;
        self.teardown_locked(&mut session).await;
        drop(session);
        self.unregister(id, &shared).await;
        info!(session_id = %id, "session removed");
        true
    }

    /// One eviction sweep. Victims are snapshotted under the map lock, then
    /// processed one at a time under their own lock; a session busy with a
    /// start is simply skipped until the next cycle.
    pub async fn evict_idle_once(&self) {
        let snapshot: Vec<(String, SharedSession)> = {
            let map = self.sessions.lock().await;
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (id, shared) in snapshot {
            let Ok(mut session) = shared.try_lock() else {
                continue;
            };
            if session.evicted || !session.is_idle(self.config.heartbeat_timeout) {
                continue;
            }
            self.teardown_locked(&mut session).await;
            drop(session);
            self.unregister(&id, &shared).await;
            info!(session_id = %id, "evicted idle session");
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn teardown_locked(&self, session: &mut Session) {
        if let Some(handle) = session.transcoder.take() {
            handle.shutdown().await;
        }
        match tokio::fs::remove_dir_all(&session.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "failed to remove session dir");
            }
        }
        session.evicted = true;
    }

    /// Drop the map entry, but only if it still points at the same session;
    /// a concurrent recreate under the same ID is left alone.
    async fn unregister(&self, id: &str, shared: &SharedSession) {
        let mut map = self.sessions.lock().await;
        if map.get(id).is_some_and(|entry| Arc::ptr_eq(entry, shared)) {
            map.remove(id);
        }
    }
}

/// Session IDs are used verbatim as directory names under the HLS root.
fn validate_session_id(id: &str) -> Result<(), TranscodeError> {
    let well_formed = !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if well_formed {
        Ok(())
    } else {
        Err(TranscodeError::InvalidSessionId(id.to_string()))
    }
}
