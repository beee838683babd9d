//! Lifecycle of the local `hugo serve` preview server.
//!
//! [`PreviewManager`] owns at most one server process. Background tasks
//! spawned for a session never touch manager state: they post
//! [`PreviewEvent`]s on a channel, and the owner applies them one at a time
//! with [`PreviewManager::dispatch_next`]. Every state change and observer
//! call therefore happens on the owner's task, in order.

mod observer;
mod process;

pub use observer::{PreviewObserver, UnexpectedExit};

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{BlogError, Result};
use crate::paths;
use crate::toolchain::Hugo;

/// Where `hugo serve` listens by default.
pub const PREVIEW_URL: &str = "http://localhost:1313";

/// How long a stopped server gets to exit on SIGTERM before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// PreviewConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub binary: String,
    /// Delay between spawn and the best-effort `on_ready` hint.
    pub ready_delay: Duration,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PreviewConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            binary: cfg.hugo.binary.clone(),
            ready_delay: cfg.preview.ready_delay(),
        }
    }
}

// ---------------------------------------------------------------------------
// PreviewState
// ---------------------------------------------------------------------------

/// `StoppedByUser` and `StoppedUnexpectedly` are transient: the slot is
/// cleared as soon as they are entered, so [`PreviewManager::state`] only ever
/// reports `Stopped` or `Running` between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewState {
    Stopped,
    Starting,
    Running,
    StoppedByUser,
    StoppedUnexpectedly,
}

impl PreviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewState::Stopped => "stopped",
            PreviewState::Starting => "starting",
            PreviewState::Running => "running",
            PreviewState::StoppedByUser => "stopped_by_user",
            PreviewState::StoppedUnexpectedly => "stopped_unexpectedly",
        }
    }
}

impl fmt::Display for PreviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PreviewEvent
// ---------------------------------------------------------------------------

/// Raw notifications posted by a session's background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewEvent {
    Output { session: u64, text: String },
    Ready { session: u64 },
    Exited { session: u64, code: Option<i32> },
}

impl PreviewEvent {
    pub fn session(&self) -> u64 {
        match self {
            PreviewEvent::Output { session, .. }
            | PreviewEvent::Ready { session }
            | PreviewEvent::Exited { session, .. } => *session,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: u64,
    pub pid: Option<u32>,
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
}

struct PreviewSession {
    info: SessionInfo,
    state: PreviewState,
    kill_tx: Option<oneshot::Sender<()>>,
    ready_timer: JoinHandle<()>,
    ready_notified: bool,
}

impl Drop for PreviewSession {
    fn drop(&mut self) {
        self.ready_timer.abort();
    }
}

// ---------------------------------------------------------------------------
// PreviewManager
// ---------------------------------------------------------------------------

pub struct PreviewManager<O> {
    hugo: Hugo,
    ready_delay: Duration,
    observer: O,
    slot: Option<PreviewSession>,
    last_session: u64,
    events_tx: mpsc::UnboundedSender<PreviewEvent>,
    events_rx: mpsc::UnboundedReceiver<PreviewEvent>,
}

impl<O: PreviewObserver> PreviewManager<O> {
    pub fn new(config: PreviewConfig, observer: O) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            hugo: Hugo::new(config.binary),
            ready_delay: config.ready_delay,
            observer,
            slot: None,
            last_session: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> PreviewState {
        self.slot
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(PreviewState::Stopped)
    }

    pub fn is_running(&self) -> bool {
        self.state() == PreviewState::Running
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.slot.as_ref().map(|s| &s.info)
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Stop the server if it is running, otherwise start it in `root`.
    ///
    /// Returns whether the server is running afterwards. A failed start is
    /// returned as the error and leaves the manager stopped, so the next
    /// toggle attempts a fresh start.
    pub fn toggle(&mut self, root: &Path) -> Result<bool> {
        if self.is_running() {
            self.stop();
            Ok(false)
        } else {
            self.start(root)?;
            Ok(true)
        }
    }

    /// Pre-flight `hugo version`, then spawn `hugo serve -D -F` in `root`.
    ///
    /// Returns as soon as the process is spawned; readiness is only hinted at
    /// later through [`PreviewObserver::on_ready`]. Must be called from
    /// within a tokio runtime.
    pub fn start(&mut self, root: &Path) -> Result<()> {
        if let Some(session) = &self.slot {
            return Err(BlogError::Precondition(format!(
                "preview server already running for {} (session {})",
                session.info.root.display(),
                session.info.id
            )));
        }
        if !root.is_dir() {
            return Err(BlogError::Precondition(format!(
                "project root does not exist: {}",
                root.display()
            )));
        }
        if !paths::is_hugo_project(root) {
            return Err(BlogError::Precondition(format!(
                "{} is not a Hugo project: none of {} found",
                root.display(),
                paths::HUGO_CONFIG_FILES.join(", ")
            )));
        }
        let root = root.canonicalize()?;

        transition(PreviewState::Stopped, PreviewState::Starting);

        let report = match self.hugo.preflight() {
            Ok(report) => report,
            Err(e) => {
                warn!(binary = self.hugo.binary(), error = %e, "hugo pre-flight failed");
                transition(PreviewState::Starting, PreviewState::Stopped);
                return Err(e);
            }
        };
        match &report.version {
            Some(version) => info!(%version, "hugo available"),
            None => info!(output = %report.output, "hugo available (unrecognised version)"),
        }

        let id = self.last_session + 1;
        let spawned = process::spawn_server(
            self.hugo.serve_command(&root),
            id,
            self.events_tx.clone(),
        )
        .map_err(|source| {
            transition(PreviewState::Starting, PreviewState::Stopped);
            BlogError::Spawn {
                binary: self.hugo.binary().to_string(),
                source,
            }
        })?;
        self.last_session = id;

        let ready_tx = self.events_tx.clone();
        let delay = self.ready_delay;
        let ready_timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = ready_tx.send(PreviewEvent::Ready { session: id });
        });

        info!(
            session = id,
            pid = ?spawned.pid,
            root = %root.display(),
            "preview server started"
        );
        transition(PreviewState::Starting, PreviewState::Running);

        self.slot = Some(PreviewSession {
            info: SessionInfo {
                id,
                pid: spawned.pid,
                root,
                started_at: Utc::now(),
            },
            state: PreviewState::Running,
            kill_tx: Some(spawned.kill_tx),
            ready_timer,
            ready_notified: false,
        });
        Ok(())
    }

    /// Stop the running server: SIGTERM, then a hard kill after
    /// [`STOP_GRACE`]. A no-op when nothing is running.
    pub fn stop(&mut self) {
        let Some(mut session) = self.slot.take() else {
            return;
        };
        if let Some(kill) = session.kill_tx.take() {
            let _ = kill.send(());
        }
        session.state = PreviewState::StoppedByUser;
        transition(PreviewState::Running, session.state);
        info!(session = session.info.id, pid = ?session.info.pid, "preview server stopped by user");
        transition(session.state, PreviewState::Stopped);

        self.observer.on_stopped_by_user();
    }

    /// Wait for the next event, apply it and notify the observer.
    ///
    /// Cancel-safe: dropping the future before it completes loses no event.
    pub async fn dispatch_next(&mut self) -> Option<PreviewEvent> {
        let event = self.events_rx.recv().await?;
        self.apply(&event);
        Some(event)
    }

    /// Like [`dispatch_next`](Self::dispatch_next) but returns `None` instead
    /// of waiting when no event is queued.
    pub fn try_dispatch(&mut self) -> Option<PreviewEvent> {
        let event = self.events_rx.try_recv().ok()?;
        self.apply(&event);
        Some(event)
    }

    fn is_current(&self, session: u64) -> bool {
        self.slot.as_ref().is_some_and(|s| s.info.id == session)
    }

    fn apply(&mut self, event: &PreviewEvent) {
        if !self.is_current(event.session()) {
            debug!(session = event.session(), "discarding event from finished session");
            return;
        }

        match event {
            PreviewEvent::Output { text, .. } => self.observer.on_output(text),
            PreviewEvent::Ready { .. } => {
                let Some(session) = self.slot.as_mut() else {
                    return;
                };
                if session.ready_notified {
                    return;
                }
                session.ready_notified = true;
                info!(url = PREVIEW_URL, "preview server should be up");
                self.observer.on_ready(PREVIEW_URL);
            }
            PreviewEvent::Exited { code, .. } => {
                let Some(mut session) = self.slot.take() else {
                    return;
                };
                session.state = PreviewState::StoppedUnexpectedly;
                transition(PreviewState::Running, session.state);
                warn!(
                    session = session.info.id,
                    pid = ?session.info.pid,
                    code = ?code,
                    "preview server stopped unexpectedly"
                );
                transition(session.state, PreviewState::Stopped);

                self.observer
                    .on_stopped_unexpectedly(&UnexpectedExit { code: *code });
            }
        }
    }
}

fn transition(from: PreviewState, to: PreviewState) {
    debug!(%from, %to, "preview state");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{fake_hugo, hugo_project};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        output: String,
        ready: Vec<String>,
        unexpected: Vec<UnexpectedExit>,
        stopped_by_user: usize,
    }

    impl PreviewObserver for Recorder {
        fn on_output(&mut self, text: &str) {
            self.output.push_str(text);
        }

        fn on_ready(&mut self, url: &str) {
            self.ready.push(url.to_string());
        }

        fn on_stopped_unexpectedly(&mut self, exit: &UnexpectedExit) {
            self.unexpected.push(*exit);
        }

        fn on_stopped_by_user(&mut self) {
            self.stopped_by_user += 1;
        }
    }

    /// A project dir plus a fake hugo whose `serve` runs `serve_body`.
    fn setup(serve_body: &str) -> (TempDir, TempDir, PreviewConfig) {
        let project = hugo_project();
        let bin_dir = TempDir::new().unwrap();
        let bin = fake_hugo(bin_dir.path(), serve_body);
        let config = PreviewConfig {
            binary: bin.to_string_lossy().into_owned(),
            ready_delay: Duration::from_secs(60),
        };
        (project, bin_dir, config)
    }

    fn missing_hugo() -> PreviewConfig {
        PreviewConfig {
            binary: "__dearblog_no_such_hugo__".to_string(),
            ready_delay: Duration::from_secs(60),
        }
    }

    /// Dispatch events until `done` holds, failing after 10 seconds.
    async fn dispatch_until<F>(mgr: &mut PreviewManager<Recorder>, mut done: F) -> Vec<PreviewEvent>
    where
        F: FnMut(&PreviewManager<Recorder>, &PreviewEvent) -> bool,
    {
        let mut seen = Vec::new();
        let outcome = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = mgr.dispatch_next().await {
                let finished = done(&*mgr, &event);
                seen.push(event);
                if finished {
                    break;
                }
            }
        })
        .await;
        assert!(outcome.is_ok(), "timed out; events so far: {seen:?}");
        seen
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_noop() {
        let mut mgr = PreviewManager::new(missing_hugo(), Recorder::default());
        mgr.stop();
        mgr.stop();
        assert_eq!(mgr.state(), PreviewState::Stopped);
        assert!(mgr.session().is_none());
        assert_eq!(mgr.observer().stopped_by_user, 0);
        assert!(mgr.try_dispatch().is_none());
    }

    #[tokio::test]
    async fn start_runs_after_successful_preflight() {
        let (project, _bin, config) = setup("exec sleep 30");
        let mut mgr = PreviewManager::new(config, Recorder::default());

        mgr.start(project.path()).unwrap();

        assert_eq!(mgr.state(), PreviewState::Running);
        let session = mgr.session().unwrap();
        assert_eq!(session.id, 1);
        assert!(session.pid.is_some());
        assert_eq!(session.root, project.path().canonicalize().unwrap());
        mgr.stop();
    }

    #[tokio::test]
    async fn failed_preflight_stays_stopped_without_listeners() {
        let project = hugo_project();
        let mut mgr = PreviewManager::new(missing_hugo(), Recorder::default());

        let err = mgr.start(project.path()).unwrap_err();
        assert!(matches!(err, BlogError::ToolMissing { .. }), "got: {err:?}");
        assert_eq!(mgr.state(), PreviewState::Stopped);
        assert!(mgr.session().is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mgr.try_dispatch().is_none());
        assert!(mgr.observer().output.is_empty());
        assert!(mgr.observer().unexpected.is_empty());
    }

    #[tokio::test]
    async fn toggle_after_failed_start_retries_start() {
        let project = hugo_project();
        let mut mgr = PreviewManager::new(missing_hugo(), Recorder::default());

        assert!(matches!(
            mgr.toggle(project.path()),
            Err(BlogError::ToolMissing { .. })
        ));
        // Not treated as running: the second toggle is another start attempt.
        assert!(matches!(
            mgr.toggle(project.path()),
            Err(BlogError::ToolMissing { .. })
        ));
        assert_eq!(mgr.state(), PreviewState::Stopped);
        assert_eq!(mgr.observer().stopped_by_user, 0);
    }

    #[tokio::test]
    async fn toggle_reports_running_flag() {
        let (project, _bin, config) = setup("exec sleep 30");
        let mut mgr = PreviewManager::new(config, Recorder::default());

        assert!(mgr.toggle(project.path()).unwrap());
        assert_eq!(mgr.state(), PreviewState::Running);
        assert!(!mgr.toggle(project.path()).unwrap());
        assert_eq!(mgr.state(), PreviewState::Stopped);
        assert!(mgr.session().is_none());
        assert!(mgr.toggle(project.path()).unwrap());
        assert_eq!(mgr.session().unwrap().id, 2);
        mgr.stop();
        assert_eq!(mgr.observer().stopped_by_user, 2);
    }

    #[tokio::test]
    async fn start_rejects_non_project_dirs() {
        let plain = TempDir::new().unwrap();
        let mut mgr = PreviewManager::new(missing_hugo(), Recorder::default());

        let err = mgr.start(plain.path()).unwrap_err();
        assert!(matches!(err, BlogError::Precondition(ref m) if m.contains("not a Hugo project")));

        let err = mgr.start(&plain.path().join("missing")).unwrap_err();
        assert!(matches!(err, BlogError::Precondition(ref m) if m.contains("does not exist")));
        assert_eq!(mgr.state(), PreviewState::Stopped);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let (project, _bin, config) = setup("exec sleep 30");
        let mut mgr = PreviewManager::new(config, Recorder::default());

        mgr.start(project.path()).unwrap();
        let err = mgr.start(project.path()).unwrap_err();
        assert!(matches!(err, BlogError::Precondition(ref m) if m.contains("already running")));
        assert_eq!(mgr.session().unwrap().id, 1);
        mgr.stop();
    }

    #[tokio::test]
    async fn stdout_chunks_reach_sink_in_order() {
        let (project, _bin, config) = setup("echo A\n    echo B\n    echo C\n    exec sleep 30");
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();

        dispatch_until(&mut mgr, |m, _| m.observer().output.len() >= 6).await;

        assert_eq!(mgr.observer().output, "A\nB\nC\n");
        assert_eq!(mgr.state(), PreviewState::Running);
        mgr.stop();
    }

    #[tokio::test]
    async fn unexpected_exit_notifies_once_and_frees_slot() {
        let (project, _bin, config) = setup("echo 'Error: port in use' >&2\n    exit 3");
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();

        let events = dispatch_until(&mut mgr, |_, e| matches!(e, PreviewEvent::Exited { .. })).await;

        assert_eq!(mgr.observer().unexpected, vec![UnexpectedExit { code: Some(3) }]);
        assert_eq!(mgr.observer().output, "Error: port in use\n");
        assert_eq!(mgr.observer().stopped_by_user, 0);
        assert_eq!(mgr.state(), PreviewState::Stopped);
        assert!(matches!(events.last(), Some(PreviewEvent::Exited { code: Some(3), .. })));

        // The slot is free again.
        mgr.start(project.path()).unwrap();
        assert_eq!(mgr.state(), PreviewState::Running);
        assert_eq!(mgr.session().unwrap().id, 2);
    }

    #[tokio::test]
    async fn partial_line_output_is_forwarded_without_newline() {
        let (project, _bin, config) = setup("printf 'Serving...'\n    exec sleep 30");
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();

        dispatch_until(&mut mgr, |m, _| m.observer().output == "Serving...").await;

        assert_eq!(mgr.state(), PreviewState::Running);
        mgr.stop();
    }

    #[tokio::test]
    async fn exit_is_reported_while_background_child_holds_output() {
        // The backgrounded sleep inherits stdout and stderr, so neither pipe
        // reaches EOF when the server itself exits.
        let (project, _bin, config) = setup("sleep 20 &\n    echo up\n    exit 3");
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();

        dispatch_until(&mut mgr, |_, e| matches!(e, PreviewEvent::Exited { .. })).await;

        assert_eq!(mgr.observer().unexpected, vec![UnexpectedExit { code: Some(3) }]);
        assert_eq!(mgr.observer().output, "up\n");
        assert_eq!(mgr.state(), PreviewState::Stopped);
        assert!(mgr.session().is_none());
    }

    #[tokio::test]
    async fn user_stop_kills_process_without_unexpected_notice() {
        let (project, _bin, config) = setup("exec sleep 30");
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();
        let id = mgr.session().unwrap().id;

        mgr.stop();
        assert_eq!(mgr.observer().stopped_by_user, 1);
        assert_eq!(mgr.state(), PreviewState::Stopped);

        // The kill shows up as an exit well before `sleep 30` would finish.
        dispatch_until(&mut mgr, |_, e| {
            matches!(e, PreviewEvent::Exited { session, .. } if *session == id)
        })
        .await;

        assert!(mgr.observer().unexpected.is_empty());
        assert_eq!(mgr.observer().stopped_by_user, 1);
    }

    #[tokio::test]
    async fn user_stop_sends_sigterm_first() {
        let (project, _bin, config) = setup(
            "trap 'exit 0' TERM\n    while true; do sleep 0.1; done",
        );
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();
        let id = mgr.session().unwrap().id;

        mgr.stop();

        // A trapped SIGTERM lets the script exit cleanly; a hard kill would
        // leave no exit code.
        let events = dispatch_until(&mut mgr, |_, e| {
            matches!(e, PreviewEvent::Exited { session, .. } if *session == id)
        })
        .await;
        assert!(matches!(events.last(), Some(PreviewEvent::Exited { code: Some(0), .. })));
        assert!(mgr.observer().unexpected.is_empty());
        assert_eq!(mgr.observer().stopped_by_user, 1);
    }

    #[tokio::test]
    async fn stale_exit_does_not_disturb_new_session() {
        let (project, _bin, config) = setup("exec sleep 30");
        let mut mgr = PreviewManager::new(config, Recorder::default());

        mgr.start(project.path()).unwrap();
        mgr.stop();
        mgr.start(project.path()).unwrap();
        assert_eq!(mgr.session().unwrap().id, 2);

        dispatch_until(&mut mgr, |_, e| {
            matches!(e, PreviewEvent::Exited { session: 1, .. })
        })
        .await;

        assert_eq!(mgr.state(), PreviewState::Running);
        assert_eq!(mgr.session().unwrap().id, 2);
        assert!(mgr.observer().unexpected.is_empty());
        mgr.stop();
    }

    #[tokio::test]
    async fn ready_hint_fires_once_after_delay() {
        let (project, _bin, mut config) = setup("exec sleep 30");
        config.ready_delay = Duration::from_millis(50);
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();
        assert!(mgr.observer().ready.is_empty());

        dispatch_until(&mut mgr, |_, e| matches!(e, PreviewEvent::Ready { .. })).await;
        assert_eq!(mgr.observer().ready, vec![PREVIEW_URL.to_string()]);

        // A duplicate ready event for the same session is ignored.
        mgr.events_tx
            .send(PreviewEvent::Ready { session: 1 })
            .unwrap();
        mgr.try_dispatch();
        assert_eq!(mgr.observer().ready.len(), 1);
        mgr.stop();
    }

    #[tokio::test]
    async fn ready_hint_is_cancelled_by_stop() {
        let (project, _bin, mut config) = setup("exec sleep 30");
        config.ready_delay = Duration::from_millis(100);
        let mut mgr = PreviewManager::new(config, Recorder::default());
        mgr.start(project.path()).unwrap();
        mgr.stop();

        tokio::time::sleep(Duration::from_millis(300)).await;
        while mgr.try_dispatch().is_some() {}
        assert!(mgr.observer().ready.is_empty());
    }
}
