//! Browser lifecycle state machine.
//!
//! `Starting → Navigating → (Authenticating) → Hooked → Polling → Crashed →
//! Backoff → Starting …` until the host cancels. Page-level failures are
//! absorbed inside a state; only a lost browser leaves `Polling`, and every
//! crash is followed by the fixed backoff so persistent failures settle into
//! a slow retry cadence.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    browser::{bounded, BrowserError, BrowserLauncher, BrowserResult, BrowserSession},
    config::{CollectorConfig, Credentials},
    db::RoundSink,
    session::{SessionState, SessionStore},
};

use super::{
    auth::{AuthOutcome, Authenticator},
    instrumentation,
    loop_worker::{polling_loop, PollSettings, RunState},
    session_sync::restore_session_state,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const NAVIGATION_CEILING: Duration = Duration::from_secs(30);
const NETWORK_QUIET: Duration = Duration::from_millis(500);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const LOGIN_SETTLE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectorState {
    Idle,
    Starting,
    Navigating,
    Authenticating,
    Hooked,
    Polling,
    Crashed,
    Backoff,
    Stopped,
}

impl CollectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorState::Idle => "Idle",
            CollectorState::Starting => "Starting",
            CollectorState::Navigating => "Navigating",
            CollectorState::Authenticating => "Authenticating",
            CollectorState::Hooked => "Hooked",
            CollectorState::Polling => "Polling",
            CollectorState::Crashed => "Crashed",
            CollectorState::Backoff => "Backoff",
            CollectorState::Stopped => "Stopped",
        }
    }
}

/// Published on every transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub state: CollectorState,
    /// Number of times `Starting` has been entered.
    pub lifecycles: u64,
    /// Number of lifecycles that ended in `Crashed`.
    pub crashes: u64,
    pub authenticated_this_lifecycle: bool,
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl Default for CollectorStatus {
    fn default() -> Self {
        Self {
            state: CollectorState::Idle,
            lifecycles: 0,
            crashes: 0,
            authenticated_this_lifecycle: false,
            last_error: None,
            changed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub target_url: String,
    pub credentials: Option<Credentials>,
    pub poll: PollSettings,
    pub backoff: Duration,
    pub navigation_ceiling: Duration,
    pub network_quiet: Duration,
    pub login_settle: Duration,
}

impl SupervisorSettings {
    /// `None` when no target URL is configured.
    pub fn from_config(cfg: &CollectorConfig) -> Option<Self> {
        Some(Self {
            target_url: cfg.target_url.clone()?,
            credentials: cfg.credentials.clone(),
            poll: PollSettings {
                interval: cfg.poll_interval,
                call_timeout: CALL_TIMEOUT,
                room: cfg.room.clone(),
                keep_unparsed: cfg.keep_unparsed,
            },
            backoff: cfg.backoff,
            navigation_ceiling: NAVIGATION_CEILING,
            network_quiet: NETWORK_QUIET,
            login_settle: LOGIN_SETTLE,
        })
    }
}

pub struct Supervisor {
    launcher: Arc<dyn BrowserLauncher>,
    sink: Arc<dyn RoundSink>,
    sessions: SessionStore,
    settings: SupervisorSettings,
    status: watch::Sender<CollectorStatus>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        sink: Arc<dyn RoundSink>,
        sessions: SessionStore,
        settings: SupervisorSettings,
    ) -> Self {
        let (status, _) = watch::channel(CollectorStatus::default());
        Self {
            launcher,
            sink,
            sessions,
            settings,
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectorStatus> {
        self.status.subscribe()
    }

    fn transition(&self, state: CollectorState) {
        log_info!("collector -> {}", state.as_str());
        self.status.send_modify(|status| {
            status.state = state;
            status.changed_at = Utc::now();
            match state {
                CollectorState::Starting => {
                    status.lifecycles += 1;
                    status.authenticated_this_lifecycle = false;
                }
                CollectorState::Crashed => status.crashes += 1,
                _ => {}
            }
        });
    }

    fn note_error(&self, err: &BrowserError) {
        let message = err.to_string();
        self.status
            .send_modify(|status| status.last_error = Some(message));
    }

    /// Runs lifecycles until `cancel` fires. Never gives up on its own.
    pub async fn run(self, cancel: CancellationToken) {
        log_info!("collector supervising {}", self.settings.target_url);

        loop {
            let ended = tokio::select! {
                err = self.run_lifecycle() => err,
                _ = cancel.cancelled() => break,
            };

            self.transition(CollectorState::Crashed);
            self.note_error(&ended);
            log_error!("browser lifecycle ended: {ended}");

            self.transition(CollectorState::Backoff);
            tokio::select! {
                _ = tokio::time::sleep(self.settings.backoff) => {}
                _ = cancel.cancelled() => break,
            }
        }

        self.transition(CollectorState::Stopped);
        log_info!("collector stopped");
    }

    /// One browser lifecycle. Only returns once the browser is unusable.
    async fn run_lifecycle(&self) -> BrowserError {
        self.transition(CollectorState::Starting);
        let lifecycle_id = Uuid::new_v4();

        let stored = match self.sessions.load() {
            Ok(stored) => stored,
            Err(err) => {
                log_warn!("session state unavailable: {err:#}");
                None
            }
        };

        let page = match self.launcher.launch().await {
            Ok(page) => page,
            Err(err) => return err,
        };
        log_info!("lifecycle {lifecycle_id} browser up");

        let ended = self.drive(page.as_ref(), stored).await;

        page.close().await;
        log_info!("lifecycle {lifecycle_id} torn down");
        ended
    }

    async fn drive(&self, page: &dyn BrowserSession, stored: Option<SessionState>) -> BrowserError {
        let session_present = stored.is_some();
        let mut run = RunState::default();

        match bounded(
            "register hooks",
            self.settings.poll.call_timeout,
            instrumentation::register(page, &mut run.hooks_registered),
        )
        .await
        {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return err,
            Err(err) => log_warn!("hook registration failed, will retry after load: {err}"),
        }

        if let Some(state) = &stored {
            match restore_session_state(page, state).await {
                Ok(()) => log_info!(
                    "restored session saved at {} ({} cookies)",
                    state.saved_at,
                    state.cookies.len()
                ),
                Err(err) if err.is_fatal() => return err,
                Err(err) => log_warn!("session restore failed, continuing: {err}"),
            }
        }

        self.transition(CollectorState::Navigating);
        if let Err(err) = self.navigate(page).await {
            if err.is_fatal() {
                return err;
            }
            log_warn!("navigation incomplete, continuing: {err}");
        }

        let authenticator = Authenticator::new(
            self.settings.credentials.as_ref(),
            &self.sessions,
            self.settings.login_settle,
        );
        match authenticator.skip_reason(session_present) {
            Some(reason) => log_info!("login skipped: {reason}"),
            None => {
                self.transition(CollectorState::Authenticating);
                match authenticator.run(page, session_present).await {
                    AuthOutcome::Succeeded { persisted } => {
                        log_info!("login assumed successful (session persisted: {persisted})");
                        self.status
                            .send_modify(|status| status.authenticated_this_lifecycle = true);
                    }
                    AuthOutcome::Failed(reason) => {
                        log_warn!("login failed, continuing unauthenticated: {reason}")
                    }
                    AuthOutcome::Skipped(reason) => log_info!("login skipped: {reason}"),
                }
            }
        }

        self.transition(CollectorState::Hooked);
        match bounded(
            "install hooks",
            self.settings.poll.call_timeout,
            instrumentation::install(page, &mut run.hooks_registered, &mut run.hooks_installed),
        )
        .await
        {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return err,
            Err(err) => log_warn!("hook injection failed, relying on DOM polling: {err}"),
        }

        self.transition(CollectorState::Polling);
        polling_loop(page, self.sink.as_ref(), &self.settings.poll, &mut run).await
    }

    async fn navigate(&self, page: &dyn BrowserSession) -> BrowserResult<()> {
        bounded(
            "navigate",
            self.settings.navigation_ceiling,
            page.navigate(&self.settings.target_url),
        )
        .await?;
        page.wait_for_network_idle(self.settings.network_quiet, self.settings.navigation_ceiling)
            .await
    }
}
