use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::supervisor::{CollectorStatus, Supervisor};

/// Owns the supervisor task. The host starts it once and stops it on shutdown.
pub struct CollectorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    status_rx: Option<watch::Receiver<CollectorStatus>>,
}

impl Default for CollectorController {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            status_rx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn start(&mut self, supervisor: Supervisor) -> Result<()> {
        if self.handle.is_some() {
            bail!("collector already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let status_rx = supervisor.subscribe();

        let handle = tokio::spawn(supervisor.run(token_clone));
        info!("collector task started");

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.status_rx = Some(status_rx);
        Ok(())
    }

    /// Latest published status, if the collector was ever started.
    pub fn status(&self) -> Option<watch::Receiver<CollectorStatus>> {
        self.status_rx.clone()
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("collector task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
