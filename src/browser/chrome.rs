//! Local Chromium over the DevTools Protocol.
//!
//! Each launch starts a fresh browser process with its own throwaway profile
//! directory, discovers the debugger WebSocket through the `/json/version`
//! endpoint, opens one page target and attaches to it with a flattened session.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{
    process::{Child, Command},
    task::JoinHandle,
};
use uuid::Uuid;

use super::{
    cdp::{CdpConnection, CdpEvent},
    dom::ScriptKind,
    BrowserError, BrowserLauncher, BrowserResult, BrowserSession,
};
use crate::{config::CollectorConfig, session::StoredCookie};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(20);
const DISCOVERY_RETRY: Duration = Duration::from_millis(250);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub debug_port: u16,
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn from_config(cfg: &CollectorConfig) -> Self {
        Self {
            executable: cfg.chrome_path.clone(),
            headless: cfg.headless,
            debug_port: cfg.debug_port,
            extra_args: Vec::new(),
        }
    }
}

pub struct ChromeLauncher {
    options: LaunchOptions,
}

impl ChromeLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }

    fn resolve_executable(&self) -> BrowserResult<PathBuf> {
        if let Some(path) = &self.options.executable {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(BrowserError::Launch(format!(
                "configured chrome executable {} does not exist",
                path.display()
            )));
        }
        detect_chrome_executable()
            .ok_or_else(|| BrowserError::Launch("no chrome/chromium executable found".into()))
    }

    fn command(&self, executable: &Path, profile_dir: &Path) -> Command {
        let mut cmd = Command::new(executable);
        cmd.arg(format!("--remote-debugging-port={}", self.options.debug_port))
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .args([
                "--no-first-run",
                "--no-default-browser-check",
                "--disable-background-networking",
                "--disable-background-timer-throttling",
                "--disable-backgrounding-occluded-windows",
                "--disable-renderer-backgrounding",
                "--disable-dev-shm-usage",
                "--mute-audio",
            ]);
        if self.options.headless {
            cmd.arg("--headless=new").arg("--disable-gpu");
        }
        cmd.args(&self.options.extra_args)
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let executable = self.resolve_executable()?;
        let profile_dir =
            std::env::temp_dir().join(format!("roundtap-profile-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&profile_dir)?;

        info!(
            "Launching {} (headless={}, port={})",
            executable.display(),
            self.options.headless,
            self.options.debug_port
        );
        let child = match self.command(&executable, &profile_dir).spawn() {
            Ok(child) => child,
            Err(err) => {
                remove_profile(&profile_dir);
                return Err(BrowserError::Launch(format!(
                    "spawn {}: {err}",
                    executable.display()
                )));
            }
        };

        // From here on the session owns the child and the profile directory,
        // so an early return cleans both up through Drop.
        let mut session = ChromeSession {
            conn: None,
            session_id: String::new(),
            child: Mutex::new(Some(child)),
            profile_dir,
            network: Arc::new(Mutex::new(NetworkActivity::new())),
            watcher: None,
        };

        let ws_url = discover_ws_url(self.options.debug_port, &session).await?;
        let conn = Arc::new(CdpConnection::connect(&ws_url).await?);

        let target = conn
            .call(
                "Target.createTarget",
                json!({ "url": "about:blank" }),
                None,
                COMMAND_TIMEOUT,
            )
            .await?;
        let target_id = target["targetId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("createTarget returned no targetId".into()))?
            .to_string();

        let attached = conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
                COMMAND_TIMEOUT,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("attachToTarget returned no sessionId".into()))?
            .to_string();

        session.watcher = Some(spawn_network_watcher(
            conn.subscribe(),
            PageTarget {
                target_id: target_id.clone(),
                session_id: session_id.clone(),
            },
            Arc::clone(&session.network),
        ));

        // Reports targetDestroyed/targetCrashed for our tab on the browser session.
        conn.call(
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            None,
            COMMAND_TIMEOUT,
        )
        .await?;

        session.conn = Some(conn);
        session.session_id = session_id;

        for domain in [
            "Page.enable",
            "Network.enable",
            "Runtime.enable",
            "Inspector.enable",
        ] {
            session.command(domain, json!({})).await?;
        }

        debug!("Attached to page target {target_id}");
        Ok(Box::new(session))
    }
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: String,
}

async fn discover_ws_url(port: u16, session: &ChromeSession) -> BrowserResult<String> {
    let endpoint = format!("http://127.0.0.1:{port}/json/version");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|err| BrowserError::Launch(format!("http client: {err}")))?;

    let started = Instant::now();
    loop {
        if session.process_exited() {
            return Err(BrowserError::Launch(
                "browser exited before the debugger came up".into(),
            ));
        }

        match client.get(&endpoint).send().await {
            Ok(resp) => match resp.json::<VersionInfo>().await {
                Ok(info) => return Ok(info.ws_url),
                Err(err) => debug!("debugger endpoint not ready: {err}"),
            },
            Err(err) => debug!("debugger endpoint not ready: {err}"),
        }

        if started.elapsed() >= DISCOVERY_TIMEOUT {
            return Err(BrowserError::Launch(format!(
                "debugger endpoint {endpoint} did not answer within {DISCOVERY_TIMEOUT:?}"
            )));
        }
        tokio::time::sleep(DISCOVERY_RETRY).await;
    }
}

/// In-flight request bookkeeping for network-idle detection, plus the reason
/// the page target went away, if it did.
#[derive(Debug)]
struct NetworkActivity {
    inflight: std::collections::HashSet<String>,
    last_activity: Instant,
    lost: Option<String>,
}

impl NetworkActivity {
    fn new() -> Self {
        Self {
            inflight: std::collections::HashSet::new(),
            last_activity: Instant::now(),
            lost: None,
        }
    }

    fn is_quiet(&self, quiet: Duration) -> bool {
        self.inflight.is_empty() && self.last_activity.elapsed() >= quiet
    }

    fn mark_lost(&mut self, reason: &str) {
        if self.lost.is_none() {
            warn!("page target lost: {reason}");
            self.lost = Some(reason.to_string());
        }
    }
}

/// The page target this session drives.
#[derive(Debug, Clone)]
struct PageTarget {
    target_id: String,
    session_id: String,
}

fn lock_activity(activity: &Mutex<NetworkActivity>) -> std::sync::MutexGuard<'_, NetworkActivity> {
    match activity.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn apply_event(state: &mut NetworkActivity, event: &CdpEvent, page: &PageTarget) {
    // Target lifecycle events arrive on the browser session, not the page's.
    if event.session_id.is_none() {
        match event.method.as_str() {
            "Target.detachedFromTarget"
                if event.params["sessionId"].as_str() == Some(page.session_id.as_str()) =>
            {
                state.mark_lost("detached from page target");
            }
            "Target.targetDestroyed"
                if event.params["targetId"].as_str() == Some(page.target_id.as_str()) =>
            {
                state.mark_lost("page target destroyed");
            }
            "Target.targetCrashed"
                if event.params["targetId"].as_str() == Some(page.target_id.as_str()) =>
            {
                state.mark_lost("page target crashed");
            }
            _ => {}
        }
        return;
    }
    if event.session_id.as_deref() != Some(page.session_id.as_str()) {
        return;
    }

    let request_id = event.params["requestId"].as_str().map(str::to_string);
    match event.method.as_str() {
        "Network.requestWillBeSent" => {
            if let Some(id) = request_id {
                state.inflight.insert(id);
            }
            state.last_activity = Instant::now();
        }
        "Network.loadingFinished" | "Network.loadingFailed" => {
            if let Some(id) = request_id {
                state.inflight.remove(&id);
            }
            state.last_activity = Instant::now();
        }
        "Page.frameStartedLoading" => {
            if event.params["frameId"].is_string() {
                state.last_activity = Instant::now();
            }
        }
        "Inspector.targetCrashed" => state.mark_lost("page target crashed"),
        "Inspector.detached" => state.mark_lost("inspector detached"),
        _ => {}
    }
}

fn spawn_network_watcher(
    mut events: tokio::sync::broadcast::Receiver<CdpEvent>,
    page: PageTarget,
    activity: Arc<Mutex<NetworkActivity>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("network watcher lagged by {skipped} events");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            apply_event(&mut lock_activity(&activity), &event, &page);
        }
    })
}

pub struct ChromeSession {
    conn: Option<Arc<CdpConnection>>,
    session_id: String,
    child: Mutex<Option<Child>>,
    profile_dir: PathBuf,
    network: Arc<Mutex<NetworkActivity>>,
    watcher: Option<JoinHandle<()>>,
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        let child = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut child) = child {
            let _ = child.start_kill();
        }
        remove_profile(&self.profile_dir);
    }
}

impl ChromeSession {
    fn process_exited(&self) -> bool {
        let mut guard = match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    fn ensure_alive(&self) -> BrowserResult<&CdpConnection> {
        let conn = self
            .conn
            .as_deref()
            .ok_or_else(|| BrowserError::Disconnected("not attached".into()))?;
        if conn.is_closed() {
            return Err(BrowserError::Disconnected("devtools connection closed".into()));
        }
        if self.process_exited() {
            return Err(BrowserError::Disconnected("browser process exited".into()));
        }
        if let Some(reason) = &lock_activity(&self.network).lost {
            return Err(BrowserError::Disconnected(reason.clone()));
        }
        Ok(conn)
    }

    async fn command(&self, method: &str, params: Value) -> BrowserResult<Value> {
        let conn = self.ensure_alive()?;
        conn.call(method, params, Some(&self.session_id), COMMAND_TIMEOUT)
            .await
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        {
            let mut state = lock_activity(&self.network);
            state.inflight.clear();
            state.last_activity = Instant::now();
        }
        let result = self.command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = result["errorText"].as_str() {
            return Err(BrowserError::Protocol(format!(
                "navigation to {url} failed: {error_text}"
            )));
        }
        Ok(())
    }

    async fn wait_for_network_idle(
        &self,
        quiet: Duration,
        ceiling: Duration,
    ) -> BrowserResult<()> {
        let started = Instant::now();
        loop {
            self.ensure_alive()?;
            if lock_activity(&self.network).is_quiet(quiet) {
                return Ok(());
            }
            if started.elapsed() >= ceiling {
                return Err(BrowserError::timeout("network idle", ceiling));
            }
            tokio::time::sleep(IDLE_CHECK_INTERVAL).await;
        }
    }

    async fn evaluate(&self, expression: &str) -> BrowserResult<Value> {
        if let Some(kind) = ScriptKind::of(expression) {
            debug!("evaluate {}", kind.as_str());
        }
        let response = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("uncaught exception");
            return Err(BrowserError::Evaluation(text.to_string()));
        }

        Ok(response["result"]["value"].clone())
    }

    async fn add_init_script(&self, source: &str) -> BrowserResult<()> {
        self.command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": source }),
        )
        .await?;
        Ok(())
    }

    async fn cookies(&self) -> BrowserResult<Vec<StoredCookie>> {
        let response = self.command("Network.getAllCookies", json!({})).await?;
        let cookies: Vec<StoredCookie> =
            serde_json::from_value(response["cookies"].clone()).unwrap_or_default();
        Ok(cookies
            .into_iter()
            .map(|mut cookie| {
                // Session cookies come back with expires = -1.
                if cookie.expires.is_some_and(|e| e <= 0.0) {
                    cookie.expires = None;
                }
                cookie
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> BrowserResult<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        self.command("Network.setCookies", json!({ "cookies": cookies }))
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.abort();
        }
        if let Some(conn) = self.conn.as_deref() {
            if !conn.is_closed() {
                if let Err(err) = conn
                    .call("Browser.close", json!({}), None, CLOSE_TIMEOUT)
                    .await
                {
                    debug!("Browser.close failed: {err}");
                }
            }
        }

        let child = match self.child.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut child) = child {
            match tokio::time::timeout(CLOSE_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!("browser exited with {status}"),
                _ => {
                    if let Err(err) = child.kill().await {
                        warn!("failed to kill browser process: {err}");
                    }
                }
            }
        }
        remove_profile(&self.profile_dir);
    }
}

fn remove_profile(dir: &Path) {
    if dir.exists() {
        if let Err(err) = std::fs::remove_dir_all(dir) {
            debug!("failed to remove profile {}: {err}", dir.display());
        }
    }
}

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("CHROME") {
        let candidate = PathBuf::from(raw.trim());
        if candidate.exists() {
            return Some(candidate);
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|root| PathBuf::from(root).join("Google/Chrome/Application/chrome.exe"))
            .collect()
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}
