#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use roundtap_lib::{
    browser::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession, ScriptKind},
    collector::{PollSettings, SupervisorSettings},
    db::{NewRound, RoundRecord, RoundSink},
    session::StoredCookie,
};

/// Everything the fake browsers saw, shared across lifecycles.
#[derive(Debug, Default)]
pub struct Journal {
    pub launches: usize,
    pub closes: usize,
    pub navigations: Vec<String>,
    pub scripts: Vec<ScriptKind>,
    pub init_scripts: Vec<Option<ScriptKind>>,
    pub cookies_set: Vec<StoredCookie>,
    /// Navigations and init-script registrations, in call order.
    pub timeline: Vec<String>,
}

impl Journal {
    pub fn count(&self, kind: ScriptKind) -> usize {
        self.scripts.iter().filter(|k| **k == kind).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.timeline.iter().position(|e| e == entry)
    }
}

/// How each fake page behaves.
#[derive(Debug, Default)]
pub struct Plan {
    /// Launch attempts that fail before one succeeds (counts down).
    pub failing_launches: usize,
    /// Every launch fails.
    pub always_fail_launch: bool,
    /// Page reports a lost browser on this drain (1-based), per lifecycle.
    pub crash_on_drain: Option<usize>,
    /// Drain results, consumed across lifecycles; empty → `[]`.
    pub drains: VecDeque<BrowserResult<Value>>,
    /// Visible-text results; the last one repeats.
    pub dom_texts: VecDeque<Option<String>>,
    pub hook_error: Option<BrowserError>,
    pub login_form: bool,
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    pub plan: Arc<Mutex<Plan>>,
    pub journal: Arc<Mutex<Journal>>,
}

impl FakeLauncher {
    pub fn with_plan(plan: Plan) -> Self {
        Self {
            plan: Arc::new(Mutex::new(plan)),
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        self.journal.lock().unwrap().launches += 1;
        {
            let mut plan = self.plan.lock().unwrap();
            if plan.always_fail_launch {
                return Err(BrowserError::Launch("no browser in test".into()));
            }
            if plan.failing_launches > 0 {
                plan.failing_launches -= 1;
                return Err(BrowserError::Launch("flaky launch".into()));
            }
        }
        Ok(Box::new(FakePage {
            plan: Arc::clone(&self.plan),
            journal: Arc::clone(&self.journal),
            drains_seen: Mutex::new(0),
        }))
    }
}

pub struct FakePage {
    plan: Arc<Mutex<Plan>>,
    journal: Arc<Mutex<Journal>>,
    drains_seen: Mutex<usize>,
}

impl FakePage {
    pub fn new(plan: Plan) -> (Self, Arc<Mutex<Journal>>) {
        let journal = Arc::new(Mutex::new(Journal::default()));
        (
            Self {
                plan: Arc::new(Mutex::new(plan)),
                journal: Arc::clone(&journal),
                drains_seen: Mutex::new(0),
            },
            journal,
        )
    }

    fn drain(&self) -> BrowserResult<Value> {
        let mut seen = self.drains_seen.lock().unwrap();
        *seen += 1;
        let mut plan = self.plan.lock().unwrap();
        if plan.crash_on_drain == Some(*seen) {
            return Err(BrowserError::Disconnected("renderer gone".into()));
        }
        plan.drains.pop_front().unwrap_or_else(|| Ok(json!([])))
    }

    fn visible_text(&self) -> Value {
        let mut plan = self.plan.lock().unwrap();
        let text = if plan.dom_texts.len() > 1 {
            plan.dom_texts.pop_front().flatten()
        } else {
            plan.dom_texts.front().cloned().flatten()
        };
        match text {
            Some(text) => json!({ "selector": ".multiplier", "text": text }),
            None => Value::Null,
        }
    }
}

#[async_trait]
impl BrowserSession for FakePage {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let mut journal = self.journal.lock().unwrap();
        journal.navigations.push(url.to_string());
        journal.timeline.push("navigate".into());
        Ok(())
    }

    async fn wait_for_network_idle(&self, _quiet: Duration, _ceiling: Duration) -> BrowserResult<()> {
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> BrowserResult<Value> {
        let kind = ScriptKind::of(expression)
            .ok_or_else(|| BrowserError::Evaluation("untagged script".into()))?;
        self.journal.lock().unwrap().scripts.push(kind);

        match kind {
            ScriptKind::InstallHooks => match self.plan.lock().unwrap().hook_error.clone() {
                Some(err) => Err(err),
                None => Ok(json!("installed")),
            },
            ScriptKind::DrainEvents => self.drain(),
            ScriptKind::VisibleText => Ok(self.visible_text()),
            ScriptKind::FirstPresent => {
                if !self.plan.lock().unwrap().login_form {
                    return Ok(Value::Null);
                }
                if expression.contains("password") {
                    Ok(json!(r#"input[type="password"]"#))
                } else if expression.contains("submit") {
                    Ok(json!(r#"button[type="submit"]"#))
                } else {
                    Ok(json!(r#"input[type="email"]"#))
                }
            }
            ScriptKind::Fill | ScriptKind::Click | ScriptKind::StorageRestore => Ok(json!(true)),
            ScriptKind::StorageSnapshot => Ok(json!({
                "origin": "https://game.example.test",
                "entries": [["token", "abc"]],
            })),
        }
    }

    async fn add_init_script(&self, source: &str) -> BrowserResult<()> {
        let kind = ScriptKind::of(source);
        let mut journal = self.journal.lock().unwrap();
        journal.init_scripts.push(kind);
        journal.timeline.push(format!(
            "init:{}",
            kind.map(|k| k.as_str()).unwrap_or("untagged")
        ));
        Ok(())
    }

    async fn cookies(&self) -> BrowserResult<Vec<StoredCookie>> {
        Ok(vec![cookie("sid")])
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> BrowserResult<()> {
        self.journal
            .lock()
            .unwrap()
            .cookies_set
            .extend(cookies.iter().cloned());
        Ok(())
    }

    async fn close(&self) {
        self.journal.lock().unwrap().closes += 1;
    }
}

pub fn cookie(name: &str) -> StoredCookie {
    StoredCookie {
        name: name.into(),
        value: "v".into(),
        domain: "game.example.test".into(),
        path: "/".into(),
        expires: None,
        http_only: true,
        secure: true,
        same_site: None,
    }
}

/// In-memory round sink; `fail_next` rejects that many appends first.
#[derive(Default)]
pub struct MemorySink {
    rounds: Mutex<Vec<RoundRecord>>,
    fail_next: Mutex<usize>,
}

impl MemorySink {
    pub fn failing(times: usize) -> Self {
        Self {
            rounds: Mutex::new(Vec::new()),
            fail_next: Mutex::new(times),
        }
    }

    pub fn rounds(&self) -> Vec<RoundRecord> {
        self.rounds.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoundSink for MemorySink {
    async fn append(&self, round: NewRound) -> Result<RoundRecord> {
        {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(anyhow!("disk full"));
            }
        }
        let mut rounds = self.rounds.lock().unwrap();
        let record = RoundRecord {
            id: rounds.len() as i64 + 1,
            round_id: round.round_id,
            observed_at: Utc::now(),
            value: round.value,
            raw: round.raw,
            source: round.source,
            room: round.room,
        };
        rounds.push(record.clone());
        Ok(record)
    }
}

pub fn poll_settings() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(10),
        call_timeout: Duration::from_secs(1),
        room: Some("main".into()),
        keep_unparsed: false,
    }
}

pub fn supervisor_settings() -> SupervisorSettings {
    SupervisorSettings {
        target_url: "https://game.example.test/play".into(),
        credentials: None,
        poll: poll_settings(),
        backoff: Duration::from_millis(200),
        navigation_ceiling: Duration::from_secs(1),
        network_quiet: Duration::from_millis(10),
        login_settle: Duration::from_millis(10),
    }
}
