//! Scripted login.
//!
//! Tried at most once per browser lifecycle, only when there is no stored
//! session and credentials are configured. Success is assumed after the settle
//! period; nothing checks that the site actually accepted the login.

use std::{fmt, time::Duration};

use crate::{
    browser::{dom, BrowserError, BrowserResult, BrowserSession},
    config::Credentials,
    session::{SessionState, SessionStore},
};

use super::session_sync::capture_session_state;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const EMAIL_SELECTORS: &[&str] = &[
    r#"input[type="email"]"#,
    r#"input[name="email"]"#,
    r#"input[name="login"]"#,
    r#"input[name="username"]"#,
    "#email",
    "#login",
];

pub const PASSWORD_SELECTORS: &[&str] = &[
    r#"input[type="password"]"#,
    r#"input[name="password"]"#,
    "#password",
];

pub const SUBMIT_SELECTORS: &[&str] = &[
    r#"button[type="submit"]"#,
    r#"input[type="submit"]"#,
    r#"button[name="login"]"#,
    "#login-button",
    ".login-button",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SessionPresent,
    NoCredentials,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SessionPresent => write!(f, "stored session present"),
            SkipReason::NoCredentials => write!(f, "no credentials configured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Skipped(SkipReason),
    /// Login submitted. `persisted` is false if the session could not be saved.
    Succeeded { persisted: bool },
    Failed(String),
}

pub struct Authenticator<'a> {
    credentials: Option<&'a Credentials>,
    store: &'a SessionStore,
    settle: Duration,
}

impl<'a> Authenticator<'a> {
    pub fn new(credentials: Option<&'a Credentials>, store: &'a SessionStore, settle: Duration) -> Self {
        Self {
            credentials,
            store,
            settle,
        }
    }

    /// Why login would not be attempted, if it would not.
    pub fn skip_reason(&self, session_present: bool) -> Option<SkipReason> {
        if session_present {
            Some(SkipReason::SessionPresent)
        } else if self.credentials.is_none() {
            Some(SkipReason::NoCredentials)
        } else {
            None
        }
    }

    pub async fn run(&self, page: &dyn BrowserSession, session_present: bool) -> AuthOutcome {
        if let Some(reason) = self.skip_reason(session_present) {
            return AuthOutcome::Skipped(reason);
        }
        let Some(credentials) = self.credentials else {
            return AuthOutcome::Skipped(SkipReason::NoCredentials);
        };

        if let Err(err) = self.submit_login(page, credentials).await {
            log_warn!("login attempt abandoned: {err}");
            return AuthOutcome::Failed(err.to_string());
        }

        tokio::time::sleep(self.settle).await;

        let state = match capture_session_state(page).await {
            Ok(state) => state,
            Err(err) => {
                log_warn!("login submitted but session capture failed: {err}");
                return AuthOutcome::Succeeded { persisted: false };
            }
        };

        AuthOutcome::Succeeded {
            persisted: self.persist(&state),
        }
    }

    async fn submit_login(
        &self,
        page: &dyn BrowserSession,
        credentials: &Credentials,
    ) -> BrowserResult<()> {
        let password_selector = dom::first_present(page, PASSWORD_SELECTORS)
            .await?
            .ok_or_else(|| BrowserError::NotFound("login form password field".into()))?;

        match dom::first_present(page, EMAIL_SELECTORS).await? {
            Some(selector) => dom::fill(page, &selector, &credentials.email).await?,
            None => log_warn!("no email field found; submitting password only"),
        }
        dom::fill(page, &password_selector, &credentials.password).await?;

        let submit_selector = dom::first_present(page, SUBMIT_SELECTORS)
            .await?
            .ok_or_else(|| BrowserError::NotFound("login submit control".into()))?;
        dom::click(page, &submit_selector).await?;

        log_info!("login submitted via {submit_selector}");
        Ok(())
    }

    fn persist(&self, state: &SessionState) -> bool {
        match self.store.save(state) {
            Ok(()) => {
                log_info!(
                    "session state saved to {} ({} cookies)",
                    self.store.path().display(),
                    state.cookies.len()
                );
                true
            }
            Err(err) => {
                log_warn!("failed to persist session state: {err:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("s.json"));
        let creds = Credentials {
            email: "a@b".into(),
            password: "pw".into(),
        };

        let without = Authenticator::new(None, &store, Duration::ZERO);
        assert_eq!(without.skip_reason(false), Some(SkipReason::NoCredentials));
        assert_eq!(without.skip_reason(true), Some(SkipReason::SessionPresent));

        let with = Authenticator::new(Some(&creds), &store, Duration::ZERO);
        assert_eq!(with.skip_reason(false), None);
        assert_eq!(with.skip_reason(true), Some(SkipReason::SessionPresent));
    }
}
