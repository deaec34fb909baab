use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use uuid::Uuid;

/// A browser cookie in the shape CDP's `Network.getAllCookies` returns and
/// `Network.setCookies` accepts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".into()
}

/// `localStorage` contents for one origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OriginStorage {
    pub origin: String,
    pub local_storage: Vec<(String, String)>,
}

/// Serialized authentication context. Opaque to everything but the browser
/// adapter; replaced wholesale after each successful login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub origins: Vec<OriginStorage>,
}

impl SessionState {
    pub fn new(cookies: Vec<StoredCookie>, origins: Vec<OriginStorage>) -> Self {
        Self {
            saved_at: Utc::now(),
            cookies,
            origins,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.origins.iter().all(|o| o.local_storage.is_empty())
    }
}

/// On-disk session file. The collector is its only writer.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Loads the stored session. A missing file is `None`; so is an unreadable
    /// one, which is logged and left for the next login to replace.
    pub fn load(&self) -> Result<Option<SessionState>> {
        if !self.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read session state from {}", self.path.display()))?;

        match serde_json::from_str::<SessionState>(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!(
                    "Ignoring unreadable session state at {}: {err}",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    /// Replaces the stored session atomically (temp file + rename).
    pub fn save(&self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create session directory {}", parent.display())
                })?;
            }
        }

        let serialized = serde_json::to_string_pretty(state)?;
        let tmp_path = self
            .path
            .with_extension(format!("tmp-{}", Uuid::new_v4().simple()));

        fs::write(&tmp_path, serialized)
            .with_context(|| format!("Failed to write session state to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("Failed to move session state into {}", self.path.display())
        })
    }
}
