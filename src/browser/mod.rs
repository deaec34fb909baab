//! Browser automation seam.
//!
//! The collector drives pages only through [`BrowserLauncher`] and
//! [`BrowserSession`]. The real implementation speaks the Chrome DevTools
//! Protocol to a locally launched Chromium; tests plug in scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::session::StoredCookie;

pub mod cdp;
pub mod chrome;
pub mod dom;
mod error;

pub use chrome::{ChromeLauncher, LaunchOptions};
pub use dom::ScriptKind;
pub use error::{bounded, BrowserError, BrowserResult};

/// One live page in one browser process.
///
/// Implementations must be safe to share behind a reference, but the collector
/// only ever drives one call at a time.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Starts navigation and returns once the navigation has been committed.
    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    /// Waits until no requests have been in flight for `quiet`, or fails with
    /// a timeout after `ceiling`.
    async fn wait_for_network_idle(&self, quiet: Duration, ceiling: Duration)
        -> BrowserResult<()>;

    /// Evaluates an expression in the page and returns its JSON value.
    async fn evaluate(&self, expression: &str) -> BrowserResult<Value>;

    /// Registers a script to run in every new document before page scripts.
    async fn add_init_script(&self, source: &str) -> BrowserResult<()>;

    async fn cookies(&self) -> BrowserResult<Vec<StoredCookie>>;

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> BrowserResult<()>;

    /// Tears the browser down. Never fails; errors are logged.
    async fn close(&self);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>>;
}
