//! In-page traffic hooks.
//!
//! The hook script wraps `WebSocket`, `fetch` and `XMLHttpRequest` so every
//! inbound socket message and every JSON response body lands in
//! `window.__roundtapBuffer`. The controller drains that buffer once per poll
//! tick by swapping it for an empty array (JS is single-threaded, so the swap
//! is atomic with respect to the hooks).
//!
//! Back-pressure: the buffer only shrinks when it is drained. If polling stalls
//! for long while the page is chatty, it grows until the script's hard cap
//! (`MAX_BUFFERED_EVENTS`) starts discarding the oldest entries.

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::browser::{BrowserResult, BrowserSession, ScriptKind};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const MAX_BUFFERED_EVENTS: usize = 5000;

const HOOK_BODY: &str = r#"(() => {
  if (window.__roundtapHooked) return "already-installed";
  window.__roundtapHooked = true;
  if (!Array.isArray(window.__roundtapBuffer)) window.__roundtapBuffer = [];

  const push = (entry) => {
    const buf = window.__roundtapBuffer;
    buf.push(entry);
    if (buf.length > __MAX__) buf.splice(0, buf.length - __MAX__);
  };
  const tryParse = (text) => {
    if (typeof text !== "string") return null;
    try { return JSON.parse(text); } catch (_) {}
    const i = text.indexOf("[");
    if (i >= 0) { try { return JSON.parse(text.slice(i)); } catch (_) {} }
    return null;
  };
  const isJson = (ct) => typeof ct === "string" && ct.toLowerCase().indexOf("json") !== -1;
  const record = (source, url, raw) => {
    push({ source, url: url || null, raw, parsed: tryParse(raw), ts: Date.now() });
  };

  const NativeWebSocket = window.WebSocket;
  if (NativeWebSocket) {
    const Hooked = function (...args) {
      const ws = new NativeWebSocket(...args);
      ws.addEventListener("message", (ev) => {
        try {
          const data = ev.data;
          if (typeof data === "string") {
            record("ws", ws.url, data);
          } else if (data instanceof ArrayBuffer) {
            record("ws", ws.url, new TextDecoder().decode(data));
          } else if (typeof Blob !== "undefined" && data instanceof Blob) {
            data.text().then((t) => record("ws", ws.url, t)).catch(() => {});
          }
        } catch (_) {}
      });
      return ws;
    };
    Hooked.prototype = NativeWebSocket.prototype;
    for (const k of ["CONNECTING", "OPEN", "CLOSING", "CLOSED"]) Hooked[k] = NativeWebSocket[k];
    window.WebSocket = Hooked;
  }

  const nativeFetch = window.fetch;
  if (nativeFetch) {
    window.fetch = function (...args) {
      return nativeFetch.apply(this, args).then((resp) => {
        try {
          if (isJson(resp.headers.get("content-type"))) {
            resp.clone().text().then((t) => record("http", resp.url, t)).catch(() => {});
          }
        } catch (_) {}
        return resp;
      });
    };
  }

  const Xhr = window.XMLHttpRequest;
  if (Xhr) {
    const nativeSend = Xhr.prototype.send;
    Xhr.prototype.send = function (...args) {
      this.addEventListener("load", () => {
        try {
          if ((this.responseType === "" || this.responseType === "text") &&
              isJson(this.getResponseHeader("content-type"))) {
            record("xhr", this.responseURL, this.responseText);
          }
        } catch (_) {}
      });
      return nativeSend.apply(this, args);
    };
  }
  return "installed";
})()"#;

const DRAIN_BODY: &str = r#"(() => {
  const buf = Array.isArray(window.__roundtapBuffer) ? window.__roundtapBuffer : [];
  window.__roundtapBuffer = [];
  return buf;
})()"#;

pub fn hook_script() -> String {
    ScriptKind::InstallHooks.wrap(&HOOK_BODY.replace("__MAX__", &MAX_BUFFERED_EVENTS.to_string()))
}

pub fn drain_script() -> String {
    ScriptKind::DrainEvents.wrap(DRAIN_BODY)
}

/// One intercepted network message, as pushed by the hook script.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CapturedEvent {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub parsed: Option<Value>,
    #[serde(default)]
    pub ts: Option<f64>,
}

/// Registers the hooks for every future document, once.
///
/// Runs before the first navigation so sockets the page opens while loading
/// are already built by the wrapped constructor.
pub async fn register(page: &dyn BrowserSession, registered: &mut bool) -> BrowserResult<()> {
    if *registered {
        return Ok(());
    }
    page.add_init_script(&hook_script()).await?;
    *registered = true;
    debug!("hook script registered for new documents");
    Ok(())
}

/// Makes sure the current document is hooked, once.
///
/// Registers the script if that has not happened yet, then evaluates it in the
/// live document. The script is guarded by `window.__roundtapHooked`, so a
/// document that already ran it from the init script is left unchanged.
pub async fn install(
    page: &dyn BrowserSession,
    registered: &mut bool,
    already_installed: &mut bool,
) -> BrowserResult<()> {
    if *already_installed {
        debug!("hooks already installed for this page");
        return Ok(());
    }

    register(page, registered).await?;
    let outcome = page.evaluate(&hook_script()).await?;
    *already_installed = true;

    log_info!(
        "instrumentation hooks {}",
        outcome.as_str().unwrap_or("installed")
    );
    Ok(())
}

/// Reads and clears the page buffer. Malformed entries are skipped.
pub async fn drain(page: &dyn BrowserSession) -> BrowserResult<Vec<CapturedEvent>> {
    let value = page.evaluate(&drain_script()).await?;
    Ok(decode_events(value))
}

fn decode_events(value: Value) -> Vec<CapturedEvent> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<CapturedEvent>(item) {
                Ok(event) => Some(event),
                Err(err) => {
                    log_warn!("skipping malformed captured event: {err}");
                    None
                }
            })
            .collect(),
        Value::Null => Vec::new(),
        other => {
            warn!("unexpected drain result: {other}");
            Vec::new()
        }
    }
}
