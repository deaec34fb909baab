//! Page scripts and the DOM helpers built on them.
//!
//! Every script the collector evaluates starts with a `/*roundtap:<kind>*/`
//! tag so logs (and scripted test browsers) can tell them apart.

use serde_json::Value;

use super::{BrowserError, BrowserResult, BrowserSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    InstallHooks,
    DrainEvents,
    VisibleText,
    FirstPresent,
    Fill,
    Click,
    StorageSnapshot,
    StorageRestore,
}

impl ScriptKind {
    const ALL: [ScriptKind; 8] = [
        ScriptKind::InstallHooks,
        ScriptKind::DrainEvents,
        ScriptKind::VisibleText,
        ScriptKind::FirstPresent,
        ScriptKind::Fill,
        ScriptKind::Click,
        ScriptKind::StorageSnapshot,
        ScriptKind::StorageRestore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::InstallHooks => "install-hooks",
            ScriptKind::DrainEvents => "drain-events",
            ScriptKind::VisibleText => "visible-text",
            ScriptKind::FirstPresent => "first-present",
            ScriptKind::Fill => "fill",
            ScriptKind::Click => "click",
            ScriptKind::StorageSnapshot => "storage-snapshot",
            ScriptKind::StorageRestore => "storage-restore",
        }
    }

    pub fn tag(&self) -> String {
        format!("/*roundtap:{}*/", self.as_str())
    }

    /// Recovers the kind from a tagged script.
    pub fn of(expression: &str) -> Option<ScriptKind> {
        let rest = expression.trim_start().strip_prefix("/*roundtap:")?;
        let name = &rest[..rest.find("*/")?];
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn wrap(&self, body: &str) -> String {
        format!("{}{}", self.tag(), body)
    }
}

/// JSON-encodes a string so it can be spliced into a script as a literal.
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".into())
}

fn js_string_array(values: &[&str]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".into())
}

/// Returns the first selector in `selectors` that matches an element.
pub async fn first_present(
    page: &dyn BrowserSession,
    selectors: &[&str],
) -> BrowserResult<Option<String>> {
    let script = ScriptKind::FirstPresent.wrap(&format!(
        "(() => {{ for (const s of {list}) {{ try {{ if (document.querySelector(s)) return s; }} catch (_) {{}} }} return null; }})()",
        list = js_string_array(selectors)
    ));
    Ok(page.evaluate(&script).await?.as_str().map(str::to_string))
}

/// Sets an input's value the way a user would, firing `input` and `change`.
pub async fn fill(page: &dyn BrowserSession, selector: &str, value: &str) -> BrowserResult<()> {
    let script = ScriptKind::Fill.wrap(&format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.focus();
  const proto = Object.getPrototypeOf(el);
  const setter = Object.getOwnPropertyDescriptor(proto, "value");
  if (setter && setter.set) {{ setter.set.call(el, {val}); }} else {{ el.value = {val}; }}
  el.dispatchEvent(new Event("input", {{ bubbles: true }}));
  el.dispatchEvent(new Event("change", {{ bubbles: true }}));
  return true;
}})()"#,
        sel = js_string(selector),
        val = js_string(value)
    ));
    expect_true(page.evaluate(&script).await?, selector)
}

pub async fn click(page: &dyn BrowserSession, selector: &str) -> BrowserResult<()> {
    let script = ScriptKind::Click.wrap(&format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.click(); return true; }})()",
        sel = js_string(selector)
    ));
    expect_true(page.evaluate(&script).await?, selector)
}

/// Visible text of the first selector with non-empty rendered text.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleText {
    pub selector: String,
    pub text: String,
}

pub async fn first_visible_text(
    page: &dyn BrowserSession,
    selectors: &[&str],
) -> BrowserResult<Option<VisibleText>> {
    let script = ScriptKind::VisibleText.wrap(&format!(
        r#"(() => {{
  for (const s of {list}) {{
    let el = null;
    try {{ el = document.querySelector(s); }} catch (_) {{ continue; }}
    if (!el) continue;
    const text = (el.innerText || el.textContent || "").trim();
    if (text) return {{ selector: s, text }};
  }}
  return null;
}})()"#,
        list = js_string_array(selectors)
    ));
    let value = page.evaluate(&script).await?;
    if value.is_null() {
        return Ok(None);
    }
    match (value["selector"].as_str(), value["text"].as_str()) {
        (Some(selector), Some(text)) => Ok(Some(VisibleText {
            selector: selector.to_string(),
            text: text.to_string(),
        })),
        _ => Err(BrowserError::Evaluation(format!(
            "unexpected visible-text result: {value}"
        ))),
    }
}

fn expect_true(value: Value, selector: &str) -> BrowserResult<()> {
    if value.as_bool() == Some(true) {
        Ok(())
    } else {
        Err(BrowserError::NotFound(selector.to_string()))
    }
}
