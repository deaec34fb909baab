use serde::Deserialize;

use crate::{
    browser::{dom::js_string, BrowserResult, BrowserSession, ScriptKind},
    session::{OriginStorage, SessionState},
};

const SNAPSHOT_BODY: &str = r#"(() => {
  const entries = [];
  try {
    for (let i = 0; i < localStorage.length; i++) {
      const k = localStorage.key(i);
      entries.push([k, localStorage.getItem(k)]);
    }
  } catch (_) {}
  return { origin: location.origin, entries };
})()"#;

#[derive(Debug, Deserialize)]
struct StorageSnapshot {
    origin: String,
    #[serde(default)]
    entries: Vec<(String, Option<String>)>,
}

/// Cookies for every origin plus `localStorage` of the current one.
pub async fn capture_session_state(page: &dyn BrowserSession) -> BrowserResult<SessionState> {
    let cookies = page.cookies().await?;

    let snapshot = page
        .evaluate(&ScriptKind::StorageSnapshot.wrap(SNAPSHOT_BODY))
        .await?;
    let origins = match serde_json::from_value::<StorageSnapshot>(snapshot) {
        Ok(snapshot) if snapshot.origin != "null" => vec![OriginStorage {
            origin: snapshot.origin,
            local_storage: snapshot
                .entries
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect(),
        }],
        _ => Vec::new(),
    };

    Ok(SessionState::new(cookies, origins))
}

/// Script that seeds `localStorage` for `origin` on the next document load,
/// without overwriting keys the page already set.
pub fn storage_restore_script(storage: &OriginStorage) -> String {
    let entries = serde_json::to_string(&storage.local_storage).unwrap_or_else(|_| "[]".into());
    ScriptKind::StorageRestore.wrap(&format!(
        r#"(() => {{
  if (location.origin !== {origin}) return false;
  try {{
    for (const [k, v] of {entries}) {{
      if (localStorage.getItem(k) === null) localStorage.setItem(k, v);
    }}
  }} catch (_) {{ return false; }}
  return true;
}})()"#,
        origin = js_string(&storage.origin),
    ))
}

/// Re-applies a stored session before the first navigation.
pub async fn restore_session_state(
    page: &dyn BrowserSession,
    state: &SessionState,
) -> BrowserResult<()> {
    page.set_cookies(&state.cookies).await?;
    for storage in state.origins.iter().filter(|o| !o.local_storage.is_empty()) {
        page.add_init_script(&storage_restore_script(storage)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_script_is_scoped_to_origin() {
        let script = storage_restore_script(&OriginStorage {
            origin: "https://game.example.test".into(),
            local_storage: vec![("token".into(), "a\"b".into())],
        });
        assert_eq!(ScriptKind::of(&script), Some(ScriptKind::StorageRestore));
        assert!(script.contains(r#"location.origin !== "https://game.example.test""#));
        assert!(script.contains(r#"[["token","a\"b"]]"#));
    }
}
