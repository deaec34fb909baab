//! Round data model.
//!
//! A round is one outcome observed on the upstream page. Rows are append-only:
//! the store assigns `id` and `observed_at`, and nothing rewrites them later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a round observation came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundSource {
    #[serde(rename = "ws")]
    WebSocket,
    Http,
    Dom,
    Unknown,
}

impl RoundSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundSource::WebSocket => "ws",
            RoundSource::Http => "http",
            RoundSource::Dom => "dom",
            RoundSource::Unknown => "unknown",
        }
    }

    /// Maps the source tag the page hooks attach to each captured event.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "ws" => RoundSource::WebSocket,
            "http" | "fetch" | "xhr" => RoundSource::Http,
            "dom" => RoundSource::Dom,
            _ => RoundSource::Unknown,
        }
    }
}

/// A persisted round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub id: i64,
    pub round_id: Option<String>,
    pub observed_at: DateTime<Utc>,
    /// `None` means the event was captured but carried no parseable number.
    pub value: Option<f64>,
    pub raw: Option<String>,
    pub source: RoundSource,
    pub room: Option<String>,
}

/// Insert payload; `id` and `observed_at` are stamped by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRound {
    pub round_id: Option<String>,
    pub value: Option<f64>,
    pub raw: Option<String>,
    pub source: RoundSource,
    pub room: Option<String>,
}

impl NewRound {
    pub fn new(source: RoundSource) -> Self {
        Self {
            round_id: None,
            value: None,
            raw: None,
            source,
            room: None,
        }
    }

    pub fn with_value(mut self, value: Option<f64>) -> Self {
        self.value = value;
        self
    }

    pub fn with_round_id(mut self, round_id: Option<String>) -> Self {
        self.round_id = round_id;
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn with_room(mut self, room: Option<String>) -> Self {
        self.room = room;
        self
    }
}
