use anyhow::Result;
use async_trait::async_trait;

use super::{Database, NewRound, RoundRecord};

/// Append-only destination for collected rounds.
///
/// The collector only ever writes through this trait, so tests can swap the
/// SQLite store for an in-memory one.
#[async_trait]
pub trait RoundSink: Send + Sync {
    async fn append(&self, round: NewRound) -> Result<RoundRecord>;
}

#[async_trait]
impl RoundSink for Database {
    async fn append(&self, round: NewRound) -> Result<RoundRecord> {
        self.insert_round(round).await
    }
}
