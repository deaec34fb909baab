use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::params;

use crate::db::{
    helpers::{invalid_data, parse_datetime, parse_source, to_i64},
    models::{NewRound, RoundRecord},
    Database,
};

const SELECT_COLUMNS: &str = "id, round_id, observed_at, value, raw, source, room";

fn map_round(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoundRecord> {
    let observed_at_str: String = row.get(2)?;
    let source_str: String = row.get(5)?;
    let observed_at = parse_datetime(&observed_at_str, "observed_at").map_err(invalid_data)?;

    Ok(RoundRecord {
        id: row.get(0)?,
        round_id: row.get(1)?,
        observed_at,
        value: row.get(3)?,
        raw: row.get(4)?,
        source: parse_source(&source_str),
        room: row.get(6)?,
    })
}

impl Database {
    /// Appends a round and returns the stored row.
    ///
    /// `observed_at` is stamped on the worker thread so ids and timestamps
    /// advance together.
    pub async fn insert_round(&self, round: NewRound) -> Result<RoundRecord> {
        self.execute(move |conn| {
            let observed_at = Utc::now();
            // Non-finite floats are stored as NULL rather than rejected.
            let value = round.value.filter(|v| v.is_finite());

            conn.execute(
                "INSERT INTO rounds (round_id, observed_at, value, raw, source, room)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    round.round_id,
                    observed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                    value,
                    round.raw,
                    round.source.as_str(),
                    round.room,
                ],
            )
            .with_context(|| "failed to insert round")?;

            Ok(RoundRecord {
                id: conn.last_insert_rowid(),
                round_id: round.round_id,
                observed_at,
                value,
                raw: round.raw,
                source: round.source,
                room: round.room,
            })
        })
        .await
    }

    /// Most recent `limit` rounds, newest first.
    pub async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM rounds
                 ORDER BY id DESC
                 LIMIT ?1"
            ))?;

            let rows = stmt.query_map(params![to_i64(limit)?], map_round)?;

            let mut rounds = Vec::new();
            for row in rows {
                rounds.push(row?);
            }
            Ok(rounds)
        })
        .await
    }

    /// Most recent `limit` rounds for one room, newest first.
    pub async fn recent_rounds_for_room(
        &self,
        room: &str,
        limit: usize,
    ) -> Result<Vec<RoundRecord>> {
        let room = room.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM rounds
                 WHERE room = ?1
                 ORDER BY id DESC
                 LIMIT ?2"
            ))?;

            let rows = stmt.query_map(params![room, to_i64(limit)?], map_round)?;

            let mut rounds = Vec::new();
            for row in rows {
                rounds.push(row?);
            }
            Ok(rounds)
        })
        .await
    }

    pub async fn count_rounds(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM rounds", [], |row| row.get(0))?;
            crate::db::helpers::to_u64(count, "count")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, NewRound, RoundSource};

    fn open_temp() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("rounds.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn recent_rounds_are_newest_first_and_keep_null_values() {
        let (_dir, db) = open_temp();

        db.insert_round(
            NewRound::new(RoundSource::WebSocket)
                .with_value(Some(1.5))
                .with_round_id(Some("a".into()))
                .with_raw(r#"{"multiplier":1.5}"#),
        )
        .await
        .unwrap();
        db.insert_round(NewRound::new(RoundSource::Http).with_raw("{}"))
            .await
            .unwrap();
        db.insert_round(
            NewRound::new(RoundSource::Dom)
                .with_value(Some(3.2))
                .with_raw("dom:3.20x"),
        )
        .await
        .unwrap();

        let rounds = db.recent_rounds(10).await.unwrap();
        assert_eq!(rounds.len(), 3);
        assert_eq!(rounds[0].value, Some(3.2));
        assert_eq!(rounds[0].source, RoundSource::Dom);
        assert_eq!(rounds[1].value, None);
        assert_eq!(rounds[1].raw.as_deref(), Some("{}"));
        assert_eq!(rounds[2].round_id.as_deref(), Some("a"));
        assert!(rounds[0].id > rounds[1].id && rounds[1].id > rounds[2].id);
        assert!(rounds[0].observed_at >= rounds[2].observed_at);
    }

    #[tokio::test]
    async fn recent_rounds_respects_limit() {
        let (_dir, db) = open_temp();
        for i in 0..5 {
            db.insert_round(NewRound::new(RoundSource::Dom).with_value(Some(i as f64)))
                .await
                .unwrap();
        }

        let rounds = db.recent_rounds(2).await.unwrap();
        let values: Vec<_> = rounds.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![Some(4.0), Some(3.0)]);
        assert_eq!(db.count_rounds().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn duplicate_round_ids_are_accepted() {
        let (_dir, db) = open_temp();
        for _ in 0..2 {
            db.insert_round(
                NewRound::new(RoundSource::WebSocket)
                    .with_value(Some(2.0))
                    .with_round_id(Some("dup".into())),
            )
            .await
            .unwrap();
        }
        assert_eq!(db.count_rounds().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn filters_by_room() {
        let (_dir, db) = open_temp();
        db.insert_round(
            NewRound::new(RoundSource::Dom)
                .with_value(Some(1.1))
                .with_room(Some("east".into())),
        )
        .await
        .unwrap();
        db.insert_round(
            NewRound::new(RoundSource::Dom)
                .with_value(Some(2.2))
                .with_room(Some("west".into())),
        )
        .await
        .unwrap();

        let east = db.recent_rounds_for_room("east", 10).await.unwrap();
        assert_eq!(east.len(), 1);
        assert_eq!(east[0].value, Some(1.1));
    }

    #[tokio::test]
    async fn rows_cannot_be_updated() {
        let (_dir, db) = open_temp();
        db.insert_round(NewRound::new(RoundSource::Dom).with_value(Some(1.0)))
            .await
            .unwrap();

        let result = db
            .execute(|conn| {
                conn.execute("UPDATE rounds SET value = 9.0", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rows_cannot_be_deleted() {
        let (_dir, db) = open_temp();
        db.insert_round(NewRound::new(RoundSource::Dom).with_value(Some(1.0)))
            .await
            .unwrap();

        let result = db
            .execute(|conn| {
                conn.execute("DELETE FROM rounds", [])?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(db.count_rounds().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn non_finite_values_are_stored_as_null() {
        let (_dir, db) = open_temp();
        let stored = db
            .insert_round(NewRound::new(RoundSource::Http).with_value(Some(f64::NAN)))
            .await
            .unwrap();
        assert_eq!(stored.value, None);
    }
}
