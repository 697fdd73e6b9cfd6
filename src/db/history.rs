//! Append-only check history.

use chrono::{DateTime, Utc};
use rusqlite::{params, Result as SqlResult, Row};

use super::models::*;
use super::store::*;

fn record_from_row(row: &Row<'_>) -> SqlResult<CheckRecord> {
    let time_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let status = CheckStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("invalid check status {:?}", status_str).into(),
        )
    })?;
    let time = parse_db_time(&time_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid check time {:?}", time_str).into(),
        )
    })?;
    Ok(CheckRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        time,
        status,
        ping_ms: row.get(4)?,
    })
}

impl Store {
    /// Append one check for a target. Unknown targets are `NotFound`.
    pub fn append_check(
        &self,
        target_id: i64,
        outcome: &CheckOutcome,
        time: DateTime<Utc>,
    ) -> Result<CheckRecord, DbError> {
        let ping_ms = outcome.latency();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO checks (target_id, time, status, ping_ms) VALUES (?1, ?2, ?3, ?4)",
            params![target_id, format_db_time(&time), outcome.status.as_str(), ping_ms],
        )
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                DbError::NotFound
            } else {
                DbError::Sqlite(e)
            }
        })?;

        Ok(CheckRecord {
            id: conn.last_insert_rowid(),
            target_id,
            time,
            status: outcome.status,
            ping_ms,
        })
    }

    /// Up to `limit` most recent checks for a target, newest first.
    pub fn recent_checks(&self, target_id: i64, limit: usize) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, time, status, ping_ms FROM checks
             WHERE target_id = ?1 ORDER BY time DESC, id DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![target_id, limit as i64], record_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }

    /// Checks for a target at or after `since`, oldest first.
    pub fn history_since(&self, target_id: i64, since: DateTime<Utc>) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, time, status, ping_ms FROM checks
             WHERE target_id = ?1 AND time >= ?2 ORDER BY time ASC, id ASC",
        )?;
        let records = stmt
            .query_map(params![target_id, format_db_time(&since)], record_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }

    /// Newest checks across all targets, for export.
    pub fn export_checks(&self, limit: usize) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_id, time, status, ping_ms FROM checks ORDER BY time DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], record_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn register(store: &Store, address: &str) -> i64 {
        store.add_target(&NewTarget::new(address)).unwrap().id
    }

    #[test]
    fn test_recent_is_newest_first_and_bounded() {
        let (store, _tmp) = test_store();
        let id = register(&store, "10.0.0.1");
        let start = Utc::now();

        for i in 0..8 {
            let outcome = if i % 2 == 0 { CheckOutcome::up(i as f64) } else { CheckOutcome::down() };
            store
                .append_check(id, &outcome, start + ChronoDuration::seconds(i))
                .unwrap();
        }

        let recent = store.recent_checks(id, 5).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].time, start + ChronoDuration::seconds(7));
        assert!(recent.windows(2).all(|w| w[0].time > w[1].time));

        assert_eq!(store.recent_checks(id, 60).unwrap().len(), 8);
    }

    #[test]
    fn test_recent_empty_for_unchecked_target() {
        let (store, _tmp) = test_store();
        let id = register(&store, "10.0.0.1");
        assert!(store.recent_checks(id, 5).unwrap().is_empty());
    }

    #[test]
    fn test_down_check_stores_null_latency() {
        let (store, _tmp) = test_store();
        let id = register(&store, "10.0.0.1");

        let record = store.append_check(id, &CheckOutcome::down(), Utc::now()).unwrap();
        assert_eq!(record.status, CheckStatus::Down);
        assert_eq!(record.ping_ms, None);

        let stored = &store.recent_checks(id, 1).unwrap()[0];
        assert_eq!(stored, &record);
    }

    #[test]
    fn test_append_for_unknown_target_is_not_found() {
        let (store, _tmp) = test_store();
        assert!(matches!(
            store.append_check(7, &CheckOutcome::up(1.0), Utc::now()),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn test_delete_target_cascades_to_checks() {
        let (store, _tmp) = test_store();
        let doomed = register(&store, "10.0.0.1");
        let kept = register(&store, "10.0.0.2");
        for id in [doomed, kept] {
            store.append_check(id, &CheckOutcome::up(1.0), Utc::now()).unwrap();
        }

        store.delete_target(doomed).unwrap();

        assert!(store.recent_checks(doomed, 60).unwrap().is_empty());
        assert_eq!(store.recent_checks(kept, 60).unwrap().len(), 1);
        assert!(store.export_checks(100).unwrap().iter().all(|r| r.target_id == kept));
    }

    #[test]
    fn test_unreadable_check_time_is_an_error() {
        let (store, tmp) = test_store();
        let id = register(&store, "10.0.0.1");
        store.append_check(id, &CheckOutcome::up(1.0), Utc::now()).unwrap();

        let conn = rusqlite::Connection::open(tmp.path()).unwrap();
        conn.execute("UPDATE checks SET time = 'yesterday'", []).unwrap();

        assert!(matches!(
            store.recent_checks(id, 5),
            Err(DbError::Sqlite(rusqlite::Error::FromSqlConversionFailure(2, _, _)))
        ));
    }

    #[test]
    fn test_history_since_is_oldest_first() {
        let (store, _tmp) = test_store();
        let id = register(&store, "10.0.0.1");
        let now = Utc::now();

        store
            .append_check(id, &CheckOutcome::up(1.0), now - ChronoDuration::hours(2))
            .unwrap();
        store
            .append_check(id, &CheckOutcome::down(), now - ChronoDuration::minutes(30))
            .unwrap();
        store
            .append_check(id, &CheckOutcome::up(2.0), now - ChronoDuration::minutes(5))
            .unwrap();

        let history = store.history_since(id, now - ChronoDuration::hours(1)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, CheckStatus::Down);
        assert_eq!(history[1].ping_ms, Some(2.0));
    }
}
