//! Target registry: listing, metadata CRUD and the denormalized status fields.

use rusqlite::{params, OptionalExtension, Result as SqlResult, Row};

use super::models::*;
use super::store::*;

const TARGET_COLUMNS: &str =
    "id, address, name, device_type, importance, remark, last_status, last_ping_ms, last_checked";

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let last_status: Option<String> = row.get(6)?;
    let last_checked: Option<String> = row.get(8)?;
    Ok(Target {
        id: row.get(0)?,
        address: row.get(1)?,
        name: row.get(2)?,
        device_type: row.get(3)?,
        importance: row.get(4)?,
        remark: row.get(5)?,
        last_status: TargetStatus::from_db(last_status.as_deref()),
        last_ping_ms: row.get(7)?,
        last_checked: last_checked.as_deref().and_then(parse_db_time),
    })
}

impl Store {
    /// Get all targets in creation order.
    pub fn list_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM targets ORDER BY id ASC", TARGET_COLUMNS))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
            params![id],
            target_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Register a new target. Fails with `Conflict` if the address is taken.
    pub fn add_target(&self, target: &NewTarget) -> Result<Target, DbError> {
        let id = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO targets (address, name, device_type, importance, remark) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    target.address,
                    target.name,
                    target.device_type,
                    target.importance,
                    target.remark,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DbError::Conflict(target.address.clone())
                } else {
                    DbError::Sqlite(e)
                }
            })?;
            conn.last_insert_rowid()
        };
        self.get_target(id)
    }

    /// Register a target, or refresh the metadata of the one already using its address.
    pub fn upsert_target(&self, target: &NewTarget) -> Result<Target, DbError> {
        match self.add_target(target) {
            Err(DbError::Conflict(_)) => {
                let id: i64 = {
                    let conn = self.conn()?;
                    conn.query_row(
                        "SELECT id FROM targets WHERE address = ?1",
                        params![target.address],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or(DbError::NotFound)?
                };
                self.update_target(id, target)
            }
            other => other,
        }
    }

    /// Replace a target's metadata. Status fields are left alone.
    pub fn update_target(&self, id: i64, target: &NewTarget) -> Result<Target, DbError> {
        let changed = {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE targets SET address=?1, name=?2, device_type=?3, importance=?4, remark=?5 WHERE id=?6",
                params![
                    target.address,
                    target.name,
                    target.device_type,
                    target.importance,
                    target.remark,
                    id,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DbError::Conflict(target.address.clone())
                } else {
                    DbError::Sqlite(e)
                }
            })?
        };
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        self.get_target(id)
    }

    /// Delete a target together with its check history.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM checks WHERE target_id = ?1", params![id])?;
        if tx.execute("DELETE FROM targets WHERE id = ?1", params![id])? == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit()?;
        Ok(())
    }

    /// Copy a check's fields onto its target's denormalized status columns.
    ///
    /// A record older than the one already mirrored is ignored, so the
    /// columns always describe the newest check by timestamp.
    pub fn update_status(&self, record: &CheckRecord) -> Result<(), DbError> {
        let conn = self.conn()?;
        let time = format_db_time(&record.time);
        let changed = conn.execute(
            "UPDATE targets SET last_status=?1, last_ping_ms=?2, last_checked=?3
             WHERE id=?4 AND (last_checked IS NULL OR last_checked <= ?3)",
            params![record.status.as_str(), record.ping_ms, time, record.target_id],
        )?;
        if changed > 0 {
            return Ok(());
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM targets WHERE id = ?1",
                params![record.target_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => {
                tracing::debug!(
                    "Skipping stale status update for target {} at {}",
                    record.target_id,
                    time
                );
                Ok(())
            }
            None => Err(DbError::NotFound),
        }
    }

    /// Substring search over address, name and remark.
    pub fn search_targets(&self, query: &str, limit: u32) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let pattern = format!("%{}%", query);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets WHERE address LIKE ?1 OR name LIKE ?1 OR remark LIKE ?1 ORDER BY id ASC LIMIT ?2",
            TARGET_COLUMNS
        ))?;
        let targets = stmt
            .query_map(params![pattern, limit], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn register(store: &Store, address: &str) -> Target {
        store.add_target(&NewTarget::new(address)).unwrap()
    }

    #[test]
    fn test_target_crud() {
        let (store, _tmp) = test_store();

        let created = store
            .add_target(&NewTarget {
                address: "10.0.0.1".to_string(),
                name: Some("core switch".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(created.id > 0);
        assert_eq!(created.last_status, TargetStatus::Unknown);
        assert_eq!(created.last_checked, None);

        let fetched = store.get_target(created.id).unwrap();
        assert_eq!(fetched, created);

        let updated = store
            .update_target(
                created.id,
                &NewTarget {
                    address: "10.0.0.1".to_string(),
                    name: Some("edge switch".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("edge switch"));

        store.delete_target(created.id).unwrap();
        assert!(matches!(store.get_target(created.id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(created.id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_list_keeps_creation_order() {
        let (store, _tmp) = test_store();
        for address in ["10.0.0.9", "10.0.0.1", "10.0.0.5"] {
            register(&store, address);
        }
        let addresses: Vec<_> = store
            .list_targets()
            .unwrap()
            .into_iter()
            .map(|t| t.address)
            .collect();
        assert_eq!(addresses, ["10.0.0.9", "10.0.0.1", "10.0.0.5"]);
    }

    #[test]
    fn test_duplicate_address_is_conflict() {
        let (store, _tmp) = test_store();
        register(&store, "10.0.0.1");
        let other = register(&store, "10.0.0.2");

        assert!(matches!(
            store.add_target(&NewTarget::new("10.0.0.1")),
            Err(DbError::Conflict(addr)) if addr == "10.0.0.1"
        ));
        assert!(matches!(
            store.update_target(other.id, &NewTarget::new("10.0.0.1")),
            Err(DbError::Conflict(_))
        ));
    }

    #[test]
    fn test_upsert_updates_existing_metadata() {
        let (store, _tmp) = test_store();
        let first = register(&store, "10.0.0.1");

        let again = store
            .upsert_target(&NewTarget {
                address: "10.0.0.1".to_string(),
                remark: Some("moved to rack 2".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(again.id, first.id);
        assert_eq!(again.remark.as_deref(), Some("moved to rack 2"));
        assert_eq!(store.list_targets().unwrap().len(), 1);
    }

    #[test]
    fn test_update_missing_target_is_not_found() {
        let (store, _tmp) = test_store();
        assert!(matches!(
            store.update_target(42, &NewTarget::new("10.0.0.1")),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn test_update_status_mirrors_record() {
        let (store, _tmp) = test_store();
        let target = register(&store, "10.0.0.1");
        let now = Utc::now();

        let record = store
            .append_check(target.id, &CheckOutcome::up(4.5), now)
            .unwrap();
        store.update_status(&record).unwrap();

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.last_status, TargetStatus::Up);
        assert_eq!(fetched.last_ping_ms, Some(4.5));
        assert_eq!(fetched.last_checked, Some(now));
    }

    #[test]
    fn test_update_status_ignores_older_record() {
        let (store, _tmp) = test_store();
        let target = register(&store, "10.0.0.1");
        let now = Utc::now();

        let newer = store.append_check(target.id, &CheckOutcome::down(), now).unwrap();
        let older = store
            .append_check(target.id, &CheckOutcome::up(1.0), now - ChronoDuration::seconds(30))
            .unwrap();
        store.update_status(&newer).unwrap();
        store.update_status(&older).unwrap();

        let fetched = store.get_target(target.id).unwrap();
        assert_eq!(fetched.last_status, TargetStatus::Down);
        assert_eq!(fetched.last_ping_ms, None);
        assert_eq!(fetched.last_checked, Some(now));
    }

    #[test]
    fn test_update_status_unknown_target() {
        let (store, _tmp) = test_store();
        let record = CheckRecord {
            id: 1,
            target_id: 99,
            time: Utc::now(),
            status: CheckStatus::Up,
            ping_ms: Some(1.0),
        };
        assert!(matches!(store.update_status(&record), Err(DbError::NotFound)));
    }

    #[test]
    fn test_search_matches_address_name_and_remark() {
        let (store, _tmp) = test_store();
        register(&store, "192.168.1.10");
        store
            .add_target(&NewTarget {
                address: "10.1.1.1".to_string(),
                name: Some("printer".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .add_target(&NewTarget {
                address: "10.1.1.2".to_string(),
                remark: Some("backup printer".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(store.search_targets("192.168", 200).unwrap().len(), 1);
        assert_eq!(store.search_targets("printer", 200).unwrap().len(), 2);
        assert_eq!(store.search_targets("printer", 1).unwrap().len(), 1);
        assert!(store.search_targets("nothing", 200).unwrap().is_empty());
    }
}
