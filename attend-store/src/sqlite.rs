//! SQLite backend for the punch ledger and cursor map.

use crate::error::{StoreError, StoreResult};
use crate::{AppendOutcome, CursorStore, DeviceStatistics, RecordLedger, SyncStatistics};
use async_trait::async_trait;
use attend_types::{AttendancePunch, DeviceId, PunchType, SyncCursor, VerifyMethod};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-backed ledger and cursor store.
///
/// One database file, two tables build the whole persisted state: the
/// `punches` ledger keyed by insertion order with a UNIQUE dedup key,
/// and the `cursors` map keyed by device id. WAL mode for concurrent
/// readers; writes are serialized through transactions, which gives the
/// single-writer discipline the shared ledger needs even under
/// concurrent per-device workers.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let path_str = path.to_str().ok_or_else(|| StoreError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StoreError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS punches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                device_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                user_name TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                punch_type INTEGER NOT NULL,
                verify_method INTEGER NOT NULL,
                work_code INTEGER,
                recorded_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                UNIQUE(device_id, user_id, timestamp, punch_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cursors (
                device_id TEXT PRIMARY KEY,
                last_seen INTEGER NOT NULL,
                last_synced_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        // Duplicates are never stored; this counter is their only trace.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dedup_stats (
                device_id TEXT PRIMARY KEY,
                duplicates_skipped INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_punches_timestamp ON punches(timestamp)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_punches_device ON punches(device_id)")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        Ok(())
    }
}

#[async_trait]
impl RecordLedger for SqliteStore {
    async fn append(&self, records: &[AttendancePunch]) -> StoreResult<AppendOutcome> {
        if records.is_empty() {
            return Ok(AppendOutcome::default());
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::Database)?;
        let mut inserted = 0u64;
        let mut skipped: HashMap<&str, i64> = HashMap::new();

        for punch in records {
            let result = sqlx::query(
                r#"
                INSERT INTO punches
                    (device_id, user_id, user_name, timestamp, punch_type, verify_method, work_code)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(device_id, user_id, timestamp, punch_type) DO NOTHING
                "#,
            )
            .bind(punch.device_id.as_str())
            .bind(&punch.user_id)
            .bind(&punch.user_name)
            .bind(punch.timestamp.timestamp())
            .bind(punch.punch_type.code() as i64)
            .bind(punch.verify_method.code() as i64)
            .bind(punch.work_code.map(|c| c as i64))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;

            let affected = result.rows_affected();
            inserted += affected;
            if affected == 0 {
                *skipped.entry(punch.device_id.as_str()).or_insert(0) += 1;
            }
        }

        // Same transaction as the inserts, so the counter can never
        // disagree with the ledger.
        for (device_id, count) in &skipped {
            sqlx::query(
                r#"
                INSERT INTO dedup_stats (device_id, duplicates_skipped)
                VALUES (?1, ?2)
                ON CONFLICT(device_id) DO UPDATE SET
                    duplicates_skipped = duplicates_skipped + excluded.duplicates_skipped
                "#,
            )
            .bind(*device_id)
            .bind(*count)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::Database)?;
        }

        tx.commit().await.map_err(StoreError::Database)?;

        Ok(AppendOutcome {
            inserted,
            duplicates: records.len() as u64 - inserted,
        })
    }

    async fn recent(&self, window: Duration) -> StoreResult<Vec<AttendancePunch>> {
        let cutoff = Utc::now().timestamp() - window.as_secs() as i64;

        let rows = sqlx::query_as::<_, PunchRow>(
            r#"
            SELECT device_id, user_id, user_name, timestamp, punch_type, verify_method, work_code
            FROM punches
            WHERE timestamp > ?1
            ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn statistics(&self) -> StoreResult<SyncStatistics> {
        let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM punches")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        let day_ago = Utc::now().timestamp() - 24 * 3600;
        let records_last_24h: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM punches WHERE timestamp > ?1")
                .bind(day_ago)
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        let counts: Vec<(String, i64)> = sqlx::query_as(
            "SELECT device_id, COUNT(*) FROM punches GROUP BY device_id ORDER BY device_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        let skips: Vec<(String, i64)> =
            sqlx::query_as("SELECT device_id, duplicates_skipped FROM dedup_stats")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::Database)?;

        fn entry(
            map: &mut HashMap<DeviceId, DeviceStatistics>,
            device_id: DeviceId,
        ) -> &mut DeviceStatistics {
            map.entry(device_id.clone())
                .or_insert_with(|| DeviceStatistics {
                    device_id,
                    record_count: 0,
                    duplicates_skipped: 0,
                    cursor: None,
                })
        }
        let mut by_device: HashMap<DeviceId, DeviceStatistics> = HashMap::new();
        for (device_id, count) in counts {
            entry(&mut by_device, DeviceId::new(device_id)).record_count = count as u64;
        }
        let mut duplicates_skipped = 0u64;
        for (device_id, skipped) in skips {
            entry(&mut by_device, DeviceId::new(device_id)).duplicates_skipped = skipped as u64;
            duplicates_skipped += skipped as u64;
        }
        // A device can hold a cursor but no ledger rows (e.g. after a
        // retention purge); it still belongs in the statistics.
        for (device_id, cursor) in self.all().await? {
            entry(&mut by_device, device_id).cursor = Some(cursor);
        }

        let mut devices: Vec<_> = by_device.into_values().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        Ok(SyncStatistics {
            total_records: total_records as u64,
            records_last_24h: records_last_24h as u64,
            duplicates_skipped,
            devices,
        })
    }

    async fn purge_older_than(&self, retention_days: u32) -> StoreResult<u64> {
        let cutoff = Utc::now().timestamp() - retention_days as i64 * 24 * 3600;

        let result = sqlx::query("DELETE FROM punches WHERE timestamp < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::info!(purged, retention_days, "purged expired punches");
        }
        Ok(purged)
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn get(&self, device_id: &DeviceId) -> StoreResult<Option<SyncCursor>> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT last_seen, last_synced_at FROM cursors WHERE device_id = ?1",
        )
        .bind(device_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        row.map(|(last_seen, last_synced_at)| {
            Ok(SyncCursor {
                last_seen: decode_timestamp(last_seen)?,
                last_synced_at: decode_timestamp(last_synced_at)?,
            })
        })
        .transpose()
    }

    async fn advance(&self, device_id: &DeviceId, cursor: SyncCursor) -> StoreResult<()> {
        // MAX keeps an older last_seen from rewinding the cursor while
        // still refreshing the sync time.
        sqlx::query(
            r#"
            INSERT INTO cursors (device_id, last_seen, last_synced_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(device_id) DO UPDATE SET
                last_seen = MAX(last_seen, excluded.last_seen),
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(device_id.as_str())
        .bind(cursor.last_seen.timestamp())
        .bind(cursor.last_synced_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        Ok(())
    }

    async fn all(&self) -> StoreResult<Vec<(DeviceId, SyncCursor)>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT device_id, last_seen, last_synced_at FROM cursors ORDER BY device_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Database)?;

        rows.into_iter()
            .map(|(device_id, last_seen, last_synced_at)| {
                Ok((
                    DeviceId::new(device_id),
                    SyncCursor {
                        last_seen: decode_timestamp(last_seen)?,
                        last_synced_at: decode_timestamp(last_synced_at)?,
                    },
                ))
            })
            .collect()
    }
}

fn decode_timestamp(secs: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| StoreError::CorruptRecord {
        detail: format!("timestamp out of range: {secs}"),
    })
}

/// Internal row type for ledger queries.
#[derive(sqlx::FromRow)]
struct PunchRow {
    device_id: String,
    user_id: String,
    user_name: String,
    timestamp: i64,
    punch_type: i64,
    verify_method: i64,
    work_code: Option<i64>,
}

impl TryFrom<PunchRow> for AttendancePunch {
    type Error = StoreError;

    fn try_from(row: PunchRow) -> Result<Self, Self::Error> {
        let punch_type =
            PunchType::from_code(row.punch_type as u8).ok_or_else(|| StoreError::CorruptRecord {
                detail: format!("unknown punch type code {}", row.punch_type),
            })?;

        Ok(AttendancePunch {
            device_id: DeviceId::new(row.device_id),
            user_id: row.user_id,
            user_name: row.user_name,
            timestamp: decode_timestamp(row.timestamp)?,
            punch_type,
            verify_method: VerifyMethod::from_code(row.verify_method as u8),
            work_code: row.work_code.map(|c| c as u32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn punch(device: &str, user: &str, ts: DateTime<Utc>, punch_type: PunchType) -> AttendancePunch {
        AttendancePunch {
            device_id: DeviceId::new(device),
            user_id: user.into(),
            user_name: format!("User_{user}"),
            timestamp: ts,
            punch_type,
            verify_method: VerifyMethod::Fingerprint,
            work_code: None,
        }
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn append_inserts_batch() {
        let store = SqliteStore::in_memory().await.unwrap();
        let batch = vec![
            punch("d1", "1", ts(8, 0), PunchType::CheckIn),
            punch("d1", "2", ts(8, 5), PunchType::CheckIn),
        ];

        let outcome = store.append(&batch).await.unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.duplicates, 0);
    }

    #[tokio::test]
    async fn reappending_same_batch_is_all_duplicates() {
        let store = SqliteStore::in_memory().await.unwrap();
        let batch = vec![
            punch("d1", "1", ts(8, 0), PunchType::CheckIn),
            punch("d1", "2", ts(8, 5), PunchType::CheckIn),
        ];

        store.append(&batch).await.unwrap();
        let again = store.append(&batch).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 2);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn skipped_duplicates_accumulate_per_device() {
        let store = SqliteStore::in_memory().await.unwrap();
        let d1 = punch("d1", "1", ts(8, 0), PunchType::CheckIn);
        let d2 = punch("d2", "1", ts(8, 0), PunchType::CheckIn);

        store.append(&[d1.clone(), d2.clone()]).await.unwrap();
        store.append(&[d1.clone(), d2]).await.unwrap();
        store.append(&[d1]).await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.duplicates_skipped, 3);
        assert_eq!(stats.devices[0].device_id.as_str(), "d1");
        assert_eq!(stats.devices[0].duplicates_skipped, 2);
        assert_eq!(stats.devices[1].duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn dedup_key_ignores_verify_method() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut a = punch("d1", "1", ts(8, 0), PunchType::CheckIn);
        a.verify_method = VerifyMethod::Fingerprint;
        let mut b = a.clone();
        b.verify_method = VerifyMethod::Face;

        store.append(&[a]).await.unwrap();
        let outcome = store.append(&[b]).await.unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.duplicates, 1);
    }

    #[tokio::test]
    async fn same_key_different_punch_type_both_stored() {
        let store = SqliteStore::in_memory().await.unwrap();
        let batch = vec![
            punch("d1", "1", ts(8, 0), PunchType::CheckIn),
            punch("d1", "1", ts(8, 0), PunchType::CheckOut),
        ];
        let outcome = store.append(&batch).await.unwrap();
        assert_eq!(outcome.inserted, 2);
    }

    #[tokio::test]
    async fn empty_append_is_noop() {
        let store = SqliteStore::in_memory().await.unwrap();
        let outcome = store.append(&[]).await.unwrap();
        assert_eq!(outcome, AppendOutcome::default());
    }

    #[tokio::test]
    async fn recent_filters_by_window() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        let batch = vec![
            punch("d1", "1", now - chrono::Duration::hours(48), PunchType::CheckIn),
            punch("d1", "2", now - chrono::Duration::hours(1), PunchType::CheckIn),
        ];
        store.append(&batch).await.unwrap();

        let recent = store.recent(Duration::from_secs(24 * 3600)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].user_id, "2");
    }

    #[tokio::test]
    async fn recent_rows_round_trip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut original = punch("d1", "7", Utc::now() - chrono::Duration::minutes(5), PunchType::BreakOut);
        original.user_name = "Alice".into();
        original.verify_method = VerifyMethod::Face;
        original.work_code = Some(3);
        // Second precision in storage.
        original.timestamp = decode_timestamp(original.timestamp.timestamp()).unwrap();

        store.append(&[original.clone()]).await.unwrap();
        let recent = store.recent(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(recent, vec![original]);
    }

    #[tokio::test]
    async fn statistics_counts_per_device() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .append(&[
                punch("d1", "1", now - chrono::Duration::hours(1), PunchType::CheckIn),
                punch("d1", "2", now - chrono::Duration::hours(30), PunchType::CheckIn),
                punch("d2", "1", now - chrono::Duration::hours(2), PunchType::CheckIn),
            ])
            .await
            .unwrap();
        store
            .advance(
                &DeviceId::new("d1"),
                SyncCursor::new(now - chrono::Duration::hours(1), now),
            )
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.records_last_24h, 2);
        assert_eq!(stats.duplicates_skipped, 0);
        assert_eq!(stats.devices.len(), 2);
        assert_eq!(stats.devices[0].device_id.as_str(), "d1");
        assert_eq!(stats.devices[0].record_count, 2);
        assert!(stats.devices[0].cursor.is_some());
        assert!(stats.devices[1].cursor.is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .append(&[
                punch("d1", "1", now - chrono::Duration::days(40), PunchType::CheckIn),
                punch("d1", "2", now - chrono::Duration::days(5), PunchType::CheckIn),
            ])
            .await
            .unwrap();

        let purged = store.purge_older_than(30).await.unwrap();
        assert_eq!(purged, 1);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records, 1);
    }

    #[tokio::test]
    async fn cursor_starts_absent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let cursor = CursorStore::get(&store, &DeviceId::new("d1")).await.unwrap();
        assert!(cursor.is_none());
    }

    #[tokio::test]
    async fn cursor_advance_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();
        let device = DeviceId::new("d1");
        let cursor = SyncCursor::new(ts(8, 10), ts(9, 0));

        store.advance(&device, cursor).await.unwrap();
        let stored = store.get(&device).await.unwrap().unwrap();
        assert_eq!(stored, cursor);
    }

    #[tokio::test]
    async fn cursor_never_moves_backward() {
        let store = SqliteStore::in_memory().await.unwrap();
        let device = DeviceId::new("d1");

        store
            .advance(&device, SyncCursor::new(ts(8, 10), ts(9, 0)))
            .await
            .unwrap();
        // A stale device clock offers an older last_seen.
        store
            .advance(&device, SyncCursor::new(ts(7, 0), ts(10, 0)))
            .await
            .unwrap();

        let stored = store.get(&device).await.unwrap().unwrap();
        assert_eq!(stored.last_seen, ts(8, 10));
        // The sync time still refreshed.
        assert_eq!(stored.last_synced_at, ts(10, 0));
    }

    #[tokio::test]
    async fn cursor_advance_with_equal_last_seen_is_allowed() {
        let store = SqliteStore::in_memory().await.unwrap();
        let device = DeviceId::new("d1");

        store
            .advance(&device, SyncCursor::new(ts(8, 10), ts(9, 0)))
            .await
            .unwrap();
        store
            .advance(&device, SyncCursor::new(ts(8, 10), ts(10, 0)))
            .await
            .unwrap();

        let stored = store.get(&device).await.unwrap().unwrap();
        assert_eq!(stored.last_seen, ts(8, 10));
        assert_eq!(stored.last_synced_at, ts(10, 0));
    }

    #[tokio::test]
    async fn cursors_are_independent_per_device() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .advance(&DeviceId::new("d1"), SyncCursor::new(ts(8, 0), ts(9, 0)))
            .await
            .unwrap();
        store
            .advance(&DeviceId::new("d2"), SyncCursor::new(ts(7, 0), ts(9, 0)))
            .await
            .unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0.as_str(), "d1");
        assert_eq!(all[0].1.last_seen, ts(8, 0));
        assert_eq!(all[1].1.last_seen, ts(7, 0));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let device = DeviceId::new("d1");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .append(&[punch("d1", "1", ts(8, 0), PunchType::CheckIn)])
                .await
                .unwrap();
            store
                .advance(&device, SyncCursor::new(ts(8, 0), ts(9, 0)))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).await.unwrap();
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records, 1);
        let cursor = store.get(&device).await.unwrap().unwrap();
        assert_eq!(cursor.last_seen, ts(8, 0));
    }

    #[tokio::test]
    async fn failed_append_leaves_ledger_and_cursor_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        let device = DeviceId::new("d1");

        let store = SqliteStore::open(&path).await.unwrap();
        store
            .advance(&device, SyncCursor::new(ts(8, 0), ts(9, 0)))
            .await
            .unwrap();

        // Simulate a persistence failure mid-cycle.
        store.pool.close().await;
        let batch = vec![punch("d1", "1", ts(8, 5), PunchType::CheckIn)];
        assert!(store.append(&batch).await.is_err());

        // After "restart": no partial batch, cursor shows the pre-batch
        // value.
        let store = SqliteStore::open(&path).await.unwrap();
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total_records, 0);
        let cursor = store.get(&device).await.unwrap().unwrap();
        assert_eq!(cursor.last_seen, ts(8, 0));
    }
}
