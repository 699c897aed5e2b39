//! SQLite-backed history store

use super::schema::ensure_schema;
use super::HistoryStore;
use crate::error::{AnalysisError, Result};
use crate::models::{AnomalyVerdict, CompositeScore};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// History store over a single SQLite connection.
///
/// The connection sits behind a mutex so appends for the same VM never
/// interleave.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

/// Fixed-width ISO-8601 so lexical order equals chronological order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn score_from_row(row: &Row<'_>) -> rusqlite::Result<CompositeScore> {
    let timestamp: String = row.get(1)?;
    Ok(CompositeScore {
        vm_id: row.get(0)?,
        timestamp: parse_timestamp(&timestamp)?,
        entropy_score: row.get(2)?,
        mean_block_size: row.get(3)?,
        variance: row.get(4)?,
        std_deviation: row.get(5)?,
        zeroed_ratio: row.get(6)?,
        dirty_ratio: row.get(7)?,
        shannon_entropy: row.get(8)?,
        delta_entropy: row.get(9)?,
        byte_entropy: row.get(10)?,
        chi_square: row.get(11)?,
        cpu_usage: row.get(12)?,
        mem_free_kb: row.get::<_, i64>(13)?.max(0) as u64,
        mem_used_kb: row.get::<_, i64>(14)?.max(0) as u64,
    })
}

/// SQLite integers are signed; clamp instead of wrapping
fn to_sql_kb(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl SqliteHistoryStore {
    /// Open (or create) a store at `path` and ensure its schema
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.ensure_schema()?;
        info!(path = %path.display(), "Opened score history store");
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create the schema if missing; a no-op on an existing schema
    pub fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        ensure_schema(&conn)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of score rows stored for a VM
    pub fn count_by_vm(&self, vm_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entropy_scores WHERE vm_id = ?1",
            params![vm_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AnalysisError::PersistenceFailure("history store lock poisoned".into()))
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, score: &CompositeScore) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO entropy_scores (
                vm_id, timestamp, entropy_score, mean_block_size, variance,
                std_deviation, zeroed_block_ratio, dirty_block_ratio, shannon_entropy,
                delta_entropy, byte_entropy, chi_square, cpu_usage, mem_free_kb, mem_used_kb
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                score.vm_id,
                format_timestamp(&score.timestamp),
                score.entropy_score,
                score.mean_block_size,
                score.variance,
                score.std_deviation,
                score.zeroed_ratio,
                score.dirty_ratio,
                score.shannon_entropy,
                score.delta_entropy,
                score.byte_entropy,
                score.chi_square,
                score.cpu_usage,
                to_sql_kb(score.mem_free_kb),
                to_sql_kb(score.mem_used_kb),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(vm_id = %score.vm_id, row_id = id, "Score row appended");
        Ok(id)
    }

    fn list_by_vm(&self, vm_id: &str) -> Result<Vec<CompositeScore>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT vm_id, timestamp, entropy_score, mean_block_size, variance,
                    std_deviation, zeroed_block_ratio, dirty_block_ratio, shannon_entropy,
                    delta_entropy, byte_entropy, chi_square, cpu_usage, mem_free_kb, mem_used_kb
             FROM entropy_scores
             WHERE vm_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![vm_id], score_from_row)?;
        let mut scores = Vec::new();
        for row in rows {
            scores.push(row?);
        }
        Ok(scores)
    }

    fn append_verdict(&self, verdict: &AnomalyVerdict) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO ransomware_analysis_results (
                vm_id, timestamp, anomaly_raw_data, anomaly_percentage
            ) VALUES (?1, ?2, ?3, ?4)",
            params![
                verdict.vm_id,
                format_timestamp(&verdict.timestamp),
                verdict.labels_to_string(),
                verdict.anomaly_percentage,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(vm_id = %verdict.vm_id, row_id = id, "Anomaly verdict appended");
        Ok(id)
    }

    fn list_verdicts(&self, vm_id: &str) -> Result<Vec<AnomalyVerdict>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT vm_id, timestamp, anomaly_raw_data, anomaly_percentage
             FROM ransomware_analysis_results
             WHERE vm_id = ?1
             ORDER BY timestamp ASC, id ASC",
        )?;

        let rows = stmt.query_map(params![vm_id], |row| {
            let timestamp: String = row.get(1)?;
            let raw_labels: String = row.get(2)?;
            Ok((
                row.get::<_, String>(0)?,
                parse_timestamp(&timestamp)?,
                raw_labels,
                row.get::<_, f64>(3)?,
            ))
        })?;

        let mut verdicts = Vec::new();
        for row in rows {
            let (vm_id, timestamp, raw_labels, anomaly_percentage) = row?;
            let per_sample_labels = AnomalyVerdict::labels_from_str(&raw_labels).ok_or_else(|| {
                AnalysisError::PersistenceFailure(format!(
                    "corrupt label sequence for VM {}: {:?}",
                    vm_id, raw_labels
                ))
            })?;
            verdicts.push(AnomalyVerdict {
                vm_id,
                timestamp,
                per_sample_labels,
                anomaly_percentage,
                scores: Vec::new(),
                threshold: 0.0,
            });
        }
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnomalyLabel;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_score(vm_id: &str, timestamp: DateTime<Utc>, dirty: f64) -> CompositeScore {
        CompositeScore {
            vm_id: vm_id.to_string(),
            timestamp,
            entropy_score: 0.5,
            mean_block_size: 65536.0,
            variance: 1.5e9,
            std_deviation: 38729.8,
            zeroed_ratio: 0.1,
            dirty_ratio: dirty,
            shannon_entropy: 2.25,
            delta_entropy: 5.5,
            byte_entropy: 7.75,
            chi_square: 301.2,
            cpu_usage: 12.5,
            mem_free_kb: 4 * 1024 * 1024,
            mem_used_kb: 900_000,
        }
    }

    #[test]
    fn test_append_and_list_preserves_fields() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let ts = Utc::now();
        let score = create_test_score("vm-a", ts, 0.8);

        store.append(&score).unwrap();
        let listed = store.list_by_vm("vm-a").unwrap();

        assert_eq!(listed.len(), 1);
        let row = &listed[0];
        assert_eq!(row.vm_id, "vm-a");
        assert_eq!(row.dirty_ratio, 0.8);
        assert_eq!(row.chi_square, 301.2);
        assert_eq!(row.mem_free_kb, 4 * 1024 * 1024);
        // Stored at microsecond precision
        assert!((row.timestamp - ts).num_microseconds().unwrap().abs() <= 1);
    }

    #[test]
    fn test_list_is_ordered_by_timestamp() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let base = Utc::now();

        for offset in [30, 10, 20, 0] {
            store
                .append(&create_test_score("vm-a", base + Duration::seconds(offset), 0.1))
                .unwrap();
        }

        let listed = store.list_by_vm("vm-a").unwrap();
        assert_eq!(listed.len(), 4);
        assert!(listed.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_vms_are_isolated() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        store.append(&create_test_score("vm-a", Utc::now(), 0.1)).unwrap();
        store.append(&create_test_score("vm-b", Utc::now(), 0.2)).unwrap();
        store.append(&create_test_score("vm-b", Utc::now(), 0.3)).unwrap();

        assert_eq!(store.count_by_vm("vm-a").unwrap(), 1);
        assert_eq!(store.count_by_vm("vm-b").unwrap(), 2);
        assert!(store.list_by_vm("vm-c").unwrap().is_empty());
    }

    #[test]
    fn test_schema_bootstrap_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("scores.db");

        {
            let store = SqliteHistoryStore::open(&path).unwrap();
            store.append(&create_test_score("vm-a", Utc::now(), 0.4)).unwrap();
            store.ensure_schema().unwrap();
            store.ensure_schema().unwrap();
        }

        let reopened = SqliteHistoryStore::open(&path).unwrap();
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert_eq!(reopened.list_by_vm("vm-a").unwrap().len(), 1);
    }

    #[test]
    fn test_verdict_round_trip() {
        let store = SqliteHistoryStore::open_in_memory().unwrap();
        let verdict = AnomalyVerdict {
            vm_id: "vm-a".to_string(),
            timestamp: Utc::now(),
            per_sample_labels: vec![AnomalyLabel::Normal, AnomalyLabel::Anomaly],
            anomaly_percentage: 0.5,
            scores: vec![0.4, 0.7],
            threshold: 0.6,
        };

        store.append_verdict(&verdict).unwrap();
        store.append_verdict(&verdict).unwrap();

        let listed = store.list_verdicts("vm-a").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].per_sample_labels, verdict.per_sample_labels);
        assert_eq!(listed[0].anomaly_percentage, 0.5);
        assert!(listed[0].scores.is_empty());
    }
}
