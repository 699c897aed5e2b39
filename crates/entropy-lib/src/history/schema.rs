//! SQL schema for the history store

use rusqlite::Connection;

const CREATE_SCORES: &str = "
CREATE TABLE IF NOT EXISTS entropy_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vm_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    entropy_score REAL NOT NULL,
    mean_block_size REAL NOT NULL,
    variance REAL NOT NULL,
    std_deviation REAL NOT NULL,
    zeroed_block_ratio REAL NOT NULL,
    dirty_block_ratio REAL NOT NULL,
    shannon_entropy REAL NOT NULL,
    delta_entropy REAL NOT NULL,
    byte_entropy REAL NOT NULL,
    chi_square REAL NOT NULL,
    cpu_usage REAL NOT NULL,
    mem_free_kb INTEGER NOT NULL,
    mem_used_kb INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entropy_scores_vm_ts
    ON entropy_scores (vm_id, timestamp);

CREATE TABLE IF NOT EXISTS ransomware_analysis_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vm_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    anomaly_raw_data TEXT NOT NULL,
    anomaly_percentage REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_analysis_results_vm_ts
    ON ransomware_analysis_results (vm_id, timestamp);
";

/// Create tables and indexes if missing. Safe to call repeatedly.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_SCORES)
}
