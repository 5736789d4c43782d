use chrono::{Local, TimeZone};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::app_dirs::AppDirs;
use crate::error::StorageResult;
use crate::game::GameSummary;

pub const HIGH_SCORE_KEY: &str = "eyeCatchHighScore";
pub const SCORES_KEY: &str = "eyeCatchScores";
/// Records kept in the ranked history.
pub const MAX_RECORDS: usize = 50;

/// One finished run, as kept in the ranked history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub score: u32,
    pub level: u32,
    pub targets: u32,
    /// milliseconds since the unix epoch
    pub date: i64,
}

impl ScoreRecord {
    pub fn new(score: u32, level: u32, targets: u32) -> Self {
        Self {
            score,
            level,
            targets,
            date: Local::now().timestamp_millis(),
        }
    }

    /// Local time for display, e.g. "Mar 4 9:05".
    pub fn formatted_date(&self) -> String {
        Local
            .timestamp_millis_opt(self.date)
            .single()
            .map(|d| d.format("%b %-d %-H:%M").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Durable high score and ranked run history.
///
/// Reads never fail: missing or corrupt data reads as "nothing stored yet".
pub trait ScoreStore {
    fn high_score(&self) -> u32;
    fn set_high_score(&mut self, score: u32) -> StorageResult<()>;
    /// Append a record, keep the best [`MAX_RECORDS`] sorted by score, descending.
    fn save_score(&mut self, score: u32, level: u32, targets: u32) -> StorageResult<()> {
        self.save_record(ScoreRecord::new(score, level, targets))
    }
    fn save_record(&mut self, record: ScoreRecord) -> StorageResult<()>;
    fn all_scores(&self) -> Vec<ScoreRecord>;
    fn top_scores(&self, n: usize) -> Vec<ScoreRecord> {
        self.all_scores().into_iter().take(n).collect()
    }
    fn clear_all(&mut self) -> StorageResult<()>;
}

/// Persist a finished run if it beats the stored high score.
///
/// Ties do not count: only a strictly higher score updates the high score and
/// writes a record. Returns whether anything was written.
pub fn record_result<S: ScoreStore + ?Sized>(
    store: &mut S,
    summary: &GameSummary,
) -> StorageResult<bool> {
    let previous = store.high_score();
    if summary.score <= previous {
        debug!(score = summary.score, previous, "no new high score");
        return Ok(false);
    }
    store.set_high_score(summary.score)?;
    store.save_score(summary.score, summary.level, summary.targets_caught)?;
    Ok(true)
}

/// Write the ranked history as CSV.
pub fn export_csv<S: ScoreStore + ?Sized, P: AsRef<Path>>(
    store: &S,
    path: P,
) -> StorageResult<usize> {
    let records = store.all_scores();
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["rank", "score", "level", "targets", "date"])?;
    for (rank, r) in records.iter().enumerate() {
        let date = Local
            .timestamp_millis_opt(r.date)
            .single()
            .map(|d| d.to_rfc3339())
            .unwrap_or_default();
        writer.write_record([
            (rank + 1).to_string(),
            r.score.to_string(),
            r.level.to_string(),
            r.targets.to_string(),
            date,
        ])?;
    }
    writer.flush()?;
    Ok(records.len())
}

/// sqlite-backed key/value store holding the two durable keys.
#[derive(Debug)]
pub struct ScoreDb {
    conn: Connection,
}

impl ScoreDb {
    /// Open the database at the default state location.
    pub fn open_default() -> StorageResult<Self> {
        let path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("eyecatch_scores.db"));
        Self::open(path)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StorageResult<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;
        Ok(ScoreDb { conn })
    }

    fn get(&self, key: &str) -> Option<String> {
        read_key(&self.conn, key)
    }

    fn put(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
        conn.execute(
            r#"
            INSERT INTO kv (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Store a raw value under a key. Used to simulate foreign or corrupt data.
    pub fn put_raw(&self, key: &str, value: &str) -> StorageResult<()> {
        Self::put(&self.conn, key, value)?;
        Ok(())
    }
}

fn read_key(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
        row.get::<_, String>(0)
    })
    .optional()
    .unwrap_or_else(|e| {
        warn!(key, error = %e, "failed to read stored value");
        None
    })
}

/// Stored history, best first. Anything unreadable counts as empty.
fn parse_scores(raw: Option<String>) -> Vec<ScoreRecord> {
    let mut records = raw
        .and_then(|s| match serde_json::from_str::<Vec<ScoreRecord>>(&s) {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(error = %e, "stored score history is corrupt, ignoring it");
                None
            }
        })
        .unwrap_or_default();
    sort_best_first(&mut records);
    records
}

// stable: equal scores keep their stored order
fn sort_best_first(records: &mut [ScoreRecord]) {
    records.sort_by(|a, b| b.score.cmp(&a.score));
}

impl ScoreStore for ScoreDb {
    fn high_score(&self) -> u32 {
        self.get(HIGH_SCORE_KEY)
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0)
    }

    fn set_high_score(&mut self, score: u32) -> StorageResult<()> {
        Self::put(&self.conn, HIGH_SCORE_KEY, &score.to_string())?;
        Ok(())
    }

    fn save_record(&mut self, record: ScoreRecord) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        let mut records = parse_scores(read_key(&tx, SCORES_KEY));
        records.push(record);
        sort_best_first(&mut records);
        records.truncate(MAX_RECORDS);
        let json = serde_json::to_string(&records)?;
        Self::put(&tx, SCORES_KEY, &json)?;
        tx.commit()?;
        Ok(())
    }

    fn all_scores(&self) -> Vec<ScoreRecord> {
        parse_scores(self.get(SCORES_KEY))
    }

    fn clear_all(&mut self) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM kv WHERE key IN (?1, ?2)",
            params![HIGH_SCORE_KEY, SCORES_KEY],
        )?;
        Ok(())
    }
}
