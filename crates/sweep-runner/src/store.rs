//! Durable series storage on SQLite.
//!
//! Every configuration and run attribute lives under its own
//! `(series_key, attr, idx)` row so attributes can be written independently.
//! Each mutating operation is one transaction: a crash leaves the previous
//! state intact, which is what makes resuming a series safe.

use std::fs;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Configuration;
use crate::error::{Result, SweepError};
use crate::run::{Run, RunResult, RunStatus};

pub const SCHEMA_VERSION: i64 = 1;

const ATTR_CONFIG: &str = "config";
const ATTR_STATUS: &str = "status";
const ATTR_STDOUT: &str = "stdout";
const ATTR_STDERR: &str = "stderr";
const ATTR_RESULT: &str = "result";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub key: String,
    pub created_at: String,
    pub plan_digest: String,
    pub runs: usize,
    pub not_run: usize,
    pub ok: usize,
    pub err: usize,
}

impl SeriesInfo {
    pub fn is_complete(&self) -> bool {
        self.not_run == 0
    }
}

pub struct SeriesStore {
    conn: Connection,
}

impl SeriesStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS meta(version INTEGER NOT NULL);
            CREATE TABLE IF NOT EXISTS series(
                key TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                plan_digest TEXT NOT NULL,
                len INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS entries(
                series_key TEXT NOT NULL REFERENCES series(key) ON DELETE CASCADE,
                attr TEXT NOT NULL,
                idx INTEGER NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY(series_key, attr, idx)
            );
            COMMIT;",
        )?;
        let existing: Option<i64> = conn
            .query_row("SELECT version FROM meta LIMIT 1", [], |row| row.get(0))
            .optional()?;
        match existing {
            Some(found) if found == SCHEMA_VERSION => {}
            Some(found) => {
                return Err(SweepError::SchemaVersion {
                    found,
                    expected: SCHEMA_VERSION,
                })
            }
            None => {
                conn.execute("INSERT INTO meta(version) VALUES (?1)", [SCHEMA_VERSION])?;
            }
        }
        Ok(Self { conn })
    }

    pub fn has_series(&self, key: &str) -> Result<bool> {
        Ok(series_len(&self.conn, key)?.is_some())
    }

    /// Persists `configs` as the series `key`. An existing series under the
    /// same key is dropped together with all of its runs.
    pub fn store_series(&mut self, key: &str, configs: &[Configuration]) -> Result<()> {
        let digest = plan_digest(configs)?;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE series_key = ?1", params![key])?;
        if tx.execute("DELETE FROM series WHERE key = ?1", params![key])? > 0 {
            tracing::warn!(series_key = key, "overwriting series");
        }
        tx.execute(
            "INSERT INTO series(key, created_at, plan_digest, len) VALUES (?1, ?2, ?3, ?4)",
            params![key, Utc::now().to_rfc3339(), digest, configs.len() as i64],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO entries(series_key, attr, idx, value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (idx, config) in configs.iter().enumerate() {
                let data = serde_json::to_vec(config)?;
                insert.execute(params![key, ATTR_CONFIG, idx as i64, data])?;
            }
        }
        tx.commit()?;
        tracing::info!(series_key = key, runs = configs.len(), "stored series");
        Ok(())
    }

    pub fn series_configurations(&self, key: &str) -> Result<Vec<Configuration>> {
        require_series(&self.conn, key)?;
        let mut stmt = self.conn.prepare(
            "SELECT value FROM entries WHERE series_key = ?1 AND attr = ?2 ORDER BY idx",
        )?;
        let rows = stmt.query_map(params![key, ATTR_CONFIG], |row| row.get::<_, Vec<u8>>(0))?;
        let mut configs = Vec::new();
        for data in rows {
            configs.push(serde_json::from_slice(&data?)?);
        }
        Ok(configs)
    }

    /// `NotRun` when no outcome was ever recorded for `index`.
    pub fn run_status(&self, key: &str, index: usize) -> Result<RunStatus> {
        let len = require_series(&self.conn, key)?;
        check_index(key, index, len)?;
        let raw = get_entry(&self.conn, key, ATTR_STATUS, index)?;
        match raw {
            None => Ok(RunStatus::NotRun),
            Some(bytes) => parse_status(&bytes),
        }
    }

    /// Writes the terminal status of a run and its captured artifacts in one
    /// transaction. `result` is only accepted together with `RunStatus::Ok`,
    /// and a run that already has an outcome cannot be recorded again.
    pub fn record_run_outcome(
        &mut self,
        key: &str,
        index: usize,
        status: RunStatus,
        stdout: &[u8],
        stderr: &[u8],
        result: Option<&RunResult>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(SweepError::InvalidOutcome(format!(
                "run {} of {} cannot be recorded as {}",
                index, key, status
            )));
        }
        if status == RunStatus::Err && result.is_some() {
            return Err(SweepError::InvalidOutcome(format!(
                "failed run {} of {} cannot carry a result",
                index, key
            )));
        }
        let result_data = result.map(serde_json::to_vec).transpose()?;

        let tx = self.conn.transaction()?;
        let len = require_series(&tx, key)?;
        check_index(key, index, len)?;
        if let Some(existing) = get_entry(&tx, key, ATTR_STATUS, index)? {
            return Err(SweepError::InvalidOutcome(format!(
                "run {} of {} is already {}",
                index,
                key,
                String::from_utf8_lossy(&existing)
            )));
        }
        put_entry(&tx, key, ATTR_STATUS, index, status.as_str().as_bytes())?;
        put_entry(&tx, key, ATTR_STDOUT, index, stdout)?;
        put_entry(&tx, key, ATTR_STDERR, index, stderr)?;
        match result_data {
            Some(data) => put_entry(&tx, key, ATTR_RESULT, index, &data)?,
            None => {
                tx.execute(
                    "DELETE FROM entries WHERE series_key = ?1 AND attr = ?2 AND idx = ?3",
                    params![key, ATTR_RESULT, index as i64],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Every run of the series in index order, unexecuted ones included.
    pub fn series_results(&self, key: &str) -> Result<Vec<Run>> {
        let len = require_series(&self.conn, key)?;
        let mut runs: Vec<Run> = (0..len).map(|idx| Run::not_run(key, idx)).collect();
        let mut stmt = self.conn.prepare(
            "SELECT attr, idx, value FROM entries WHERE series_key = ?1 AND attr != ?2",
        )?;
        let rows = stmt.query_map(params![key, ATTR_CONFIG], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;
        for row in rows {
            let (attr, idx, value) = row?;
            let Some(run) = usize::try_from(idx).ok().and_then(|i| runs.get_mut(i)) else {
                continue;
            };
            match attr.as_str() {
                ATTR_STATUS => run.status = parse_status(&value)?,
                ATTR_STDOUT => run.stdout = Some(String::from_utf8_lossy(&value).into_owned()),
                ATTR_STDERR => run.stderr = Some(String::from_utf8_lossy(&value).into_owned()),
                ATTR_RESULT => run.result = Some(serde_json::from_slice(&value)?),
                _ => {}
            }
        }
        Ok(runs)
    }

    pub fn series_info(&self, key: &str) -> Result<SeriesInfo> {
        let (created_at, plan_digest, len): (String, String, i64) = self
            .conn
            .query_row(
                "SELECT created_at, plan_digest, len FROM series WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?
            .ok_or_else(|| SweepError::SeriesNotFound(key.to_string()))?;
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM entries WHERE series_key = ?1 AND attr = ?2")?;
        let rows = stmt.query_map(params![key, ATTR_STATUS], |row| row.get::<_, Vec<u8>>(0))?;
        let runs = len as usize;
        let (mut ok, mut err) = (0, 0);
        for value in rows {
            match parse_status(&value?)? {
                RunStatus::Ok => ok += 1,
                RunStatus::Err => err += 1,
                RunStatus::NotRun => {}
            }
        }
        Ok(SeriesInfo {
            key: key.to_string(),
            created_at,
            plan_digest,
            runs,
            not_run: runs - ok - err,
            ok,
            err,
        })
    }

    pub fn list_series(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT key FROM series ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Removes the series and its runs. Returns whether it existed.
    pub fn delete_series(&mut self, key: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE series_key = ?1", params![key])?;
        let removed = tx.execute("DELETE FROM series WHERE key = ?1", params![key])? > 0;
        tx.commit()?;
        if removed {
            tracing::info!(series_key = key, "deleted series");
        }
        Ok(removed)
    }
}

/// `sha256:<hex>` over the JSON encoding of the configuration list.
pub fn plan_digest(configs: &[Configuration]) -> Result<String> {
    let bytes = serde_json::to_vec(configs)?;
    Ok(format!("sha256:{}", hex::encode(Sha256::digest(bytes))))
}

fn series_len(conn: &Connection, key: &str) -> Result<Option<usize>> {
    let len: Option<i64> = conn
        .query_row(
            "SELECT len FROM series WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(len.map(|l| l as usize))
}

fn require_series(conn: &Connection, key: &str) -> Result<usize> {
    series_len(conn, key)?.ok_or_else(|| SweepError::SeriesNotFound(key.to_string()))
}

fn check_index(key: &str, index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(SweepError::IndexOutOfRange {
            series: key.to_string(),
            index,
            len,
        });
    }
    Ok(())
}

fn get_entry(conn: &Connection, key: &str, attr: &str, index: usize) -> Result<Option<Vec<u8>>> {
    let value = conn
        .query_row(
            "SELECT value FROM entries WHERE series_key = ?1 AND attr = ?2 AND idx = ?3",
            params![key, attr, index as i64],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(value)
}

fn put_entry(conn: &Connection, key: &str, attr: &str, index: usize, value: &[u8]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO entries(series_key, attr, idx, value) VALUES (?1, ?2, ?3, ?4)",
        params![key, attr, index as i64, value],
    )?;
    Ok(())
}

fn parse_status(bytes: &[u8]) -> Result<RunStatus> {
    let raw = String::from_utf8_lossy(bytes);
    raw.parse::<RunStatus>().map_err(SweepError::InvalidOutcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Query;
    use crate::run::RunExtra;
    use serde_json::json;

    fn configs(n: u32) -> Vec<Configuration> {
        (0..n)
            .map(|p| Configuration {
                query: Query::Selection,
                parallelism: p + 1,
                ..Configuration::default()
            })
            .collect()
    }

    fn result(parallelism: u32) -> RunResult {
        RunResult {
            metrics: json!({"perf": {"eventsPerSec": 1234.5}}),
            extra: RunExtra {
                faster_copy: false,
                parallelism,
            },
        }
    }

    fn temp_db(label: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!(
                "sweep_store_{}_{}_{}",
                label,
                std::process::id(),
                Utc::now().timestamp_micros()
            ))
            .join("series.db")
    }

    #[test]
    fn stored_series_exists_and_keeps_order() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        assert!(!store.has_series("s1").expect("has"));
        store.store_series("s1", &configs(5)).expect("store series");
        assert!(store.has_series("s1").expect("has"));
        let loaded = store.series_configurations("s1").expect("configs");
        assert_eq!(loaded, configs(5));
    }

    #[test]
    fn missing_series_is_reported() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        assert!(matches!(
            store.series_configurations("nope"),
            Err(SweepError::SeriesNotFound(_))
        ));
        assert!(matches!(
            store.run_status("nope", 0),
            Err(SweepError::SeriesNotFound(_))
        ));
        assert!(matches!(
            store.series_results("nope"),
            Err(SweepError::SeriesNotFound(_))
        ));
        assert!(matches!(
            store.record_run_outcome("nope", 0, RunStatus::Err, b"", b"", None),
            Err(SweepError::SeriesNotFound(_))
        ));
    }

    #[test]
    fn unrecorded_run_reads_as_not_run() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        store.store_series("s1", &configs(3)).expect("store series");
        for idx in 0..3 {
            assert_eq!(store.run_status("s1", idx).expect("status"), RunStatus::NotRun);
        }
        assert!(matches!(
            store.run_status("s1", 3),
            Err(SweepError::IndexOutOfRange { index: 3, len: 3, .. })
        ));
    }

    #[test]
    fn recorded_outcomes_come_back_in_results() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        store.store_series("s1", &configs(3)).expect("store series");
        store
            .record_run_outcome("s1", 0, RunStatus::Ok, b"out0", b"err0", Some(&result(1)))
            .expect("record ok");
        store
            .record_run_outcome("s1", 2, RunStatus::Err, b"", b"boom", None)
            .expect("record err");

        let runs = store.series_results("s1").expect("results");
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].status, RunStatus::Ok);
        assert_eq!(runs[0].stdout.as_deref(), Some("out0"));
        assert_eq!(runs[0].result, Some(result(1)));
        assert_eq!(runs[1], Run::not_run("s1", 1));
        assert_eq!(runs[2].status, RunStatus::Err);
        assert_eq!(runs[2].stderr.as_deref(), Some("boom"));
        assert_eq!(runs[2].result, None);

        let info = store.series_info("s1").expect("info");
        assert_eq!((info.runs, info.ok, info.err, info.not_run), (3, 1, 1, 1));
        assert!(!info.is_complete());
    }

    #[test]
    fn invalid_outcomes_are_rejected() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        store.store_series("s1", &configs(2)).expect("store series");
        assert!(matches!(
            store.record_run_outcome("s1", 0, RunStatus::NotRun, b"", b"", None),
            Err(SweepError::InvalidOutcome(_))
        ));
        assert!(matches!(
            store.record_run_outcome("s1", 0, RunStatus::Err, b"", b"", Some(&result(1))),
            Err(SweepError::InvalidOutcome(_))
        ));
        assert!(matches!(
            store.record_run_outcome("s1", 2, RunStatus::Ok, b"", b"", None),
            Err(SweepError::IndexOutOfRange { .. })
        ));
        assert_eq!(store.run_status("s1", 0).expect("status"), RunStatus::NotRun);
    }

    #[test]
    fn terminal_runs_cannot_be_recorded_again() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        store.store_series("s1", &configs(2)).expect("store series");
        store
            .record_run_outcome("s1", 0, RunStatus::Err, b"", b"boom", None)
            .expect("record err");
        assert!(matches!(
            store.record_run_outcome("s1", 0, RunStatus::Ok, b"", b"", Some(&result(1))),
            Err(SweepError::InvalidOutcome(_))
        ));
        assert!(matches!(
            store.record_run_outcome("s1", 0, RunStatus::Err, b"", b"again", None),
            Err(SweepError::InvalidOutcome(_))
        ));
        let runs = store.series_results("s1").expect("results");
        assert_eq!(runs[0].status, RunStatus::Err);
        assert_eq!(runs[0].stderr.as_deref(), Some("boom"));
        assert!(runs[0].result.is_none());
    }

    #[test]
    fn overwriting_a_series_resets_every_run() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        store.store_series("s1", &configs(3)).expect("store series");
        store
            .record_run_outcome("s1", 1, RunStatus::Ok, b"x", b"", Some(&result(2)))
            .expect("record");
        let replacement = configs(2);
        store.store_series("s1", &replacement).expect("overwrite");
        assert_eq!(store.series_configurations("s1").expect("configs"), replacement);
        let runs = store.series_results("s1").expect("results");
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RunStatus::NotRun && r.result.is_none()));
    }

    #[test]
    fn series_are_isolated_by_key() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        store.store_series("a", &configs(2)).expect("a");
        store.store_series("b", &configs(4)).expect("b");
        store
            .record_run_outcome("a", 0, RunStatus::Err, b"", b"", None)
            .expect("record");
        assert_eq!(store.run_status("b", 0).expect("status"), RunStatus::NotRun);
        assert_eq!(store.list_series().expect("list"), vec!["a", "b"]);
        assert!(store.delete_series("a").expect("delete"));
        assert!(!store.delete_series("a").expect("delete again"));
        assert_eq!(store.list_series().expect("list"), vec!["b"]);
    }

    #[test]
    fn plan_digest_tracks_configuration_changes() {
        let mut store = SeriesStore::open_in_memory().expect("store");
        store.store_series("s1", &configs(3)).expect("store series");
        let info = store.series_info("s1").expect("info");
        assert_eq!(info.plan_digest, plan_digest(&configs(3)).expect("digest"));
        assert!(info.plan_digest.starts_with("sha256:"));
        assert_ne!(info.plan_digest, plan_digest(&configs(4)).expect("digest"));
    }

    #[test]
    fn state_survives_reopening_the_database() {
        let path = temp_db("reopen");
        {
            let mut store = SeriesStore::open(&path).expect("open");
            store.store_series("s1", &configs(2)).expect("store series");
            store
                .record_run_outcome("s1", 0, RunStatus::Ok, b"o", b"e", Some(&result(1)))
                .expect("record");
        }
        let store = SeriesStore::open(&path).expect("reopen");
        assert_eq!(store.run_status("s1", 0).expect("status"), RunStatus::Ok);
        assert_eq!(store.run_status("s1", 1).expect("status"), RunStatus::NotRun);
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn incompatible_schema_version_is_rejected() {
        let path = temp_db("schema");
        {
            SeriesStore::open(&path).expect("open");
            let conn = Connection::open(&path).expect("raw open");
            conn.execute("UPDATE meta SET version = 99", [])
                .expect("bump version");
        }
        assert!(matches!(
            SeriesStore::open(&path),
            Err(SweepError::SchemaVersion { found: 99, .. })
        ));
        if let Some(dir) = path.parent() {
            let _ = fs::remove_dir_all(dir);
        }
    }
}
