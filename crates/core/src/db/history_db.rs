use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection};
use thiserror::Error;
use tracing::debug;

use super::models::{RunFilter, RunStatus, RunVerdictRecord, ScanRunRecord};
use crate::model::Report;

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created by a newer release.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite-backed scan history.
#[derive(Debug)]
pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    /// Open (or create) a history database at the given path and migrate it.
    pub fn open(path: &Path) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Record one report with its verdicts and return the run id.
    pub fn record_report(
        &self,
        report: &Report,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> DbResult<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let status = RunStatus::of(report);
        let error = report.error.as_ref().map(|e| format!("{}: {}", e.kind.as_str(), e.message));
        tx.execute(
            r#"
            INSERT INTO scan_runs
                (target, sha256, format, status, verdicts, vulnerable, error, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                report.target.path,
                report.target.sha256,
                report.target.format.map(|f| f.as_str()),
                status.as_str(),
                report.summary.verdicts as i64,
                report.summary.classical_vulnerable as i64,
                error,
                started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                finished_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO run_verdicts (run_id, family, status, confidence, hits, key_bits)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for v in &report.verdicts {
                stmt.execute(params![
                    run_id,
                    v.family.as_str(),
                    v.status.as_str(),
                    v.confidence,
                    v.evidence.len() as i64,
                    v.key_bits.map(|k| k.to_string()),
                ])?;
            }
        }

        tx.commit()?;
        debug!(run_id, target = %report.target.path, status = status.as_str(), "recorded scan run");
        Ok(run_id)
    }

    /// List runs oldest-first, applying the filter.
    pub fn list_runs(&self, filter: &RunFilter) -> DbResult<Vec<ScanRunRecord>> {
        let mut sql = String::from(
            r#"
            SELECT id, target, sha256, format, status, verdicts, vulnerable, error, started_at, finished_at
            FROM scan_runs
            WHERE 1 = 1
            "#,
        );
        let mut args: Vec<Value> = Vec::new();
        if let Some(target) = &filter.target {
            sql.push_str(" AND instr(target, ?) > 0");
            args.push(Value::Text(target.clone()));
        }
        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Value::Text(status.as_str().to_string()));
        }
        sql.push_str(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let status: String = row.get(4)?;
            let status = status.parse::<RunStatus>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into())
            })?;
            Ok(ScanRunRecord {
                id: row.get(0)?,
                target: row.get(1)?,
                sha256: row.get(2)?,
                format: row.get(3)?,
                status,
                verdicts: row.get(5)?,
                vulnerable: row.get(6)?,
                error: row.get(7)?,
                started_at: row.get(8)?,
                finished_at: row.get(9)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn list_verdicts(&self, run_id: i64) -> DbResult<Vec<RunVerdictRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT run_id, family, status, confidence, hits, key_bits
            FROM run_verdicts
            WHERE run_id = ?1
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RunVerdictRecord {
                run_id: row.get(0)?,
                family: row.get(1)?,
                status: row.get(2)?,
                confidence: row.get(3)?,
                hits: row.get(4)?,
                key_bits: row.get(5)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

/// Bring the database to the latest schema using `PRAGMA user_version`.
///
/// Version map:
/// - 0: no schema
/// - 1: scan_runs
/// - 2: run_verdicts
fn apply_migrations(conn: &Connection) -> DbResult<()> {
    let current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version < 1 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS scan_runs (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                target       TEXT NOT NULL,
                sha256       TEXT,
                format       TEXT,
                status       TEXT NOT NULL,
                verdicts     INTEGER NOT NULL,
                vulnerable   INTEGER NOT NULL,
                error        TEXT,
                started_at   TEXT NOT NULL,
                finished_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scan_runs_target ON scan_runs(target);

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS run_verdicts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id      INTEGER NOT NULL REFERENCES scan_runs(id) ON DELETE CASCADE,
                family      TEXT NOT NULL,
                status      TEXT NOT NULL,
                confidence  REAL NOT NULL,
                hits        INTEGER NOT NULL,
                key_bits    TEXT
            );

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> DbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
