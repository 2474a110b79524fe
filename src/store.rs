//! SQLite persistence for alerts, recording sessions, recorded processes and
//! metrics history.
//!
//! Every timestamp column holds local time as `YYYY-MM-DD HH:MM:SS` text, so
//! range queries compare lexicographically.

use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, Local};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::format::format_timestamp;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS recording_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at DATETIME DEFAULT (datetime('now', 'localtime')),
    ended_at DATETIME,
    cpu_threshold REAL NOT NULL,
    ram_threshold REAL NOT NULL,
    duration_sec INTEGER NOT NULL,
    status TEXT DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS recorded_processes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL,
    recorded_at DATETIME DEFAULT (datetime('now', 'localtime')),
    pid INTEGER NOT NULL,
    name TEXT NOT NULL,
    cpu_percent REAL,
    memory_percent REAL,
    memory_rss INTEGER,
    exe TEXT,
    cmdline TEXT,
    username TEXT,
    FOREIGN KEY (session_id) REFERENCES recording_sessions(id)
);

CREATE INDEX IF NOT EXISTS idx_recorded_session ON recorded_processes(session_id);
CREATE INDEX IF NOT EXISTS idx_recorded_at ON recorded_processes(recorded_at);
CREATE INDEX IF NOT EXISTS idx_recorded_pid ON recorded_processes(pid);

CREATE TABLE IF NOT EXISTS metrics_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp DATETIME DEFAULT (datetime('now', 'localtime')),
    cpu_percent REAL NOT NULL,
    memory_percent REAL NOT NULL,
    memory_used_mb INTEGER NOT NULL,
    memory_total_mb INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON metrics_history(timestamp);

CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at DATETIME DEFAULT (datetime('now', 'localtime')),
    type TEXT NOT NULL,
    threshold REAL NOT NULL,
    current_value REAL NOT NULL,
    message TEXT NOT NULL,
    acknowledged INTEGER DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);
CREATE INDEX IF NOT EXISTS idx_alerts_type ON alerts(type);
"#;

pub const SESSION_ACTIVE: &str = "active";
pub const SESSION_STOPPED: &str = "stopped";

/// Which dimension an alert fired on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Cpu,
    Memory,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Cpu => "cpu",
            AlertKind::Memory => "memory",
        }
    }

    fn from_column(s: &str) -> Self {
        match s {
            "cpu" => AlertKind::Cpu,
            _ => AlertKind::Memory,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub kind: AlertKind,
    pub threshold: f64,
    pub current_value: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub created_at: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub threshold: f64,
    pub current_value: f64,
    pub message: String,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: i64,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub cpu_threshold: f64,
    pub ram_threshold: f64,
    pub duration_sec: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedProcess {
    pub session_id: i64,
    #[serde(rename = "timestamp")]
    pub recorded_at: String,
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(rename = "memoryRSS")]
    pub memory_rss: u64,
    pub exe: String,
    pub cmdline: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSample {
    pub timestamp: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(rename = "memoryUsedMB")]
    pub memory_used_mb: u64,
    #[serde(rename = "memoryTotalMB")]
    pub memory_total_mb: u64,
}

/// `LIMIT -1` is unlimited in SQLite.
fn sql_limit(limit: i64) -> i64 {
    if limit > 0 { limit } else { -1 }
}

/// Shared handle to the metrics database. Cloning shares the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if needed) the database at `db_path`.
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        info!("metrics store initialized at {}", db_path.as_ref().display());
        Ok(Self { pool })
    }

    pub async fn insert_alert(&self, alert: &NewAlert) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO alerts (created_at, type, threshold, current_value, message, acknowledged) VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(format_timestamp(&Local::now()))
        .bind(alert.kind.as_str())
        .bind(alert.threshold)
        .bind(alert.current_value)
        .bind(&alert.message)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("inserted alert #{} ({})", id, alert.kind.as_str());
        Ok(id)
    }

    /// Newest first. `limit <= 0` returns every row.
    pub async fn alerts(
        &self,
        limit: i64,
        unacknowledged_only: bool,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let query = if unacknowledged_only {
            "SELECT id, created_at, type, threshold, current_value, message, acknowledged FROM alerts WHERE acknowledged = 0 ORDER BY created_at DESC, id DESC LIMIT ?"
        } else {
            "SELECT id, created_at, type, threshold, current_value, message, acknowledged FROM alerts ORDER BY created_at DESC, id DESC LIMIT ?"
        };
        let rows = sqlx::query(query)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| Alert {
                id: r.get(0),
                created_at: r.get(1),
                kind: AlertKind::from_column(r.get::<String, _>(2).as_str()),
                threshold: r.get(3),
                current_value: r.get(4),
                message: r.get(5),
                acknowledged: r.get::<Option<i64>, _>(6).unwrap_or(0) != 0,
            })
            .collect())
    }

    /// Marks an alert acknowledged. Returns whether the id existed.
    pub async fn acknowledge_alert(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE alerts SET acknowledged = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persists a new session row with status `active`; `ended_at` holds the
    /// planned end until the session stops.
    pub async fn insert_session(
        &self,
        started_at: &DateTime<Local>,
        planned_end: &DateTime<Local>,
        cpu_threshold: f64,
        ram_threshold: f64,
        duration_sec: u64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO recording_sessions (started_at, ended_at, cpu_threshold, ram_threshold, duration_sec, status) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(format_timestamp(started_at))
        .bind(format_timestamp(planned_end))
        .bind(cpu_threshold)
        .bind(ram_threshold)
        .bind(i64::try_from(duration_sec).unwrap_or(i64::MAX))
        .bind(SESSION_ACTIVE)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn finish_session(
        &self,
        id: i64,
        ended_at: &DateTime<Local>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE recording_sessions SET status = ?, ended_at = ? WHERE id = ?")
            .bind(SESSION_STOPPED)
            .bind(format_timestamp(ended_at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn session(&self, id: i64) -> Result<Option<SessionRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, started_at, ended_at, cpu_threshold, ram_threshold, duration_sec, status FROM recording_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(session_from_row))
    }

    /// Newest first. `limit <= 0` returns every row.
    pub async fn sessions(&self, limit: i64) -> Result<Vec<SessionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, started_at, ended_at, cpu_threshold, ram_threshold, duration_sec, status FROM recording_sessions ORDER BY id DESC LIMIT ?",
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(session_from_row).collect())
    }

    pub async fn insert_recorded_process(
        &self,
        process: &RecordedProcess,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO recorded_processes (session_id, recorded_at, pid, name, cpu_percent, memory_percent, memory_rss, exe, cmdline, username) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(process.session_id)
        .bind(&process.recorded_at)
        .bind(i64::from(process.pid))
        .bind(&process.name)
        .bind(process.cpu_percent)
        .bind(process.memory_percent)
        .bind(i64::try_from(process.memory_rss).unwrap_or(i64::MAX))
        .bind(&process.exe)
        .bind(&process.cmdline)
        .bind(&process.username)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest first. `limit <= 0` returns every row.
    pub async fn recorded_processes(
        &self,
        session_id: i64,
        limit: i64,
    ) -> Result<Vec<RecordedProcess>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT session_id, recorded_at, pid, name, cpu_percent, memory_percent, memory_rss, exe, cmdline, username FROM recorded_processes WHERE session_id = ? ORDER BY recorded_at DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| RecordedProcess {
                session_id: r.get(0),
                recorded_at: r.get(1),
                pid: u32::try_from(r.get::<i64, _>(2)).unwrap_or_default(),
                name: r.get(3),
                cpu_percent: r.get::<Option<f64>, _>(4).unwrap_or_default(),
                memory_percent: r.get::<Option<f64>, _>(5).unwrap_or_default(),
                memory_rss: r
                    .get::<Option<i64>, _>(6)
                    .and_then(|v| u64::try_from(v).ok())
                    .unwrap_or_default(),
                exe: r.get::<Option<String>, _>(7).unwrap_or_default(),
                cmdline: r.get::<Option<String>, _>(8).unwrap_or_default(),
                username: r.get::<Option<String>, _>(9).unwrap_or_default(),
            })
            .collect())
    }

    pub async fn insert_metrics_sample(&self, sample: &MetricsSample) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO metrics_history (timestamp, cpu_percent, memory_percent, memory_used_mb, memory_total_mb) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&sample.timestamp)
        .bind(sample.cpu_percent)
        .bind(sample.memory_percent)
        .bind(i64::try_from(sample.memory_used_mb).unwrap_or(i64::MAX))
        .bind(i64::try_from(sample.memory_total_mb).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Samples with `from <= timestamp <= to`, newest first.
    pub async fn metrics_history(
        &self,
        from: &DateTime<Local>,
        to: &DateTime<Local>,
        limit: i64,
    ) -> Result<Vec<MetricsSample>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, cpu_percent, memory_percent, memory_used_mb, memory_total_mb
            FROM metrics_history
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(format_timestamp(from))
        .bind(format_timestamp(to))
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(sample_from_row).collect())
    }

    /// Deletes samples older than `days_to_keep` days. Returns rows removed.
    pub async fn prune_metrics_history(&self, days_to_keep: u32) -> Result<u64, sqlx::Error> {
        let cutoff = Local::now() - ChronoDuration::days(i64::from(days_to_keep));
        let result = sqlx::query("DELETE FROM metrics_history WHERE timestamp < ?")
            .bind(format_timestamp(&cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear_metrics_history(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM metrics_history")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn session_from_row(r: SqliteRow) -> SessionRecord {
    SessionRecord {
        id: r.get(0),
        started_at: r.get::<Option<String>, _>(1).unwrap_or_default(),
        ended_at: r.get(2),
        cpu_threshold: r.get(3),
        ram_threshold: r.get(4),
        duration_sec: r.get(5),
        status: r
            .get::<Option<String>, _>(6)
            .unwrap_or_else(|| SESSION_ACTIVE.to_string()),
    }
}

fn sample_from_row(r: SqliteRow) -> MetricsSample {
    MetricsSample {
        timestamp: r.get(0),
        cpu_percent: r.get(1),
        memory_percent: r.get(2),
        memory_used_mb: u64::try_from(r.get::<i64, _>(3)).unwrap_or_default(),
        memory_total_mb: u64::try_from(r.get::<i64, _>(4)).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("monitor.db")).await.unwrap();
        (dir, store)
    }

    fn alert(kind: AlertKind, value: f64) -> NewAlert {
        NewAlert {
            kind,
            threshold: 50.0,
            current_value: value,
            message: format!("{} at {value}", kind.as_str()),
        }
    }

    fn sample(timestamp: &str, cpu: f64) -> MetricsSample {
        MetricsSample {
            timestamp: timestamp.to_string(),
            cpu_percent: cpu,
            memory_percent: 60.0,
            memory_used_mb: 6000,
            memory_total_mb: 10000,
        }
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.db");
        let first = Store::open(&path).await.unwrap();
        first.insert_alert(&alert(AlertKind::Cpu, 90.0)).await.unwrap();
        drop(first);

        let second = Store::open(&path).await.unwrap();
        assert_eq!(second.alerts(0, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn alerts_filter_and_acknowledge() {
        let (_dir, store) = temp_store().await;
        let first = store.insert_alert(&alert(AlertKind::Cpu, 91.0)).await.unwrap();
        store
            .insert_alert(&alert(AlertKind::Memory, 92.0))
            .await
            .unwrap();

        assert!(store.acknowledge_alert(first).await.unwrap());
        assert!(!store.acknowledge_alert(9999).await.unwrap());

        let all = store.alerts(0, false).await.unwrap();
        assert_eq!(all.len(), 2);
        // newest first
        assert_eq!(all[0].kind, AlertKind::Memory);
        assert!(all[1].acknowledged);

        let open = store.alerts(10, true).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, AlertKind::Memory);

        assert_eq!(store.alerts(1, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn session_lifecycle_rows() {
        let (_dir, store) = temp_store().await;
        let start = Local::now();
        let end = start + ChronoDuration::seconds(60);
        let id = store.insert_session(&start, &end, 50.0, 40.0, 60).await.unwrap();

        let row = store.session(id).await.unwrap().unwrap();
        assert_eq!(row.status, SESSION_ACTIVE);
        assert_eq!(row.duration_sec, 60);

        store.finish_session(id, &Local::now()).await.unwrap();
        let row = store.session(id).await.unwrap().unwrap();
        assert_eq!(row.status, SESSION_STOPPED);
        assert!(row.ended_at.is_some());

        assert_eq!(store.sessions(0).await.unwrap().len(), 1);
        assert!(store.session(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recorded_processes_are_scoped_to_session() {
        let (_dir, store) = temp_store().await;
        let now = Local::now();
        let a = store.insert_session(&now, &now, 1.0, 1.0, 1).await.unwrap();
        let b = store.insert_session(&now, &now, 1.0, 1.0, 1).await.unwrap();

        for (session_id, pid) in [(a, 10), (a, 11), (b, 20)] {
            store
                .insert_recorded_process(&RecordedProcess {
                    session_id,
                    recorded_at: format_timestamp(&now),
                    pid,
                    name: format!("proc-{pid}"),
                    cpu_percent: 80.0,
                    memory_percent: 70.0,
                    memory_rss: 1 << 20,
                    exe: String::new(),
                    cmdline: String::new(),
                    username: "root".into(),
                })
                .await
                .unwrap();
        }

        let rows = store.recorded_processes(a, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.session_id == a));
        assert_eq!(store.recorded_processes(a, 1).await.unwrap().len(), 1);
        assert_eq!(store.recorded_processes(b, 0).await.unwrap()[0].pid, 20);
    }

    #[tokio::test]
    async fn history_range_prune_and_clear() {
        let (_dir, store) = temp_store().await;
        store
            .insert_metrics_sample(&sample("2020-01-01 00:00:00", 10.0))
            .await
            .unwrap();
        let now = format_timestamp(&Local::now());
        store.insert_metrics_sample(&sample(&now, 20.0)).await.unwrap();
        store.insert_metrics_sample(&sample(&now, 30.0)).await.unwrap();

        let from = Local::now() - ChronoDuration::days(1);
        let to = Local::now() + ChronoDuration::days(1);
        let recent = store.metrics_history(&from, &to, 0).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cpu_percent, 30.0);
        assert_eq!(store.metrics_history(&from, &to, 1).await.unwrap().len(), 1);

        assert_eq!(store.prune_metrics_history(7).await.unwrap(), 1);
        assert_eq!(store.clear_metrics_history().await.unwrap(), 2);
    }
}
