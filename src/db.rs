//! ==============================================================================
//! db.rs - sqlite persistence for detection readings
//! ==============================================================================
//!
//! purpose:
//!     stores every reading in a local sqlite file and answers the grouped
//!     queries behind the daily and hourly reports.
//!
//! design:
//!     rusqlite connections are not Send-friendly across await points, so the
//!     connection lives on one dedicated worker thread. async callers hand it
//!     closures over an mpsc channel and await the result on a oneshot. this
//!     also serializes all writes, which is plenty for two traps.
//!
//! relationships:
//!     - used by: server.rs (ingest inserts, report queries)
//!     - feeds: aggregate.rs (deduplicated ordered readings)
//!
//! ==============================================================================

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;
use tracing::error;

use crate::domain::{local_hour_and_day, DailyPoint, Detection, HourlyReading};

const SCHEMA_VERSION: i32 = 1;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<WorkerMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            let _ = self.sender.send(WorkerMessage::Shutdown);
            if handle.join().is_err() {
                error!("database worker panicked during shutdown");
            }
        }
    }
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// open (or create) the database file and bring the schema up to date
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (job_tx, job_rx) = mpsc::channel::<WorkerMessage>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("trap-hub-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&db_path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite database")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("failed to enable WAL mode: {err}");
                }

                let init = migrate(&mut conn).context("failed to migrate database schema");
                if ready_tx.send(init).is_err() {
                    return;
                }

                while let Ok(message) = job_rx.recv() {
                    match message {
                        WorkerMessage::Run(job) => job(&mut conn),
                        WorkerMessage::Shutdown => break,
                    }
                }
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: job_tx,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// run a closure against the connection on the worker thread
    async fn with_conn<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let wrapped = WorkerMessage::Run(Box::new(move |conn| {
            let _ = reply_tx.send(job(conn));
        }));

        self.inner
            .sender
            .send(wrapped)
            .map_err(|_| anyhow!("database worker is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the request"))?
    }

    /// persist one reading; hour and day columns are derived here so the
    /// report queries can GROUP BY them directly
    pub async fn insert_detection(&self, detection: &Detection) -> Result<i64> {
        let record = detection.clone();
        self.with_conn(move |conn| {
            let (hour, day) = local_hour_and_day(record.timestamp_ms)?;
            conn.execute(
                "INSERT INTO detections (trap_id, detection_count, x, y, timestamp_ms, hour, day)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.trap,
                    record.detection,
                    record.x,
                    record.y,
                    record.timestamp_ms,
                    hour,
                    day,
                ],
            )
            .context("failed to insert detection")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// the aggregator's input collaborator: readings deduplicated on identical
    /// (trap, timestamp) and ordered by (trap, timestamp), optionally narrowed
    /// to one calendar day
    pub async fn hourly_readings(&self, day: Option<String>) -> Result<Vec<HourlyReading>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT trap_id, MAX(detection_count), timestamp_ms, hour, day
                 FROM detections
                 WHERE (?1 IS NULL OR day = ?1)
                 GROUP BY trap_id, timestamp_ms
                 ORDER BY trap_id, timestamp_ms",
            )?;

            let mut rows = stmt.query(params![day])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(HourlyReading {
                    trap: row.get(0)?,
                    detection: row.get(1)?,
                    timestamp_ms: row.get(2)?,
                    hour: row.get(3)?,
                    day: row.get(4)?,
                });
            }
            Ok(readings)
        })
        .await
    }

    /// per-day totals for the daily chart. the counter is cumulative, so the
    /// day's highest reading is the day's total.
    pub async fn daily_totals(&self) -> Result<Vec<DailyPoint>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT day, trap_id, MAX(detection_count)
                 FROM detections
                 GROUP BY day, trap_id
                 ORDER BY day",
            )?;

            let mut rows = stmt.query([])?;
            let mut per_day: BTreeMap<String, (i64, i64)> = BTreeMap::new();
            while let Some(row) = rows.next()? {
                let day: String = row.get(0)?;
                let trap: u8 = row.get(1)?;
                let total: i64 = row.get(2)?;
                let entry = per_day.entry(day).or_insert((0, 0));
                match trap {
                    1 => entry.0 = total,
                    2 => entry.1 = total,
                    _ => {}
                }
            }

            Ok(per_day
                .into_iter()
                .map(|(day, (trap1, trap2))| DailyPoint {
                    name: day,
                    trap1,
                    trap2,
                })
                .collect())
        })
        .await
    }

    /// latest raw rows, newest first
    pub async fn recent_detections(&self, limit: u32) -> Result<Vec<Detection>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT trap_id, detection_count, x, y, timestamp_ms
                 FROM detections
                 ORDER BY id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut detections = Vec::new();
            while let Some(row) = rows.next()? {
                detections.push(Detection {
                    trap: row.get(0)?,
                    detection: row.get(1)?,
                    x: row.get(2)?,
                    y: row.get(3)?,
                    timestamp_ms: row.get(4)?,
                });
            }
            Ok(detections)
        })
        .await
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > SCHEMA_VERSION {
        bail!("database version ({version}) is newer than supported schema ({SCHEMA_VERSION})");
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS detections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trap_id INTEGER NOT NULL,
            detection_count INTEGER NOT NULL,
            x REAL NOT NULL DEFAULT 0,
            y REAL NOT NULL DEFAULT 0,
            timestamp_ms INTEGER NOT NULL,
            hour INTEGER NOT NULL,
            day TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_detections_day ON detections(day);
        CREATE INDEX IF NOT EXISTS idx_detections_trap_ts ON detections(trap_id, timestamp_ms);",
    )
    .context("failed to create detections table")?;

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migration")?;

    Ok(())
}
