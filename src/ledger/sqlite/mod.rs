use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection};
use tokio::sync::oneshot;

mod migrations;

use migrations::run_migrations;

use crate::{error::EngineError, models::ScoreRecord};

use super::LedgerStore;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to ledger DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join ledger DB thread: {join_err:?}");
            }
        }
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("value {value} is negative"))
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

/// SQLite-backed ledger. rusqlite connections are not `Sync`, so the
/// connection lives on its own thread and callers ship closures to it.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl SqliteStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("posefocus-ledger-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Ledger DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Ledger database thread shutting down");
            })
            .with_context(|| "failed to spawn ledger database thread")?;

        ready_rx
            .recv()
            .context("ledger database thread exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Ledger DB caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to ledger DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("ledger database thread terminated unexpectedly"))?
    }

    async fn read_records(&self) -> Result<Vec<ScoreRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT duration_seconds, ended_at
                 FROM scores
                 ORDER BY rank ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(ScoreRecord {
                    duration_seconds: to_u64(row.get::<_, i64>(0)?)?,
                    ended_at: parse_datetime(&row.get::<_, String>(1)?)?,
                });
            }
            Ok(records)
        })
        .await
    }

    async fn replace_records(&self, records: Vec<ScoreRecord>) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open ledger transaction")?;
            tx.execute("DELETE FROM scores", [])
                .context("failed to clear scores")?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO scores (rank, duration_seconds, ended_at) VALUES (?1, ?2, ?3)",
                )?;
                for (rank, record) in records.iter().enumerate() {
                    stmt.execute(params![
                        to_i64(rank as u64)?,
                        to_i64(record.duration_seconds)?,
                        record.ended_at.to_rfc3339(),
                    ])
                    .context("failed to insert score")?;
                }
            }
            tx.commit().context("failed to commit ledger")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn load_ledger(&self) -> Result<Vec<ScoreRecord>, EngineError> {
        self.read_records()
            .await
            .map_err(|err| EngineError::persistence(format!("{err:#}")))
    }

    async fn save_ledger(&self, records: &[ScoreRecord]) -> Result<(), EngineError> {
        self.replace_records(records.to_vec())
            .await
            .map_err(|err| EngineError::persistence(format!("{err:#}")))
    }
}
