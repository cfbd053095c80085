//! The single writer thread. Every mutation and read of persisted state
//! passes through here, serialized by the channel itself — no locks, no
//! lock-contention errors, matching `core/db.py`'s `DatabaseWorker` loop.

use std::path::PathBuf;
use std::sync::mpsc::Receiver;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{MeridianError, Result};

use super::{Command, FileState, PendingRequest, Response, RunRecord, RunStatus};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS file_state (
    path TEXT PRIMARY KEY,
    provider_id TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime REAL NOT NULL,
    checksum TEXT,
    inode INTEGER,
    last_seen_run_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS run_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time REAL NOT NULL,
    end_time REAL,
    status TEXT NOT NULL,
    files_processed INTEGER NOT NULL DEFAULT 0
);
";

pub(crate) fn spawn(path: PathBuf, rx: Receiver<PendingRequest>) -> Result<()> {
    let conn = open_connection(&path)?;

    std::thread::Builder::new()
        .name("meridian-state-writer".to_string())
        .spawn(move || run(conn, rx))
        .map_err(|e| MeridianError::Store(format!("failed to spawn state writer thread: {e}")))?;

    Ok(())
}

fn open_connection(path: &PathBuf) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn run(conn: Connection, rx: Receiver<PendingRequest>) {
    while let Ok((command, respond_to)) = rx.recv() {
        let result = handle(&conn, command);
        // The caller may have dropped its receiver (e.g. on cancellation);
        // that's not a writer failure.
        let _ = respond_to.send(result);
    }
}

fn handle(conn: &Connection, command: Command) -> Result<Response> {
    match command {
        Command::UpsertFileState {
            path,
            provider_id,
            size,
            mtime,
            checksum,
            run_id,
        } => {
            conn.execute(
                "INSERT INTO file_state (path, provider_id, size, mtime, checksum, inode, last_seen_run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)
                 ON CONFLICT(path) DO UPDATE SET
                   provider_id = excluded.provider_id,
                   size = excluded.size,
                   mtime = excluded.mtime,
                   checksum = excluded.checksum,
                   last_seen_run_id = excluded.last_seen_run_id",
                params![path, provider_id, size as i64, mtime, checksum, run_id],
            )?;
            Ok(Response::Unit)
        }

        Command::GetFileState { path } => {
            let state = conn
                .query_row(
                    "SELECT path, provider_id, size, mtime, checksum, inode, last_seen_run_id
                     FROM file_state WHERE path = ?1",
                    params![path],
                    row_to_file_state,
                )
                .optional()?;
            Ok(Response::FileState(state))
        }

        Command::DeleteFileState { path } => {
            conn.execute("DELETE FROM file_state WHERE path = ?1", params![path])?;
            Ok(Response::Unit)
        }

        Command::StartRun { start_time } => {
            conn.execute(
                "INSERT INTO run_history (start_time, end_time, status, files_processed)
                 VALUES (?1, NULL, 'running', 0)",
                params![start_time],
            )?;
            Ok(Response::Id(conn.last_insert_rowid()))
        }

        Command::EndRun {
            run_id,
            status,
            files_processed,
            end_time,
        } => {
            conn.execute(
                "UPDATE run_history SET end_time = ?1, status = ?2, files_processed = ?3 WHERE id = ?4",
                params![end_time, status.as_str(), files_processed as i64, run_id],
            )?;
            Ok(Response::Unit)
        }

        Command::GetRun { run_id } => {
            let run = conn
                .query_row(
                    "SELECT id, start_time, end_time, status, files_processed FROM run_history WHERE id = ?1",
                    params![run_id],
                    row_to_run_record,
                )
                .optional()?;
            Ok(Response::Run(run))
        }
    }
}

fn row_to_file_state(row: &rusqlite::Row) -> rusqlite::Result<FileState> {
    Ok(FileState {
        path: row.get(0)?,
        provider_id: row.get(1)?,
        size: row.get::<_, i64>(2)? as u64,
        mtime: row.get(3)?,
        checksum: row.get(4)?,
        inode: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        last_seen_run_id: row.get(6)?,
    })
}

fn row_to_run_record(row: &rusqlite::Row) -> rusqlite::Result<RunRecord> {
    let status_str: String = row.get(3)?;
    Ok(RunRecord {
        id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        status: RunStatus::from_str(&status_str).unwrap_or(RunStatus::Failed),
        files_processed: row.get::<_, i64>(4)? as u64,
    })
}
