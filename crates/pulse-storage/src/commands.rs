use crate::db;
use crate::error::{Result, StorageError};
use crate::schema::validate_identifier;
use chrono::{DateTime, Utc};
use pulse_common::types::{CommandStatus, DeviceCommand};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const COMMANDS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS device_commands (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    command TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    executed_at INTEGER,
    response TEXT
);
CREATE INDEX IF NOT EXISTS idx_device_commands_source_status
    ON device_commands(source_id, status, created_at);
";

const SELECT_COLUMNS: &str =
    "id, source_id, command, status, created_at, executed_at, response";

/// Per-source command queue with a one-shot `pending -> completed|failed`
/// transition.
pub struct CommandStore {
    conn: Mutex<Connection>,
}

impl CommandStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let conn = db::open(data_dir)?;
        conn.execute_batch(COMMANDS_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues `command` for `source_id` in state `pending`.
    pub fn create(&self, source_id: &str, command: &str) -> Result<DeviceCommand> {
        validate_identifier("sourceId", source_id)?;
        let command = command.trim();
        if command.is_empty() {
            return Err(StorageError::Validation("command must not be empty".to_string()));
        }

        let cmd = DeviceCommand {
            id: pulse_common::id::next_id(),
            source_id: source_id.to_string(),
            command: command.to_string(),
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            response: None,
        };
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO device_commands (id, source_id, command, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &cmd.id,
                &cmd.source_id,
                &cmd.command,
                cmd.status.as_str(),
                cmd.created_at.timestamp_millis()
            ],
        )?;
        tracing::info!(command_id = %cmd.id, source_id = %source_id, command = %cmd.command, "Command queued");
        Ok(cmd)
    }

    pub fn get(&self, id: &str) -> Result<Option<DeviceCommand>> {
        let conn = self.lock_conn();
        get_locked(&conn, id)
    }

    /// Command history of a source, most recent first.
    pub fn list_for_source(&self, source_id: &str) -> Result<Vec<DeviceCommand>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM device_commands WHERE source_id = ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![source_id], row_to_command)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row??);
        }
        Ok(results)
    }

    /// Commands still awaiting execution, oldest first.
    pub fn pending_for_source(&self, source_id: &str) -> Result<Vec<DeviceCommand>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SELECT_COLUMNS} FROM device_commands WHERE source_id = ?1 AND status = 'pending'
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![source_id], row_to_command)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row??);
        }
        Ok(results)
    }

    /// Moves a pending command to a terminal state and stamps the execution
    /// time and response.
    ///
    /// Fails with [`StorageError::InvalidTransition`] if the command already
    /// left `pending`, and [`StorageError::NotFound`] if it does not exist.
    pub fn complete(
        &self,
        id: &str,
        status: CommandStatus,
        response: Option<&str>,
        executed_at: DateTime<Utc>,
    ) -> Result<DeviceCommand> {
        if !status.is_terminal() {
            return Err(StorageError::Validation(format!(
                "cannot transition a command to {status}"
            )));
        }

        let conn = self.lock_conn();
        let changed = conn.execute(
            "UPDATE device_commands SET status = ?1, response = ?2, executed_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![status.as_str(), response, executed_at.timestamp_millis(), id],
        )?;

        let current = get_locked(&conn, id)?.ok_or_else(|| StorageError::NotFound {
            entity: "command",
            id: id.to_string(),
        })?;
        if changed == 0 {
            return Err(StorageError::InvalidTransition {
                entity: "command",
                id: id.to_string(),
                status: current.status.to_string(),
            });
        }
        tracing::info!(command_id = %id, status = %status, "Command completed");
        Ok(current)
    }
}

fn get_locked(conn: &Connection, id: &str) -> Result<Option<DeviceCommand>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SELECT_COLUMNS} FROM device_commands WHERE id = ?1"
    ))?;
    let row = stmt.query_row(params![id], row_to_command).optional()?;
    row.transpose()
}

/// Maps a row; an unparseable status surfaces as a storage error rather than
/// a SQLite one.
fn row_to_command(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<DeviceCommand>> {
    let status_raw: String = row.get(3)?;
    let created_ms: i64 = row.get(4)?;
    let executed_ms: Option<i64> = row.get(5)?;
    let status = match status_raw.parse::<CommandStatus>() {
        Ok(status) => status,
        Err(e) => return Ok(Err(StorageError::Other(e))),
    };
    Ok(Ok(DeviceCommand {
        id: row.get(0)?,
        source_id: row.get(1)?,
        command: row.get(2)?,
        status,
        created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_default(),
        executed_at: executed_ms.and_then(DateTime::from_timestamp_millis),
        response: row.get(6)?,
    }))
}
