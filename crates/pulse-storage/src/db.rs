use crate::error::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the single database under the data directory.
pub const DB_FILE_NAME: &str = "pulse.db";

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

/// Opens (creating if needed) the database in WAL mode.
///
/// Several stores may hold their own connection to the same file, so a busy
/// timeout is set to serialize writers instead of failing immediately.
pub fn open(data_dir: &Path) -> Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let conn = Connection::open(db_path(data_dir))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}
