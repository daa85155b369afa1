use crate::core::error;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

pub const PLANS_DB_NAME: &str = "plans.db";

pub fn db_connect(db_path: &str) -> Result<Connection, error::GateError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(error::GateError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::GateError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::GateError::RusqliteError)?;
    Ok(conn)
}

pub fn plans_db_path(data_root: &Path) -> PathBuf {
    data_root.join(PLANS_DB_NAME)
}
