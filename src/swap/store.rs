use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::swap::params::{ParamStore, scope_str};
use crate::swap::{SubTxId, TxParameterId};

/// SQLite-backed parameter store. One database per swap; the outer
/// transaction owns the path and the driver is the only writer.
#[derive(Debug)]
pub struct SqliteParamStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteParamStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create sqlite store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParamStore for SqliteParamStore {
    fn get_raw(&self, id: TxParameterId, sub_tx: Option<SubTxId>) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT value FROM swap_params WHERE param_id = ?1 AND sub_tx = ?2",
                params![id.as_str(), scope_str(sub_tx)],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("get swap parameter {}", id.as_str()))
    }

    fn set_raw(
        &mut self,
        id: TxParameterId,
        sub_tx: Option<SubTxId>,
        value: Vec<u8>,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"
INSERT INTO swap_params (param_id, sub_tx, value)
VALUES (?1, ?2, ?3)
ON CONFLICT (param_id, sub_tx) DO UPDATE SET value = excluded.value
"#,
                params![id.as_str(), scope_str(sub_tx), value],
            )
            .with_context(|| format!("set swap parameter {}", id.as_str()))?;
        Ok(())
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swap_params (
  param_id TEXT NOT NULL,
  sub_tx TEXT NOT NULL,
  value BLOB NOT NULL,
  PRIMARY KEY (param_id, sub_tx)
);
"#,
    )
    .context("create tables")?;
    Ok(())
}
