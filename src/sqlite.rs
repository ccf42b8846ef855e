use crate::config::SessionConfig;
use crate::error::{MutationError, Result};
use crate::operators::Position;
use crate::work_item::{WorkItem, WorkStore};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// SQLite-backed store for a mutation session.
pub struct WorkDb {
    connection: Connection,
}

impl WorkDb {
    /// Opens the session database, creating it with a fresh schema when it
    /// does not exist yet and verifying the schema otherwise.
    pub fn open(db_path: &Path) -> Result<Self> {
        let is_new_db = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let connection = Connection::open(db_path)?;
        connection.pragma_update(None, "foreign_keys", true)?;

        if is_new_db {
            info!(path = %db_path.display(), "creating session database");
            create_schema(&connection)?;
        } else {
            debug!(path = %db_path.display(), "opening existing session database");
            check_schema(&connection)?;
        }

        Ok(Self { connection })
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        connection.pragma_update(None, "foreign_keys", true)?;
        create_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn config(&self) -> Result<Option<SessionConfig>> {
        let body: Option<String> = self
            .connection
            .query_row("SELECT body FROM config WHERE id = 1;", [], |row| row.get(0))
            .optional()?;
        body.map(|body| serde_json::from_str(&body).map_err(MutationError::from))
            .transpose()
    }

    /// When the stored configuration was written.
    pub fn initialized_at(&self) -> Result<Option<DateTime<Utc>>> {
        let stamp: Option<String> = self
            .connection
            .query_row(
                "SELECT initialized_at FROM config WHERE id = 1;",
                [],
                |row| row.get(0),
            )
            .optional()?;
        stamp
            .map(|stamp| {
                DateTime::parse_from_rfc3339(&stamp)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        MutationError::InvalidInput(format!("bad timestamp {}: {}", stamp, e))
                    })
            })
            .transpose()
    }

    /// Every stored work item, in insertion order.
    pub fn work_items(&self) -> Result<Vec<WorkItem>> {
        let mut stmt = self.connection.prepare(
            "SELECT job_id, module_path, operator_name, occurrence,
                    start_line, start_col, end_line, end_col
             FROM work_items ORDER BY rowid;",
        )?;
        let items = stmt
            .query_map([], work_item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn work_item_count(&self) -> Result<usize> {
        let count = self
            .connection
            .query_row("SELECT count(*) FROM work_items;", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Records the outcome reported for a job.
    pub fn add_result(&mut self, job_id: &str, outcome: &str, output: Option<&str>) -> Result<()> {
        self.connection.execute(
            "INSERT OR REPLACE INTO results (job_id, outcome, output) VALUES (?1, ?2, ?3);",
            params![job_id, outcome, output],
        )?;
        Ok(())
    }

    pub fn results_count(&self) -> Result<usize> {
        let count = self
            .connection
            .query_row("SELECT count(*) FROM results;", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl WorkStore for WorkDb {
    fn set_config(&mut self, config: &SessionConfig) -> Result<()> {
        write_config(&self.connection, config)
    }

    fn clear(&mut self) -> Result<()> {
        let tx = self.connection.transaction()?;
        clear_session(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn add_work_items<I>(&mut self, work_items: I) -> Result<()>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let tx = self.connection.transaction()?;
        insert_work_items(&tx, work_items)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_session<I>(&mut self, config: &SessionConfig, work_items: I) -> Result<()>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        let tx = self.connection.transaction()?;
        clear_session(&tx)?;
        write_config(&tx, config)?;
        insert_work_items(&tx, work_items)?;
        tx.commit()?;
        Ok(())
    }
}

fn write_config(connection: &Connection, config: &SessionConfig) -> Result<()> {
    let body = serde_json::to_string(config)?;
    let initialized_at = Utc::now().to_rfc3339();
    connection.execute(
        "INSERT OR REPLACE INTO config (id, body, initialized_at) VALUES (1, ?1, ?2);",
        params![body, initialized_at],
    )?;
    Ok(())
}

fn clear_session(connection: &Connection) -> Result<()> {
    let results = connection.execute("DELETE FROM results;", [])?;
    let items = connection.execute("DELETE FROM work_items;", [])?;
    debug!(results, items, "cleared session");
    Ok(())
}

fn insert_work_items<I>(connection: &Connection, work_items: I) -> Result<()>
where
    I: IntoIterator<Item = WorkItem>,
{
    let mut stmt = connection.prepare(
        "INSERT INTO work_items
            (job_id, module_path, operator_name, occurrence,
             start_line, start_col, end_line, end_col)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
    )?;
    let mut count = 0usize;
    for item in work_items {
        stmt.execute(params![
            item.job_id,
            item.module_path.to_string_lossy().into_owned(),
            item.operator_name,
            item.occurrence,
            item.start_pos.line,
            item.start_pos.column,
            item.end_pos.line,
            item.end_pos.column,
        ])?;
        count += 1;
    }
    debug!(count, "stored work items");
    Ok(())
}

fn work_item_from_row(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    Ok(WorkItem {
        job_id: row.get(0)?,
        module_path: PathBuf::from(row.get::<_, String>(1)?),
        operator_name: row.get(2)?,
        occurrence: row.get(3)?,
        start_pos: Position::new(row.get(4)?, row.get(5)?),
        end_pos: Position::new(row.get(6)?, row.get(7)?),
    })
}

fn create_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS config (
            id              INTEGER PRIMARY KEY CHECK (id = 1),
            body            TEXT NOT NULL,
            initialized_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS work_items (
            job_id          TEXT PRIMARY KEY,
            module_path     TEXT NOT NULL,
            operator_name   TEXT NOT NULL,
            occurrence      INTEGER NOT NULL,
            start_line      INTEGER NOT NULL,
            start_col       INTEGER NOT NULL,
            end_line        INTEGER NOT NULL,
            end_col         INTEGER NOT NULL,
            UNIQUE(module_path, operator_name, occurrence)
        );

        CREATE INDEX IF NOT EXISTS idx_work_items_module ON work_items(module_path);
        CREATE INDEX IF NOT EXISTS idx_work_items_operator ON work_items(operator_name);

        CREATE TABLE IF NOT EXISTS results (
            job_id          TEXT PRIMARY KEY REFERENCES work_items(job_id) ON DELETE CASCADE,
            outcome         TEXT NOT NULL,
            output          TEXT
        );
        ",
    )?;
    Ok(())
}

fn check_schema(connection: &Connection) -> Result<()> {
    let table_columns: Vec<(&str, Vec<&str>)> = vec![
        ("config", vec!["id", "body", "initialized_at"]),
        (
            "work_items",
            vec![
                "job_id",
                "module_path",
                "operator_name",
                "occurrence",
                "start_line",
                "start_col",
                "end_line",
                "end_col",
            ],
        ),
        ("results", vec!["job_id", "outcome", "output"]),
    ];

    for (table, columns) in table_columns {
        let exists: bool = connection.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1;",
            params![table],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(MutationError::InvalidInput(format!(
                "not a session database: missing table '{}'",
                table
            )));
        }

        let mut stmt = connection.prepare(&format!("PRAGMA table_info({});", table))?;
        let column_names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;

        for col in columns {
            if !column_names.iter().any(|name| name == col) {
                return Err(MutationError::InvalidInput(format!(
                    "not a session database: missing column '{}' in table '{}'",
                    col, table
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_items() -> Vec<WorkItem> {
        (0..3)
            .map(|i| {
                WorkItem::new(
                    "pkg/m.py",
                    "ReplaceEqWithNotEq",
                    i,
                    Position::new(i + 1, 4),
                    Position::new(i + 1, 6),
                )
            })
            .collect()
    }

    fn sample_config() -> SessionConfig {
        SessionConfig::from_toml_str("module-path = \"pkg\"\npython-version = \"3.12\"").unwrap()
    }

    #[test]
    fn test_items_round_trip_in_order() {
        let mut db = WorkDb::open_in_memory().unwrap();
        let items = sample_items();
        db.add_work_items(items.clone()).unwrap();

        assert_eq!(db.work_item_count().unwrap(), 3);
        assert_eq!(db.work_items().unwrap(), items);
    }

    #[test]
    fn test_config_is_stored() {
        let mut db = WorkDb::open_in_memory().unwrap();
        assert!(db.config().unwrap().is_none());
        assert!(db.initialized_at().unwrap().is_none());

        let config = sample_config();
        db.set_config(&config).unwrap();
        assert_eq!(db.config().unwrap(), Some(config));
        assert!(db.initialized_at().unwrap().is_some());
    }

    #[test]
    fn test_clear_removes_items_and_results() {
        let mut db = WorkDb::open_in_memory().unwrap();
        let items = sample_items();
        let job_id = items[0].job_id.clone();
        db.add_work_items(items).unwrap();
        db.add_result(&job_id, "killed", Some("1 failed")).unwrap();
        assert_eq!(db.results_count().unwrap(), 1);

        db.clear().unwrap();
        assert_eq!(db.work_item_count().unwrap(), 0);
        assert_eq!(db.results_count().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_location_is_rejected_atomically() {
        let mut db = WorkDb::open_in_memory().unwrap();
        let mut items = sample_items();
        let mut duplicate = items[0].clone();
        duplicate.job_id = "another".to_string();
        items.push(duplicate);

        assert!(db.add_work_items(items).is_err());
        assert_eq!(db.work_item_count().unwrap(), 0);
    }

    #[test]
    fn test_replace_session_swaps_everything() {
        let mut db = WorkDb::open_in_memory().unwrap();
        db.replace_session(&sample_config(), sample_items()).unwrap();
        let job_id = db.work_items().unwrap()[0].job_id.clone();
        db.add_result(&job_id, "survived", None).unwrap();

        let next = SessionConfig::from_toml_str("module-path = \"src\"").unwrap();
        let items = sample_items();
        db.replace_session(&next, items.clone()).unwrap();

        assert_eq!(db.work_items().unwrap(), items);
        assert_eq!(db.results_count().unwrap(), 0);
        assert_eq!(db.config().unwrap(), Some(next));
    }

    #[test]
    fn test_failed_replace_keeps_previous_session() {
        let mut db = WorkDb::open_in_memory().unwrap();
        db.replace_session(&sample_config(), sample_items()).unwrap();
        let before = db.work_items().unwrap();
        let stamp = db.initialized_at().unwrap();
        db.add_result(&before[0].job_id, "killed", Some("1 failed")).unwrap();

        let mut items = sample_items();
        let mut duplicate = items[0].clone();
        duplicate.job_id = "another".to_string();
        items.push(duplicate);
        let next = SessionConfig::from_toml_str("module-path = \"src\"").unwrap();

        let err = db.replace_session(&next, items).unwrap_err();
        assert!(matches!(err, MutationError::Sqlite(_)));
        assert_eq!(db.work_items().unwrap(), before);
        assert_eq!(db.results_count().unwrap(), 1);
        assert_eq!(db.config().unwrap(), Some(sample_config()));
        assert_eq!(db.initialized_at().unwrap(), stamp);
    }

    #[test]
    fn test_reopen_existing_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions/session.sqlite");
        {
            let mut db = WorkDb::open(&path).unwrap();
            db.set_config(&sample_config()).unwrap();
            db.add_work_items(sample_items()).unwrap();
        }

        let db = WorkDb::open(&path).unwrap();
        assert_eq!(db.work_item_count().unwrap(), 3);
        assert_eq!(db.config().unwrap(), Some(sample_config()));
    }

    #[test]
    fn test_foreign_database_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.sqlite");
        {
            let connection = Connection::open(&path).unwrap();
            connection
                .execute_batch("CREATE TABLE projects (id INTEGER PRIMARY KEY);")
                .unwrap();
        }

        assert!(matches!(
            WorkDb::open(&path),
            Err(MutationError::InvalidInput(_))
        ));
    }
}
