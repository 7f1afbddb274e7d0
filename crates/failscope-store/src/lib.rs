use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use failscope_config::{DEFAULT_SQLITE_FILE, FAILSCOPE_DIR_NAME};
use failscope_core::{
    FilterField, FilterOptions, FilterSet, Issue, SampleSizeRow, ScopeId, TestDescriptor,
};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use thiserror::Error;

mod predicate;

use predicate::{IssuePredicate, column};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRecord {
    pub id: ScopeId,
    pub name: String,
    pub created_at: i64,
    pub issue_count: u64,
    pub station_count: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to decode stored json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scope {0} does not exist")]
    UnknownScope(ScopeId),
}

pub trait Store {
    fn create_scope(&self, name: &str) -> Result<ScopeId, StoreError>;
    fn get_scope(&self, scope: ScopeId) -> Result<Option<ScopeRecord>, StoreError>;
    fn list_scopes(&self) -> Result<Vec<ScopeRecord>, StoreError>;
    fn delete_scope(&self, scope: ScopeId) -> Result<bool, StoreError>;

    fn insert_issues(&self, scope: ScopeId, issues: &[Issue]) -> Result<usize, StoreError>;
    fn replace_sample_sizes(
        &self,
        scope: ScopeId,
        rows: &[SampleSizeRow],
    ) -> Result<usize, StoreError>;

    fn fetch_issues(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
        exclude_resolved: bool,
    ) -> Result<Vec<Issue>, StoreError>;
    fn fetch_sample_sizes(&self, scope: ScopeId) -> Result<Vec<SampleSizeRow>, StoreError>;
    fn filter_options(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
    ) -> Result<FilterOptions, StoreError>;
}

pub struct SqliteStore {
    conn: Connection,
    failscope_dir: PathBuf,
    sqlite_path: PathBuf,
}

impl SqliteStore {
    pub fn open(workspace_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_file(workspace_root, DEFAULT_SQLITE_FILE)
    }

    pub fn open_file(
        workspace_root: impl AsRef<Path>,
        sqlite_file: &str,
    ) -> Result<Self, StoreError> {
        let failscope_dir = workspace_root.as_ref().join(FAILSCOPE_DIR_NAME);
        let sqlite_path = failscope_dir.join(sqlite_file);

        fs::create_dir_all(&failscope_dir)?;

        let conn = Connection::open(&sqlite_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn,
            failscope_dir,
            sqlite_path,
        })
    }

    pub fn failscope_dir(&self) -> &Path {
        &self.failscope_dir
    }

    pub fn sqlite_path(&self) -> &Path {
        &self.sqlite_path
    }

    fn ensure_scope(&self, scope: ScopeId) -> Result<(), StoreError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM scopes WHERE id = ?1",
                params![scope],
                |_| Ok(()),
            )
            .optional()?;
        exists.ok_or(StoreError::UnknownScope(scope))
    }

    fn distinct_values(
        &self,
        scope: ScopeId,
        field: FilterField,
        filters: &FilterSet,
    ) -> Result<Vec<String>, StoreError> {
        let predicate = IssuePredicate::build(scope, &filters.without(field), false);
        let column = column(field);
        let sql = format!(
            "SELECT DISTINCT trim({column}) FROM issues \
             WHERE {} AND {column} IS NOT NULL AND trim({column}) <> '' \
             ORDER BY 1",
            predicate.sql
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(predicate.params.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let values = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

const ISSUE_COLUMNS: &str = "fa_number, serial_number, station, config, failed_test, test_id, \
     failed_location, symptom, failure_type, fa_status, open_date, priority, sample_status, \
     department, function_or_cosmetic, unit_number";

impl Store for SqliteStore {
    fn create_scope(&self, name: &str) -> Result<ScopeId, StoreError> {
        self.conn.execute(
            "INSERT INTO scopes (name, created_at) VALUES (?1, ?2)",
            params![name.trim(), unix_timestamp_secs()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_scope(&self, scope: ScopeId) -> Result<Option<ScopeRecord>, StoreError> {
        let record = self
            .conn
            .query_row(
                &format!("{SCOPE_SELECT} WHERE s.id = ?1"),
                params![scope],
                scope_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn list_scopes(&self) -> Result<Vec<ScopeRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SCOPE_SELECT} ORDER BY s.id ASC"))?;
        let rows = stmt.query_map([], scope_from_row)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn delete_scope(&self, scope: ScopeId) -> Result<bool, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM issues WHERE scope_id = ?1", params![scope])?;
        tx.execute("DELETE FROM sample_sizes WHERE scope_id = ?1", params![scope])?;
        let removed = tx.execute("DELETE FROM scopes WHERE id = ?1", params![scope])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn insert_issues(&self, scope: ScopeId, issues: &[Issue]) -> Result<usize, StoreError> {
        self.ensure_scope(scope)?;

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO issues (scope_id, {ISSUE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
            ))?;
            for issue in issues {
                stmt.execute(params![
                    scope,
                    issue.fa_number,
                    issue.serial_number,
                    issue.station,
                    issue.config,
                    issue.failed_test,
                    issue.test_id,
                    issue.failed_location,
                    issue.symptom,
                    issue.failure_type,
                    issue.fa_status,
                    issue.open_date.map(|date| date.format("%Y-%m-%d").to_string()),
                    issue.priority,
                    issue.sample_status,
                    issue.department,
                    issue.function_or_cosmetic,
                    issue.unit_number,
                ])?;
            }
        }
        tx.commit()?;

        Ok(issues.len())
    }

    fn replace_sample_sizes(
        &self,
        scope: ScopeId,
        rows: &[SampleSizeRow],
    ) -> Result<usize, StoreError> {
        self.ensure_scope(scope)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM sample_sizes WHERE scope_id = ?1", params![scope])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO sample_sizes (scope_id, station, position, tests_json, config_samples_json)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(scope_id, station) DO UPDATE SET
                    position = excluded.position,
                    tests_json = excluded.tests_json,
                    config_samples_json = excluded.config_samples_json
                "#,
            )?;
            for (position, row) in rows.iter().enumerate() {
                stmt.execute(params![
                    scope,
                    row.station.trim(),
                    position as i64,
                    serde_json::to_string(&row.tests)?,
                    serde_json::to_string(&row.config_samples)?,
                ])?;
            }
        }
        tx.commit()?;

        Ok(rows.len())
    }

    fn fetch_issues(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
        exclude_resolved: bool,
    ) -> Result<Vec<Issue>, StoreError> {
        let predicate = IssuePredicate::build(scope, filters, exclude_resolved);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE {} ORDER BY id ASC",
            predicate.sql
        ))?;

        let rows = stmt.query_map(params_from_iter(predicate.params.iter()), issue_from_row)?;
        let issues = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    fn fetch_sample_sizes(&self, scope: ScopeId) -> Result<Vec<SampleSizeRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT station, tests_json, config_samples_json
            FROM sample_sizes
            WHERE scope_id = ?1
            ORDER BY position ASC
            "#,
        )?;

        let rows = stmt.query_map(params![scope], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut decoded = Vec::new();
        for row in rows {
            let (station, tests_json, config_json) = row?;
            let tests: Vec<TestDescriptor> = serde_json::from_str(&tests_json)?;
            let config_samples: BTreeMap<String, u64> = serde_json::from_str(&config_json)?;
            decoded.push(SampleSizeRow {
                station,
                tests,
                config_samples,
            });
        }
        Ok(decoded)
    }

    fn filter_options(
        &self,
        scope: ScopeId,
        filters: &FilterSet,
    ) -> Result<FilterOptions, StoreError> {
        let mut options = FilterOptions::default();
        for field in FilterField::ALL {
            let values = self.distinct_values(scope, field, filters)?;
            options.insert_sorted(field, values);
        }
        Ok(options)
    }
}

const SCOPE_SELECT: &str = r#"
    SELECT s.id, s.name, s.created_at,
        (SELECT COUNT(*) FROM issues i WHERE i.scope_id = s.id),
        (SELECT COUNT(*) FROM sample_sizes z WHERE z.scope_id = s.id)
    FROM scopes s
"#;

fn scope_from_row(row: &Row<'_>) -> rusqlite::Result<ScopeRecord> {
    Ok(ScopeRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        issue_count: row.get::<_, i64>(3)?.max(0) as u64,
        station_count: row.get::<_, i64>(4)?.max(0) as u64,
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let open_date: Option<String> = row.get(10)?;
    Ok(Issue {
        fa_number: row.get(0)?,
        serial_number: row.get(1)?,
        station: row.get(2)?,
        config: row.get(3)?,
        failed_test: row.get(4)?,
        test_id: row.get(5)?,
        failed_location: row.get(6)?,
        symptom: row.get(7)?,
        failure_type: row.get(8)?,
        fa_status: row.get(9)?,
        open_date: open_date.as_deref().and_then(parse_stored_date),
        priority: row.get(11)?,
        sample_status: row.get(12)?,
        department: row.get(13)?,
        function_or_cosmetic: row.get(14)?,
        unit_number: row.get(15)?,
    })
}

fn parse_stored_date(raw: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(err) => {
            tracing::warn!(value = raw, error = %err, "ignoring unparseable open_date");
            None
        }
    }
}

fn unix_timestamp_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS scopes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            scope_id INTEGER NOT NULL REFERENCES scopes(id) ON DELETE CASCADE,
            fa_number TEXT NOT NULL,
            serial_number TEXT,
            station TEXT,
            config TEXT,
            failed_test TEXT,
            test_id TEXT,
            failed_location TEXT,
            symptom TEXT,
            failure_type TEXT,
            fa_status TEXT,
            open_date TEXT,
            priority TEXT,
            sample_status TEXT,
            department TEXT,
            function_or_cosmetic TEXT,
            unit_number TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_issues_scope ON issues(scope_id);
        CREATE INDEX IF NOT EXISTS idx_issues_scope_date ON issues(scope_id, open_date);

        CREATE TABLE IF NOT EXISTS sample_sizes (
            scope_id INTEGER NOT NULL REFERENCES scopes(id) ON DELETE CASCADE,
            station TEXT NOT NULL,
            position INTEGER NOT NULL,
            tests_json TEXT NOT NULL,
            config_samples_json TEXT NOT NULL,
            PRIMARY KEY (scope_id, station)
        );
        "#,
    )?;

    Ok(())
}
