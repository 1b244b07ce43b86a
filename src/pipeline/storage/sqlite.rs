use async_trait::async_trait;
use rusqlite::types::FromSql;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{info, warn};

use crate::app::ports::{StoreReaderPort, StoreWriterPort};
use crate::constants;
use crate::domain::{Measurements, StoreRow, StoredRow};
use crate::error::{PipelineError, Result};

/// DDL for the committed dataset
pub const SCHEMA_SQL: &str = include_str!("../../../migrations/001_create_air_quality_data.sql");

const UPSERT_SQL: &str = r#"
    INSERT INTO air_quality_data
        (record_key, entity, observed_at, measurements, aqi_category,
         severity_score, risk_flag, risk_code, hour, run_id, loaded_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, datetime('now'))
    ON CONFLICT(record_key) DO UPDATE SET
        entity=excluded.entity,
        observed_at=excluded.observed_at,
        measurements=excluded.measurements,
        aqi_category=excluded.aqi_category,
        severity_score=excluded.severity_score,
        risk_flag=excluded.risk_flag,
        risk_code=excluded.risk_code,
        hour=excluded.hour,
        run_id=excluded.run_id,
        loaded_at=excluded.loaded_at
"#;

const SELECT_ALL_SQL: &str = r#"
    SELECT id, record_key, entity, observed_at, measurements, aqi_category,
           severity_score, risk_flag, risk_code, hour
    FROM air_quality_data
    ORDER BY id
"#;

/// SQLite-backed store. One transaction per batch; rows upsert on
/// `record_key`. Statements run on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!("Opening SQLite store at {}", path.display());
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PipelineError::store("sqlite connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| PipelineError::store(format!("sqlite task failed: {}", e)))?
    }
}

fn write_rows(conn: &mut Connection, rows: &[StoreRow]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
        for row in rows {
            let measurements = serde_json::to_string(&row.measurements)?;
            stmt.execute(params![
                row.record_key,
                row.entity,
                row.observed_at,
                measurements,
                row.aqi_category,
                row.severity_score,
                row.risk_flag,
                row.risk_code,
                row.hour,
                row.run_id,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Read a nullable column, turning a value of the wrong storage class into
/// null so the validator can report it instead of failing the read.
fn lenient<T: FromSql>(row: &Row<'_>, idx: usize, column: &str, id: i64) -> Result<Option<T>> {
    match Option::<T>::column_result(row.get_ref(idx)?) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(id, column, error = %e, "mistyped column value read as null");
            Ok(None)
        }
    }
}

fn read_rows(conn: &Connection) -> Result<Vec<StoredRow>> {
    let mut stmt = conn.prepare(SELECT_ALL_SQL)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let raw_measurements: Option<String> = lenient(row, 4, "measurements", id)?;
        let measurements = match raw_measurements.as_deref().map(serde_json::from_str::<Measurements>) {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                warn!(id, error = %e, "unreadable measurements column");
                Measurements::new()
            }
            None => Measurements::new(),
        };
        out.push(StoredRow {
            id,
            record_key: lenient(row, 1, "record_key", id)?,
            entity: lenient(row, 2, "entity", id)?,
            observed_at: lenient(row, 3, "observed_at", id)?,
            measurements,
            aqi_category: lenient(row, 5, constants::AQI_CATEGORY, id)?,
            severity_score: lenient(row, 6, constants::SEVERITY_SCORE, id)?,
            risk_flag: lenient(row, 7, constants::RISK_FLAG, id)?,
            risk_code: lenient(row, 8, constants::RISK_CODE, id)?,
            hour: lenient(row, 9, constants::HOUR, id)?,
        });
    }
    Ok(out)
}

#[async_trait]
impl StoreWriterPort for SqliteStore {
    async fn write_batch(&self, rows: &[StoreRow]) -> Result<()> {
        let rows = rows.to_vec();
        self.with_conn(move |conn| write_rows(conn, &rows)).await
    }
}

#[async_trait]
impl StoreReaderPort for SqliteStore {
    async fn fetch_all(&self) -> Result<Vec<StoredRow>> {
        self.with_conn(|conn| read_rows(conn)).await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let sql = format!("SELECT COUNT(*) FROM {}", constants::TABLE_NAME);
            let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
            Ok(n as usize)
        })
        .await
    }
}
