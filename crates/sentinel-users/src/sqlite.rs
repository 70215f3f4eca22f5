// SQLite-backed user directory

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sentinel_types::{UserRecord, UserStatus};
use tokio::sync::Mutex;

use crate::{UserDirectory, UserStoreError, UserStoreResult};

const SELECT_COLUMNS: &str =
    "id, name, mobile_number, instance_id, instance_name, status, updated_at";

type UserRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

pub struct SqliteUserDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserDirectory {
    pub async fn open(db_path: &Path) -> UserStoreResult<Self> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        tracing::info!("user directory opened at {}", db_path.display());
        Ok(store)
    }

    pub async fn open_in_memory() -> UserStoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> UserStoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT,
                mobile_number TEXT,
                instance_id TEXT,
                instance_name TEXT,
                status TEXT NOT NULL DEFAULT 'OFFLINE',
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_instance_id ON users(instance_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_users_mobile_number ON users(mobile_number)",
            [],
        )?;
        Ok(())
    }

    async fn find_one(&self, column: &str, value: &str) -> UserStoreResult<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM users WHERE {column} = ?1 ORDER BY updated_at DESC LIMIT 1"
        );
        let row = conn
            .query_row(&sql, params![value], read_row)
            .optional()?;
        row.map(into_record).transpose()
    }
}

/// Fixed-width timestamps so `ORDER BY updated_at` sorts chronologically.
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_record(row: UserRow) -> UserStoreResult<UserRecord> {
    let (id, name, mobile_number, instance_id, instance_name, status, updated_at) = row;
    let status = UserStatus::parse(&status)
        .ok_or_else(|| UserStoreError::Corrupt(format!("user {id}: unknown status `{status}`")))?;
    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| UserStoreError::Corrupt(format!("user {id}: bad timestamp: {e}")))?;
    Ok(UserRecord {
        id,
        name,
        mobile_number,
        instance_id,
        instance_name,
        status,
        updated_at,
    })
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn find_by_instance_id(&self, instance_id: &str) -> UserStoreResult<Option<UserRecord>> {
        self.find_one("instance_id", instance_id).await
    }

    async fn find_by_mobile_number(&self, mobile: &str) -> UserStoreResult<Option<UserRecord>> {
        self.find_one("mobile_number", mobile).await
    }

    async fn set_status_by_instance_id(
        &self,
        instance_id: &str,
        status: UserStatus,
    ) -> UserStoreResult<UserRecord> {
        let now = Utc::now();
        {
            let conn = self.conn.lock().await;
            let updated = conn.execute(
                "UPDATE users SET status = ?1, updated_at = ?2
                 WHERE id = (
                    SELECT id FROM users WHERE instance_id = ?3
                    ORDER BY updated_at DESC LIMIT 1
                 )",
                params![status.as_str(), stamp(now), instance_id],
            )?;
            if updated == 0 {
                return Err(UserStoreError::NotFound(format!("instance_id={instance_id}")));
            }
        }
        self.find_by_instance_id(instance_id)
            .await?
            .ok_or_else(|| UserStoreError::NotFound(format!("instance_id={instance_id}")))
    }

    async fn list_users(&self) -> UserStoreResult<Vec<UserRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM users ORDER BY updated_at DESC"
        ))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_record).collect()
    }

    async fn upsert(&self, mut record: UserRecord) -> UserStoreResult<UserRecord> {
        if record.id.trim().is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        if record.instance_id.is_none() && record.mobile_number.is_none() {
            return Err(UserStoreError::Invalid(
                "a user needs an instance_id or a mobile_number".to_string(),
            ));
        }
        record.updated_at = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, name, mobile_number, instance_id, instance_name, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                mobile_number = excluded.mobile_number,
                instance_id = excluded.instance_id,
                instance_name = excluded.instance_name,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                record.id,
                record.name,
                record.mobile_number,
                record.instance_id,
                record.instance_name,
                record.status.as_str(),
                stamp(record.updated_at),
            ],
        )?;
        Ok(record)
    }
}
