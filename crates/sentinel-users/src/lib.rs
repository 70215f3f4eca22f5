//! Persisted user directory. Reconciliation only ever reads users by key and
//! writes their `status` column.

mod sqlite;

use async_trait::async_trait;
use sentinel_types::{UserLookup, UserRecord, UserStatus};
use thiserror::Error;

pub use sqlite::SqliteUserDirectory;

#[derive(Error, Debug)]
pub enum UserStoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("user not found: {0}")]
    NotFound(String),

    #[error("corrupt user row: {0}")]
    Corrupt(String),

    #[error("invalid user record: {0}")]
    Invalid(String),
}

pub type UserStoreResult<T> = Result<T, UserStoreError>;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_instance_id(&self, instance_id: &str) -> UserStoreResult<Option<UserRecord>>;

    async fn find_by_mobile_number(&self, mobile: &str) -> UserStoreResult<Option<UserRecord>>;

    /// Set the status of the most recently updated user bound to `instance_id`.
    async fn set_status_by_instance_id(
        &self,
        instance_id: &str,
        status: UserStatus,
    ) -> UserStoreResult<UserRecord>;

    async fn list_users(&self) -> UserStoreResult<Vec<UserRecord>>;

    async fn upsert(&self, record: UserRecord) -> UserStoreResult<UserRecord>;

    async fn find(&self, lookup: &UserLookup) -> UserStoreResult<Option<UserRecord>> {
        match lookup {
            UserLookup::InstanceId(id) => self.find_by_instance_id(id).await,
            UserLookup::MobileNumber(n) => self.find_by_mobile_number(n).await,
        }
    }
}
