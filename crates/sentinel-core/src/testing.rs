//! In-memory collaborators for engine tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sentinel_directory::{DirectoryError, InstanceDirectory};
use sentinel_types::{
    ConnectResult, ConnectionStatus, InstanceAuth, InstanceDetail, InstanceSummary, UserLookup,
    UserRecord, UserStatus,
};
use sentinel_users::{UserDirectory, UserStoreError, UserStoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    List,
    Find(String),
    Detail(String),
    Connect(String),
    Logout(String),
}

pub(crate) fn instance(id: &str, name: &str, status: ConnectionStatus) -> InstanceSummary {
    InstanceSummary {
        id: id.to_string(),
        name: name.to_string(),
        connection_status: status,
        auth: Some(InstanceAuth {
            token: Some(format!("tok-{name}")),
        }),
    }
}

pub(crate) fn online(id: &str, name: &str) -> InstanceSummary {
    instance(id, name, ConnectionStatus::Online)
}

pub(crate) fn missing() -> DirectoryError {
    DirectoryError::InstanceMissing {
        status: 404,
        message: "instance does not exist".to_string(),
    }
}

pub(crate) fn qr_reply() -> ConnectResult {
    ConnectResult {
        base64: Some("data:image/png;base64,AAAA".to_string()),
        code: Some("2@abc".to_string()),
        ..ConnectResult::default()
    }
}

pub(crate) struct FakeDirectory {
    listing: Mutex<Result<Vec<InstanceSummary>, DirectoryError>>,
    details: Mutex<HashMap<String, Result<InstanceDetail, DirectoryError>>>,
    connects: Mutex<HashMap<String, Result<ConnectResult, DirectoryError>>>,
    logout_errors: Mutex<HashMap<String, DirectoryError>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeDirectory {
    pub(crate) fn new(instances: Vec<InstanceSummary>) -> Self {
        Self {
            listing: Mutex::new(Ok(instances)),
            details: Mutex::new(HashMap::new()),
            connects: Mutex::new(HashMap::new()),
            logout_errors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing(err: DirectoryError) -> Self {
        let fake = Self::new(Vec::new());
        *fake.listing.lock() = Err(err);
        fake
    }

    pub(crate) fn state(self, name: &str, state: Option<&str>) -> Self {
        self.details
            .lock()
            .insert(name.to_string(), Ok(InstanceDetail::with_state(state)));
        self
    }

    pub(crate) fn detail_error(self, name: &str, err: DirectoryError) -> Self {
        self.details.lock().insert(name.to_string(), Err(err));
        self
    }

    pub(crate) fn connect_reply(self, name: &str, reply: Result<ConnectResult, DirectoryError>) -> Self {
        self.connects.lock().insert(name.to_string(), reply);
        self
    }

    pub(crate) fn logout_error(self, name: &str, err: DirectoryError) -> Self {
        self.logout_errors.lock().insert(name.to_string(), err);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Remote calls other than listing and detail reads.
    pub(crate) fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Connect(_) | Call::Logout(_)))
            .collect()
    }

    fn expect_token(name: &str, token: &str) -> Result<(), DirectoryError> {
        if token == format!("tok-{name}") {
            Ok(())
        } else {
            Err(DirectoryError::Client {
                status: 401,
                message: format!("bad token for {name}"),
            })
        }
    }
}

#[async_trait]
impl InstanceDirectory for FakeDirectory {
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, DirectoryError> {
        self.calls.lock().push(Call::List);
        self.listing.lock().clone()
    }

    async fn find_instances(&self, name: &str) -> Result<Vec<InstanceSummary>, DirectoryError> {
        self.calls.lock().push(Call::Find(name.to_string()));
        let listing = self.listing.lock().clone()?;
        Ok(listing.into_iter().filter(|i| i.name == name).collect())
    }

    async fn instance_detail(
        &self,
        name: &str,
        token: &str,
    ) -> Result<InstanceDetail, DirectoryError> {
        self.calls.lock().push(Call::Detail(name.to_string()));
        Self::expect_token(name, token)?;
        self.details
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Ok(InstanceDetail::with_state(Some("open"))))
    }

    async fn connect(&self, name: &str, token: &str) -> Result<ConnectResult, DirectoryError> {
        self.calls.lock().push(Call::Connect(name.to_string()));
        Self::expect_token(name, token)?;
        self.connects
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Ok(ConnectResult::default()))
    }

    async fn logout(&self, name: &str, token: &str) -> Result<(), DirectoryError> {
        self.calls.lock().push(Call::Logout(name.to_string()));
        Self::expect_token(name, token)?;
        match self.logout_errors.lock().get(name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Store that is always unreachable.
pub(crate) struct BrokenUsers;

#[async_trait]
impl UserDirectory for BrokenUsers {
    async fn find_by_instance_id(&self, _instance_id: &str) -> UserStoreResult<Option<UserRecord>> {
        Err(UserStoreError::Corrupt("store offline".to_string()))
    }

    async fn find_by_mobile_number(&self, _mobile: &str) -> UserStoreResult<Option<UserRecord>> {
        Err(UserStoreError::Corrupt("store offline".to_string()))
    }

    async fn set_status_by_instance_id(
        &self,
        _instance_id: &str,
        _status: UserStatus,
    ) -> UserStoreResult<UserRecord> {
        Err(UserStoreError::Corrupt("store offline".to_string()))
    }

    async fn list_users(&self) -> UserStoreResult<Vec<UserRecord>> {
        Err(UserStoreError::Corrupt("store offline".to_string()))
    }

    async fn upsert(&self, _record: UserRecord) -> UserStoreResult<UserRecord> {
        Err(UserStoreError::Corrupt("store offline".to_string()))
    }

    async fn find(&self, _lookup: &UserLookup) -> UserStoreResult<Option<UserRecord>> {
        Err(UserStoreError::Corrupt("store offline".to_string()))
    }
}

pub(crate) fn user(id: &str, instance_id: &str, mobile: &str, status: UserStatus) -> UserRecord {
    UserRecord {
        id: id.to_string(),
        name: Some(format!("user {id}")),
        mobile_number: Some(mobile.to_string()),
        instance_id: Some(instance_id.to_string()),
        instance_name: None,
        status,
        updated_at: chrono::Utc::now(),
    }
}
