//! Typed client for the CodeChat instance directory.
//!
//! The engine only sees the [`InstanceDirectory`] trait. Transport and HTTP
//! failures are classified once, here, into [`ErrorKind`] so callers branch on
//! an enum instead of inspecting error text.

mod client;
mod error;

use async_trait::async_trait;
use sentinel_types::{ConnectResult, InstanceDetail, InstanceSummary};

pub use client::{CodeChatClient, CodeChatConfig};
pub use error::{classify_status, DirectoryError, ErrorKind};

#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<InstanceSummary>, DirectoryError>;

    async fn find_instances(&self, name: &str) -> Result<Vec<InstanceSummary>, DirectoryError>;

    async fn instance_detail(
        &self,
        name: &str,
        token: &str,
    ) -> Result<InstanceDetail, DirectoryError>;

    async fn connect(&self, name: &str, token: &str) -> Result<ConnectResult, DirectoryError>;

    async fn logout(&self, name: &str, token: &str) -> Result<(), DirectoryError>;
}
