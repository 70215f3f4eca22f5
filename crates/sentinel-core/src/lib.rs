//! Configuration and the instance reconciliation engine.

pub mod config;
mod cross_reference;
mod reconciler;
mod remediation;
#[cfg(test)]
mod testing;

pub use config::{
    CodeChatSettings, ConfigStore, LoggingSettings, ReconcilerSettings, RecoverySettings,
    SchedulerSettings, SentinelConfig, ServerSettings, StoreSettings, WatchdogSettings,
};
pub use reconciler::{CheckError, Reconciler};
