//! Health watchdog for the sentinel's own public endpoint.
//!
//! [`WatchdogMachine`] holds every counter and gate and performs no I/O;
//! [`WatchdogRunner`] probes the target, runs the recovery trigger and sends
//! alerts for the effects the machine returns.

pub mod machine;
pub mod probe;
pub mod runner;
pub mod trigger;

pub use machine::{
    Effect, HealthStatus, WatchdogMachine, WatchdogPhase, WatchdogPolicy, WatchdogState,
};
pub use probe::{HealthProbe, HttpHealthProbe, ProbeResult};
pub use runner::{PollReport, WatchdogRunner};
pub use trigger::{
    CommandRecoveryTrigger, HttpRecoveryTrigger, RecoveryCredentials, RecoveryTrigger,
    UnconfiguredTrigger,
};
