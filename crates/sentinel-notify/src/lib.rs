//! Alert delivery. Sinks may fail; [`Notifier::notify`] never does.

pub mod alert;
pub mod config;
pub mod sink;
pub mod webhook;

pub use alert::{Alert, AlertLevel};
pub use config::NotifyConfig;
pub use sink::{LogSink, NotificationSink, Notifier, OutboundMessage, RecordingSink};
pub use webhook::WebhookSink;
