pub mod config;
pub mod echo;
pub mod error;
pub mod event_bus;
pub mod types;

pub use config::AppConfig;
pub use echo::CorrelationEcho;
pub use error::{MonitorError, MonitorResult};
pub use event_bus::{Alert, AlertChannel, AlertSink};
