pub mod browser;
pub mod error;
pub mod http;
pub mod logs;
pub mod telemetry;
