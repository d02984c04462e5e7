//! Socket.IO client core - foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by the other workspace crates:
//! - Client configuration (server URL, namespaces, reconnection, timeouts)
//! - Global error type covering configuration, I/O and runtime failures
//! - Structured logging with tracing
//! - Platform directory lookup
//! - Protocol and default-value constants

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::AppConfig;
pub use error::{SioError, SioResult};
pub use logging::init_logging;
pub use platform::Platform;
