//! Layered configuration for nano services.
//!
//! - TOML and JSON files
//! - `.env` files via `dotenvy`
//! - The deployment variables (`OPEN_ACCESS_LOG`, `LOG_WRITER_NUM`,
//!   `LOG_POOL_NUM`, `<KIND>_LOG_NAME`)
//! - `NANO__SECTION__KEY` overrides
//! - Strict parsing: unknown fields are rejected
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! name = "orders"
//! group = "shop"
//! debug = false
//!
//! [logging]
//! access_log_percent = 100
//! writers = 4
//! queue_capacity = 10000
//!
//! [logging.streams]
//! error = "error"
//! access = "access"
//! warn = "warning"
//!
//! [telemetry]
//! level = "info"
//! json_format = true
//! ```
//!
//! # Example
//!
//! ```no_run
//! use nano_config::ConfigLoader;
//!
//! # fn main() -> Result<(), nano_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_file("nano.toml")?
//!     .with_deployment_env()
//!     .with_env_prefix("NANO")
//!     .load()?;
//! println!("serving {}", config.identity().event("access"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;

pub use config::{NanoConfig, ServerSection};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
