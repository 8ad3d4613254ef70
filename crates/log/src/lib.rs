//! # Rekey Log
//!
//! Subscriber setup for the rekeying service. Crates log through `tracing`;
//! binaries and tests call [`init`] once.
//!
//! ```rust,no_run
//! let config = rekey_log::Config::from_env();
//! rekey_log::init(&config).expect("logger");
//! tracing::info!(service = "rekey", "started");
//! ```

#![forbid(unsafe_code)]

mod builder;
mod config;
mod error;

pub use builder::{init, init_test};
pub use config::{Config, Format};
pub use error::{LogError, LogResult};
