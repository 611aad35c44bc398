//! # TaskHive Config
//!
//! TOML configuration for the TaskHive runner: queue tuning, persistence backend
//! and logging, with `${VAR}` substitution and validation.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
