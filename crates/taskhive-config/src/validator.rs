//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, StoreBackend};

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error, if any, into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_queue(config, &mut result);
        Self::validate_persistence(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let queue = &config.queue;

        let required = [
            ("queue.max_workers", queue.max_workers as u64),
            ("queue.poll_interval_ms", queue.poll_interval_ms),
            ("queue.cleanup_interval_secs", queue.cleanup_interval_secs),
            ("queue.task_max_age_secs", queue.task_max_age_secs),
            ("queue.default_timeout_secs", queue.default_timeout_secs),
            ("queue.event_capacity", queue.event_capacity as u64),
        ];
        for (path, value) in required {
            if value == 0 {
                result.add_error(ValidationError::new(path, "must be greater than 0"));
            }
        }

        if queue.max_workers > 256 {
            result.add_warning(ValidationWarning::new(
                "queue.max_workers",
                "max_workers is very high (>256), each worker is a polling loop",
            ));
        }

        if queue.retry_delay_secs == 0 && queue.default_max_retries > 0 {
            result.add_warning(ValidationWarning::new(
                "queue.retry_delay_secs",
                "retry_delay_secs is 0, failed tasks are retried immediately",
            ));
        }

        if queue.default_timeout_secs > queue.task_max_age_secs {
            result.add_warning(ValidationWarning::new(
                "queue.default_timeout_secs",
                "default timeout is longer than the maximum task age",
            ));
        }
    }

    fn validate_persistence(config: &Config, result: &mut ValidationResult) {
        let persistence = &config.persistence;

        if let Some(path) = &persistence.path {
            if path.trim().is_empty() {
                result.add_error(ValidationError::new(
                    "persistence.path",
                    "path cannot be empty",
                ));
            }
        }

        match persistence.backend {
            StoreBackend::File | StoreBackend::Sqlite if persistence.path.is_none() => {
                result.add_warning(ValidationWarning::new(
                    "persistence.path",
                    format!(
                        "path not set, using default location {:?}",
                        persistence.resolved_path()
                    ),
                ));
            }
            StoreBackend::Memory | StoreBackend::None if persistence.path.is_some() => {
                result.add_warning(ValidationWarning::new(
                    "persistence.path",
                    format!("path is ignored by the '{}' backend", persistence.backend),
                ));
            }
            _ => {}
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.trim();
        if level.is_empty() {
            result.add_error(ValidationError::new(
                "logging.level",
                "level cannot be empty",
            ));
            return;
        }

        // full filter directives such as "taskhive=debug" are passed through unchecked
        if !level.contains('=') && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    level, LOG_LEVELS
                ),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
