//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, StoreBackend};

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

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

        Self::validate_scheduler(config, &mut result);
        Self::validate_store(config, &mut result);
        Self::validate_logging(config, &mut result);

        result
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        let scheduler = &config.scheduler;

        if let Err(e) = scheduler.validate() {
            result.add_error(ValidationError::new("scheduler", e.to_string()));
        }

        if scheduler.lock_duration_ms > 0 && scheduler.lock_duration_ms < 1_000 {
            result.add_warning(ValidationWarning::new(
                "scheduler.lock_duration_ms",
                "Locks shorter than a second may expire while a job is still running",
            ));
        }

        if scheduler.idle_delay_ms == 0 && config.store.backend == StoreBackend::Sqlite {
            result.add_warning(ValidationWarning::new(
                "scheduler.idle_delay_ms",
                "An idle delay of 0 polls the database continuously when the queue is empty",
            ));
        }
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        if config.store.backend == StoreBackend::Sqlite && config.store.path.trim().is_empty() {
            result.add_error(ValidationError::new(
                "store.path",
                "A database path is required for the sqlite backend",
            ));
        }

        if config.store.backend == StoreBackend::Memory {
            result.add_warning(ValidationWarning::new(
                "store.backend",
                "Jobs in the memory backend are lost when the process exits",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_ascii_lowercase();
        // Full filter directives (e.g. "doccron=debug,info") are passed through.
        if !level.contains('=') && !level.contains(',') && !LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ValidationError::new(
                "logging.level",
                format!("Unknown log level '{}'", config.logging.level),
            ));
        }

        if let Some(dir) = &config.logging.file_dir {
            if dir.trim().is_empty() {
                result.add_error(ValidationError::new(
                    "logging.file_dir",
                    "Log directory must not be empty",
                ));
            }
        }
    }
}
