//! Custom error types for Rafale
//!
//! Provides structured error handling with context propagation
//! and user-friendly error messages.

use std::fmt;

use thiserror::Error;

/// Main error type for fuzzing operations
#[derive(Error, Debug)]
pub enum FuzzError {
    /// One or more configuration problems found before the job started
    #[error("{0}")]
    Config(#[from] ConfigErrors),

    /// Input generation errors
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// Matcher/filter errors
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Runner (transport) errors
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Calibration errors
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Job queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// A control request reached a job that is no longer running
    #[error("The job is not running")]
    JobStopped,

    /// Writing results failed
    #[error("Output error: {0}")]
    Output(String),

    /// An internal invariant was violated; the job cannot continue
    #[error("Internal error: {0}")]
    Invariant(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("{0}")]
    Input(#[from] InputError),

    #[error("{0}")]
    Filter(#[from] FilterError),
}

/// A collection of configuration errors, reported together
#[derive(Debug, Default)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl ConfigErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: impl Into<ConfigError>) {
        self.0.push(err.into());
    }

    pub fn extend<E: Into<ConfigError>>(&mut self, errs: impl IntoIterator<Item = E>) {
        self.0.extend(errs.into_iter().map(Into::into));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing was collected, otherwise all collected errors
    pub fn into_result(self) -> Result<(), ConfigErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Encountered {} configuration error(s):", self.0.len())?;
        for err in &self.0 {
            writeln!(f, "  * {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

impl From<ConfigError> for ConfigErrors {
    fn from(err: ConfigError) -> Self {
        ConfigErrors(vec![err])
    }
}

/// Input provider errors
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Invalid wordlist definition '{0}', expected PATH or PATH:KEYWORD")]
    KeywordSyntax(String),

    #[error("Failed to read wordlist {path}: {source}")]
    WordlistRead {
        path: String,
        source: std::io::Error,
    },

    #[error("Keyword {0} is defined more than once")]
    DuplicateKeyword(String),

    #[error("Keyword {0} defined, but not found in headers, method, URL or POST data")]
    KeywordNotFound(String),

    #[error("Sniper mode supports exactly one input source, got {0}")]
    SniperSourceCount(usize),

    #[error("Template delimiter '{delimiter}' is not paired in {field}")]
    UnpairedTemplate { field: String, delimiter: char },

    #[error("No template locations marked with '{0}' found in the request")]
    NoTemplateLocations(char),

    #[error("Sniper mode requires a template delimiter")]
    MissingTemplate,

    #[error("Unknown input mode: {0}")]
    UnknownMode(String),

    #[error("Unknown input source kind: {0}")]
    UnknownSource(String),

    #[error("Unknown encoder: {0}")]
    UnknownEncoder(String),

    #[error("No input sources defined")]
    NoSources,
}

/// Matcher and filter errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid status code list '{0}'")]
    InvalidStatus(String),

    #[error("Invalid value range '{0}'")]
    InvalidRange(String),

    #[error("Invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Invalid time value '{0}', expected >MILLIS or <MILLIS")]
    InvalidTime(String),

    #[error("Unknown matcher/filter kind: {0}")]
    UnknownKind(String),

    #[error("Unknown matcher/filter mode: {0}, expected 'and' or 'or'")]
    UnknownMode(String),
}

/// Runner (transport) errors
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Request cancelled")]
    Cancelled,
}

/// Calibration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Autocalibration keyword \"{0}\" not found in the request")]
    KeywordMissing(String),
}

impl FuzzError {
    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            FuzzError::Config(e) => e.user_hint(),
            FuzzError::Runner(e) => format!("Network issue: {}", e.user_hint()),
            FuzzError::Input(e) => format!("Input problem: {}", e.user_hint()),
            FuzzError::Filter(e) => format!("Filter problem: {}", e),
            other => other.to_string(),
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigErrors {
    fn user_hint(&self) -> String {
        let hints: Vec<String> = self.0.iter().map(|e| e.user_hint()).collect();
        format!("Configuration problem(s):\n  {}", hints.join("\n  "))
    }
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            ConfigError::MissingField(field) => {
                format!("Required setting '{}' is missing from configuration.", field)
            }
            ConfigError::Input(e) => e.user_hint(),
            ConfigError::Filter(e) => e.to_string(),
        }
    }
}

impl UserHint for InputError {
    fn user_hint(&self) -> String {
        match self {
            InputError::WordlistRead { path, .. } => {
                format!("Could not read wordlist '{}'. Check the path.", path)
            }
            InputError::KeywordNotFound(kw) => {
                format!("Keyword {} is not used anywhere in the request. Add it to the URL, headers or body.", kw)
            }
            InputError::UnpairedTemplate { field, delimiter } => {
                format!("Every '{}' in the {} must have a closing partner.", delimiter, field)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for RunnerError {
    fn user_hint(&self) -> String {
        match self {
            RunnerError::Timeout(ms) => {
                format!("Request timed out after {}ms. The server may be slow or unresponsive.", ms)
            }
            RunnerError::InvalidUrl(url) => {
                format!("'{}' is not a valid URL. Check the format.", url)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for FuzzError {
    fn user_hint(&self) -> String {
        match self {
            FuzzError::Config(e) => e.user_hint(),
            FuzzError::Input(e) => e.user_hint(),
            FuzzError::Runner(e) => e.user_hint(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_aggregate_display() {
        let mut errors = ConfigErrors::new();
        errors.push(InputError::KeywordNotFound("FUZZ".into()));
        errors.push(FilterError::InvalidTime("100".into()));

        let text = errors.to_string();
        assert!(text.contains("2 configuration error(s)"));
        assert!(text.contains("FUZZ"));
        assert!(text.contains("Invalid time value"));
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn test_empty_config_errors_is_ok() {
        assert!(ConfigErrors::new().into_result().is_ok());
    }
}
