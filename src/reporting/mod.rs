//! Result reporting
//!
//! The [`Output`] trait is the sink the job writes to: lifecycle messages,
//! progress, and every kept response. Collected results can be written as:
//! - JSON (machine-readable)
//! - CSV (spreadsheet-compatible)

pub mod formats;

mod console;

pub use console::ConsoleOutput;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::app::Config;
use crate::http::{Request, Response};

/// One kept response, as reported and saved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzResult {
    /// Keyword values, lossily decoded
    pub input: BTreeMap<String, String>,
    pub position: usize,
    pub status: u16,
    pub length: usize,
    pub words: usize,
    pub lines: usize,
    pub content_type: String,
    pub redirect_location: String,
    pub url: String,
    /// Host fingerprint the per-host filters are keyed by
    pub host: String,
    pub duration_ms: u64,
    #[serde(default = "default_method")]
    pub method: String,
    /// Host header override of the request, empty when none was set
    #[serde(default)]
    pub host_header: String,
}

fn default_method() -> String {
    "GET".to_string()
}

impl FuzzResult {
    pub fn from_response(response: &Response) -> Self {
        let input = response
            .request
            .input
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).to_string()))
            .collect();

        Self {
            input,
            position: response.request.position,
            status: response.status,
            length: response.content_length,
            words: response.content_words,
            lines: response.content_lines,
            content_type: response.content_type.clone(),
            redirect_location: response.redirect_location(false),
            url: response.request.url.clone(),
            host: response.request.host_fingerprint(),
            duration_ms: response.duration.as_millis() as u64,
            method: response.request.method.clone(),
            host_header: response.request.host.clone(),
        }
    }

    /// Rebuild a body-less response carrying the recorded metrics, used to
    /// re-evaluate collected results after a filter change
    pub fn to_response(&self) -> Response {
        let mut request = Request::new(&self.method, &self.url);
        request.host = self.host_header.clone();
        request.input = self
            .input
            .iter()
            .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
            .collect();
        request.position = self.position;

        let mut headers = HashMap::new();
        if !self.content_type.is_empty() {
            headers.insert("Content-Type".to_string(), self.content_type.clone());
        }
        if !self.redirect_location.is_empty() {
            headers.insert("Location".to_string(), self.redirect_location.clone());
        }

        let mut response = Response::new(
            request,
            self.status,
            headers,
            Vec::new(),
            Duration::from_millis(self.duration_ms),
        );
        response.content_length = self.length;
        response.content_words = self.words;
        response.content_lines = self.lines;
        response
    }

    /// Short form used in console output
    pub fn summary(&self) -> String {
        format!(
            "[Status: {}, Size: {}, Words: {}, Lines: {}, Duration: {}ms]",
            self.status, self.length, self.words, self.lines, self.duration_ms
        )
    }
}

/// Snapshot of the job's progress
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub position: usize,
    pub total: usize,
    pub requests_per_sec: u64,
    pub errors: usize,
    /// 1-based index of the running job
    pub queue_position: usize,
    pub queue_total: usize,
    pub elapsed: Duration,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.position as f64 / self.total as f64
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.elapsed.as_secs();
        write!(
            f,
            ":: Progress: [{}/{}] :: Job [{}/{}] :: {} req/sec :: Duration: [{}:{:02}:{:02}] :: Errors: {} ::",
            self.position,
            self.total,
            self.queue_position,
            self.queue_total,
            self.requests_per_sec,
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            self.errors
        )
    }
}

/// Result file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        }
    }

    pub fn render(&self, metadata: &ReportMetadata, results: &[FuzzResult]) -> Result<String> {
        match self {
            OutputFormat::Json => formats::json::generate(metadata, results),
            OutputFormat::Csv => formats::csv::generate(results),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unsupported output format '{}', expected json or csv", other)),
        }
    }
}

/// Header written with saved results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub url: String,
    pub started: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub version: String,
}

impl ReportMetadata {
    pub fn new(url: &str, started: DateTime<Utc>) -> Self {
        Self {
            url: url.to_string(),
            started,
            generated_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Sink for job messages and results. Implementations use interior
/// mutability; the job shares one instance between all tasks.
pub trait Output: Send + Sync {
    /// Describe the configured job before it starts
    fn banner(&self, config: &Config);

    fn progress(&self, progress: &Progress);

    fn info(&self, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Record a kept response
    fn result(&self, response: &Response);

    /// Results of the running job
    fn current_results(&self) -> Vec<FuzzResult>;

    /// Replace the results of the running job, used after re-filtering
    fn set_current_results(&self, results: Vec<FuzzResult>);

    /// Write every collected result to `path`
    fn save_file(&self, path: &Path, format: OutputFormat) -> Result<()>;

    /// Forget the results of the running job
    fn reset(&self);

    /// Move the results of the running job into the overall set
    fn cycle(&self);

    /// Flush and write the configured output file
    fn finalize(&self) -> Result<()>;
}
