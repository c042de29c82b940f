//! Terminal output sink

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{FuzzResult, Output, OutputFormat, Progress, ReportMetadata};
use crate::app::Config;
use crate::http::Response;

/// Prints results to stdout and progress to stderr. Messages go through
/// `tracing`.
pub struct ConsoleOutput {
    url: String,
    file: Option<PathBuf>,
    format: OutputFormat,
    quiet: bool,
    verbose: bool,
    started: DateTime<Utc>,
    current: Mutex<Vec<FuzzResult>>,
    finished: Mutex<Vec<FuzzResult>>,
}

impl ConsoleOutput {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.http.url.clone(),
            file: config.output.file.clone(),
            format: config.output.format,
            quiet: config.general.quiet,
            verbose: config.general.verbose,
            started: Utc::now(),
            current: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Finished jobs' results followed by the running job's
    pub fn all_results(&self) -> Vec<FuzzResult> {
        let mut results = self.finished.lock().clone();
        results.extend(self.current.lock().iter().cloned());
        results
    }

    fn format_result(&self, result: &FuzzResult) -> String {
        let input = if result.input.len() == 1 {
            result.input.values().cloned().collect::<String>()
        } else {
            result
                .input
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join(" | ")
        };

        if self.verbose {
            let mut line = format!("{:<24} {}\n| URL | {}", input, result.summary(), result.url);
            if !result.redirect_location.is_empty() {
                line.push_str(&format!("\n| --> | {}", result.redirect_location));
            }
            line
        } else {
            format!("{:<24} {}", input, result.summary())
        }
    }
}

impl Output for ConsoleOutput {
    fn banner(&self, config: &Config) {
        if self.quiet {
            return;
        }
        let mut lines = vec![
            format!(" :: Method           : {}", config.http.method),
            format!(" :: URL              : {}", config.http.url),
        ];
        for wordlist in &config.input.wordlists {
            lines.push(format!(" :: Wordlist         : {}", wordlist));
        }
        for source in &config.input.sources {
            lines.push(format!(
                " :: Input            : {}: {} ({})",
                source.keyword, source.value, source.kind
            ));
        }
        lines.push(format!(" :: Mode             : {}", config.input.mode));
        lines.push(format!(" :: Threads          : {}", config.general.threads));
        if config.general.rate > 0 {
            lines.push(format!(" :: Rate             : {}/s", config.general.rate));
        }
        if config.calibration.enabled {
            lines.push(format!(
                " :: Calibration      : {}{}",
                config.calibration.strategy,
                if config.calibration.per_host { " (per host)" } else { "" }
            ));
        }
        if config.recursion.enabled {
            lines.push(format!(
                " :: Recursion        : {} (depth {})",
                config.recursion.strategy, config.recursion.depth
            ));
        }
        if let Some(file) = &config.output.file {
            lines.push(format!(" :: Output           : {} ({})", file.display(), config.output.format.extension()));
        }

        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "\n{}\n", lines.join("\n"));
    }

    fn progress(&self, progress: &Progress) {
        if self.quiet {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", progress);
        let _ = stderr.flush();
    }

    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn result(&self, response: &Response) {
        let result = FuzzResult::from_response(response);
        let line = self.format_result(&result);
        self.current.lock().push(result);

        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "\r{}", line);
    }

    fn current_results(&self) -> Vec<FuzzResult> {
        self.current.lock().clone()
    }

    fn set_current_results(&self, results: Vec<FuzzResult>) {
        *self.current.lock() = results;
    }

    fn save_file(&self, path: &Path, format: OutputFormat) -> Result<()> {
        let metadata = ReportMetadata::new(&self.url, self.started);
        let content = format.render(&metadata, &self.all_results())?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        tracing::info!(path = %path.display(), format = format.extension(), "Results saved");
        Ok(())
    }

    fn reset(&self) {
        self.current.lock().clear();
    }

    fn cycle(&self) {
        let current = std::mem::take(&mut *self.current.lock());
        self.finished.lock().extend(current);
    }

    fn finalize(&self) -> Result<()> {
        if !self.quiet {
            let _ = writeln!(std::io::stderr());
        }
        match &self.file {
            Some(file) => self.save_file(file, self.format),
            None => Ok(()),
        }
    }
}
