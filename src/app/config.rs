//! Job configuration
//!
//! Loaded from a TOML file with every section optional, then overlaid with
//! command line values through [`Config::merge`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigErrors, InputError};
use crate::filters::{MatchMode, MatcherManager, PredicateKind, DEFAULT_STATUS_MATCHER};
use crate::fuzzer::{
    CalibrationStrategy, InputMode, LoadOptions, RecursionStrategy, SniperTemplate, SourceConfig,
    DEFAULT_COMMAND_COUNT, DEFAULT_KEYWORD,
};
use crate::http::Request;
use crate::reporting::OutputFormat;
use crate::util::DelayRange;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub http: HttpConfig,
    pub input: InputConfig,
    pub matcher: PredicateConfig,
    pub filter: PredicateConfig,
    pub calibration: CalibrationConfig,
    pub recursion: RecursionConfig,
    pub stop: StopConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Concurrent requests
    pub threads: usize,

    /// Requests per second, 0 for unlimited
    pub rate: usize,

    /// Seconds to wait after each request: `0.5` or `0.1-2.0`
    pub delay: String,

    /// Maximum seconds for the whole run, 0 to disable
    pub max_time: u64,

    /// Maximum seconds per job, 0 to disable
    pub max_time_job: u64,

    /// Suppress the banner
    pub quiet: bool,

    /// Print full URLs and redirect targets with results
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub url: String,

    pub method: String,

    pub headers: HashMap<String, String>,

    /// Request body
    pub data: String,

    /// Host header override
    pub host: String,

    /// Request timeout in seconds
    pub timeout: u64,

    pub follow_redirects: bool,

    /// Proxy URL for all requests
    pub proxy: Option<String>,

    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub mode: InputMode,

    /// Wordlists as `PATH` or `PATH:KEYWORD`
    pub wordlists: Vec<String>,

    /// Fully specified sources
    pub sources: Vec<SourceConfig>,

    /// Iterations of command sources
    pub command_count: usize,

    /// Template delimiter for sniper mode, applied to sources without one
    pub template: Option<char>,

    pub ignore_comments: bool,

    /// Extensions appended to `FUZZ` words
    pub extensions: Vec<String>,

    pub dirsearch_compat: bool,

    /// Encoders per keyword, e.g. `FUZZ = ["urlencode"]`
    pub encoders: HashMap<String, Vec<String>>,
}

/// Matcher or filter definitions, one optional value per kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredicateConfig {
    pub mode: MatchMode,
    pub status: Option<String>,
    pub size: Option<String>,
    pub words: Option<String>,
    pub lines: Option<String>,
    pub regexp: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub enabled: bool,

    /// Calibrate every host separately
    pub per_host: bool,

    pub strategy: CalibrationStrategy,

    /// Custom probe strings, replacing the built in ones
    pub strings: Vec<String>,

    /// Keyword the probes are injected into
    pub keyword: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecursionConfig {
    pub enabled: bool,

    /// Maximum depth, 0 for unbounded
    pub depth: usize,

    pub strategy: RecursionStrategy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    pub on_403: bool,
    pub on_errors: bool,
    pub on_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub file: Option<PathBuf>,
    pub format: OutputFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            threads: 40,
            rate: 0,
            delay: "0".to_string(),
            max_time: 0,
            max_time_job: 0,
            quiet: false,
            verbose: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            data: String::new(),
            host: String::new(),
            timeout: 10,
            follow_redirects: false,
            proxy: None,
            user_agent: format!("Rafale/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            mode: InputMode::Clusterbomb,
            wordlists: Vec::new(),
            sources: Vec::new(),
            command_count: DEFAULT_COMMAND_COUNT,
            template: None,
            ignore_comments: false,
            extensions: Vec::new(),
            dirsearch_compat: false,
            encoders: HashMap::new(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            per_host: false,
            strategy: CalibrationStrategy::Basic,
            strings: Vec::new(),
            keyword: DEFAULT_KEYWORD.to_string(),
        }
    }
}

/// Replace `dst` with `src` when `src` differs from the default
fn take<T: PartialEq + Clone>(dst: &mut T, src: &T, default: &T) {
    if src != default {
        *dst = src.clone();
    }
}

impl GeneralConfig {
    pub fn merge(&mut self, other: &Self) {
        let d = Self::default();
        take(&mut self.threads, &other.threads, &d.threads);
        take(&mut self.rate, &other.rate, &d.rate);
        take(&mut self.delay, &other.delay, &d.delay);
        take(&mut self.max_time, &other.max_time, &d.max_time);
        take(&mut self.max_time_job, &other.max_time_job, &d.max_time_job);
        take(&mut self.quiet, &other.quiet, &d.quiet);
        take(&mut self.verbose, &other.verbose, &d.verbose);
    }

    pub fn delay(&self) -> Result<DelayRange, String> {
        self.delay.parse()
    }
}

impl HttpConfig {
    pub fn merge(&mut self, other: &Self) {
        let d = Self::default();
        take(&mut self.url, &other.url, &d.url);
        take(&mut self.method, &other.method, &d.method);
        for (key, value) in &other.headers {
            self.headers.insert(key.clone(), value.clone());
        }
        take(&mut self.data, &other.data, &d.data);
        take(&mut self.host, &other.host, &d.host);
        take(&mut self.timeout, &other.timeout, &d.timeout);
        take(&mut self.follow_redirects, &other.follow_redirects, &d.follow_redirects);
        take(&mut self.proxy, &other.proxy, &d.proxy);
        take(&mut self.user_agent, &other.user_agent, &d.user_agent);
    }

    /// Base request template
    pub fn base_request(&self) -> Request {
        Request::builder()
            .method(&self.method)
            .url(&self.url)
            .host(&self.host)
            .headers(self.headers.clone())
            .body(&self.data)
            .build()
    }
}

impl InputConfig {
    pub fn merge(&mut self, other: &Self) {
        let d = Self::default();
        take(&mut self.mode, &other.mode, &d.mode);
        self.wordlists.extend(other.wordlists.iter().cloned());
        self.sources.extend(other.sources.iter().cloned());
        take(&mut self.command_count, &other.command_count, &d.command_count);
        take(&mut self.template, &other.template, &d.template);
        take(&mut self.ignore_comments, &other.ignore_comments, &d.ignore_comments);
        take(&mut self.extensions, &other.extensions, &d.extensions);
        take(&mut self.dirsearch_compat, &other.dirsearch_compat, &d.dirsearch_compat);
        for (keyword, encoders) in &other.encoders {
            self.encoders.insert(keyword.clone(), encoders.clone());
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            ignore_comments: self.ignore_comments,
            extensions: self.extensions.clone(),
            dirsearch_compat: self.dirsearch_compat,
            command_count: self.command_count,
        }
    }

    /// All sources: parsed wordlist arguments followed by explicit sources,
    /// with the shared template delimiter and keyword encoders applied
    pub fn source_configs(&self) -> Result<Vec<SourceConfig>, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut sources = Vec::new();

        for arg in &self.wordlists {
            match SourceConfig::parse_wordlist_arg(arg) {
                Ok(source) => sources.push(source),
                Err(e) => errors.push(e),
            }
        }
        sources.extend(self.sources.iter().cloned());

        for source in &mut sources {
            if source.template.is_none() {
                source.template = self.template;
            }
            if source.encoders.is_empty() {
                if let Some(encoders) = self.encoders.get(&source.keyword) {
                    source.encoders = encoders.clone();
                }
            }
        }

        errors.into_result()?;
        Ok(sources)
    }
}

impl PredicateConfig {
    /// Defaults for matchers: the status allow list
    pub fn default_matchers() -> Self {
        Self {
            status: Some(DEFAULT_STATUS_MATCHER.to_string()),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: &Self) {
        let d = Self::default();
        take(&mut self.mode, &other.mode, &d.mode);
        take(&mut self.status, &other.status, &d.status);
        take(&mut self.size, &other.size, &d.size);
        take(&mut self.words, &other.words, &d.words);
        take(&mut self.lines, &other.lines, &d.lines);
        take(&mut self.regexp, &other.regexp, &d.regexp);
        take(&mut self.time, &other.time, &d.time);
    }

    /// Configured (kind, value) pairs
    pub fn specs(&self) -> Vec<(PredicateKind, &str)> {
        [
            (PredicateKind::Status, &self.status),
            (PredicateKind::Size, &self.size),
            (PredicateKind::Words, &self.words),
            (PredicateKind::Lines, &self.lines),
            (PredicateKind::Regexp, &self.regexp),
            (PredicateKind::Time, &self.time),
        ]
        .into_iter()
        .filter_map(|(kind, value)| value.as_deref().map(|v| (kind, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.specs().is_empty()
    }
}

impl CalibrationConfig {
    pub fn merge(&mut self, other: &Self) {
        let d = Self::default();
        take(&mut self.enabled, &other.enabled, &d.enabled);
        take(&mut self.per_host, &other.per_host, &d.per_host);
        take(&mut self.strategy, &other.strategy, &d.strategy);
        take(&mut self.strings, &other.strings, &d.strings);
        take(&mut self.keyword, &other.keyword, &d.keyword);
    }
}

impl RecursionConfig {
    pub fn merge(&mut self, other: &Self) {
        let d = Self::default();
        take(&mut self.enabled, &other.enabled, &d.enabled);
        take(&mut self.depth, &other.depth, &d.depth);
        take(&mut self.strategy, &other.strategy, &d.strategy);
    }
}

impl StopConfig {
    pub fn merge(&mut self, other: &Self) {
        self.on_403 |= other.on_403;
        self.on_errors |= other.on_errors;
        self.on_all |= other.on_all;
    }
}

impl OutputConfig {
    pub fn merge(&mut self, other: &Self) {
        let d = Self::default();
        take(&mut self.file, &other.file, &d.file);
        take(&mut self.format, &other.format, &d.format);
    }
}

impl Config {
    /// Load configuration from a file, or the default location when no path
    /// is given. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        // only an explicitly named file has to exist
        if path.is_none() && !config_path.exists() {
            tracing::debug!("No configuration file found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|source| {
            ConfigError::ReadError {
                path: config_path.display().to_string(),
                source,
            }
        })?;
        let config: Config = toml::from_str(&contents).map_err(|e| {
            ConfigError::ParseError(format!("{}: {}", config_path.display(), e))
        })?;

        tracing::info!(path = ?config_path, "Loaded configuration");
        Ok(config)
    }

    /// Save configuration to a file, or the default location
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        tracing::info!(path = ?config_path, "Saved configuration");
        Ok(())
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "rafale", "rafale")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Overlay every non-default value of `other`, section by section
    pub fn merge(&mut self, other: &Config) {
        self.general.merge(&other.general);
        self.http.merge(&other.http);
        self.input.merge(&other.input);
        self.matcher.merge(&other.matcher);
        self.filter.merge(&other.filter);
        self.calibration.merge(&other.calibration);
        self.recursion.merge(&other.recursion);
        self.stop.merge(&other.stop);
        self.output.merge(&other.output);
    }

    /// Matchers and filters as configured. With no matcher at all the status
    /// allow list is used.
    pub fn matcher_manager(&self) -> Result<MatcherManager, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut manager = MatcherManager::new(self.matcher.mode, self.filter.mode);

        let matchers = if self.matcher.is_empty() {
            PredicateConfig::default_matchers()
        } else {
            self.matcher.clone()
        };
        for (kind, value) in matchers.specs() {
            if let Err(e) = manager.add_matcher(kind, value) {
                errors.push(e);
            }
        }
        for (kind, value) in self.filter.specs() {
            if let Err(e) = manager.add_filter(kind, value) {
                errors.push(e);
            }
        }

        errors.into_result()?;
        Ok(manager)
    }

    /// Check everything that can be checked before the job starts. All
    /// problems are reported together.
    pub fn validate(&self) -> Result<(), ConfigErrors> {
        let mut errors = ConfigErrors::new();

        if self.general.threads == 0 {
            errors.push(ConfigError::ValidationError {
                field: "general.threads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if let Err(reason) = self.general.delay() {
            errors.push(ConfigError::ValidationError {
                field: "general.delay".to_string(),
                reason,
            });
        }

        let sources = match self.input.source_configs() {
            Ok(sources) => sources,
            Err(e) => {
                errors.extend(e.0);
                Vec::new()
            }
        };
        if sources.is_empty() {
            errors.push(InputError::NoSources);
        }

        // a keyword may stand in for parts that make the URL unparseable
        let url_has_keyword = sources.iter().any(|s| self.http.url.contains(&s.keyword));
        if self.http.url.is_empty() {
            errors.push(ConfigError::MissingField("http.url".to_string()));
        } else if url::Url::parse(&self.http.url).is_err() && !url_has_keyword {
            errors.push(ConfigError::ValidationError {
                field: "http.url".to_string(),
                reason: format!("'{}' is not a valid URL", self.http.url),
            });
        }

        if let Err(e) = self.matcher_manager() {
            errors.extend(e.0);
        }

        let base = self.http.base_request();
        if self.input.mode == InputMode::Sniper {
            if sources.len() > 1 {
                errors.push(InputError::SniperSourceCount(sources.len()));
            }
            if let Some(source) = sources.first() {
                match source.template {
                    Some(delimiter) => {
                        if let Err(e) = SniperTemplate::new(&base, delimiter, &source.keyword) {
                            errors.push(e);
                        }
                    }
                    None => errors.push(InputError::MissingTemplate),
                }
            }
        } else {
            for source in &sources {
                if !base.contains_keyword(&source.keyword) {
                    errors.push(InputError::KeywordNotFound(source.keyword.clone()));
                }
            }
        }

        if self.recursion.enabled && !self.http.url.ends_with(DEFAULT_KEYWORD) {
            errors.push(ConfigError::ValidationError {
                field: "recursion.enabled".to_string(),
                reason: format!("recursion requires the URL to end with {}", DEFAULT_KEYWORD),
            });
        }

        if self.calibration.enabled && !sources.is_empty()
            && !sources.iter().any(|s| s.keyword == self.calibration.keyword)
        {
            errors.push(ConfigError::ValidationError {
                field: "calibration.keyword".to_string(),
                reason: format!(
                    "keyword {} is not defined by any input source",
                    self.calibration.keyword
                ),
            });
        }

        errors.into_result()
    }
}
