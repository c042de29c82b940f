//! Rafale - keyword-driven HTTP fuzzer
//!
//! Headless command line front end: configuration, logging, signal
//! handling, the reqwest runner and the console output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rafale::app::Config;
use rafale::error::{ConfigError, UserHint};
use rafale::filters::MatchMode;
use rafale::fuzzer::{
    CalibrationStrategy, InputMode, Job, RecursionStrategy, Shutdown, SourceConfig, SourceKind,
};
use rafale::http::HttpRunner;
use rafale::reporting::{ConsoleOutput, OutputFormat};

/// Keyword-driven HTTP fuzzer
#[derive(Parser, Debug)]
#[command(name = "rafale")]
#[command(author, version, about = "Keyword-driven HTTP fuzzer", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(long, env = "RAFALE_CONFIG")]
    config: Option<PathBuf>,

    /// Target URL
    #[arg(short, long)]
    url: Option<String>,

    /// Wordlist as PATH or PATH:KEYWORD (repeatable)
    #[arg(short, long = "wordlist")]
    wordlists: Vec<String>,

    /// Command producing values, as COMMAND or COMMAND:KEYWORD (repeatable)
    #[arg(long = "input-cmd")]
    input_cmds: Vec<String>,

    /// Number of values produced by each command source
    #[arg(long = "input-num")]
    input_num: Option<usize>,

    /// Input mode: clusterbomb, pitchfork or sniper
    #[arg(long)]
    mode: Option<InputMode>,

    /// Sniper template delimiter
    #[arg(long)]
    template: Option<char>,

    /// Encoders for a keyword as KEYWORD:ENCODER[,ENCODER] (repeatable)
    #[arg(long = "enc")]
    encoders: Vec<String>,

    /// Extensions appended to FUZZ words, comma separated
    #[arg(short, long)]
    extensions: Option<String>,

    /// Replace %EXT% in wordlist entries with the extensions
    #[arg(short = 'D', long)]
    dirsearch: bool,

    /// Skip wordlist lines starting with #
    #[arg(long = "ignore-comments")]
    ignore_comments: bool,

    /// HTTP method
    #[arg(short = 'X', long)]
    method: Option<String>,

    /// Header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Follow redirects
    #[arg(short = 'r', long = "follow-redirects")]
    follow_redirects: bool,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Proxy URL
    #[arg(short = 'x', long)]
    proxy: Option<String>,

    /// Concurrent requests
    #[arg(short, long)]
    threads: Option<usize>,

    /// Requests per second, 0 for unthrottled
    #[arg(long)]
    rate: Option<usize>,

    /// Delay per request in seconds, fixed or as a min-max range
    #[arg(short = 'p', long)]
    delay: Option<String>,

    /// Maximum running time in seconds for the whole run
    #[arg(long = "maxtime")]
    max_time: Option<u64>,

    /// Maximum running time in seconds for each job
    #[arg(long = "maxtime-job")]
    max_time_job: Option<u64>,

    /// Match status codes
    #[arg(long)]
    mc: Option<String>,
    /// Match response size
    #[arg(long)]
    ms: Option<String>,
    /// Match word count
    #[arg(long)]
    mw: Option<String>,
    /// Match line count
    #[arg(long)]
    ml: Option<String>,
    /// Match regular expression
    #[arg(long)]
    mr: Option<String>,
    /// Match response time in milliseconds, as >N or <N
    #[arg(long)]
    mt: Option<String>,
    /// Matcher combination: and, or
    #[arg(long)]
    mmode: Option<MatchMode>,

    /// Filter status codes
    #[arg(long)]
    fc: Option<String>,
    /// Filter response size
    #[arg(long)]
    fs: Option<String>,
    /// Filter word count
    #[arg(long)]
    fw: Option<String>,
    /// Filter line count
    #[arg(long)]
    fl: Option<String>,
    /// Filter regular expression
    #[arg(long)]
    fr: Option<String>,
    /// Filter response time in milliseconds, as >N or <N
    #[arg(long)]
    ft: Option<String>,
    /// Filter combination: and, or
    #[arg(long)]
    fmode: Option<MatchMode>,

    /// Automatically calibrate filters
    #[arg(long)]
    ac: bool,
    /// Calibrate per host
    #[arg(long)]
    ach: bool,
    /// Calibration strategy: basic, advanced
    #[arg(long)]
    acs: Option<CalibrationStrategy>,
    /// Custom calibration string (repeatable)
    #[arg(long)]
    acc: Vec<String>,
    /// Keyword the calibration and blacklist probes replace
    #[arg(long)]
    ack: Option<String>,

    /// Queue a job for every discovered directory
    #[arg(long)]
    recursion: bool,
    /// Maximum recursion depth, 0 for unbounded
    #[arg(long = "recursion-depth")]
    recursion_depth: Option<usize>,
    /// Recursion strategy: default, greedy
    #[arg(long = "recursion-strategy")]
    recursion_strategy: Option<RecursionStrategy>,

    /// Stop when more than 95% of responses are 403
    #[arg(long)]
    sf: bool,
    /// Stop on spurious errors
    #[arg(long)]
    se: bool,
    /// Stop on any stop condition
    #[arg(long)]
    sa: bool,

    /// Write results to this file when done
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Result file format: json, csv
    #[arg(long = "of")]
    output_format: Option<OutputFormat>,

    /// Only print results
    #[arg(short, long)]
    silent: bool,

    /// Print full URLs and redirect targets with results
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "RAFALE_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "RAFALE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable JSON structured logging
    #[arg(long, env = "RAFALE_LOG_JSON")]
    log_json: bool,

    /// Print the default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_default_config();
    }

    init_logging(&cli)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Rafale");

    let config = load_config(&cli)?;

    if cli.validate_config {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!(e.user_hint()))?;
        eprintln!("Configuration is valid");
        return Ok(());
    }

    let shutdown = Shutdown::new();
    tokio::spawn(handle_signals(shutdown.clone()));

    let runner = HttpRunner::new(&config.http).map_err(|e| anyhow::anyhow!(e.user_hint()))?;
    let output = ConsoleOutput::new(&config);
    let job = Job::with_shutdown(config, Arc::new(runner), Arc::new(output), shutdown)
        .map_err(|e| anyhow::anyhow!(e.user_hint()))?;

    job.run().await.map_err(|e| anyhow::anyhow!(e.user_hint()))?;

    tracing::info!("Rafale finished");
    Ok(())
}

/// Initialize the logging system. Logs go to stderr or a file so stdout
/// only carries results.
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let filename = log_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("rafale.log");
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir, filename);

        if cli.log_json {
            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_ansi(false);
            subscriber.with(file_layer).init();
        } else {
            let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);
            subscriber.with(file_layer).init();
        }
    } else if cli.log_json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

/// Configuration file overlaid with the command line
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).map_err(|e| {
        match e.downcast_ref::<ConfigError>() {
            Some(config_error) => anyhow::anyhow!(config_error.user_hint()),
            None => e,
        }
    })?;
    config.merge(&cli_overrides(cli)?);
    Ok(config)
}

/// Command line values as a configuration; everything not given stays at
/// its default and is ignored by the merge
fn cli_overrides(cli: &Cli) -> Result<Config> {
    let mut config = Config::default();

    let general = &mut config.general;
    if let Some(threads) = cli.threads {
        general.threads = threads;
    }
    if let Some(rate) = cli.rate {
        general.rate = rate;
    }
    if let Some(delay) = &cli.delay {
        general.delay = delay.clone();
    }
    if let Some(max_time) = cli.max_time {
        general.max_time = max_time;
    }
    if let Some(max_time_job) = cli.max_time_job {
        general.max_time_job = max_time_job;
    }
    general.quiet = cli.silent;
    general.verbose = cli.verbose;

    let http = &mut config.http;
    if let Some(url) = &cli.url {
        http.url = url.clone();
    }
    if let Some(method) = &cli.method {
        http.method = method.to_uppercase();
    }
    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header '{}' is not in the form 'Name: value'", header))?;
        let name = name.trim();
        if name.eq_ignore_ascii_case("host") {
            http.host = value.trim().to_string();
        } else {
            http.headers.insert(name.to_string(), value.trim().to_string());
        }
    }
    if let Some(data) = &cli.data {
        http.data = data.clone();
    }
    if let Some(timeout) = cli.timeout {
        http.timeout = timeout;
    }
    http.follow_redirects = cli.follow_redirects;
    http.proxy = cli.proxy.clone();

    let input = &mut config.input;
    if let Some(mode) = cli.mode {
        input.mode = mode;
    }
    input.wordlists = cli.wordlists.clone();
    for arg in &cli.input_cmds {
        let mut source = SourceConfig::parse_wordlist_arg(arg)
            .map_err(|e| anyhow::anyhow!(e.user_hint()))?;
        source.kind = SourceKind::Command;
        input.sources.push(source);
    }
    if let Some(count) = cli.input_num {
        input.command_count = count;
    }
    input.template = cli.template;
    for arg in &cli.encoders {
        let (keyword, chain) = arg
            .split_once(':')
            .with_context(|| format!("Encoder '{}' is not in the form KEYWORD:ENCODER", arg))?;
        let names = chain
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        input.encoders.insert(keyword.trim().to_string(), names);
    }
    if let Some(extensions) = &cli.extensions {
        input.extensions = extensions
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
    }
    input.dirsearch_compat = cli.dirsearch;
    input.ignore_comments = cli.ignore_comments;

    let matcher = &mut config.matcher;
    matcher.status = cli.mc.clone();
    matcher.size = cli.ms.clone();
    matcher.words = cli.mw.clone();
    matcher.lines = cli.ml.clone();
    matcher.regexp = cli.mr.clone();
    matcher.time = cli.mt.clone();
    if let Some(mode) = cli.mmode {
        matcher.mode = mode;
    }

    let filter = &mut config.filter;
    filter.status = cli.fc.clone();
    filter.size = cli.fs.clone();
    filter.words = cli.fw.clone();
    filter.lines = cli.fl.clone();
    filter.regexp = cli.fr.clone();
    filter.time = cli.ft.clone();
    if let Some(mode) = cli.fmode {
        filter.mode = mode;
    }

    let calibration = &mut config.calibration;
    calibration.enabled = cli.ac || cli.ach || !cli.acc.is_empty();
    calibration.per_host = cli.ach;
    if let Some(strategy) = cli.acs {
        calibration.strategy = strategy;
    }
    calibration.strings = cli.acc.clone();
    if let Some(keyword) = &cli.ack {
        calibration.keyword = keyword.clone();
    }

    let recursion = &mut config.recursion;
    recursion.enabled = cli.recursion;
    if let Some(depth) = cli.recursion_depth {
        recursion.depth = depth;
    }
    if let Some(strategy) = cli.recursion_strategy {
        recursion.strategy = strategy;
    }

    config.stop.on_403 = cli.sf;
    config.stop.on_errors = cli.se;
    config.stop.on_all = cli.sa;

    config.output.file = cli.output.clone();
    if let Some(format) = cli.output_format {
        config.output.format = format;
    }

    Ok(config)
}

/// Print the default configuration
fn generate_default_config() -> Result<()> {
    let config = Config::default();
    let toml = toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

    println!("{}", toml);
    Ok(())
}

/// Trigger shutdown on the first interrupt
async fn handle_signals(shutdown: Shutdown) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to register signal handlers");
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to register Ctrl+C handler");
            return;
        }
        tracing::info!("Received Ctrl+C, initiating shutdown");
    }

    shutdown.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "rafale",
            "-u",
            "http://x/FUZZ",
            "-w",
            "words.txt:W",
            "-H",
            "Host: internal",
            "-H",
            "X-Test: 1",
            "--mc",
            "200",
            "--fs",
            "42",
            "--ach",
            "--mode",
            "pitchfork",
            "--enc",
            "W:urlencode,b64encode",
            "-t",
            "5",
        ]);
        let config = cli_overrides(&cli).unwrap();

        assert_eq!(config.http.url, "http://x/FUZZ");
        assert_eq!(config.http.host, "internal");
        assert_eq!(config.http.headers["X-Test"], "1");
        assert_eq!(config.input.wordlists, vec!["words.txt:W".to_string()]);
        assert_eq!(config.input.mode, InputMode::Pitchfork);
        assert_eq!(config.input.encoders["W"], vec!["urlencode", "b64encode"]);
        assert_eq!(config.matcher.status.as_deref(), Some("200"));
        assert_eq!(config.filter.size.as_deref(), Some("42"));
        assert!(config.calibration.enabled && config.calibration.per_host);
        assert_eq!(config.general.threads, 5);
    }

    #[test]
    fn test_cli_overlays_file_config() {
        let mut file = Config::default();
        file.general.threads = 12;
        file.http.url = "http://file/FUZZ".to_string();

        let cli = Cli::parse_from(["rafale", "-u", "http://cli/FUZZ"]);
        file.merge(&cli_overrides(&cli).unwrap());
        assert_eq!(file.http.url, "http://cli/FUZZ");
        assert_eq!(file.general.threads, 12);
    }

    #[test]
    fn test_unreadable_config_file_hint() {
        let cli = Cli::parse_from(["rafale", "--config", "/nonexistent/rafale.toml"]);
        let err = load_config(&cli).unwrap_err();
        assert!(err.to_string().contains("Could not read '/nonexistent/rafale.toml'"));
    }

    #[test]
    fn test_malformed_header() {
        let cli = Cli::parse_from(["rafale", "-H", "no-colon"]);
        assert!(cli_overrides(&cli).is_err());
    }

    #[test]
    fn test_command_source() {
        let cli = Cli::parse_from(["rafale", "--input-cmd", "seq 1 5:NUM"]);
        let config = cli_overrides(&cli).unwrap();
        assert_eq!(config.input.sources[0].kind, SourceKind::Command);
        assert_eq!(config.input.sources[0].keyword, "NUM");
        assert_eq!(config.input.sources[0].value, "seq 1 5");
    }
}
