//! Auto-calibration and blacklist detection
//!
//! Calibration sends probe values that should not exist on the target and
//! derives a filter from whatever the probes have in common. It runs at most
//! once per scope: globally, or once per host fingerprint when calibrating
//! per host. Blacklist detection probes well-known sensitive files that
//! servers commonly answer with a uniform page.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::control::Shutdown;
use super::input::InputValues;
use super::throttle::RateThrottle;
use crate::error::CalibrationError;
use crate::filters::{MatcherManager, PredicateKind};
use crate::http::{Request, Response, Runner};
use crate::reporting::Output;
use crate::util::random_string;

/// Files probed by blacklist detection
pub const BLACKLIST_PROBES: &[&str] = &[
    ".htaccess",
    "web.config",
    ".bash_history",
    ".git/HEAD",
    ".ssh/id_rsa",
];

/// Which probe groups are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationStrategy {
    #[default]
    Basic,
    /// Basic groups plus directory-style probes
    Advanced,
}

impl CalibrationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CalibrationStrategy::Basic => "basic",
            CalibrationStrategy::Advanced => "advanced",
        }
    }
}

impl FromStr for CalibrationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(CalibrationStrategy::Basic),
            "advanced" => Ok(CalibrationStrategy::Advanced),
            other => Err(format!("unknown calibration strategy '{}'", other)),
        }
    }
}

impl fmt::Display for CalibrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Probe groups keyed by name. Custom strings replace the built in set.
pub fn calibration_strings(
    strategy: CalibrationStrategy,
    custom: &[String],
) -> BTreeMap<String, Vec<String>> {
    let mut groups = BTreeMap::new();
    if !custom.is_empty() {
        groups.insert("custom".to_string(), custom.to_vec());
        return groups;
    }

    let pair = |prefix: &str, suffix: &str| {
        vec![
            format!("{}{}{}", prefix, random_string(16), suffix),
            format!("{}{}{}", prefix, random_string(8), suffix),
        ]
    };

    groups.insert("basic_random".to_string(), pair("", ""));
    groups.insert("basic_admin".to_string(), pair("admin", ""));
    groups.insert("htaccess".to_string(), pair(".htaccess", ""));
    if strategy == CalibrationStrategy::Advanced {
        groups.insert("admin_dir".to_string(), pair("admin", "/"));
        groups.insert("random_dir".to_string(), pair("", "/"));
    }
    groups
}

/// The most specific metric shared by every response: size, then words,
/// then lines
pub fn reduce_baseline(responses: &[Response]) -> Option<(PredicateKind, String)> {
    let first = responses.first()?;
    if responses.iter().all(|r| r.content_length == first.content_length) {
        return Some((PredicateKind::Size, first.content_length.to_string()));
    }
    if responses.iter().all(|r| r.content_words == first.content_words) {
        return Some((PredicateKind::Words, first.content_words.to_string()));
    }
    if responses.iter().all(|r| r.content_lines == first.content_lines) {
        return Some((PredicateKind::Lines, first.content_lines.to_string()));
    }
    None
}

/// Outcome of installing a baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineOutcome {
    Installed(PredicateKind, String),
    AlreadyFiltered,
    NoCommonDenominator,
}

/// Derive a filter from the responses and install it, globally or for
/// `host`, unless the existing filters already drop the baseline
pub fn install_baseline(
    matchers: &RwLock<MatcherManager>,
    responses: &[Response],
    host: Option<&str>,
) -> BaselineOutcome {
    let (Some(sample), Some((kind, value))) = (responses.first(), reduce_baseline(responses)) else {
        return BaselineOutcome::NoCommonDenominator;
    };

    let mut manager = matchers.write();
    let host_set = host.and_then(|host| manager.host_filters(host));
    let already_filtered = manager
        .filters()
        .values()
        .chain(host_set.into_iter().flat_map(|set| set.values()))
        .any(|f| f.evaluate(sample));
    if already_filtered {
        return BaselineOutcome::AlreadyFiltered;
    }

    let installed = match host {
        Some(host) => manager.add_per_host_filter(host, kind, &value),
        None => manager.append_filter(kind, &value),
    };
    match installed {
        Ok(()) => BaselineOutcome::Installed(kind, value),
        Err(e) => {
            tracing::warn!(error = %e, "Derived filter rejected");
            BaselineOutcome::NoCommonDenominator
        }
    }
}

/// What probes are sent against. Probes are paced by the job's throttle
/// and abandoned on shutdown like ordinary requests.
pub struct ProbeTarget<'a> {
    pub runner: &'a dyn Runner,
    pub base: &'a Request,
    pub matchers: &'a RwLock<MatcherManager>,
    pub output: &'a dyn Output,
    pub throttle: &'a RateThrottle,
    pub shutdown: &'a Shutdown,
}

impl ProbeTarget<'_> {
    /// Send one probe per value; failing and unmatched probes are dropped
    async fn probe(&self, keyword: &str, input: &InputValues, values: &[String]) -> Vec<Response> {
        let mut responses = Vec::new();
        for value in values {
            if self.shutdown.is_triggered() {
                break;
            }
            let mut probe_input = input.clone();
            probe_input.insert(keyword.to_string(), value.as_bytes().to_vec());

            let request = match self.runner.prepare(&probe_input, self.base) {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(probe = %value, error = %e, "Could not prepare calibration probe");
                    continue;
                }
            };

            tokio::select! {
                _ = self.throttle.wait() => {}
                _ = self.shutdown.wait() => break,
            }
            let started = Instant::now();
            let result = tokio::select! {
                result = self.runner.execute(&request) => result,
                _ = self.shutdown.wait() => break,
            };
            self.throttle.tick(started, Instant::now());

            match result {
                Ok(response) => {
                    if self.matchers.read().matches(&response) {
                        responses.push(response);
                    } else {
                        tracing::debug!(probe = %value, status = response.status, "Calibration probe not matched");
                    }
                }
                Err(e) => {
                    tracing::debug!(probe = %value, error = %e, "Calibration probe failed");
                }
            }
        }
        responses
    }
}

#[derive(Debug, Default)]
struct CalibrationState {
    global: bool,
    hosts: HashSet<String>,
    blacklist_hosts: HashSet<String>,
}

/// Calibration settings and the record of which scopes are done
pub struct Calibrator {
    enabled: bool,
    per_host: bool,
    strategy: CalibrationStrategy,
    custom: Vec<String>,
    keyword: String,
    state: Mutex<CalibrationState>,
    /// Serializes probing so each scope is calibrated once
    lock: tokio::sync::Mutex<()>,
}

impl Calibrator {
    pub fn new(config: &crate::app::CalibrationConfig) -> Self {
        Self {
            enabled: config.enabled,
            per_host: config.per_host,
            strategy: config.strategy,
            custom: config.strings.clone(),
            keyword: config.keyword.clone(),
            state: Mutex::new(CalibrationState::default()),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn per_host(&self) -> bool {
        self.per_host
    }

    fn is_done(&self, host: &str) -> bool {
        let state = self.state.lock();
        if self.per_host {
            state.hosts.contains(host)
        } else {
            state.global
        }
    }

    fn mark_done(&self, host: &str) {
        let mut state = self.state.lock();
        if self.per_host {
            state.hosts.insert(host.to_string());
        } else {
            state.global = true;
        }
    }

    /// Whether a request to `host` still has to wait for calibration
    pub fn needs_calibration(&self, host: &str) -> bool {
        self.enabled && !self.is_done(host)
    }

    /// Calibrate the scope `host` belongs to, unless that already happened
    pub async fn calibrate_if_needed(
        &self,
        target: &ProbeTarget<'_>,
        input: &InputValues,
        host: &str,
    ) -> Result<(), CalibrationError> {
        if !self.needs_calibration(host) {
            return Ok(());
        }
        if !input.contains_key(&self.keyword) {
            return Err(CalibrationError::KeywordMissing(self.keyword.clone()));
        }

        let _guard = self.lock.lock().await;
        if self.is_done(host) {
            return Ok(());
        }

        let scope = if self.per_host { Some(host) } else { None };
        for (group, values) in calibration_strings(self.strategy, &self.custom) {
            let responses = target.probe(&self.keyword, input, &values).await;
            if responses.is_empty() {
                continue;
            }
            match install_baseline(target.matchers, &responses, scope) {
                BaselineOutcome::Installed(kind, value) => {
                    tracing::info!(group = %group, host, kind = %kind, value = %value, "Calibration filter installed");
                    target.output.info(&format!(
                        "Calibration: {} filter {} added{}",
                        kind,
                        value,
                        scope.map(|h| format!(" for {}", h)).unwrap_or_default()
                    ));
                }
                BaselineOutcome::AlreadyFiltered => {
                    tracing::debug!(group = %group, host, "Calibration baseline already filtered");
                }
                BaselineOutcome::NoCommonDenominator => {
                    target
                        .output
                        .warning(&format!("Calibration group {}: no common filtering values found", group));
                }
            }
        }

        if !target.shutdown.is_triggered() {
            self.mark_done(host);
        }
        Ok(())
    }

    /// Whether `host` has not been probed for blacklisted files yet
    pub fn needs_blacklist_detection(&self, host: &str) -> bool {
        !self.state.lock().blacklist_hosts.contains(host)
    }

    /// Probe sensitive files the first time a host is seen and filter
    /// uniform answers. Runs whether or not calibration is enabled; a
    /// request without the calibration keyword has nowhere to put the
    /// probes and only marks the host as seen.
    pub async fn detect_blacklist_if_needed(
        &self,
        target: &ProbeTarget<'_>,
        input: &InputValues,
        host: &str,
    ) {
        if !self.needs_blacklist_detection(host) {
            return;
        }

        let _guard = self.lock.lock().await;
        if !self.needs_blacklist_detection(host) {
            return;
        }
        if !input.contains_key(&self.keyword) {
            tracing::debug!(host, keyword = %self.keyword, "No keyword for blacklist probes");
            self.state.lock().blacklist_hosts.insert(host.to_string());
            return;
        }

        let probes: Vec<String> = BLACKLIST_PROBES.iter().map(|p| p.to_string()).collect();
        let responses = target.probe(&self.keyword, input, &probes).await;
        if target.shutdown.is_triggered() {
            return;
        }

        let mut groups: BTreeMap<String, Vec<Response>> = BTreeMap::new();
        for response in responses {
            let key = if response.status == 200 {
                response.content_words.to_string()
            } else {
                "non-200".to_string()
            };
            groups.entry(key).or_default().push(response);
        }

        let scope = if self.per_host { Some(host) } else { None };
        for (key, group) in groups.into_iter().filter(|(_, g)| g.len() > 1) {
            if let BaselineOutcome::Installed(kind, value) =
                install_baseline(target.matchers, &group, scope)
            {
                tracing::info!(host, group = %key, kind = %kind, value = %value, "Blacklist filter installed");
                target
                    .output
                    .info(&format!("Blacklist detection: {} filter {} added for {}", kind, value, host));
            }
        }
        self.state.lock().blacklist_hosts.insert(host.to_string());
    }

    /// Forget every calibrated scope
    pub fn reset(&self) {
        *self.state.lock() = CalibrationState::default();
    }
}
