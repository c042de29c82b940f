//! Response predicates: parsing and evaluation

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;
use crate::http::Response;
use crate::util::{format_ranges, parse_ranges, ValueRange};

/// Default matcher status list used when no matcher is configured
pub const DEFAULT_STATUS_MATCHER: &str = "200-299,301,302,307,401,403,405,500";

/// What part of the response a predicate looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateKind {
    Status,
    Size,
    Words,
    Lines,
    Regexp,
    Time,
}

impl PredicateKind {
    pub fn all() -> &'static [PredicateKind] {
        &[
            PredicateKind::Status,
            PredicateKind::Size,
            PredicateKind::Words,
            PredicateKind::Lines,
            PredicateKind::Regexp,
            PredicateKind::Time,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            PredicateKind::Status => "status",
            PredicateKind::Size => "size",
            PredicateKind::Words => "words",
            PredicateKind::Lines => "lines",
            PredicateKind::Regexp => "regexp",
            PredicateKind::Time => "time",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PredicateKind::Status => "Response status",
            PredicateKind::Size => "Response size",
            PredicateKind::Words => "Response words",
            PredicateKind::Lines => "Response lines",
            PredicateKind::Regexp => "Regexp",
            PredicateKind::Time => "Response time",
        }
    }
}

impl FromStr for PredicateKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "status" | "code" => Ok(PredicateKind::Status),
            "size" => Ok(PredicateKind::Size),
            "word" | "words" => Ok(PredicateKind::Words),
            "line" | "lines" => Ok(PredicateKind::Lines),
            "regexp" | "regex" => Ok(PredicateKind::Regexp),
            "time" => Ok(PredicateKind::Time),
            other => Err(FilterError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for PredicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How predicates within one collection are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    And,
    #[default]
    Or,
}

impl FromStr for MatchMode {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "and" => Ok(MatchMode::And),
            "or" => Ok(MatchMode::Or),
            other => Err(FilterError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::And => write!(f, "and"),
            MatchMode::Or => write!(f, "or"),
        }
    }
}

/// Status codes to compare against; `all` accepts every status
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSpec {
    pub all: bool,
    pub ranges: Vec<ValueRange>,
}

/// Response time comparison in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeThreshold {
    GreaterThan(i64),
    LessThan(i64),
}

/// Regular expression with the pattern it was compiled from
#[derive(Debug, Clone)]
pub struct RegexSpec {
    pub pattern: String,
    pub compiled: Regex,
}

/// A single predicate over a response
#[derive(Debug, Clone)]
pub enum Predicate {
    Status(StatusSpec),
    Size(Vec<ValueRange>),
    Words(Vec<ValueRange>),
    Lines(Vec<ValueRange>),
    Regexp(RegexSpec),
    Time(TimeThreshold),
}

impl Predicate {
    /// Parse a user supplied value for the given kind
    pub fn parse(kind: PredicateKind, value: &str) -> Result<Self, FilterError> {
        match kind {
            PredicateKind::Status => parse_status(value).map(Predicate::Status),
            PredicateKind::Size => parse_ranges(value).map(Predicate::Size),
            PredicateKind::Words => parse_ranges(value).map(Predicate::Words),
            PredicateKind::Lines => parse_ranges(value).map(Predicate::Lines),
            PredicateKind::Regexp => compile_regex(value).map(Predicate::Regexp),
            PredicateKind::Time => parse_time(value).map(Predicate::Time),
        }
    }

    /// Look up the kind by name and parse the value
    pub fn from_name(name: &str, value: &str) -> Result<Self, FilterError> {
        Self::parse(name.parse()?, value)
    }

    pub fn kind(&self) -> PredicateKind {
        match self {
            Predicate::Status(_) => PredicateKind::Status,
            Predicate::Size(_) => PredicateKind::Size,
            Predicate::Words(_) => PredicateKind::Words,
            Predicate::Lines(_) => PredicateKind::Lines,
            Predicate::Regexp(_) => PredicateKind::Regexp,
            Predicate::Time(_) => PredicateKind::Time,
        }
    }

    /// Whether the predicate holds for the response
    pub fn evaluate(&self, response: &Response) -> bool {
        match self {
            Predicate::Status(spec) => {
                spec.all
                    || spec
                        .ranges
                        .iter()
                        .any(|r| r.contains(i64::from(response.status)))
            }
            Predicate::Size(ranges) => contains_any(ranges, response.content_length),
            Predicate::Words(ranges) => contains_any(ranges, response.content_words),
            Predicate::Lines(ranges) => contains_any(ranges, response.content_lines),
            Predicate::Regexp(spec) => evaluate_regex(spec, response),
            Predicate::Time(threshold) => {
                let millis = response.duration.as_millis() as i64;
                match threshold {
                    TimeThreshold::GreaterThan(limit) => millis > *limit,
                    TimeThreshold::LessThan(limit) => millis < *limit,
                }
            }
        }
    }

    /// The comparison value in the form it is parsed from
    pub fn value(&self) -> String {
        match self {
            Predicate::Status(spec) => {
                let mut parts = Vec::new();
                if spec.all {
                    parts.push("all".to_string());
                }
                if !spec.ranges.is_empty() {
                    parts.push(format_ranges(&spec.ranges));
                }
                parts.join(",")
            }
            Predicate::Size(ranges) | Predicate::Words(ranges) | Predicate::Lines(ranges) => {
                format_ranges(ranges)
            }
            Predicate::Regexp(spec) => spec.pattern.clone(),
            Predicate::Time(TimeThreshold::GreaterThan(ms)) => format!(">{}", ms),
            Predicate::Time(TimeThreshold::LessThan(ms)) => format!("<{}", ms),
        }
    }

    /// Human readable description, e.g. `Response size: 1,2,5-90`
    pub fn repr(&self) -> String {
        format!("{}: {}", self.kind().description(), self.value())
    }

    /// Combine this predicate with additional values of the same kind
    pub fn merge(&self, extra: &str) -> Result<Self, FilterError> {
        let extra = extra.trim();
        match self {
            Predicate::Regexp(spec) => {
                compile_regex(&format!("(?:{})|(?:{})", spec.pattern, extra)).map(Predicate::Regexp)
            }
            // A time threshold is a single comparison, the new one wins
            Predicate::Time(_) => Self::parse(PredicateKind::Time, extra),
            _ => Self::parse(self.kind(), &format!("{},{}", self.value(), extra)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

fn contains_any(ranges: &[ValueRange], value: usize) -> bool {
    let value = value as i64;
    ranges.iter().any(|r| r.contains(value))
}

fn parse_status(value: &str) -> Result<StatusSpec, FilterError> {
    let mut spec = StatusSpec {
        all: false,
        ranges: Vec::new(),
    };

    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.eq_ignore_ascii_case("all") {
            spec.all = true;
            continue;
        }
        let range: ValueRange = part
            .parse()
            .map_err(|_| FilterError::InvalidStatus(value.to_string()))?;
        spec.ranges.push(range);
    }

    if !spec.all && spec.ranges.is_empty() {
        return Err(FilterError::InvalidStatus(value.to_string()));
    }
    Ok(spec)
}

fn parse_time(value: &str) -> Result<TimeThreshold, FilterError> {
    let value = value.trim();
    let invalid = || FilterError::InvalidTime(value.to_string());

    let (op, rest) = value.split_at(value.chars().next().map(char::len_utf8).unwrap_or(0));
    let millis: i64 = rest.trim().parse().map_err(|_| invalid())?;
    match op {
        ">" => Ok(TimeThreshold::GreaterThan(millis)),
        "<" => Ok(TimeThreshold::LessThan(millis)),
        _ => Err(invalid()),
    }
}

fn compile_regex(pattern: &str) -> Result<RegexSpec, FilterError> {
    let compiled = Regex::new(pattern).map_err(|e| FilterError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;
    Ok(RegexSpec {
        pattern: pattern.to_string(),
        compiled,
    })
}

/// Match against `Name: value\r\n` header lines followed by the body.
/// Keywords in the pattern are replaced by the quoted input values first.
fn evaluate_regex(spec: &RegexSpec, response: &Response) -> bool {
    let mut data = Vec::with_capacity(response.body.len() + 256);
    let mut headers: Vec<_> = response.headers.iter().collect();
    headers.sort();
    for (name, value) in headers {
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(b": ");
        data.extend_from_slice(value.as_bytes());
        data.extend_from_slice(b"\r\n");
    }
    data.extend_from_slice(&response.body);

    let mut pattern = spec.pattern.clone();
    for (keyword, value) in &response.request.input {
        if !keyword.is_empty() && pattern.contains(keyword.as_str()) {
            pattern = pattern.replace(keyword.as_str(), &regex::escape(&String::from_utf8_lossy(value)));
        }
    }

    if pattern == spec.pattern {
        return spec.compiled.is_match(&data);
    }
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(&data),
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "Keyword-substituted regexp does not compile");
            false
        }
    }
}
