//! Small parsing helpers shared by the filters and the job runner

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::FilterError;

/// Inclusive integer range, e.g. `404` or `400-410`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueRange {
    pub min: i64,
    pub max: i64,
}

impl ValueRange {
    pub fn single(value: i64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl FromStr for ValueRange {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || FilterError::InvalidRange(s.to_string());

        match s.split_once('-') {
            Some((min, max)) => {
                let min: i64 = min.trim().parse().map_err(|_| invalid())?;
                let max: i64 = max.trim().parse().map_err(|_| invalid())?;
                if min >= max {
                    return Err(invalid());
                }
                Ok(Self { min, max })
            }
            None => s.parse().map(Self::single).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Parse a comma separated list of values and ranges
pub fn parse_ranges(spec: &str) -> Result<Vec<ValueRange>, FilterError> {
    let ranges = spec
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(ValueRange::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if ranges.is_empty() {
        return Err(FilterError::InvalidRange(spec.to_string()));
    }
    Ok(ranges)
}

/// Render ranges back into the `1,2,5-90` form they were parsed from
pub fn format_ranges(ranges: &[ValueRange]) -> String {
    ranges
        .iter()
        .map(ValueRange::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Per-request delay in seconds: fixed (`0.5`) or random within a range (`0.1-2.0`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl DelayRange {
    pub fn is_zero(&self) -> bool {
        self.max <= 0.0
    }

    /// Pick the delay for one request
    pub fn sample(&self) -> Duration {
        let secs = if self.max > self.min {
            rand::thread_rng().gen_range(self.min..=self.max)
        } else {
            self.min
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl FromStr for DelayRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| -> Result<f64, String> {
            let value: f64 = v
                .trim()
                .parse()
                .map_err(|_| format!("'{}' is not a number of seconds", v.trim()))?;
            if value < 0.0 || !value.is_finite() {
                return Err(format!("'{}' must be a positive number of seconds", v.trim()));
            }
            Ok(value)
        };

        match s.split_once('-') {
            Some((min, max)) => {
                let (min, max) = (parse(min)?, parse(max)?);
                if min >= max {
                    return Err(format!("range '{}' must have min < max", s));
                }
                Ok(Self { min, max })
            }
            None => {
                let value = parse(s)?;
                Ok(Self {
                    min: value,
                    max: value,
                })
            }
        }
    }
}

/// Random alphanumeric string of the given length
pub fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
