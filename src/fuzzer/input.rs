//! Combinatorial input provider

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::payloads::{LoadOptions, SourceConfig, ValueSource};
use crate::error::{ConfigErrors, InputError};

/// How values of several sources are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Cartesian product, first source varies fastest
    #[default]
    Clusterbomb,
    /// Sources advance together
    Pitchfork,
    /// One source injected into each template location in turn
    Sniper,
}

impl InputMode {
    pub fn name(&self) -> &'static str {
        match self {
            InputMode::Clusterbomb => "clusterbomb",
            InputMode::Pitchfork => "pitchfork",
            InputMode::Sniper => "sniper",
        }
    }
}

impl FromStr for InputMode {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clusterbomb" => Ok(InputMode::Clusterbomb),
            "pitchfork" => Ok(InputMode::Pitchfork),
            "sniper" => Ok(InputMode::Sniper),
            other => Err(InputError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Keyword to value map for one combination
pub type InputValues = HashMap<String, Vec<u8>>;

/// Ordered set of value sources iterated according to an [`InputMode`]
#[derive(Debug, Clone)]
pub struct InputProvider {
    sources: Vec<ValueSource>,
    mode: InputMode,
    position: usize,
}

impl InputProvider {
    pub fn new(mode: InputMode) -> Self {
        Self {
            sources: Vec::new(),
            mode,
            position: 0,
        }
    }

    /// Load every configured source, collecting all problems before failing
    pub fn from_configs(
        configs: &[SourceConfig],
        mode: InputMode,
        options: &LoadOptions,
    ) -> Result<Self, ConfigErrors> {
        let mut errors = ConfigErrors::new();
        let mut provider = Self::new(mode);

        if configs.is_empty() {
            errors.push(InputError::NoSources);
        }
        if mode == InputMode::Sniper {
            if configs.len() > 1 {
                errors.push(InputError::SniperSourceCount(configs.len()));
            }
            if configs.iter().any(|c| c.template.is_none()) {
                errors.push(InputError::MissingTemplate);
            }
        }

        for config in configs {
            match ValueSource::load(config, options) {
                Ok(source) => {
                    if let Err(e) = provider.add_source(source) {
                        errors.push(e);
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        errors.into_result()?;
        tracing::debug!(
            mode = %mode,
            sources = provider.sources.len(),
            total = provider.total(),
            "Input provider ready"
        );
        Ok(provider)
    }

    pub fn add_source(&mut self, source: ValueSource) -> Result<(), InputError> {
        if self.sources.iter().any(|s| s.keyword() == source.keyword()) {
            return Err(InputError::DuplicateKeyword(source.keyword().to_string()));
        }
        self.sources.push(source);
        Ok(())
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Keywords of all sources, active or not, in declaration order
    pub fn keywords(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.keyword().to_string()).collect()
    }

    pub fn sources(&self) -> &[ValueSource] {
        &self.sources
    }

    /// Activate exactly the sources whose keyword is in `keywords`
    pub fn activate_keywords(&mut self, keywords: &[String]) {
        for source in &mut self.sources {
            let active = keywords.iter().any(|k| k == source.keyword());
            source.set_active(active);
        }
    }

    fn active(&self) -> impl Iterator<Item = &ValueSource> {
        self.sources.iter().filter(|s| s.is_active())
    }

    /// Number of combinations over the active sources
    pub fn total(&self) -> usize {
        let totals: Vec<usize> = self.active().map(|s| s.total()).collect();
        if totals.is_empty() {
            return 0;
        }
        match self.mode {
            // saturates rather than wrapping for very large cross products
            InputMode::Clusterbomb => totals.iter().fold(1usize, |acc, t| acc.saturating_mul(*t)),
            InputMode::Pitchfork | InputMode::Sniper => totals.iter().copied().min().unwrap_or(0),
        }
    }

    /// Number of combinations produced so far; after [`value`](Self::value)
    /// it is the 1-based position of the returned combination
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn has_next(&self) -> bool {
        self.position < self.total()
    }

    /// Values for the next combination. Advances the position.
    pub fn value(&mut self) -> InputValues {
        let mut values = HashMap::new();
        let position = self.position;

        match self.mode {
            InputMode::Clusterbomb => {
                let mut rest = position;
                for source in self.sources.iter_mut().filter(|s| s.is_active()) {
                    let total = source.total();
                    if total == 0 {
                        continue;
                    }
                    let index = rest % total;
                    rest /= total;
                    source.set_position(index);
                    values.insert(source.keyword().to_string(), source.value_at(index));
                }
            }
            InputMode::Pitchfork | InputMode::Sniper => {
                for source in self.sources.iter_mut().filter(|s| s.is_active()) {
                    let total = source.total();
                    if total == 0 {
                        continue;
                    }
                    let index = position % total;
                    source.set_position(index);
                    values.insert(source.keyword().to_string(), source.value_at(index));
                }
            }
        }

        self.position += 1;
        values
    }

    /// Back to the first combination
    pub fn reset(&mut self) {
        self.position = 0;
        for source in &mut self.sources {
            source.reset();
        }
    }

    /// Keywords present in the request, the way a queued job activates them
    pub fn keywords_in(&self, contains: impl Fn(&str) -> bool) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.keyword())
            .filter(|k| contains(*k))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(mode: InputMode, sources: &[(&str, &[&str])]) -> InputProvider {
        let mut provider = InputProvider::new(mode);
        for (keyword, words) in sources {
            provider
                .add_source(ValueSource::from_words(keyword, words.iter()))
                .unwrap();
        }
        provider
    }

    fn drain(provider: &mut InputProvider, keywords: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        while provider.has_next() {
            let values = provider.value();
            let parts: Vec<String> = keywords
                .iter()
                .map(|k| String::from_utf8_lossy(&values[*k]).to_string())
                .collect();
            out.push(parts.join(""));
        }
        out
    }

    #[test]
    fn test_clusterbomb_total_and_order() {
        let mut p = provider(
            InputMode::Clusterbomb,
            &[("A", &["1", "2", "3"]), ("B", &["x", "y"])],
        );
        assert_eq!(p.total(), 6);
        let seq = drain(&mut p, &["A", "B"]);
        assert_eq!(seq, vec!["1x", "2x", "3x", "1y", "2y", "3y"]);
        assert_eq!(p.position(), 6);
        assert!(!p.has_next());
    }

    #[test]
    fn test_clusterbomb_total_saturates() {
        let options = LoadOptions {
            command_count: usize::MAX / 2,
            ..Default::default()
        };
        let mut p = InputProvider::new(InputMode::Clusterbomb);
        for keyword in ["A", "B", "C"] {
            let source = ValueSource::load(&SourceConfig::command("true", keyword), &options).unwrap();
            p.add_source(source).unwrap();
        }
        assert_eq!(p.total(), usize::MAX);
        assert!(p.has_next());
    }

    #[test]
    fn test_pitchfork_uses_min_and_modulo() {
        let mut p = provider(
            InputMode::Pitchfork,
            &[("A", &["1", "2", "3"]), ("B", &["x", "y"])],
        );
        assert_eq!(p.total(), 2);
        let seq = drain(&mut p, &["A", "B"]);
        assert_eq!(seq, vec!["1x", "2y"]);
    }

    #[test]
    fn test_position_is_one_based_after_value() {
        let mut p = provider(InputMode::Clusterbomb, &[("FUZZ", &["a", "b"])]);
        assert_eq!(p.position(), 0);
        let values = p.value();
        assert_eq!(values["FUZZ"], b"a".to_vec());
        assert_eq!(p.position(), 1);
    }

    #[test]
    fn test_inactive_sources_are_skipped() {
        let mut p = provider(
            InputMode::Clusterbomb,
            &[("A", &["1", "2"]), ("B", &["x", "y", "z"])],
        );
        p.activate_keywords(&["B".to_string()]);
        assert_eq!(p.total(), 3);
        let values = p.value();
        assert!(!values.contains_key("A"));
        assert_eq!(values["B"], b"x".to_vec());

        p.activate_keywords(&[]);
        assert_eq!(p.total(), 0);
        assert!(!p.has_next());
    }

    #[test]
    fn test_reset() {
        let mut p = provider(InputMode::Clusterbomb, &[("FUZZ", &["a", "b"])]);
        p.value();
        p.value();
        assert!(!p.has_next());
        p.reset();
        assert_eq!(p.position(), 0);
        assert_eq!(p.value()["FUZZ"], b"a".to_vec());
    }

    #[test]
    fn test_duplicate_keyword() {
        let mut p = provider(InputMode::Clusterbomb, &[("FUZZ", &["a"])]);
        let err = p
            .add_source(ValueSource::from_words("FUZZ", ["b"]))
            .unwrap_err();
        assert!(matches!(err, InputError::DuplicateKeyword(_)));
    }

    #[test]
    fn test_from_configs_aggregates_errors() {
        let configs = vec![
            SourceConfig::fixed("a", "FUZZ"),
            SourceConfig::fixed("b", "W2"),
        ];
        let err = InputProvider::from_configs(&configs, InputMode::Sniper, &LoadOptions::default())
            .unwrap_err();
        // too many sources and no template delimiter
        assert_eq!(err.len(), 2);

        let err = InputProvider::from_configs(&[], InputMode::Clusterbomb, &LoadOptions::default())
            .unwrap_err();
        assert_eq!(err.len(), 1);
    }

    #[test]
    fn test_keywords_in() {
        let p = provider(InputMode::Clusterbomb, &[("FUZZ", &["a"]), ("W2", &["b"])]);
        let found = p.keywords_in(|k| "http://x/FUZZ".contains(k));
        assert_eq!(found, vec!["FUZZ".to_string()]);
        assert_eq!(p.keywords(), vec!["FUZZ".to_string(), "W2".to_string()]);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("PitchFork".parse::<InputMode>().unwrap(), InputMode::Pitchfork);
        assert!("battering".parse::<InputMode>().is_err());
    }
}
