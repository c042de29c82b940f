//! Matcher and filter collections

use std::collections::{BTreeMap, HashMap};

use super::predicate::{MatchMode, Predicate, PredicateKind};
use crate::error::FilterError;
use crate::http::Response;

/// At most one predicate per kind
pub type PredicateSet = BTreeMap<PredicateKind, Predicate>;

/// Owns the matchers, the global filters and the per-host filter table
#[derive(Debug, Clone, Default)]
pub struct MatcherManager {
    matchers: PredicateSet,
    filters: PredicateSet,
    per_host_filters: HashMap<String, PredicateSet>,
    matcher_mode: MatchMode,
    filter_mode: MatchMode,
}

impl MatcherManager {
    pub fn new(matcher_mode: MatchMode, filter_mode: MatchMode) -> Self {
        Self {
            matcher_mode,
            filter_mode,
            ..Default::default()
        }
    }

    pub fn matcher_mode(&self) -> MatchMode {
        self.matcher_mode
    }

    pub fn filter_mode(&self) -> MatchMode {
        self.filter_mode
    }

    pub fn set_matcher_mode(&mut self, mode: MatchMode) {
        self.matcher_mode = mode;
    }

    pub fn set_filter_mode(&mut self, mode: MatchMode) {
        self.filter_mode = mode;
    }

    pub fn matchers(&self) -> &PredicateSet {
        &self.matchers
    }

    pub fn filters(&self) -> &PredicateSet {
        &self.filters
    }

    /// Filters added for a host fingerprint on top of the global ones
    pub fn host_filters(&self, host: &str) -> Option<&PredicateSet> {
        self.per_host_filters.get(host)
    }

    pub fn has_host_filters(&self, host: &str) -> bool {
        self.per_host_filters.contains_key(host)
    }

    /// Install a matcher, replacing any matcher of the same kind
    pub fn add_matcher(&mut self, kind: PredicateKind, value: &str) -> Result<(), FilterError> {
        let predicate = Predicate::parse(kind, value)?;
        self.matchers.insert(kind, predicate);
        Ok(())
    }

    /// Install a filter, replacing any filter of the same kind
    pub fn add_filter(&mut self, kind: PredicateKind, value: &str) -> Result<(), FilterError> {
        let predicate = Predicate::parse(kind, value)?;
        self.filters.insert(kind, predicate);
        Ok(())
    }

    /// Merge values into the filter of that kind, creating it if missing
    pub fn append_filter(&mut self, kind: PredicateKind, value: &str) -> Result<(), FilterError> {
        let predicate = merge_or_parse(self.filters.get(&kind), kind, value)?;
        self.filters.insert(kind, predicate);
        Ok(())
    }

    /// Merge values into a host's filter set, creating it if missing
    pub fn add_per_host_filter(
        &mut self,
        host: &str,
        kind: PredicateKind,
        value: &str,
    ) -> Result<(), FilterError> {
        let set = self.per_host_filters.entry(host.to_string()).or_default();
        let predicate = merge_or_parse(set.get(&kind), kind, value)?;
        set.insert(kind, predicate);
        Ok(())
    }

    /// Remove the filter of that kind; returns whether one existed
    pub fn remove_filter(&mut self, kind: PredicateKind) -> bool {
        self.filters.remove(&kind).is_some()
    }

    /// Remove the matcher of that kind; returns whether one existed
    pub fn remove_matcher(&mut self, kind: PredicateKind) -> bool {
        self.matchers.remove(&kind).is_some()
    }

    /// Whether the matchers accept the response
    pub fn matches(&self, response: &Response) -> bool {
        if self.matchers.is_empty() {
            return false;
        }
        let mut results = self.matchers.values().map(|m| m.evaluate(response));
        match self.matcher_mode {
            MatchMode::And => results.all(|m| m),
            MatchMode::Or => results.any(|m| m),
        }
    }

    /// Whether the given filter set drops the response
    pub fn is_filtered_by(&self, filters: &PredicateSet, response: &Response) -> bool {
        if filters.is_empty() {
            return false;
        }
        let mut results = filters.values().map(|f| f.evaluate(response));
        match self.filter_mode {
            MatchMode::And => results.all(|f| f),
            MatchMode::Or => results.any(|f| f),
        }
    }

    /// Whether the global filters, or with `per_host` the filters of the
    /// request's host fingerprint, drop the response
    pub fn is_filtered(&self, response: &Response, per_host: bool) -> bool {
        if self.is_filtered_by(&self.filters, response) {
            return true;
        }
        per_host
            && self
                .host_filters(&response.request.host_fingerprint())
                .is_some_and(|set| self.is_filtered_by(set, response))
    }

    /// Full classification: matched and not filtered
    pub fn is_match(&self, response: &Response, per_host: bool) -> bool {
        self.matches(response) && !self.is_filtered(response, per_host)
    }
}

fn merge_or_parse(
    existing: Option<&Predicate>,
    kind: PredicateKind,
    value: &str,
) -> Result<Predicate, FilterError> {
    match existing {
        Some(existing) => existing.merge(value),
        None => Predicate::parse(kind, value),
    }
}
