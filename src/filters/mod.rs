//! Match/filter predicate engine
//!
//! Matchers decide which responses are interesting, filters then drop
//! responses from that set. Both collections hold at most one predicate per
//! kind and are combined with AND or OR.

mod manager;
mod predicate;

pub use manager::{MatcherManager, PredicateSet};
pub use predicate::{
    MatchMode, Predicate, PredicateKind, RegexSpec, StatusSpec, TimeThreshold,
    DEFAULT_STATUS_MATCHER,
};
