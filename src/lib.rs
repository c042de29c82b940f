//! Rafale - keyword-driven HTTP fuzzing engine
//!
//! Substitutes wordlist, command or fixed values into a request template,
//! dispatches the variants concurrently and keeps the responses that pass
//! the configured matchers and filters.

pub mod app;
pub mod error;
pub mod filters;
pub mod fuzzer;
pub mod http;
pub mod reporting;
pub mod util;

#[cfg(test)]
mod testing;

pub use error::*;
