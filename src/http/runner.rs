//! The seam between the fuzzing engine and the transport

use async_trait::async_trait;
use std::collections::HashMap;

use super::{Request, Response};
use crate::error::RunnerError;

/// Turns a base request plus input values into a concrete request and executes it
#[async_trait]
pub trait Runner: Send + Sync {
    /// Materialize a request from the base template and the keyword values
    fn prepare(
        &self,
        input: &HashMap<String, Vec<u8>>,
        base: &Request,
    ) -> Result<Request, RunnerError> {
        Ok(prepare_request(input, base))
    }

    /// Send the request and collect the response
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError>;
}

/// Copy `base` and substitute every keyword with its value.
///
/// Longer keywords are substituted first so `FUZZ` never clobbers `FUZZ2`.
pub fn prepare_request(input: &HashMap<String, Vec<u8>>, base: &Request) -> Request {
    let mut request = base.clone();

    let mut keywords: Vec<&String> = input.keys().collect();
    keywords.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    for keyword in keywords {
        request.substitute(keyword, &input[keyword]);
    }

    request.input = input.clone();
    request
}
