//! Test doubles for the runner and output seams

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::app::Config;
use crate::error::RunnerError;
use crate::fuzzer::BLACKLIST_PROBES;
use crate::http::{Request, Response, Runner};
use crate::reporting::{FuzzResult, Output, OutputFormat, Progress};

/// Canned reply of a [`MockRunner`]
pub struct MockReply {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl MockReply {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.to_string(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }
}

type Handler = Box<dyn Fn(&Request) -> Result<MockReply, RunnerError> + Send + Sync>;

/// Runner answering from a closure and recording every request
pub struct MockRunner {
    handler: Handler,
    requests: Mutex<Vec<Request>>,
    delay: Duration,
}

impl MockRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Result<MockReply, RunnerError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Like [`new`](Self::new), but blacklist detection files answer with a
    /// plain 404 so they never produce a filter
    pub fn site<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Result<MockReply, RunnerError> + Send + Sync + 'static,
    {
        Self::new(move |req| {
            if is_blacklist_probe(req) {
                Ok(MockReply::new(404, "Not Found"))
            } else {
                handler(req)
            }
        })
    }

    /// Sleep before answering each request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests other than blacklist detection probes
    pub fn fuzz_requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .iter()
            .filter(|r| !is_blacklist_probe(r))
            .cloned()
            .collect()
    }

    pub fn fuzz_count(&self) -> usize {
        self.fuzz_requests().len()
    }
}

pub fn is_blacklist_probe(request: &Request) -> bool {
    BLACKLIST_PROBES.iter().any(|probe| request.url.contains(probe))
}

#[async_trait]
impl Runner for MockRunner {
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError> {
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = (self.handler)(request)?;
        Ok(Response::new(
            request.clone(),
            reply.status,
            reply.headers,
            reply.body.into_bytes(),
            Duration::from_millis(1),
        ))
    }
}

/// Output keeping everything in memory
#[derive(Default)]
pub struct MemoryOutput {
    pub results: Mutex<Vec<FuzzResult>>,
    pub finished: Mutex<Vec<FuzzResult>>,
    pub messages: Mutex<Vec<String>>,
    pub banners: AtomicUsize,
    pub finalized: AtomicUsize,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inputs(&self, keyword: &str) -> Vec<String> {
        self.results
            .lock()
            .iter()
            .filter_map(|r| r.input.get(keyword).cloned())
            .collect()
    }

    pub fn has_message(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

impl Output for MemoryOutput {
    fn banner(&self, _config: &Config) {
        self.banners.fetch_add(1, Ordering::SeqCst);
    }

    fn progress(&self, _progress: &Progress) {}

    fn info(&self, message: &str) {
        self.messages.lock().push(format!("INFO {}", message));
    }

    fn warning(&self, message: &str) {
        self.messages.lock().push(format!("WARN {}", message));
    }

    fn error(&self, message: &str) {
        self.messages.lock().push(format!("ERROR {}", message));
    }

    fn result(&self, response: &Response) {
        self.results.lock().push(FuzzResult::from_response(response));
    }

    fn current_results(&self) -> Vec<FuzzResult> {
        self.results.lock().clone()
    }

    fn set_current_results(&self, results: Vec<FuzzResult>) {
        *self.results.lock() = results;
    }

    fn save_file(&self, _path: &Path, _format: OutputFormat) -> Result<()> {
        Ok(())
    }

    fn reset(&self) {
        self.results.lock().clear();
    }

    fn cycle(&self) {
        let current = std::mem::take(&mut *self.results.lock());
        self.finished.lock().extend(current);
    }

    fn finalize(&self) -> Result<()> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
