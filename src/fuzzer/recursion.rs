//! Job queue and recursion decisions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FuzzError;
use crate::http::{Request, Response};

/// Which kept responses spawn a child job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecursionStrategy {
    /// Only redirects to the same URL with a trailing slash
    #[default]
    Default,
    /// Every kept response
    Greedy,
}

impl RecursionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            RecursionStrategy::Default => "default",
            RecursionStrategy::Greedy => "greedy",
        }
    }

    /// Whether a kept response is a recursion candidate
    pub fn is_candidate(&self, response: &Response) -> bool {
        match self {
            RecursionStrategy::Default => response.is_directory_redirect(),
            RecursionStrategy::Greedy => true,
        }
    }
}

impl FromStr for RecursionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(RecursionStrategy::Default),
            "greedy" => Ok(RecursionStrategy::Greedy),
            other => Err(format!("unknown recursion strategy '{}'", other)),
        }
    }
}

impl fmt::Display for RecursionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A job waiting in (or taken from) the queue
#[derive(Debug, Clone)]
pub struct QueuedJob {
    /// Base request of the job
    pub request: Request,
    pub depth: usize,
}

impl QueuedJob {
    pub fn new(request: Request, depth: usize) -> Self {
        Self { request, depth }
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }
}

/// Child URL for a directory found at `url`
pub fn child_url(url: &str, keyword: &str) -> String {
    format!("{}/{}", url.trim_end_matches('/'), keyword)
}

/// Whether a job at `depth` may spawn children
pub fn depth_allows(depth: usize, max_depth: usize) -> bool {
    max_depth == 0 || depth < max_depth
}

/// FIFO of jobs. Started jobs stay in the list so positions remain stable.
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    jobs: Vec<QueuedJob>,
    position: usize,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job: QueuedJob) {
        tracing::debug!(url = %job.url(), depth = job.depth, "Job queued");
        self.jobs.push(job);
    }

    /// Take the next job to run
    pub fn next_job(&mut self) -> Option<QueuedJob> {
        let job = self.jobs.get(self.position).cloned()?;
        self.position += 1;
        Some(job)
    }

    /// Jobs not started yet
    pub fn pending(&self) -> &[QueuedJob] {
        &self.jobs[self.position.min(self.jobs.len())..]
    }

    /// Remove a pending job by its index in [`pending`](Self::pending)
    pub fn remove_pending(&mut self, index: usize) -> Result<QueuedJob, FuzzError> {
        let absolute = self.position + index;
        if absolute >= self.jobs.len() {
            return Err(FuzzError::Queue(format!(
                "no queued job at index {} ({} pending)",
                index,
                self.pending().len()
            )));
        }
        Ok(self.jobs.remove(absolute))
    }

    /// 1-based index of the running job
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn has_pending(&self) -> bool {
        self.position < self.jobs.len()
    }
}
