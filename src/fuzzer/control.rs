//! Runtime control of a running job

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};

use super::recursion::{JobQueue, QueuedJob};
use crate::error::FuzzError;
use crate::filters::PredicateKind;
use crate::reporting::{FuzzResult, OutputFormat};

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Paused,
    Stopped,
}

/// Cancellation shared by the dispatch loop, every task and the signal
/// handler
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    tx: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    pub fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been triggered
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if self.is_triggered() {
            return;
        }
        let _ = rx.recv().await;
    }
}

type Reply<T> = oneshot::Sender<Result<T, FuzzError>>;

/// Requests handled by the dispatch loop between two combinations
#[derive(Debug)]
pub enum ControlMessage {
    Pause,
    Resume,
    /// Restart the running job; with `keep_position` only the result
    /// collection is cycled
    Reset { keep_position: bool },
    /// End the running job and continue with the queue
    SkipQueue,
    AddFilter {
        kind: PredicateKind,
        value: String,
        reply: Reply<()>,
    },
    AppendFilter {
        kind: PredicateKind,
        value: String,
        reply: Reply<()>,
    },
    RemoveFilter {
        kind: PredicateKind,
        reply: Reply<bool>,
    },
    AddMatcher {
        kind: PredicateKind,
        value: String,
        reply: Reply<()>,
    },
    ChangeRate(usize),
    ShowResults(oneshot::Sender<Vec<FuzzResult>>),
    SaveResults {
        path: PathBuf,
        format: OutputFormat,
        reply: Reply<()>,
    },
}

/// Cloneable remote for a job
#[derive(Clone)]
pub struct JobHandle {
    tx: mpsc::Sender<ControlMessage>,
    queue: Arc<Mutex<JobQueue>>,
    state: Arc<RwLock<JobState>>,
    shutdown: Shutdown,
}

impl JobHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<ControlMessage>,
        queue: Arc<Mutex<JobQueue>>,
        state: Arc<RwLock<JobState>>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            tx,
            queue,
            state,
            shutdown,
        }
    }

    pub fn state(&self) -> JobState {
        *self.state.read()
    }

    async fn send(&self, message: ControlMessage) -> Result<(), FuzzError> {
        self.tx.send(message).await.map_err(|_| FuzzError::JobStopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ControlMessage,
    ) -> Result<T, FuzzError> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| FuzzError::JobStopped)?
    }

    pub async fn pause(&self) -> Result<(), FuzzError> {
        self.send(ControlMessage::Pause).await
    }

    pub async fn resume(&self) -> Result<(), FuzzError> {
        self.send(ControlMessage::Resume).await
    }

    pub async fn reset(&self, keep_position: bool) -> Result<(), FuzzError> {
        self.send(ControlMessage::Reset { keep_position }).await
    }

    pub async fn skip_queue(&self) -> Result<(), FuzzError> {
        self.send(ControlMessage::SkipQueue).await
    }

    pub async fn change_rate(&self, rate: usize) -> Result<(), FuzzError> {
        self.send(ControlMessage::ChangeRate(rate)).await
    }

    pub async fn add_filter(&self, kind: PredicateKind, value: &str) -> Result<(), FuzzError> {
        let value = value.to_string();
        self.request(|reply| ControlMessage::AddFilter { kind, value, reply })
            .await
    }

    pub async fn append_filter(&self, kind: PredicateKind, value: &str) -> Result<(), FuzzError> {
        let value = value.to_string();
        self.request(|reply| ControlMessage::AppendFilter { kind, value, reply })
            .await
    }

    pub async fn remove_filter(&self, kind: PredicateKind) -> Result<bool, FuzzError> {
        self.request(|reply| ControlMessage::RemoveFilter { kind, reply })
            .await
    }

    pub async fn add_matcher(&self, kind: PredicateKind, value: &str) -> Result<(), FuzzError> {
        let value = value.to_string();
        self.request(|reply| ControlMessage::AddMatcher { kind, value, reply })
            .await
    }

    pub async fn show_results(&self) -> Result<Vec<FuzzResult>, FuzzError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControlMessage::ShowResults(reply)).await?;
        rx.await.map_err(|_| FuzzError::JobStopped)
    }

    pub async fn save_results(&self, path: PathBuf, format: OutputFormat) -> Result<(), FuzzError> {
        self.request(|reply| ControlMessage::SaveResults {
            path,
            format,
            reply,
        })
        .await
    }

    /// Jobs waiting in the queue
    pub fn queued_jobs(&self) -> Vec<QueuedJob> {
        self.queue.lock().pending().to_vec()
    }

    /// Drop a waiting job by its index in [`queued_jobs`](Self::queued_jobs)
    pub fn delete_queue_item(&self, index: usize) -> Result<QueuedJob, FuzzError> {
        let removed = self.queue.lock().remove_pending(index)?;
        tracing::info!(url = %removed.url(), "Removed job from queue");
        Ok(removed)
    }

    /// Stop the whole run
    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_triggered());
        // already triggered resolves immediately
        shutdown.wait().await;
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_job() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let handle = JobHandle::new(
            tx,
            Arc::new(Mutex::new(JobQueue::new())),
            Arc::new(RwLock::new(JobState::Stopped)),
            Shutdown::new(),
        );
        assert!(matches!(handle.pause().await, Err(FuzzError::JobStopped)));
        assert!(matches!(
            handle.add_filter(PredicateKind::Size, "1").await,
            Err(FuzzError::JobStopped)
        ));
        assert_eq!(handle.state(), JobState::Stopped);
    }

    #[test]
    fn test_queue_access_is_direct() {
        let (tx, _rx) = mpsc::channel(4);
        let queue = Arc::new(Mutex::new(JobQueue::new()));
        queue.lock().push(QueuedJob::new(Request::new("GET", "http://x/FUZZ"), 0));
        queue.lock().push(QueuedJob::new(Request::new("GET", "http://x/a/FUZZ"), 1));
        let handle = JobHandle::new(
            tx,
            queue.clone(),
            Arc::new(RwLock::new(JobState::Created)),
            Shutdown::new(),
        );

        assert_eq!(handle.queued_jobs().len(), 2);
        let removed = handle.delete_queue_item(0).unwrap();
        assert_eq!(removed.url(), "http://x/FUZZ");
        assert_eq!(handle.queued_jobs().len(), 1);
        assert!(handle.delete_queue_item(3).is_err());
    }
}
