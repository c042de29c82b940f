//! Job orchestrator with bounded concurrent request dispatch

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Semaphore};

use super::calibration::{Calibrator, ProbeTarget};
use super::control::{ControlMessage, JobHandle, JobState, Shutdown};
use super::input::{InputMode, InputProvider, InputValues};
use super::payloads::DEFAULT_KEYWORD;
use super::recursion::{child_url, depth_allows, JobQueue, QueuedJob};
use super::template::SniperTemplate;
use super::throttle::RateThrottle;
use crate::app::{Config, RecursionConfig, StopConfig};
use crate::error::{FuzzError, InputError, RunnerError};
use crate::filters::MatcherManager;
use crate::http::{Request, Response, Runner};
use crate::reporting::{Output, Progress};
use crate::util::DelayRange;

/// Stop conditions only apply once this many requests were sent
const STOP_MIN_REQUESTS: usize = 50;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);
const CONTROL_CAPACITY: usize = 32;

/// Request counters shared by all tasks
#[derive(Debug, Default)]
struct Counters {
    requests: AtomicUsize,
    errors: AtomicUsize,
    /// Consecutive transport errors, reset by any response
    spurious: AtomicUsize,
    forbidden: AtomicUsize,
    too_many: AtomicUsize,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.requests,
            &self.errors,
            &self.spurious,
            &self.forbidden,
            &self.too_many,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Why dispatching ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    MaxTime,
    MaxTimeJob,
    Forbidden,
    Errors,
    TooManyRequests,
}

impl StopReason {
    fn message(&self) -> &'static str {
        match self {
            StopReason::MaxTime => "Maximum running time for entire process reached, exiting.",
            StopReason::MaxTimeJob => "Maximum running time for this job reached, continuing with next job if one exists.",
            StopReason::Forbidden => "Getting an unusual amount of 403 responses, exiting.",
            StopReason::Errors => "Receiving spurious errors, exiting.",
            StopReason::TooManyRequests => "Getting an unusual amount of 429 responses, exiting.",
        }
    }

    /// Whether the rest of the queue is abandoned too
    fn ends_run(&self) -> bool {
        *self != StopReason::MaxTimeJob
    }
}

/// What the dispatch loop does after draining control messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    EndJob,
}

/// Everything a per-combination task needs
struct JobShared {
    runner: Arc<dyn Runner>,
    output: Arc<dyn Output>,
    matchers: RwLock<MatcherManager>,
    throttle: RateThrottle,
    calibrator: Calibrator,
    counters: Counters,
    queue: Arc<Mutex<JobQueue>>,
    state: Arc<RwLock<JobState>>,
    shutdown: Shutdown,
    delay: DelayRange,
    threads: usize,
    recursion: RecursionConfig,
    stop: StopConfig,
}

impl JobShared {
    /// Race a runner call against shutdown
    async fn execute(&self, request: &Request) -> Result<Response, RunnerError> {
        tokio::select! {
            result = self.runner.execute(request) => result,
            _ = self.shutdown.wait() => Err(RunnerError::Cancelled),
        }
    }

    async fn run_task(&self, input: InputValues, position: usize, base: &Request, depth: usize) {
        let started = Instant::now();
        let mut request = match self.runner.prepare(&input, base) {
            Ok(request) => request,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                self.output
                    .error(&format!("Encountered an error while preparing request: {}", e));
                return;
            }
        };
        request.position = position;

        tokio::select! {
            _ = self.throttle.wait() => {}
            _ = self.shutdown.wait() => return,
        }

        let response = match self.execute(&request).await {
            Err(RunnerError::Cancelled) => return,
            Err(first) => {
                tracing::debug!(url = %request.url, error = %first, "Request failed, retrying once");
                self.execute(&request).await
            }
            ok => ok,
        };
        self.counters.requests.fetch_add(1, Ordering::SeqCst);

        let response = match response {
            Ok(response) => response,
            Err(RunnerError::Cancelled) => return,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                self.counters.spurious.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(url = %request.url, error = %e, "Request failed");
                self.output.error(&format!("Request to {} failed: {}", request.url, e));
                self.finish(started).await;
                return;
            }
        };

        self.counters.spurious.store(0, Ordering::SeqCst);
        match response.status {
            403 => {
                self.counters.forbidden.fetch_add(1, Ordering::SeqCst);
            }
            429 => {
                self.counters.too_many.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }

        let host = request.host_fingerprint();
        let target = ProbeTarget {
            runner: self.runner.as_ref(),
            base,
            matchers: &self.matchers,
            output: self.output.as_ref(),
            throttle: &self.throttle,
            shutdown: &self.shutdown,
        };
        if let Err(e) = self.calibrator.calibrate_if_needed(&target, &input, &host).await {
            self.output.error(&e.to_string());
        }
        self.calibrator
            .detect_blacklist_if_needed(&target, &input, &host)
            .await;
        if self.shutdown.is_triggered() {
            return;
        }

        let keep = self
            .matchers
            .read()
            .is_match(&response, self.calibrator.per_host());
        if keep {
            self.output.result(&response);
            if self.recursion.enabled && self.recursion.strategy.is_candidate(&response) {
                self.queue_child(&response, base, depth);
            }
        }

        self.finish(started).await;
    }

    /// Per-request delay, then record the completion
    async fn finish(&self, started: Instant) {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay.sample()) => {}
                _ = self.shutdown.wait() => {}
            }
        }
        self.throttle.tick(started, Instant::now());
    }

    fn queue_child(&self, response: &Response, base: &Request, depth: usize) {
        let url = child_url(&response.request.url, DEFAULT_KEYWORD);
        if !depth_allows(depth, self.recursion.depth) {
            self.output.warning(&format!(
                "Directory found, but recursion depth exceeded. Ignoring: {}",
                response.request.url
            ));
            return;
        }

        let mut request = base.clone();
        request.url = url;
        request.input.clear();
        request.position = 0;

        self.output
            .info(&format!("Adding a new job to the queue: {}", request.url));
        self.queue.lock().push(QueuedJob::new(request, depth + 1));
    }

    fn stop_reason(
        &self,
        run_started: Instant,
        job_started: Instant,
        max_time: u64,
        max_time_job: u64,
    ) -> Option<StopReason> {
        if max_time > 0 && run_started.elapsed() >= Duration::from_secs(max_time) {
            return Some(StopReason::MaxTime);
        }
        if max_time_job > 0 && job_started.elapsed() >= Duration::from_secs(max_time_job) {
            return Some(StopReason::MaxTimeJob);
        }

        let requests = Counters::get(&self.counters.requests);
        if requests <= STOP_MIN_REQUESTS {
            return None;
        }
        let ratio = |count: &AtomicUsize| Counters::get(count) as f64 / requests as f64;

        if (self.stop.on_403 || self.stop.on_all) && ratio(&self.counters.forbidden) > 0.95 {
            return Some(StopReason::Forbidden);
        }
        if (self.stop.on_errors || self.stop.on_all)
            && Counters::get(&self.counters.spurious) > self.threads * 2
        {
            return Some(StopReason::Errors);
        }
        if self.stop.on_all && ratio(&self.counters.too_many) > 0.2 {
            return Some(StopReason::TooManyRequests);
        }
        None
    }

    /// Drop collected results the current filters exclude. Matchers already
    /// passed when a result was recorded and are not evaluated again.
    fn refilter(&self) {
        let per_host = self.calibrator.per_host();
        let kept: Vec<_> = {
            let matchers = self.matchers.read();
            self.output
                .current_results()
                .into_iter()
                .filter(|result| !matchers.is_filtered(&result.to_response(), per_host))
                .collect()
        };
        self.output.set_current_results(kept);
    }
}

/// Sets the job to [`JobState::Stopped`] however the run ends
struct StopGuard(Arc<RwLock<JobState>>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        *self.0.write() = JobState::Stopped;
    }
}

/// A fuzzing run: the initial job plus every job queued while running
pub struct Job {
    config: Config,
    provider: InputProvider,
    shared: Arc<JobShared>,
    control: mpsc::Receiver<ControlMessage>,
    control_tx: mpsc::Sender<ControlMessage>,
    started: Instant,
}

impl Job {
    /// Validate the configuration and prepare a job. Nothing is sent yet.
    pub fn new(
        config: Config,
        runner: Arc<dyn Runner>,
        output: Arc<dyn Output>,
    ) -> Result<Self, FuzzError> {
        Self::with_shutdown(config, runner, output, Shutdown::new())
    }

    /// Like [`new`](Self::new) with an externally owned cancellation
    pub fn with_shutdown(
        config: Config,
        runner: Arc<dyn Runner>,
        output: Arc<dyn Output>,
        shutdown: Shutdown,
    ) -> Result<Self, FuzzError> {
        config.validate()?;

        let sources = config.input.source_configs()?;
        let provider =
            InputProvider::from_configs(&sources, config.input.mode, &config.input.load_options())?;
        let matchers = config.matcher_manager()?;
        let delay = config.general.delay().map_err(FuzzError::Invariant)?;

        let base = config.http.base_request();
        let mut queue = JobQueue::new();
        if config.input.mode == InputMode::Sniper {
            let source = sources
                .first()
                .ok_or(FuzzError::Input(InputError::NoSources))?;
            let delimiter = source
                .template
                .ok_or(FuzzError::Input(InputError::MissingTemplate))?;
            let template = SniperTemplate::new(&base, delimiter, &source.keyword)?;
            for request in template.requests() {
                queue.push(QueuedJob::new(request, 0));
            }
        } else {
            queue.push(QueuedJob::new(base, 0));
        }

        let threads = config.general.threads.max(1);
        let (control_tx, control) = mpsc::channel(CONTROL_CAPACITY);
        let shared = JobShared {
            runner,
            output,
            matchers: RwLock::new(matchers),
            throttle: RateThrottle::new(config.general.rate, threads),
            calibrator: Calibrator::new(&config.calibration),
            counters: Counters::default(),
            queue: Arc::new(Mutex::new(queue)),
            state: Arc::new(RwLock::new(JobState::Created)),
            shutdown,
            delay,
            threads,
            recursion: config.recursion.clone(),
            stop: config.stop.clone(),
        };

        Ok(Self {
            config,
            provider,
            shared: Arc::new(shared),
            control,
            control_tx,
            started: Instant::now(),
        })
    }

    /// Remote control for this job
    pub fn handle(&self) -> JobHandle {
        JobHandle::new(
            self.control_tx.clone(),
            self.shared.queue.clone(),
            self.shared.state.clone(),
            self.shared.shutdown.clone(),
        )
    }

    pub fn state(&self) -> JobState {
        *self.shared.state.read()
    }

    /// Snapshot of the running job
    pub fn progress(&self, job_started: Instant) -> Progress {
        let queue = self.shared.queue.lock();
        Progress {
            position: self.provider.position(),
            total: self.provider.total(),
            requests_per_sec: self.shared.throttle.current_rate(),
            errors: Counters::get(&self.shared.counters.errors),
            queue_position: queue.position(),
            queue_total: queue.total(),
            elapsed: job_started.elapsed(),
        }
    }

    /// Run every queued job to completion or until stopped
    pub async fn run(mut self) -> Result<(), FuzzError> {
        let _guard = StopGuard(self.shared.state.clone());
        *self.shared.state.write() = JobState::Running;
        self.started = Instant::now();

        if !self.config.general.quiet {
            self.shared.output.banner(&self.config);
        }

        let result = self.run_queue().await;

        if let Err(e) = self.shared.output.finalize() {
            self.shared.output.error(&format!("Failed to finalize output: {:#}", e));
            if result.is_ok() {
                return Err(FuzzError::Output(e.to_string()));
            }
        }
        result
    }

    async fn run_queue(&mut self) -> Result<(), FuzzError> {
        loop {
            if self.shared.shutdown.is_triggered() {
                tracing::info!("Job cancelled");
                return Ok(());
            }
            let next = self.shared.queue.lock().next_job();
            let Some(job) = next else {
                return Ok(());
            };

            if let Some(reason) = self.run_job(job).await? {
                if reason.ends_run() {
                    return Ok(());
                }
            }
        }
    }

    /// Dispatch every combination of one queued job
    async fn run_job(&mut self, job: QueuedJob) -> Result<Option<StopReason>, FuzzError> {
        let keywords = self.provider.keywords_in(|k| job.request.contains_keyword(k));
        self.provider.activate_keywords(&keywords);
        self.provider.reset();
        self.shared.output.cycle();

        let (position, total) = {
            let queue = self.shared.queue.lock();
            (queue.position(), queue.total())
        };
        if position > 1 {
            self.shared.output.info(&format!(
                "Starting queued job [{}/{}] on target: {}",
                position,
                total,
                job.url()
            ));
        }
        tracing::info!(url = %job.url(), depth = job.depth, total = self.provider.total(), "Job started");

        let base = Arc::new(job.request);
        let threads = self.shared.threads;
        let semaphore = Arc::new(Semaphore::new(threads));
        let job_started = Instant::now();
        let mut last_progress = Instant::now();
        let mut stopped = None;

        while self.provider.has_next() {
            if self.drain_control().await == Flow::EndJob {
                self.shared.output.info("Skipping to the next queued job");
                break;
            }
            if self.shared.shutdown.is_triggered() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|e| FuzzError::Invariant(e.to_string()))?
                }
                _ = self.shared.shutdown.wait() => break,
            };

            if let Some(reason) = self.shared.stop_reason(
                self.started,
                job_started,
                self.config.general.max_time,
                self.config.general.max_time_job,
            ) {
                if reason.ends_run() {
                    self.shared.output.error(reason.message());
                    self.shared.shutdown.trigger();
                } else {
                    self.shared.output.warning(reason.message());
                }
                stopped = Some(reason);
                break;
            }

            let input = self.provider.value();
            let position = self.provider.position();
            let shared = self.shared.clone();
            let base = base.clone();
            let depth = job.depth;
            tokio::spawn(async move {
                shared.run_task(input, position, &base, depth).await;
                drop(permit);
            });

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                self.shared.output.progress(&self.progress(job_started));
                last_progress = Instant::now();
            }
        }

        // every permit back means no task is in flight
        let _all = semaphore
            .acquire_many(threads as u32)
            .await
            .map_err(|e| FuzzError::Invariant(e.to_string()))?;
        self.shared.output.progress(&self.progress(job_started));
        tracing::info!(
            url = %base.url,
            requests = Counters::get(&self.shared.counters.requests),
            errors = Counters::get(&self.shared.counters.errors),
            "Job finished"
        );
        Ok(stopped)
    }

    /// Apply pending control messages; while paused, block until resumed
    async fn drain_control(&mut self) -> Flow {
        let shutdown = self.shared.shutdown.clone();
        loop {
            let paused = *self.shared.state.read() == JobState::Paused;
            let message = if paused {
                tokio::select! {
                    message = self.control.recv() => message,
                    _ = shutdown.wait() => return Flow::Continue,
                }
            } else {
                self.control.try_recv().ok()
            };

            let Some(message) = message else {
                return Flow::Continue;
            };
            if self.apply(message).await == Flow::EndJob {
                if paused {
                    *self.shared.state.write() = JobState::Running;
                }
                return Flow::EndJob;
            }
        }
    }

    async fn apply(&mut self, message: ControlMessage) -> Flow {
        let shared = self.shared.clone();
        match message {
            ControlMessage::Pause => {
                *shared.state.write() = JobState::Paused;
                shared.output.info("Job paused");
            }
            ControlMessage::Resume => {
                *shared.state.write() = JobState::Running;
                shared.output.info("Job resumed");
            }
            ControlMessage::Reset { keep_position } => {
                if keep_position {
                    shared.output.cycle();
                } else {
                    self.provider.reset();
                    shared.counters.reset();
                    shared.calibrator.reset();
                    shared.output.reset();
                }
                tracing::info!(keep_position, "Job reset");
            }
            ControlMessage::SkipQueue => return Flow::EndJob,
            ControlMessage::AddFilter { kind, value, reply } => {
                let result = shared.matchers.write().add_filter(kind, &value);
                if result.is_ok() {
                    shared.refilter();
                }
                let _ = reply.send(result.map_err(FuzzError::from));
            }
            ControlMessage::AppendFilter { kind, value, reply } => {
                let result = shared.matchers.write().append_filter(kind, &value);
                if result.is_ok() {
                    shared.refilter();
                }
                let _ = reply.send(result.map_err(FuzzError::from));
            }
            ControlMessage::RemoveFilter { kind, reply } => {
                let removed = shared.matchers.write().remove_filter(kind);
                let _ = reply.send(Ok(removed));
            }
            ControlMessage::AddMatcher { kind, value, reply } => {
                let result = shared.matchers.write().add_matcher(kind, &value);
                if result.is_ok() {
                    shared.refilter();
                }
                let _ = reply.send(result.map_err(FuzzError::from));
            }
            ControlMessage::ChangeRate(rate) => {
                shared.throttle.change_rate(rate);
                shared.output.info(&format!("Request rate changed to {}/s", rate));
            }
            ControlMessage::ShowResults(reply) => {
                let _ = reply.send(shared.output.current_results());
            }
            ControlMessage::SaveResults {
                path,
                format,
                reply,
            } => {
                let result = shared
                    .output
                    .save_file(&path, format)
                    .map_err(|e| FuzzError::Output(format!("{:#}", e)));
                let _ = reply.send(result);
            }
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::PredicateKind;
    use crate::fuzzer::{SourceConfig, BLACKLIST_PROBES};
    use crate::testing::{MemoryOutput, MockReply, MockRunner};
    use std::path::Path;

    fn wordlist(dir: &Path, name: &str, words: &[&str]) -> String {
        let path = dir.join(name);
        std::fs::write(&path, words.join("\n")).unwrap();
        path.to_string_lossy().to_string()
    }

    fn config(url: &str, wordlist: &str) -> Config {
        let mut config = Config::default();
        config.general.quiet = true;
        config.general.threads = 2;
        config.http.url = url.to_string();
        config.input.sources = vec![SourceConfig::wordlist(wordlist, "FUZZ")];
        config
    }

    fn job(config: Config, runner: &Arc<MockRunner>, output: &Arc<MemoryOutput>) -> Job {
        Job::new(config, runner.clone(), output.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_records_only_matching_responses() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["a", "b"]);
        let mut config = config("http://x/FUZZ", &words);
        config.matcher.status = Some("200".to_string());

        let runner = Arc::new(MockRunner::new(|req| {
            if req.url == "http://x/a" {
                Ok(MockReply::new(200, "found"))
            } else {
                Ok(MockReply::new(404, "missing"))
            }
        }));
        let output = Arc::new(MemoryOutput::new());
        let job = job(config, &runner, &output);
        let handle = job.handle();
        job.run().await.unwrap();

        let results = output.results.lock().clone();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].input["FUZZ"], "a");
        assert_eq!(results[0].position, 1);
        assert_eq!(runner.fuzz_count(), 2);
        assert_eq!(output.finalized.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), JobState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = Config::default();
        let runner = Arc::new(MockRunner::new(|_| Ok(MockReply::new(200, ""))));
        let output = Arc::new(MemoryOutput::new());
        let err = Job::new(config, runner, output).err().unwrap();
        assert!(matches!(err, FuzzError::Config(_)));
    }

    #[tokio::test]
    async fn test_recursion_queues_directories() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["dir", "file"]);
        let mut config = config("http://x/FUZZ", &words);
        config.recursion.enabled = true;
        config.recursion.depth = 1;

        let runner = Arc::new(MockRunner::site(|req| {
            if req.url.ends_with("/dir") {
                Ok(MockReply::new(301, "").with_header("Location", &format!("{}/", req.url)))
            } else {
                Ok(MockReply::new(200, "page"))
            }
        }));
        let output = Arc::new(MemoryOutput::new());
        let job = job(config, &runner, &output);
        let handle = job.handle();
        job.run().await.unwrap();

        let urls: Vec<String> = runner.fuzz_requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls.len(), 4);
        assert!(urls.contains(&"http://x/dir/file".to_string()));
        assert!(output.has_message("Adding a new job to the queue: http://x/dir/FUZZ"));
        assert!(output.has_message("recursion depth exceeded"));
        assert!(handle.queued_jobs().is_empty());

        let total = output.results.lock().len() + output.finished.lock().len();
        assert_eq!(total, 4);
    }

    #[tokio::test]
    async fn test_sniper_runs_one_job_per_location() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["1", "2"]);
        let mut config = config("http://x/§a§/§b§", &words);
        config.input.mode = InputMode::Sniper;
        config.input.template = Some('§');

        let runner = Arc::new(MockRunner::site(|_| Ok(MockReply::new(200, ""))));
        let output = Arc::new(MemoryOutput::new());
        job(config, &runner, &output).run().await.unwrap();

        let mut urls: Vec<String> = runner.fuzz_requests().into_iter().map(|r| r.url).collect();
        urls.sort();
        assert_eq!(
            urls,
            vec!["http://x/1/b", "http://x/2/b", "http://x/a/1", "http://x/a/2"]
        );
    }

    #[tokio::test]
    async fn test_calibration_filters_wildcard_answers() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["admin", "nothing", "else"]);
        let mut config = config("http://x/FUZZ", &words);
        config.calibration.enabled = true;

        let runner = Arc::new(MockRunner::new(|req| {
            if req.url == "http://x/admin" {
                Ok(MockReply::new(200, "welcome to the admin panel"))
            } else {
                Ok(MockReply::new(200, "soft 404"))
            }
        }));
        let output = Arc::new(MemoryOutput::new());
        job(config, &runner, &output).run().await.unwrap();

        assert_eq!(output.inputs("FUZZ"), vec!["admin".to_string()]);
        assert!(output.has_message("Calibration: size filter 8 added"));
    }

    #[tokio::test]
    async fn test_blacklist_detection_runs_without_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["admin", "missing"]);
        let mut config = config("http://x/FUZZ", &words);
        config.matcher.status = Some("all".to_string());

        let runner = Arc::new(MockRunner::new(|req| {
            if req.url == "http://x/admin" {
                Ok(MockReply::new(200, "welcome"))
            } else {
                Ok(MockReply::new(404, "Not Found page"))
            }
        }));
        let output = Arc::new(MemoryOutput::new());
        job(config, &runner, &output).run().await.unwrap();

        assert_eq!(runner.count(), 2 + BLACKLIST_PROBES.len());
        assert_eq!(output.inputs("FUZZ"), vec!["admin".to_string()]);
        assert!(output.has_message("Blacklist detection: size filter 14 added for x"));
    }

    #[tokio::test]
    async fn test_stops_on_403() {
        let dir = tempfile::tempdir().unwrap();
        let list: Vec<String> = (0..100).map(|i| format!("w{}", i)).collect();
        let refs: Vec<&str> = list.iter().map(String::as_str).collect();
        let words = wordlist(dir.path(), "words", &refs);
        let mut config = config("http://x/FUZZ", &words);
        config.general.threads = 1;
        config.stop.on_403 = true;

        let runner = Arc::new(MockRunner::new(|_| Ok(MockReply::new(403, "Forbidden"))));
        let output = Arc::new(MemoryOutput::new());
        job(config, &runner, &output).run().await.unwrap();

        let sent = runner.fuzz_count();
        assert!((51..=53).contains(&sent), "sent {}", sent);
        assert!(output.has_message("unusual amount of 403"));
    }

    #[tokio::test]
    async fn test_transport_errors_retry_once() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["a"]);
        let config = config("http://x/FUZZ", &words);

        let runner = Arc::new(MockRunner::new(|_| {
            Err(RunnerError::RequestFailed("connection refused".to_string()))
        }));
        let output = Arc::new(MemoryOutput::new());
        job(config, &runner, &output).run().await.unwrap();

        assert_eq!(runner.count(), 2);
        assert!(output.has_message("connection refused"));
        assert!(output.results.lock().is_empty());
    }

    #[tokio::test]
    async fn test_pause_resume_and_control_while_paused() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["a", "b", "c"]);
        let config = config("http://x/FUZZ", &words);

        let runner = Arc::new(MockRunner::site(|_| Ok(MockReply::new(200, "ok"))));
        let output = Arc::new(MemoryOutput::new());
        let job = job(config, &runner, &output);
        let handle = job.handle();

        handle.pause().await.unwrap();
        let running = tokio::spawn(job.run());

        // processed by the paused dispatch loop
        assert!(handle.show_results().await.unwrap().is_empty());
        handle.add_filter(PredicateKind::Size, "1").await.unwrap();
        assert!(handle.add_filter(PredicateKind::Size, "x").await.is_err());
        assert_eq!(handle.state(), JobState::Paused);
        assert_eq!(runner.count(), 0);

        handle.resume().await.unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(runner.fuzz_count(), 3);
        assert_eq!(output.results.lock().len(), 3);
        assert!(matches!(handle.pause().await, Err(FuzzError::JobStopped)));
    }

    #[tokio::test]
    async fn test_filter_edit_refilters_collected_results() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["a"]);
        let config = config("http://x/FUZZ", &words);
        let runner = Arc::new(MockRunner::new(|_| Ok(MockReply::new(200, ""))));
        let output = Arc::new(MemoryOutput::new());
        let mut job = job(config, &runner, &output);

        for body in ["short", "a much longer body"] {
            output.result(&Response::new(
                Request::new("GET", "http://x/a"),
                200,
                Default::default(),
                body.as_bytes().to_vec(),
                Duration::ZERO,
            ));
        }

        let (reply, rx) = tokio::sync::oneshot::channel();
        let flow = job
            .apply(ControlMessage::AddFilter {
                kind: PredicateKind::Size,
                value: "5".to_string(),
                reply,
            })
            .await;
        assert_eq!(flow, Flow::Continue);
        rx.await.unwrap().unwrap();
        let kept = output.results.lock().clone();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].length, 18);

        let (reply, rx) = tokio::sync::oneshot::channel();
        job.apply(ControlMessage::RemoveFilter {
            kind: PredicateKind::Size,
            reply,
        })
        .await;
        assert!(rx.await.unwrap().unwrap());
        assert!(job.shared.matchers.read().filters().is_empty());
    }

    #[tokio::test]
    async fn test_filter_edit_keeps_results_of_body_matchers() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["a"]);
        let mut config = config("http://x/FUZZ", &words);
        config.matcher.regexp = Some("secret".to_string());
        let runner = Arc::new(MockRunner::new(|_| Ok(MockReply::new(200, ""))));
        let output = Arc::new(MemoryOutput::new());
        let mut job = job(config, &runner, &output);

        let response = Response::new(
            Request::new("GET", "http://x/a"),
            200,
            Default::default(),
            b"the secret page".to_vec(),
            Duration::ZERO,
        );
        assert!(job.shared.matchers.read().is_match(&response, false));
        output.result(&response);

        let (reply, rx) = tokio::sync::oneshot::channel();
        job.apply(ControlMessage::AddFilter {
            kind: PredicateKind::Size,
            value: "99999".to_string(),
            reply,
        })
        .await;
        rx.await.unwrap().unwrap();
        assert_eq!(output.results.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let words = wordlist(dir.path(), "words", &["a", "b"]);
        let config = config("http://x/FUZZ", &words);
        let runner = Arc::new(MockRunner::new(|_| Ok(MockReply::new(200, ""))));
        let output = Arc::new(MemoryOutput::new());
        let mut job = job(config, &runner, &output);

        assert_eq!(job.apply(ControlMessage::SkipQueue).await, Flow::EndJob);

        job.provider.value();
        job.shared.counters.errors.fetch_add(3, Ordering::SeqCst);
        job.apply(ControlMessage::Reset { keep_position: false }).await;
        assert_eq!(job.provider.position(), 0);
        assert_eq!(Counters::get(&job.shared.counters.errors), 0);

        job.apply(ControlMessage::ChangeRate(10)).await;
        assert_eq!(job.shared.throttle.rate(), 10);
    }

    #[tokio::test]
    async fn test_external_stop() {
        let dir = tempfile::tempdir().unwrap();
        let list: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = list.iter().map(String::as_str).collect();
        let words = wordlist(dir.path(), "words", &refs);
        let mut config = config("http://x/FUZZ", &words);
        config.general.threads = 1;

        let runner = Arc::new(
            MockRunner::new(|_| Ok(MockReply::new(200, ""))).with_delay(Duration::from_millis(20)),
        );
        let output = Arc::new(MemoryOutput::new());
        let job = job(config, &runner, &output);
        let handle = job.handle();
        let running = tokio::spawn(job.run());

        tokio::time::sleep(Duration::from_millis(70)).await;
        handle.stop();
        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(runner.count() < 50);
        assert_eq!(handle.state(), JobState::Stopped);
    }
}
