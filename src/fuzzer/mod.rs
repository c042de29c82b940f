//! Fuzzer module - input generation, dispatch and response classification
//!
//! A [`Job`] pulls keyword combinations from an [`InputProvider`], sends
//! them through a [`Runner`](crate::http::Runner) with bounded concurrency
//! and records every kept response. Supports clusterbomb, pitchfork and
//! sniper input modes, auto-calibration, recursion and runtime control.

mod calibration;
mod control;
mod encoding;
mod engine;
mod input;
mod payloads;
mod recursion;
mod template;
mod throttle;

pub use calibration::{
    calibration_strings, install_baseline, reduce_baseline, BaselineOutcome, CalibrationStrategy,
    Calibrator, ProbeTarget, BLACKLIST_PROBES,
};
pub use control::{ControlMessage, JobHandle, JobState, Shutdown};
pub use encoding::{encode_chain, parse_chain, Encoder};
pub use engine::Job;
pub use input::{InputMode, InputProvider, InputValues};
pub use payloads::{
    LoadOptions, SourceConfig, SourceKind, ValueSource, COMMAND_NUM_VAR, DEFAULT_COMMAND_COUNT,
    DEFAULT_KEYWORD,
};
pub use recursion::{child_url, depth_allows, JobQueue, QueuedJob, RecursionStrategy};
pub use template::{inject_keyword, scrub_templates, sniper_requests, template_locations, SniperTemplate};
pub use throttle::RateThrottle;
