//! Application configuration
//!
//! Sections are loaded from a TOML file and overlaid with command line
//! values before the job is built.

mod config;

pub use config::{
    CalibrationConfig, Config, GeneralConfig, HttpConfig, InputConfig, OutputConfig,
    PredicateConfig, RecursionConfig, StopConfig,
};
