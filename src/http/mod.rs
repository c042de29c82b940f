//! HTTP module
//!
//! Request/response model, the `Runner` seam used by the fuzzing engine,
//! and the reqwest implementation of it.

mod client;
mod request;
mod response;
mod runner;

pub use client::HttpRunner;
pub use request::{Request, RequestBuilder};
pub use response::{Response, MAX_DOWNLOAD_SIZE};
pub use runner::{prepare_request, Runner};
