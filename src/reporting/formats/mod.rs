//! Result file formats

pub mod csv;
pub mod json;
