//! JSON result file
//!
//! Pretty-printed document with run metadata and every kept result.

use anyhow::Result;
use serde::Serialize;

use crate::reporting::{FuzzResult, ReportMetadata};

#[derive(Serialize)]
struct Document<'a> {
    #[serde(flatten)]
    metadata: &'a ReportMetadata,
    results: &'a [FuzzResult],
}

/// Generate the JSON document
pub fn generate(metadata: &ReportMetadata, results: &[FuzzResult]) -> Result<String> {
    let json = serde_json::to_string_pretty(&Document { metadata, results })?;
    Ok(json)
}

/// One result per line, for streaming consumers
pub fn generate_lines(results: &[FuzzResult]) -> Result<String> {
    let mut out = String::new();
    for result in results {
        out.push_str(&serde_json::to_string(result)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn result(word: &str) -> FuzzResult {
        let mut input = BTreeMap::new();
        input.insert("FUZZ".to_string(), word.to_string());
        FuzzResult {
            input,
            position: 1,
            status: 200,
            length: 10,
            words: 2,
            lines: 1,
            content_type: "text/html".to_string(),
            redirect_location: String::new(),
            url: format!("http://example.com/{}", word),
            host: "example.com".to_string(),
            duration_ms: 5,
            method: "GET".to_string(),
            host_header: String::new(),
        }
    }

    #[test]
    fn test_generate_json() {
        let metadata = ReportMetadata::new("http://example.com/FUZZ", Utc::now());
        let json = generate(&metadata, &[result("admin")]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["url"], "http://example.com/FUZZ");
        assert_eq!(value["results"][0]["input"]["FUZZ"], "admin");
        assert_eq!(value["results"][0]["status"], 200);
    }

    #[test]
    fn test_generate_lines() {
        let lines = generate_lines(&[result("a"), result("b")]).unwrap();
        assert_eq!(lines.lines().count(), 2);
        assert!(!lines.trim_end().contains("\n\n"));
    }
}
