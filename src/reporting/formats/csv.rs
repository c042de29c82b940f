//! CSV result file
//!
//! One column per input keyword followed by the response metrics.

use anyhow::Result;
use std::collections::BTreeSet;

use crate::reporting::FuzzResult;

/// Generate the CSV document
pub fn generate(results: &[FuzzResult]) -> Result<String> {
    let keywords: BTreeSet<&str> = results
        .iter()
        .flat_map(|r| r.input.keys().map(String::as_str))
        .collect();

    let mut csv = String::new();

    let mut header: Vec<String> = keywords.iter().map(|k| csv_escape(k)).collect();
    header.extend(
        [
            "url",
            "redirectlocation",
            "position",
            "status_code",
            "content_length",
            "content_words",
            "content_lines",
            "content_type",
            "duration_ms",
            "host",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    csv.push_str(&header.join(","));
    csv.push('\n');

    for result in results {
        let mut row: Vec<String> = keywords
            .iter()
            .map(|k| csv_escape(result.input.get(*k).map(String::as_str).unwrap_or("")))
            .collect();
        row.extend([
            csv_escape(&result.url),
            csv_escape(&result.redirect_location),
            result.position.to_string(),
            result.status.to_string(),
            result.length.to_string(),
            result.words.to_string(),
            result.lines.to_string(),
            csv_escape(&result.content_type),
            result.duration_ms.to_string(),
            csv_escape(&result.host),
        ]);

        csv.push_str(&row.join(","));
        csv.push('\n');
    }

    Ok(csv)
}

/// Escape a value for CSV (handle commas, quotes, newlines)
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("simple"), "simple");
        assert_eq!(csv_escape("with,comma"), "\"with,comma\"");
        assert_eq!(csv_escape("with\"quote"), "\"with\"\"quote\"");
        assert_eq!(csv_escape("with\nnewline"), "\"with\nnewline\"");
    }

    #[test]
    fn test_generate_csv() {
        let mut input = BTreeMap::new();
        input.insert("FUZZ".to_string(), "a,b".to_string());
        let result = FuzzResult {
            input,
            position: 2,
            status: 301,
            length: 0,
            words: 1,
            lines: 1,
            content_type: String::new(),
            redirect_location: "/a,b/".to_string(),
            url: "http://example.com/a,b".to_string(),
            host: "example.com".to_string(),
            duration_ms: 12,
            method: "GET".to_string(),
            host_header: String::new(),
        };

        let csv = generate(&[result]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "FUZZ,url,redirectlocation,position,status_code,content_length,content_words,content_lines,content_type,duration_ms,host"
        );
        assert_eq!(
            lines.next().unwrap(),
            "\"a,b\",\"http://example.com/a,b\",\"/a,b/\",2,301,0,1,1,,12,example.com"
        );
    }
}
