//! Sniper template locations
//!
//! A template marks injection points by wrapping them in a delimiter, for
//! example `§id§`. Each pair becomes one base request in which that span is
//! replaced by the keyword and every other delimiter is removed.

use crate::error::InputError;
use crate::http::Request;

/// Code point offsets of every delimiter occurrence in `field`, in pairs
pub fn template_locations(field: &str, delimiter: char) -> Vec<usize> {
    field
        .chars()
        .enumerate()
        .filter(|(_, c)| *c == delimiter)
        .map(|(i, _)| i)
        .collect()
}

/// Pair up delimiter offsets as inclusive `(start, end)` spans
pub fn paired_locations(
    field: &str,
    field_name: &str,
    delimiter: char,
) -> Result<Vec<(usize, usize)>, InputError> {
    let offsets = template_locations(field, delimiter);
    if offsets.len() % 2 != 0 {
        return Err(InputError::UnpairedTemplate {
            field: field_name.to_string(),
            delimiter,
        });
    }
    Ok(offsets.chunks(2).map(|pair| (pair[0], pair[1])).collect())
}

/// Replace the inclusive code point span `[start, end]` by `keyword`
pub fn inject_keyword(field: &str, keyword: &str, start: usize, end: usize) -> String {
    let mut out = String::with_capacity(field.len() + keyword.len());
    for (i, c) in field.chars().enumerate() {
        if i == start {
            out.push_str(keyword);
        }
        if i < start || i > end {
            out.push(c);
        }
    }
    out
}

/// Remove every delimiter from `field`
pub fn scrub_templates(field: &str, delimiter: char) -> String {
    field.chars().filter(|c| *c != delimiter).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Method,
    Url,
    HeaderKey(String),
    HeaderValue(String),
    Body,
}

impl Field {
    fn name(&self) -> String {
        match self {
            Field::Method => "method".to_string(),
            Field::Url => "URL".to_string(),
            Field::HeaderKey(key) => format!("header name {}", key),
            Field::HeaderValue(key) => format!("header {}", key),
            Field::Body => "body".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    field: Field,
    start: usize,
    end: usize,
}

/// A request template with its paired sniper locations
#[derive(Debug, Clone)]
pub struct SniperTemplate {
    base: Request,
    delimiter: char,
    keyword: String,
    locations: Vec<Location>,
}

impl SniperTemplate {
    /// Find every location in method, URL, headers (sorted by name) and body
    pub fn new(base: &Request, delimiter: char, keyword: &str) -> Result<Self, InputError> {
        let mut locations = Vec::new();

        let mut push_field = |field: Field, text: &str| -> Result<(), InputError> {
            for (start, end) in paired_locations(text, &field.name(), delimiter)? {
                locations.push(Location {
                    field: field.clone(),
                    start,
                    end,
                });
            }
            Ok(())
        };

        push_field(Field::Method, &base.method)?;
        push_field(Field::Url, &base.url)?;

        let mut keys: Vec<&String> = base.headers.keys().collect();
        keys.sort();
        for key in keys {
            push_field(Field::HeaderKey(key.clone()), key)?;
            push_field(Field::HeaderValue(key.clone()), &base.headers[key])?;
        }

        match std::str::from_utf8(&base.body) {
            Ok(body) => push_field(Field::Body, body)?,
            Err(_) => tracing::debug!("Request body is not UTF-8, no template locations read from it"),
        }

        if locations.is_empty() {
            return Err(InputError::NoTemplateLocations(delimiter));
        }

        Ok(Self {
            base: base.clone(),
            delimiter,
            keyword: keyword.to_string(),
            locations,
        })
    }

    /// Number of paired locations
    pub fn total(&self) -> usize {
        self.locations.len()
    }

    /// One base request per location, in discovery order
    pub fn requests(&self) -> Vec<Request> {
        self.locations.iter().map(|loc| self.request_for(loc)).collect()
    }

    fn request_for(&self, location: &Location) -> Request {
        let d = self.delimiter;
        let render = |field: &Field, text: &str| -> String {
            if *field == location.field {
                scrub_templates(
                    &inject_keyword(text, &self.keyword, location.start, location.end),
                    d,
                )
            } else {
                scrub_templates(text, d)
            }
        };

        let mut request = self.base.clone();
        request.method = render(&Field::Method, &self.base.method);
        request.url = render(&Field::Url, &self.base.url);
        request.headers = self
            .base
            .headers
            .iter()
            .map(|(key, value)| {
                (
                    render(&Field::HeaderKey(key.clone()), key),
                    render(&Field::HeaderValue(key.clone()), value),
                )
            })
            .collect();
        if let Ok(body) = std::str::from_utf8(&self.base.body) {
            request.body = render(&Field::Body, body).into_bytes();
        }
        request
    }
}

/// Expand a template into one base request per location
pub fn sniper_requests(
    base: &Request,
    delimiter: char,
    keyword: &str,
) -> Result<Vec<Request>, InputError> {
    Ok(SniperTemplate::new(base, delimiter, keyword)?.requests())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locations_are_code_points() {
        assert_eq!(template_locations("a§b§c", '§'), vec![1, 3]);
        assert_eq!(template_locations("ééé§x§", '§'), vec![3, 5]);
        assert!(template_locations("none", '§').is_empty());
    }

    #[test]
    fn test_inject_and_scrub() {
        let field = "id=§1§&name=§bob§";
        let pairs = paired_locations(field, "url", '§').unwrap();
        assert_eq!(pairs, vec![(3, 5), (12, 16)]);

        let injected = inject_keyword(field, "FUZZ", 3, 5);
        assert_eq!(injected, "id=FUZZ&name=§bob§");
        assert_eq!(scrub_templates(&injected, '§'), "id=FUZZ&name=bob");

        let injected = inject_keyword(field, "FUZZ", 12, 16);
        assert_eq!(scrub_templates(&injected, '§'), "id=1&name=FUZZ");
    }

    #[test]
    fn test_unpaired_delimiter() {
        let err = paired_locations("a§b", "URL", '§').unwrap_err();
        assert!(matches!(err, InputError::UnpairedTemplate { delimiter: '§', .. }));
    }

    #[test]
    fn test_sniper_template_requests() {
        let base = Request::builder()
            .method("POST")
            .url("http://example.com/§a§?q=§b§")
            .header("X-Token", "§tok§")
            .body("user=§u§")
            .build();

        let template = SniperTemplate::new(&base, '§', "FUZZ").unwrap();
        assert_eq!(template.total(), 4);

        let requests = template.requests();
        assert_eq!(requests.len(), 4);
        for req in &requests {
            let text = format!(
                "{} {} {:?} {}",
                req.method,
                req.url,
                req.headers,
                req.body_text()
            );
            assert_eq!(text.matches("FUZZ").count(), 1, "{}", text);
            assert!(!text.contains('§'), "{}", text);
        }
        assert_eq!(requests[0].url, "http://example.com/FUZZ?q=b");
        assert_eq!(requests[1].url, "http://example.com/a?q=FUZZ");
        assert_eq!(requests[2].headers["X-Token"], "FUZZ");
        assert_eq!(requests[3].body_text(), "user=FUZZ");
    }

    #[test]
    fn test_sniper_without_locations() {
        let base = Request::new("GET", "http://example.com/");
        let err = sniper_requests(&base, '§', "FUZZ").unwrap_err();
        assert!(matches!(err, InputError::NoTemplateLocations('§')));
    }
}
