//! Value encoders
//!
//! Encoders transform provider values before they are substituted into the
//! request. They are configured per keyword and applied in order.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::InputError;

/// Encoding applied to a value before substitution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoder {
    /// Raw value
    #[default]
    None,
    /// Percent encoding of everything outside the RFC 3986 unreserved set
    UrlEncode,
    DoubleUrlEncode,
    Base64Encode,
    Base64Decode,
    /// Named entities for markup characters, hex entities for other symbols
    HtmlEncode,
    HexEncode,
    /// `\uXXXX` for every non-alphanumeric character
    JsUnicode,
    /// `\xXX` for every byte
    AsciiHex,
}

impl Encoder {
    pub fn all() -> &'static [Encoder] {
        &[
            Encoder::None,
            Encoder::UrlEncode,
            Encoder::DoubleUrlEncode,
            Encoder::Base64Encode,
            Encoder::Base64Decode,
            Encoder::HtmlEncode,
            Encoder::HexEncode,
            Encoder::JsUnicode,
            Encoder::AsciiHex,
        ]
    }

    /// Configuration name
    pub fn name(&self) -> &'static str {
        match self {
            Encoder::None => "none",
            Encoder::UrlEncode => "urlencode",
            Encoder::DoubleUrlEncode => "doubleurlencode",
            Encoder::Base64Encode => "b64encode",
            Encoder::Base64Decode => "b64decode",
            Encoder::HtmlEncode => "htmlencode",
            Encoder::HexEncode => "hexencode",
            Encoder::JsUnicode => "jsunicode",
            Encoder::AsciiHex => "asciihex",
        }
    }

    /// Look up an encoder by name, accepting a few common aliases
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let encoder = match name.as_str() {
            "none" | "raw" => Encoder::None,
            "urlencode" | "url" => Encoder::UrlEncode,
            "doubleurlencode" | "url2" => Encoder::DoubleUrlEncode,
            "b64encode" | "base64encode" | "b64" => Encoder::Base64Encode,
            "b64decode" | "base64decode" => Encoder::Base64Decode,
            "htmlencode" | "html" => Encoder::HtmlEncode,
            "hexencode" | "hex" => Encoder::HexEncode,
            "jsunicode" | "jsu" => Encoder::JsUnicode,
            "asciihex" | "ahex" => Encoder::AsciiHex,
            _ => return None,
        };
        Some(encoder)
    }

    /// Encode a value. Decoders that fail leave the value untouched.
    pub fn encode(&self, value: &[u8]) -> Vec<u8> {
        match self {
            Encoder::None => value.to_vec(),
            Encoder::UrlEncode => url_encode(value).into_bytes(),
            Encoder::DoubleUrlEncode => url_encode(url_encode(value).as_bytes()).into_bytes(),
            Encoder::Base64Encode => STANDARD.encode(value).into_bytes(),
            Encoder::Base64Decode => match STANDARD.decode(value) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::debug!(error = %e, "Value is not valid base64, passing through");
                    value.to_vec()
                }
            },
            Encoder::HtmlEncode => html_encode(&String::from_utf8_lossy(value)).into_bytes(),
            Encoder::HexEncode => hex_encode(value).into_bytes(),
            Encoder::JsUnicode => js_unicode_encode(&String::from_utf8_lossy(value)).into_bytes(),
            Encoder::AsciiHex => ascii_hex_encode(value).into_bytes(),
        }
    }
}

impl FromStr for Encoder {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| InputError::UnknownEncoder(s.to_string()))
    }
}

impl fmt::Display for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Apply a chain of encoders left to right
pub fn encode_chain(encoders: &[Encoder], value: &[u8]) -> Vec<u8> {
    encoders
        .iter()
        .fold(value.to_vec(), |acc, encoder| encoder.encode(&acc))
}

/// Parse a space or comma separated encoder list
pub fn parse_chain(spec: &str) -> Result<Vec<Encoder>, InputError> {
    spec.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

pub fn url_encode(input: &[u8]) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for &byte in input {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

pub fn html_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 6);
    for ch in input.chars() {
        match ch {
            '<' => encoded.push_str("&lt;"),
            '>' => encoded.push_str("&gt;"),
            '&' => encoded.push_str("&amp;"),
            '"' => encoded.push_str("&quot;"),
            '\'' => encoded.push_str("&#x27;"),
            _ if !ch.is_alphanumeric() && !ch.is_whitespace() => {
                encoded.push_str(&format!("&#x{:X};", ch as u32));
            }
            _ => encoded.push(ch),
        }
    }
    encoded
}

pub fn hex_encode(input: &[u8]) -> String {
    input.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn js_unicode_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 6);
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            encoded.push(ch);
        } else {
            encoded.push_str(&format!("\\u{:04X}", ch as u32));
        }
    }
    encoded
}

pub fn ascii_hex_encode(input: &[u8]) -> String {
    input.iter().map(|b| format!("\\x{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode(b"test"), "test");
        assert_eq!(url_encode(b"<script>"), "%3Cscript%3E");
        assert_eq!(url_encode(b"a b"), "a%20b");
        assert_eq!(url_encode(b"'\""), "%27%22");
    }

    #[test]
    fn test_double_url_encode() {
        assert_eq!(Encoder::DoubleUrlEncode.encode(b"<"), b"%253C".to_vec());
    }

    #[test]
    fn test_base64() {
        assert_eq!(Encoder::Base64Encode.encode(b"test"), b"dGVzdA==".to_vec());
        assert_eq!(Encoder::Base64Decode.encode(b"dGVzdA=="), b"test".to_vec());
        // invalid input passes through
        assert_eq!(Encoder::Base64Decode.encode(b"!!"), b"!!".to_vec());
    }

    #[test]
    fn test_html_and_js() {
        assert_eq!(html_encode("<a&b>"), "&lt;a&amp;b&gt;");
        assert_eq!(js_unicode_encode("a<"), "a\\u003C");
        assert_eq!(hex_encode(b"AB"), "4142");
        assert_eq!(ascii_hex_encode(b"A"), "\\x41");
    }

    #[test]
    fn test_chain_applies_in_order() {
        let chain = parse_chain("b64encode, urlencode").unwrap();
        assert_eq!(chain, vec![Encoder::Base64Encode, Encoder::UrlEncode]);
        // "a?" -> "YT8=" -> "YT8%3D"
        assert_eq!(encode_chain(&chain, b"a?"), b"YT8%3D".to_vec());
        assert_eq!(encode_chain(&[], b"raw"), b"raw".to_vec());
    }

    #[test]
    fn test_unknown_encoder() {
        assert!(matches!(
            "rot13".parse::<Encoder>(),
            Err(InputError::UnknownEncoder(_))
        ));
        for encoder in Encoder::all() {
            assert_eq!(Encoder::from_name(encoder.name()), Some(*encoder));
        }
    }
}
