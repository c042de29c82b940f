//! Value sources feeding the input provider

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::encoding::{encode_chain, Encoder};
use crate::error::InputError;

/// Keyword used when a wordlist is given without `:KEYWORD`
pub const DEFAULT_KEYWORD: &str = "FUZZ";

/// Iterations of a command source when none is configured
pub const DEFAULT_COMMAND_COUNT: usize = 100;

/// Environment variable carrying the current index to command sources
pub const COMMAND_NUM_VAR: &str = "RAFALE_NUM";

/// Kind of value source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Wordlist,
    Command,
    Fixed,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Wordlist => "wordlist",
            SourceKind::Command => "command",
            SourceKind::Fixed => "fixed",
        }
    }
}

impl FromStr for SourceKind {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wordlist" => Ok(SourceKind::Wordlist),
            "command" => Ok(SourceKind::Command),
            "fixed" => Ok(SourceKind::Fixed),
            other => Err(InputError::UnknownSource(other.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Definition of one value source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Wordlist path, shell command or fixed value
    pub value: String,
    pub keyword: String,
    /// Sniper template delimiter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<char>,
    /// Encoder names applied to every value, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encoders: Vec<String>,
}

impl SourceConfig {
    pub fn new(kind: SourceKind, value: &str, keyword: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            keyword: keyword.to_string(),
            template: None,
            encoders: Vec::new(),
        }
    }

    pub fn wordlist(path: &str, keyword: &str) -> Self {
        Self::new(SourceKind::Wordlist, path, keyword)
    }

    pub fn command(command: &str, keyword: &str) -> Self {
        Self::new(SourceKind::Command, command, keyword)
    }

    pub fn fixed(value: &str, keyword: &str) -> Self {
        Self::new(SourceKind::Fixed, value, keyword)
    }

    pub fn with_template(mut self, delimiter: char) -> Self {
        self.template = Some(delimiter);
        self
    }

    pub fn with_encoders(mut self, encoders: &[&str]) -> Self {
        self.encoders = encoders.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Parse `PATH` or `PATH:KEYWORD`
    pub fn parse_wordlist_arg(arg: &str) -> Result<Self, InputError> {
        let arg = arg.trim();
        if arg.is_empty() {
            return Err(InputError::KeywordSyntax(arg.to_string()));
        }
        match arg.rsplit_once(':') {
            // a Windows drive letter is not a keyword
            Some((path, _)) if path.len() == 1 && Path::new(arg).exists() => {
                Ok(Self::wordlist(arg, DEFAULT_KEYWORD))
            }
            Some((path, keyword)) => {
                if path.is_empty() || keyword.is_empty() || keyword.contains('/') {
                    return Err(InputError::KeywordSyntax(arg.to_string()));
                }
                Ok(Self::wordlist(path, keyword))
            }
            None => Ok(Self::wordlist(arg, DEFAULT_KEYWORD)),
        }
    }
}

/// Settings that shape how sources are loaded
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub ignore_comments: bool,
    /// Extensions appended to words of the default keyword
    pub extensions: Vec<String>,
    /// Replace `%EXT%` instead of appending extensions
    pub dirsearch_compat: bool,
    pub command_count: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            ignore_comments: false,
            extensions: Vec::new(),
            dirsearch_compat: false,
            command_count: DEFAULT_COMMAND_COUNT,
        }
    }
}

#[derive(Debug, Clone)]
enum SourceData {
    Wordlist(Vec<Vec<u8>>),
    Command { command: String, count: usize },
    Fixed(Vec<u8>),
}

/// A keyword-bound stream of values
#[derive(Debug, Clone)]
pub struct ValueSource {
    keyword: String,
    data: SourceData,
    encoders: Vec<Encoder>,
    position: usize,
    active: bool,
}

impl ValueSource {
    /// Build a source from its definition, reading wordlists from disk
    pub fn load(config: &SourceConfig, options: &LoadOptions) -> Result<Self, InputError> {
        let encoders = config
            .encoders
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<Encoder>, _>>()?;

        let data = match config.kind {
            SourceKind::Wordlist => {
                let raw = std::fs::read(&config.value).map_err(|source| InputError::WordlistRead {
                    path: config.value.clone(),
                    source,
                })?;
                SourceData::Wordlist(parse_wordlist(&raw, &config.keyword, options))
            }
            SourceKind::Command => SourceData::Command {
                command: config.value.clone(),
                count: options.command_count,
            },
            SourceKind::Fixed => SourceData::Fixed(config.value.as_bytes().to_vec()),
        };

        Ok(Self {
            keyword: config.keyword.clone(),
            data,
            encoders,
            position: 0,
            active: true,
        })
    }

    /// In-memory wordlist source
    pub fn from_words<I, S>(keyword: &str, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            keyword: keyword.to_string(),
            data: SourceData::Wordlist(words.into_iter().map(|w| w.as_ref().to_vec()).collect()),
            encoders: Vec::new(),
            position: 0,
            active: true,
        }
    }

    pub fn with_encoders(mut self, encoders: Vec<Encoder>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn kind(&self) -> SourceKind {
        match self.data {
            SourceData::Wordlist(_) => SourceKind::Wordlist,
            SourceData::Command { .. } => SourceKind::Command,
            SourceData::Fixed(_) => SourceKind::Fixed,
        }
    }

    pub fn total(&self) -> usize {
        match &self.data {
            SourceData::Wordlist(words) => words.len(),
            SourceData::Command { count, .. } => *count,
            SourceData::Fixed(_) => 1,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    pub fn has_next(&self) -> bool {
        self.position < self.total()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Encoded value at the current cursor
    pub fn value(&self) -> Vec<u8> {
        self.value_at(self.position)
    }

    /// Encoded value at an arbitrary index
    pub fn value_at(&self, index: usize) -> Vec<u8> {
        let raw = match &self.data {
            SourceData::Wordlist(words) => words.get(index).cloned().unwrap_or_default(),
            SourceData::Command { command, .. } => run_command(command, index),
            SourceData::Fixed(value) => value.clone(),
        };
        encode_chain(&self.encoders, &raw)
    }
}

fn parse_wordlist(raw: &[u8], keyword: &str, options: &LoadOptions) -> Vec<Vec<u8>> {
    let apply_extensions = keyword == DEFAULT_KEYWORD && !options.extensions.is_empty();
    let mut words = Vec::new();

    for line in raw.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if options.ignore_comments {
            let first = line.iter().find(|b| !b.is_ascii_whitespace());
            if first == Some(&b'#') {
                continue;
            }
        }

        if !apply_extensions {
            words.push(line.to_vec());
            continue;
        }

        if options.dirsearch_compat {
            let text = String::from_utf8_lossy(line);
            if text.contains("%EXT%") {
                for ext in &options.extensions {
                    let ext = ext.trim_start_matches('.');
                    words.push(text.replace("%EXT%", ext).into_bytes());
                }
            } else {
                words.push(line.to_vec());
            }
        } else {
            words.push(line.to_vec());
            for ext in &options.extensions {
                let mut word = line.to_vec();
                word.extend_from_slice(ext.as_bytes());
                words.push(word);
            }
        }
    }
    words
}

fn run_command(command: &str, index: usize) -> Vec<u8> {
    match Command::new("sh")
        .arg("-c")
        .arg(command)
        .env(COMMAND_NUM_VAR, index.to_string())
        .output()
    {
        Ok(output) => {
            if !output.status.success() {
                tracing::debug!(command, index, status = %output.status, "Input command exited with failure");
            }
            output.stdout
        }
        Err(e) => {
            tracing::warn!(command, index, error = %e, "Failed to run input command");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn wordlist(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_wordlist_skips_empty_lines() {
        let file = wordlist("one\r\n\ntwo\n#three\n");
        let config = SourceConfig::wordlist(file.path().to_str().unwrap(), "FUZZ");
        let source = ValueSource::load(&config, &LoadOptions::default()).unwrap();
        assert_eq!(source.total(), 3);
        assert_eq!(source.value_at(0), b"one".to_vec());
        assert_eq!(source.value_at(2), b"#three".to_vec());
    }

    #[test]
    fn test_wordlist_ignore_comments() {
        let file = wordlist("one\n  # comment\ntwo\n");
        let config = SourceConfig::wordlist(file.path().to_str().unwrap(), "FUZZ");
        let options = LoadOptions {
            ignore_comments: true,
            ..Default::default()
        };
        let source = ValueSource::load(&config, &options).unwrap();
        assert_eq!(source.total(), 2);
    }

    #[test]
    fn test_extensions_only_for_default_keyword() {
        let file = wordlist("index\n");
        let options = LoadOptions {
            extensions: vec![".php".into(), ".bak".into()],
            ..Default::default()
        };
        let path = file.path().to_str().unwrap();

        let fuzz = ValueSource::load(&SourceConfig::wordlist(path, "FUZZ"), &options).unwrap();
        assert_eq!(fuzz.total(), 3);
        assert_eq!(fuzz.value_at(1), b"index.php".to_vec());

        let other = ValueSource::load(&SourceConfig::wordlist(path, "W2"), &options).unwrap();
        assert_eq!(other.total(), 1);
    }

    #[test]
    fn test_dirsearch_extension_replacement() {
        let file = wordlist("admin.%EXT%\nplain\n");
        let options = LoadOptions {
            extensions: vec![".php".into(), "asp".into()],
            dirsearch_compat: true,
            ..Default::default()
        };
        let config = SourceConfig::wordlist(file.path().to_str().unwrap(), "FUZZ");
        let source = ValueSource::load(&config, &options).unwrap();
        let values: Vec<_> = (0..source.total()).map(|i| source.value_at(i)).collect();
        assert_eq!(
            values,
            vec![b"admin.php".to_vec(), b"admin.asp".to_vec(), b"plain".to_vec()]
        );
    }

    #[test]
    fn test_missing_wordlist() {
        let config = SourceConfig::wordlist("/nonexistent/rafale/words.txt", "FUZZ");
        let err = ValueSource::load(&config, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, InputError::WordlistRead { .. }));
    }

    #[test]
    fn test_wordlist_arg_syntax() {
        let config = SourceConfig::parse_wordlist_arg("/tmp/words.txt:W1").unwrap();
        assert_eq!(config.value, "/tmp/words.txt");
        assert_eq!(config.keyword, "W1");

        let config = SourceConfig::parse_wordlist_arg("/tmp/words.txt").unwrap();
        assert_eq!(config.keyword, DEFAULT_KEYWORD);

        assert!(SourceConfig::parse_wordlist_arg("/tmp/words.txt:").is_err());
        assert!(SourceConfig::parse_wordlist_arg(":W1").is_err());
        assert!(SourceConfig::parse_wordlist_arg("").is_err());
    }

    #[test]
    fn test_command_source() {
        let config = SourceConfig::command("printf \"v$RAFALE_NUM\"", "FUZZ");
        let options = LoadOptions {
            command_count: 3,
            ..Default::default()
        };
        let source = ValueSource::load(&config, &options).unwrap();
        assert_eq!(source.total(), 3);
        assert_eq!(source.kind(), SourceKind::Command);
        assert_eq!(source.value_at(2), b"v2".to_vec());
    }

    #[test]
    fn test_fixed_source_with_encoder() {
        let config = SourceConfig::fixed("a b", "FUZZ").with_encoders(&["urlencode"]);
        let source = ValueSource::load(&config, &LoadOptions::default()).unwrap();
        assert_eq!(source.total(), 1);
        assert_eq!(source.value(), b"a%20b".to_vec());

        let bad = SourceConfig::fixed("x", "FUZZ").with_encoders(&["nope"]);
        assert!(matches!(
            ValueSource::load(&bad, &LoadOptions::default()),
            Err(InputError::UnknownEncoder(_))
        ));
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Command".parse::<SourceKind>().unwrap(), SourceKind::Command);
        assert!("socket".parse::<SourceKind>().is_err());
    }
}
