use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use rand::Rng;
use regex::Regex;

use crate::error::SortError;
use crate::model::{FileEntry, FileKind};

pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];
pub const SIDECAR_EXTENSION: &str = "txt";
pub const RANDOM_TOKEN_LEN: usize = 8;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Index,
    Random,
}

/// A naming convention such as `{index}` or `{index}_{random}`.
///
/// The template doubles as a matcher: a stem is numbered only when the whole
/// stem matches the compiled pattern, so a hash that merely starts with
/// digits stays a candidate.
#[derive(Debug, Clone)]
pub struct NamingTemplate {
    template: String,
    segments: Vec<Segment>,
    pattern: Regex,
}

impl NamingTemplate {
    pub const INDEX: &'static str = "{index}";
    pub const INDEX_RANDOM: &'static str = "{index}_{random}";

    pub fn index() -> Self {
        Self::parse(Self::INDEX).unwrap_or_else(|_| unreachable!("built-in template is valid"))
    }

    pub fn parse(template: &str) -> Result<Self, SortError> {
        let invalid = |reason: &str| SortError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(invalid("unclosed '{'"));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    match name.as_str() {
                        "index" => segments.push(Segment::Index),
                        "random" => segments.push(Segment::Random),
                        other => return Err(invalid(&format!("unknown placeholder '{{{other}}}'"))),
                    }
                }
                '}' => return Err(invalid("unmatched '}'")),
                '/' | '\\' => return Err(invalid("path separators are not allowed")),
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let index_count = segments.iter().filter(|s| **s == Segment::Index).count();
        if index_count != 1 {
            return Err(invalid("exactly one {index} placeholder is required"));
        }
        if segments.iter().filter(|s| **s == Segment::Random).count() > 1 {
            return Err(invalid("at most one {random} placeholder is allowed"));
        }
        for (position, segment) in segments.iter().enumerate() {
            if *segment != Segment::Index {
                continue;
            }
            let before = position.checked_sub(1).and_then(|i| segments.get(i));
            let after = segments.get(position + 1);
            let digit_before = matches!(before, Some(Segment::Literal(text)) if text.ends_with(|c: char| c.is_ascii_digit()));
            let digit_after = matches!(after, Some(Segment::Literal(text)) if text.starts_with(|c: char| c.is_ascii_digit()));
            if digit_before || digit_after {
                return Err(invalid("digits may not touch {index}"));
            }
        }

        let mut source = String::from("^");
        for segment in &segments {
            match segment {
                Segment::Literal(text) => source.push_str(&regex::escape(text)),
                Segment::Index => source.push_str(r"(\d+)"),
                Segment::Random => {
                    source.push_str(&format!("[a-z0-9]{{{RANDOM_TOKEN_LEN}}}"));
                }
            }
        }
        source.push('$');
        let pattern = Regex::new(&source).map_err(|err| invalid(&err.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            segments,
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    pub fn uses_random(&self) -> bool {
        self.segments.contains(&Segment::Random)
    }

    /// Index encoded in `stem`, if the stem fully matches this template.
    pub fn parse_index(&self, stem: &str) -> Option<u64> {
        let captures = self.pattern.captures(stem)?;
        captures.get(1)?.as_str().parse::<u64>().ok()
    }

    pub fn render(&self, index: u64, token: &str) -> String {
        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => output.push_str(text),
                Segment::Index => output.push_str(&index.to_string()),
                Segment::Random => output.push_str(token),
            }
        }
        output
    }
}

impl Default for NamingTemplate {
    fn default() -> Self {
        Self::index()
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

pub fn random_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..RANDOM_TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    template: NamingTemplate,
    extensions: BTreeSet<String>,
}

impl Classifier {
    pub fn new<S: AsRef<str>>(template: NamingTemplate, extensions: &[S]) -> Self {
        let extensions = extensions
            .iter()
            .filter_map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| ext != SIDECAR_EXTENSION)
            .collect();
        Self {
            template,
            extensions,
        }
    }

    pub fn with_defaults(template: NamingTemplate) -> Self {
        Self::new(template, DEFAULT_IMAGE_EXTENSIONS)
    }

    pub fn template(&self) -> &NamingTemplate {
        &self.template
    }

    pub fn is_image_extension(&self, extension: &str) -> bool {
        self.extensions.contains(&extension.to_lowercase())
    }

    pub fn classify(&self, path: &Path) -> FileEntry {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = path.file_stem().and_then(|stem| stem.to_str());
        let extension = path.extension().and_then(|ext| ext.to_str());

        let (stem, extension, kind) = match (stem, extension) {
            (Some(stem), Some(extension)) => {
                let extension = extension.to_lowercase();
                let kind = if extension == SIDECAR_EXTENSION {
                    FileKind::Sidecar
                } else if self.extensions.contains(&extension) {
                    match self.template.parse_index(stem) {
                        Some(index) => FileKind::Numbered(index),
                        None => FileKind::Candidate,
                    }
                } else {
                    FileKind::Ignored
                };
                (stem.to_string(), extension, kind)
            }
            (stem, _) => (
                stem.map(str::to_string).unwrap_or_default(),
                String::new(),
                FileKind::Ignored,
            ),
        };

        FileEntry {
            path: path.to_path_buf(),
            file_name,
            stem,
            extension,
            kind,
        }
    }
}
