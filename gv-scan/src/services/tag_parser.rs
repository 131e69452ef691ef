//! File name tag parsing
//!
//! Splits a raw library file name such as `Super Game (USA) (Rev 1) [Proto].sfc`
//! into display name, region, revision, free-form tags and extension.
//!
//! Rules:
//! - The extension is the suffix after the last `.` that lies outside any
//!   bracket group, and only when it is non-empty and alphanumeric.
//! - `(...)` and `[...]` groups are extracted left to right; a comma-separated
//!   group yields one token per entry.
//! - The first token in the region vocabulary becomes the region (GoodTools
//!   codes are canonicalised to full names); the first `Rev` token becomes the
//!   revision. Every other token is a tag, in file-name order.
//! - An unterminated bracket is kept as part of the display name.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Result of parsing one file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedName {
    /// Text outside bracket groups, whitespace-collapsed
    pub name: String,
    pub region: Option<String>,
    pub revision: Option<String>,
    pub tags: Vec<String>,
    /// Lower-case extension without the dot (empty when absent)
    pub extension: String,
    /// File name with tags and extension removed
    pub name_no_tags: String,
}

static REVISION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^rev(?:\s+|-)?([0-9a-z][0-9a-z.]*)$").expect("revision pattern compiles")
});

/// (spelling, canonical name); compared case-insensitively
const REGIONS: &[(&str, &str)] = &[
    ("USA", "USA"),
    ("US", "USA"),
    ("U", "USA"),
    ("Europe", "Europe"),
    ("EU", "Europe"),
    ("E", "Europe"),
    ("Japan", "Japan"),
    ("JP", "Japan"),
    ("J", "Japan"),
    ("World", "World"),
    ("W", "World"),
    ("Asia", "Asia"),
    ("Australia", "Australia"),
    ("A", "Australia"),
    ("Brazil", "Brazil"),
    ("B", "Brazil"),
    ("Canada", "Canada"),
    ("China", "China"),
    ("C", "China"),
    ("France", "France"),
    ("F", "France"),
    ("Germany", "Germany"),
    ("G", "Germany"),
    ("Hong Kong", "Hong Kong"),
    ("HK", "Hong Kong"),
    ("Italy", "Italy"),
    ("I", "Italy"),
    ("Korea", "Korea"),
    ("K", "Korea"),
    ("Netherlands", "Netherlands"),
    ("NL", "Netherlands"),
    ("Russia", "Russia"),
    ("R", "Russia"),
    ("Spain", "Spain"),
    ("S", "Spain"),
    ("Sweden", "Sweden"),
    ("SW", "Sweden"),
    ("Taiwan", "Taiwan"),
    ("UK", "UK"),
];

/// Canonical region for a token, if it is one
pub fn canonical_region(token: &str) -> Option<&'static str> {
    REGIONS
        .iter()
        .find(|(spelling, _)| spelling.eq_ignore_ascii_case(token))
        .map(|(_, canonical)| *canonical)
}

/// Revision code carried by a `Rev` token, if it is one
pub fn revision_code(token: &str) -> Option<String> {
    REVISION
        .captures(token)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse a raw file name (no directory components)
pub fn parse_file_name(file_name: &str) -> ParsedName {
    let (stem, extension) = split_extension(file_name);
    let mut parsed = parse_name(stem);
    parsed.extension = extension.to_ascii_lowercase();
    parsed
}

/// Parse a name that carries no extension, such as a multi-file directory
///
/// Every `.` is kept as part of the name.
pub fn parse_name(stem: &str) -> ParsedName {
    let (outside, tokens) = extract_groups(stem);

    let name = collapse_whitespace(&outside);

    let mut region = None;
    let mut revision = None;
    let mut tags = Vec::new();

    for token in tokens {
        if region.is_none() {
            if let Some(canonical) = canonical_region(&token) {
                region = Some(canonical.to_string());
                continue;
            }
        }
        if revision.is_none() {
            if let Some(code) = revision_code(&token) {
                revision = Some(code);
                continue;
            }
        }
        tags.push(token);
    }

    ParsedName {
        name_no_tags: name.clone(),
        name,
        region,
        revision,
        tags,
        extension: String::new(),
    }
}

/// Split off the extension; returns (stem, extension)
fn split_extension(file_name: &str) -> (&str, &str) {
    let spans = group_spans(file_name);
    let last_dot = file_name
        .char_indices()
        .filter(|(idx, ch)| *ch == '.' && !spans.iter().any(|(s, e)| s < idx && idx < e))
        .map(|(idx, _)| idx)
        .last();

    match last_dot {
        // Leading dot is a hidden-file marker, not an extension separator
        Some(idx) if idx > 0 => {
            let suffix = &file_name[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
                (&file_name[..idx], suffix)
            } else {
                (file_name, "")
            }
        }
        _ => (file_name, ""),
    }
}

/// Byte spans (open, close) of terminated bracket groups, left to right
fn group_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut offset = 0;

    while let Some(open_rel) = text[offset..].find(is_open_bracket) {
        let open = offset + open_rel;
        let closer = closer_for(&text[open..]);
        match text[open + 1..].find(closer) {
            Some(close_rel) => {
                let close = open + 1 + close_rel;
                spans.push((open, close));
                offset = close + 1;
            }
            None => break,
        }
    }

    spans
}

fn is_open_bracket(c: char) -> bool {
    c == '(' || c == '['
}

fn closer_for(group: &str) -> char {
    if group.starts_with('(') {
        ')'
    } else {
        ']'
    }
}

/// Remove bracket groups; returns (text outside groups, tokens in order)
fn extract_groups(stem: &str) -> (String, Vec<String>) {
    let mut outside = String::with_capacity(stem.len());
    let mut tokens = Vec::new();
    let mut rest = stem;

    while let Some(open_idx) = rest.find(is_open_bracket) {
        outside.push_str(&rest[..open_idx]);

        let open = &rest[open_idx..];
        let closer = closer_for(open);

        match open[1..].find(closer) {
            Some(close_rel) => {
                let content = &open[1..1 + close_rel];
                tokens.extend(
                    content
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                );
                outside.push(' ');
                rest = &open[close_rel + 2..];
            }
            None => {
                // Unterminated: keep the remainder verbatim
                outside.push_str(open);
                rest = "";
            }
        }
    }
    outside.push_str(rest);

    (outside, tokens)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
