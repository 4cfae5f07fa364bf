//! Mapping between external `/`-delimited paths and the flat internal key
//! namespace.
//!
//! `/a/b` is stored as `:a:b`, the root as the empty key. A literal `:` or
//! `;` inside a segment is replaced by a placeholder character so segments
//! never collide with the key delimiter or the list separator used by
//! scripts. The placeholders themselves are reserved and cannot appear in
//! external paths.

pub const KEY_DELIMITER: char = ':';
pub const LIST_SEPARATOR: char = ';';
pub const DELIMITER_PLACEHOLDER: char = '§';
pub const SEPARATOR_PLACEHOLDER: char = '°';

/// Drops empty and `..` segments; the root normalizes to `/`.
pub fn normalize_path(path: &str) -> String {
    let segments = path_segments(path);
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut normalized = String::with_capacity(path.len());
    for segment in segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    normalized
}

pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|segment| !segment.is_empty() && *segment != "..")
        .collect()
}

/// First segment that carries a placeholder character. Such a segment would
/// decode to a different name than it was stored under.
pub fn reserved_segment(path: &str) -> Option<&str> {
    path_segments(path)
        .into_iter()
        .find(|segment| is_reserved(segment))
}

pub fn is_reserved(segment: &str) -> bool {
    segment.contains([DELIMITER_PLACEHOLDER, SEPARATOR_PLACEHOLDER])
}

pub fn encode_path(path: &str) -> String {
    let mut key = String::with_capacity(path.len());
    for segment in path_segments(path) {
        key.push(KEY_DELIMITER);
        key.push_str(&encode_segment(segment));
    }
    key
}

pub fn decode_key(key: &str) -> String {
    if key.is_empty() {
        return "/".to_string();
    }
    let mut path = String::with_capacity(key.len());
    for segment in key.split(KEY_DELIMITER).filter(|segment| !segment.is_empty()) {
        path.push('/');
        path.push_str(&decode_segment(segment));
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

pub fn encode_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            KEY_DELIMITER => DELIMITER_PLACEHOLDER,
            LIST_SEPARATOR => SEPARATOR_PLACEHOLDER,
            other => other,
        })
        .collect()
}

pub fn decode_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            DELIMITER_PLACEHOLDER => KEY_DELIMITER,
            SEPARATOR_PLACEHOLDER => LIST_SEPARATOR,
            other => other,
        })
        .collect()
}

/// Last segment of an external path, `None` for the root.
pub fn leaf_name(path: &str) -> Option<&str> {
    path_segments(path).last().copied()
}
