//! Path pattern engine.
//!
//! Patterns are plain strings split on `/`; a segment is either a literal
//! (matched byte-for-byte) or a `{name}` parameter capturing one non-empty
//! segment. A trailing `/` produces an empty terminal segment, so `/a` and
//! `/a/` are distinct patterns. No regex; the grammar is small enough that a
//! linear segment scan is both faster and trivially correct to verify.
//!
//! These functions are pure and carry no dependency on the HTTP layer, so
//! both the mux write path (overlap validation) and the serve path (request
//! matching) share them.

use std::collections::HashMap;

use thiserror::Error;

/// Parameter captures extracted while matching a path against a pattern.
pub type PathParams = HashMap<String, String>;

/// Errors for malformed path patterns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("unterminated parameter in segment '{0}'")]
    UnterminatedParam(String),

    #[error("empty parameter name in segment '{0}'")]
    EmptyParam(String),

    #[error("stray brace in segment '{0}'")]
    StrayBrace(String),

    #[error("invalid parameter name in segment '{0}'")]
    InvalidParamName(String),
}

/// Outcome of matching one request path against one pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    /// Whether the whole path satisfied the whole pattern.
    pub matched: bool,
    /// Every parameter bound during the scan. Bindings gathered before a
    /// mismatch are kept even when `matched` is false; callers relying on
    /// partial bindings exist, so this is observable behavior.
    pub params: PathParams,
}

enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str),
}

fn parse_segment(segment: &str) -> Result<Segment<'_>, PatternError> {
    if let Some(inner) = segment.strip_prefix('{') {
        let name = inner
            .strip_suffix('}')
            .ok_or_else(|| PatternError::UnterminatedParam(segment.to_string()))?;
        if name.is_empty() {
            return Err(PatternError::EmptyParam(segment.to_string()));
        }
        if name.contains('{') || name.contains('}') {
            return Err(PatternError::StrayBrace(segment.to_string()));
        }
        if !is_identifier(name) {
            return Err(PatternError::InvalidParamName(segment.to_string()));
        }
        Ok(Segment::Param(name))
    } else if segment.contains('{') {
        // Literals may contain anything except '/' and '{'.
        Err(PatternError::StrayBrace(segment.to_string()))
    } else {
        Ok(Segment::Literal(segment))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a pattern without matching anything against it.
pub fn validate_pattern(pattern: &str) -> Result<(), PatternError> {
    for segment in pattern.split('/') {
        parse_segment(segment)?;
    }
    Ok(())
}

/// Match `path` against `pattern`, binding `{name}` parameters.
///
/// Segments are scanned pairwise up to the shorter count. A parameter binds
/// any non-empty segment; a literal must be byte-equal. The result is
/// matched only when the segment counts are equal and every pair matched,
/// but `params` keeps all bindings gathered during the scan either way.
/// Query strings are not treated specially; a `?...` suffix is just bytes
/// in the final segment.
pub fn parse_path(path: &str, pattern: &str) -> Result<PathMatch, PatternError> {
    validate_pattern(pattern)?;

    let path_segments: Vec<&str> = path.split('/').collect();
    let pattern_segments: Vec<&str> = pattern.split('/').collect();

    let mut matched = path_segments.len() == pattern_segments.len();
    let mut params = PathParams::new();

    for (pattern_segment, path_segment) in pattern_segments.iter().zip(path_segments.iter()) {
        match parse_segment(pattern_segment)? {
            Segment::Param(name) => {
                if path_segment.is_empty() {
                    matched = false;
                } else {
                    params.insert(name.to_string(), (*path_segment).to_string());
                }
            }
            Segment::Literal(literal) => {
                if literal != *path_segment {
                    matched = false;
                }
            }
        }
    }

    Ok(PathMatch { matched, params })
}

/// Whether two patterns could both be satisfied by the same concrete path.
///
/// Deliberately conservative: a parameter against a non-empty literal at the
/// same position is a potential overlap (`/test.html` satisfies both
/// `/{page}` and `/test.html`), so such tables are rejected at install time
/// rather than dispatching nondeterministically. A parameter never overlaps
/// an empty literal, because parameters only bind non-empty segments.
pub fn duplicated_path(a: &str, b: &str) -> Result<bool, PatternError> {
    let a_segments: Vec<&str> = a.split('/').collect();
    let b_segments: Vec<&str> = b.split('/').collect();

    if a_segments.len() != b_segments.len() {
        // Validate anyway so malformed patterns surface regardless of shape.
        validate_pattern(a)?;
        validate_pattern(b)?;
        return Ok(false);
    }

    let mut duplicated = true;
    for (a_segment, b_segment) in a_segments.iter().zip(b_segments.iter()) {
        match (parse_segment(a_segment)?, parse_segment(b_segment)?) {
            (Segment::Param(_), Segment::Param(_)) => {}
            (Segment::Param(_), Segment::Literal(literal))
            | (Segment::Literal(literal), Segment::Param(_)) => {
                if literal.is_empty() {
                    duplicated = false;
                }
            }
            (Segment::Literal(left), Segment::Literal(right)) => {
                if left != right {
                    duplicated = false;
                }
            }
        }
    }

    Ok(duplicated)
}
