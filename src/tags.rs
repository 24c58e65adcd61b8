//! Tag sets and include/exclude filter semantics.
//!
//! A tag string is a whitespace-separated list of case-sensitive tokens.
//! Filter expressions use the same format and come in three flavours:
//! absent (`None`, no filter), empty (normalizes to `""`) and non-empty.
//! An empty include selects nothing while an empty exclude excludes nothing.

use std::collections::BTreeSet;

/// Trim and collapse every whitespace run to a single space.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a normalized tag string into its token set.
pub fn tokens(normalized: &str) -> BTreeSet<String> {
    normalized
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalized tag string of a test case together with its token set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    normalized: String,
    set: BTreeSet<String>,
}

impl TagSet {
    /// `None` and whitespace-only input both mean "no tags".
    pub fn parse(raw: Option<&str>) -> Self {
        let normalized = raw.map(normalize).unwrap_or_default();
        let set = tokens(&normalized);
        Self { normalized, set }
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.set.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.set.iter().map(String::as_str)
    }

    fn intersects(&self, other: &BTreeSet<String>) -> bool {
        other.iter().any(|t| self.set.contains(t))
    }
}

/// `None` passes everything; an empty expression passes nothing.
pub fn matches_include(case_tags: &TagSet, include: Option<&str>) -> bool {
    match include {
        None => true,
        Some(expr) => case_tags.intersects(&tokens(&normalize(expr))),
    }
}

/// Returns true when the case should be excluded.
pub fn matches_exclude(case_tags: &TagSet, exclude: Option<&str>) -> bool {
    match exclude {
        None => false,
        Some(expr) => case_tags.intersects(&tokens(&normalize(expr))),
    }
}

pub fn should_run(case_tags: &TagSet, include: Option<&str>, exclude: Option<&str>) -> bool {
    matches_include(case_tags, include) && !matches_exclude(case_tags, exclude)
}

/// Include/exclude pair tokenized once for a whole run.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    include: Option<BTreeSet<String>>,
    exclude: Option<BTreeSet<String>>,
}

impl TagFilter {
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Self {
        Self {
            include: include.map(|e| tokens(&normalize(e))),
            exclude: exclude.map(|e| tokens(&normalize(e))),
        }
    }

    pub fn should_run(&self, case_tags: &TagSet) -> bool {
        let included = self
            .include
            .as_ref()
            .is_none_or(|inc| case_tags.intersects(inc));
        let excluded = self
            .exclude
            .as_ref()
            .is_some_and(|exc| case_tags.intersects(exc));
        included && !excluded
    }
}

/// Copy `normalized` into `buf` as a NUL-terminated byte string.
///
/// At most `buf.len() - 1` bytes are copied and nothing is written when `buf`
/// is empty. The return value is always the full length of `normalized`, so a
/// result `>= buf.len()` means the copy was truncated.
pub fn copy_to_buffer(normalized: &str, buf: &mut [u8]) -> usize {
    let bytes = normalized.as_bytes();
    if let Some(room) = buf.len().checked_sub(1) {
        let n = bytes.len().min(room);
        buf[..n].copy_from_slice(&bytes[..n]);
        buf[n] = 0;
    }
    bytes.len()
}
