//! Offset-safe text helpers shared by detectors, the reconciler and the
//! renderer.
//!
//! All offsets in this crate are UTF-8 byte offsets into the canonical
//! document text. Every range handed between components must start and end
//! on a char boundary so that `&text[start..end]` can never panic.

/// Line and column position (1-indexed for editor compatibility)
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LineCol {
    pub line: usize,
    pub col: usize,
}

/// Check that `start..end` is a non-empty range inside `text` on char boundaries.
pub fn is_valid_range(text: &str, start: usize, end: usize) -> bool {
    start < end && end <= text.len() && text.is_char_boundary(start) && text.is_char_boundary(end)
}

/// Find all exact matches of `needle` in `haystack`
///
/// Returns all (start, end) byte offset pairs, non-overlapping, left to right.
pub fn find_exact_matches(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    haystack
        .match_indices(needle)
        .map(|(start, m)| (start, start + m.len()))
        .collect()
}

/// Exact matches of `needle` that are not part of a longer word.
///
/// A match is kept only when the characters on both sides are not
/// alphanumeric, so "Ann" is found in "Ann och" but not in "Annika".
pub fn find_word_matches(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    find_exact_matches(haystack, needle)
        .into_iter()
        .filter(|&(start, end)| {
            let before = haystack[..start].chars().next_back();
            let after = haystack[end..].chars().next();
            !before.map_or(false, char::is_alphanumeric)
                && !after.map_or(false, char::is_alphanumeric)
        })
        .collect()
}

/// Normalize whitespace: collapse runs of whitespace to single space, trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fold the diacritics that occur in Nordic and common European names.
///
/// Lowercases as a side effect. Characters without a mapping pass through.
pub fn fold_diacritics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'å' | 'ä' | 'á' | 'à' | 'â' | 'ã' => out.push('a'),
            'ö' | 'ø' | 'ó' | 'ò' | 'ô' | 'õ' => out.push('o'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'ü' | 'ú' | 'ù' | 'û' => out.push('u'),
            'í' | 'ì' | 'î' | 'ï' => out.push('i'),
            'ñ' => out.push('n'),
            'ç' => out.push('c'),
            'ý' | 'ÿ' => out.push('y'),
            'æ' => out.push_str("ae"),
            'ß' => out.push_str("ss"),
            other => out.push(other),
        }
    }
    out
}

/// Convert a character offset into a byte offset.
///
/// Returns `None` when the offset lies past the end of the text. An offset
/// equal to the character count maps to `text.len()`.
pub fn char_to_byte_offset(text: &str, char_offset: usize) -> Option<usize> {
    if char_offset == 0 {
        return Some(0);
    }
    let mut seen = 0;
    for (byte_idx, _) in text.char_indices() {
        if seen == char_offset {
            return Some(byte_idx);
        }
        seen += 1;
    }
    (seen == char_offset).then_some(text.len())
}

/// Convert byte offset to line/column position
///
/// Column is the number of characters (not bytes) from the line start.
pub fn offset_to_line_col(text: &str, offset: usize) -> LineCol {
    let mut offset = offset.min(text.len());
    while offset > 0 && !text.is_char_boundary(offset) {
        offset -= 1;
    }
    let prefix = &text[..offset];

    let line = prefix.matches('\n').count() + 1;
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let col = text[line_start..offset].chars().count() + 1;

    LineCol { line, col }
}

/// Count the ASCII digits in `text`.
pub fn digit_count(text: &str) -> usize {
    text.bytes().filter(u8::is_ascii_digit).count()
}
