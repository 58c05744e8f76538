//! Derive section boundaries when the caller supplies none.
//!
//! Paragraphs are separated by blank lines and packed greedily up to
//! `max_bytes`. A paragraph that is too long on its own is split at sentence
//! ends, and a sentence that is still too long at whitespace.

use crate::domain::SectionBoundary;

/// Split `text` into section boundaries of at most `max_bytes` each
/// (a single word longer than `max_bytes` is kept whole).
pub fn split_sections(text: &str, max_bytes: usize) -> Vec<SectionBoundary> {
    let max_bytes = max_bytes.max(1);
    let mut pieces = Vec::new();
    for (start, end) in paragraphs(text) {
        if end - start <= max_bytes {
            pieces.push((start, end));
        } else {
            split_long(text, start, end, max_bytes, &mut pieces);
        }
    }

    let mut sections: Vec<SectionBoundary> = Vec::new();
    for (start, end) in pieces {
        match sections.last_mut() {
            Some(last) if end - last.start <= max_bytes => last.end = end,
            _ => sections.push(SectionBoundary { start, end }),
        }
    }
    sections
}

/// Non-blank paragraph ranges, trimmed of surrounding whitespace
fn paragraphs(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut search = 0;

    while let Some(pos) = text[search..].find('\n') {
        let newline = search + pos;
        let after = &text[newline + 1..];
        let blank_len = after.len() - after.trim_start_matches([' ', '\t', '\r']).len();
        if after[blank_len..].starts_with('\n') {
            push_trimmed(text, start, newline, &mut ranges);
            let gap_end = newline + 1 + (after.len() - after.trim_start().len());
            start = gap_end;
            search = gap_end;
        } else {
            search = newline + 1;
        }
    }
    push_trimmed(text, start, text.len(), &mut ranges);
    ranges
}

fn push_trimmed(text: &str, start: usize, end: usize, ranges: &mut Vec<(usize, usize)>) {
    if start >= end {
        return;
    }
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead + trail < slice.len() {
        ranges.push((start + lead, end - trail));
    }
}

/// Split an oversize range at sentence ends, then at whitespace.
fn split_long(
    text: &str,
    start: usize,
    end: usize,
    max_bytes: usize,
    out: &mut Vec<(usize, usize)>,
) {
    let mut sentences = Vec::new();
    let mut sentence_start = start;
    let slice = &text[start..end];
    for (i, c) in slice.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let next = start + i + c.len_utf8();
            let followed_by_space = text[next..end].starts_with(char::is_whitespace);
            if followed_by_space {
                sentences.push((sentence_start, next));
                sentence_start = next;
            }
        }
    }
    sentences.push((sentence_start, end));

    let mut current: Option<(usize, usize)> = None;
    for (s, e) in sentences {
        let (s, e) = trim_range(text, s, e);
        if s >= e {
            continue;
        }
        if e - s > max_bytes {
            if let Some(range) = current.take() {
                out.push(range);
            }
            split_at_whitespace(text, s, e, max_bytes, out);
            continue;
        }
        current = match current {
            Some((cs, _)) if e - cs <= max_bytes => Some((cs, e)),
            Some(range) => {
                out.push(range);
                Some((s, e))
            }
            None => Some((s, e)),
        };
    }
    if let Some(range) = current {
        out.push(range);
    }
}

fn trim_range(text: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead + trail >= slice.len() {
        return (start, start);
    }
    (start + lead, end - trail)
}

fn split_at_whitespace(
    text: &str,
    start: usize,
    end: usize,
    max_bytes: usize,
    out: &mut Vec<(usize, usize)>,
) {
    let mut s = start;
    while s < end {
        if end - s <= max_bytes {
            out.push((s, end));
            return;
        }
        let rest = &text[s..end];
        let cut = rest
            .char_indices()
            .take_while(|(i, _)| *i <= max_bytes)
            .filter(|(i, c)| *i > 0 && c.is_whitespace())
            .last()
            .map(|(i, _)| s + i)
            // One long word: run to the next whitespace
            .or_else(|| rest.find(char::is_whitespace).filter(|&i| i > 0).map(|i| s + i))
            .unwrap_or(end);
        out.push((s, cut));

        let tail = &text[cut..end];
        s = cut + (tail.len() - tail.trim_start().len());
    }
}
