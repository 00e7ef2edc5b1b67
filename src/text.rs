/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Splits a complete answer into delta-sized pieces on whitespace boundaries.
///
/// Every byte of `text` lands in exactly one piece, in order, so joining the
/// pieces reproduces the input. A single word longer than `target_chars` is
/// never split.
pub fn chunk_for_deltas(text: &str, target_chars: usize) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let target = target_chars.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut chars_in_chunk = 0;

    for (idx, ch) in text.char_indices() {
        chars_in_chunk += 1;
        if ch.is_whitespace() && chars_in_chunk >= target {
            let end = idx + ch.len_utf8();
            chunks.push(&text[start..end]);
            start = end;
            chars_in_chunk = 0;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

const TITLE_QUOTES: &[char] = &['"', '\'', '`', '\u{201C}', '\u{201D}', '\u{2018}', '\u{2019}', '*'];

/// Normalizes a model-produced title: first line only, surrounding quote
/// characters removed, a leading "Title:" label dropped.
pub fn clean_title(raw: &str) -> Option<String> {
    let first_line = raw.trim().lines().next()?.trim();
    let without_label = match first_line.split_once(':') {
        Some((label, rest)) if label.trim().eq_ignore_ascii_case("title") => rest.trim(),
        _ => first_line,
    };
    let is_wrapper = |c: char| TITLE_QUOTES.contains(&c) || c.is_whitespace();
    let stripped = without_label
        .trim_matches(is_wrapper)
        .trim_end_matches('.')
        .trim_matches(is_wrapper);

    if stripped.is_empty() {
        return None;
    }
    Some(prefix_chars(stripped, 80).to_string())
}

/// True when `needle` occurs in `haystack` as a whole word or phrase. A
/// trailing plural "s" on the matched phrase is tolerated.
///
/// Both inputs are expected to be lowercase already.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut search_from = 0;
    while let Some(pos) = haystack[search_from..].find(needle) {
        let start = search_from + pos;
        let end = start + needle.len();

        let boundary_before = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let rest = &haystack[end..];
        let rest = rest.strip_prefix('s').unwrap_or(rest);
        let boundary_after = rest.chars().next().is_none_or(|c| !c.is_alphanumeric());

        if boundary_before && boundary_after {
            return true;
        }
        // Advance past the first character of this occurrence.
        search_from = start
            + haystack[start..]
                .chars()
                .next()
                .map(|c| c.len_utf8())
                .unwrap_or(1);
    }
    false
}
