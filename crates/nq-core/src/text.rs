//! UTF-8 safe truncation for text embedded in prompts and logs.

/// Keep at most `max_chars` characters of `s`, appending `suffix` when cut.
///
/// The suffix counts toward `max_chars`.
pub fn truncate_chars(s: &str, max_chars: usize, suffix: &str) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let keep = max_chars.saturating_sub(suffix.chars().count());
    let end = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
    format!("{}{suffix}", &s[..end])
}

/// Collapse runs of whitespace (including newlines) to single spaces.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
