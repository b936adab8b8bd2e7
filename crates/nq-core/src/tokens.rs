//! Token estimation.
//!
//! Uses a chars/4 approximation. Retrieval budgets are compared against these
//! estimates, so the same function must be used for every element of a context.

/// Characters per token in the approximation.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn rounds_up() {
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("éééé"), 1);
    }
}
