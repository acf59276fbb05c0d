//! Character-safe truncation for logs echoed back to users and prompts.

/// Last `max_chars` characters of `s`
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

/// First `max_chars` characters of `s`
pub fn head_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_strings() {
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("abcdef", 2), "ef");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(tail_chars("ééé", 2), "éé");
        assert_eq!(head_chars("ééé", 1), "é");
        assert_eq!(head_chars("ab", 5), "ab");
    }
}
