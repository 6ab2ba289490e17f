/// Number of leading words used for an automatic title.
pub const TITLE_WORDS: usize = 5;
/// Longest automatic title before it is cut and suffixed with [`ELLIPSIS`].
pub const TITLE_MAX_CHARS: usize = 30;
pub const ELLIPSIS: &str = "...";

/// Derives a conversation title from the first user message: its first five
/// words joined by single spaces, cut to 30 characters plus an ellipsis when
/// longer. Returns `None` for blank content.
pub fn generate_title(content: &str) -> Option<String> {
    let words: Vec<&str> = content.split_whitespace().take(TITLE_WORDS).collect();
    if words.is_empty() {
        return None;
    }
    let joined = words.join(" ");
    if joined.chars().count() > TITLE_MAX_CHARS {
        let cut: String = joined.chars().take(TITLE_MAX_CHARS).collect();
        Some(format!("{cut}{ELLIPSIS}"))
    } else {
        Some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_five_words() {
        assert_eq!(
            generate_title("The quick brown fox jumps over").as_deref(),
            Some("The quick brown fox jumps")
        );
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(
            generate_title("  hello \n\t world  ").as_deref(),
            Some("hello world")
        );
    }

    #[test]
    fn truncates_long_titles_to_thirty_chars() {
        let title = generate_title("aaaaaaaaaa bbbbbbbbbb cccccccccc").unwrap();
        assert_eq!(title, "aaaaaaaaaa bbbbbbbbbb cccccccc...");
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + ELLIPSIS.len());
    }

    #[test]
    fn exactly_thirty_chars_is_not_truncated() {
        let thirty = "aaaaaaaaaa bbbbbbbbbb cccccccc";
        assert_eq!(generate_title(thirty).as_deref(), Some(thirty));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let content = "é".repeat(31);
        let title = generate_title(&content).unwrap();
        assert!(title.ends_with(ELLIPSIS));
        assert_eq!(title.chars().count(), 33);
    }

    #[test]
    fn blank_content_has_no_title() {
        assert!(generate_title("   ").is_none());
        assert!(generate_title("").is_none());
    }
}
