//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps verifier output and reports bounded and readable while preserving signal.

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Keep the last `max_chars` characters of captured process output.
///
/// Test runners print the interesting part (the failure summary) last.
pub fn tail_chars(input: &str, max_chars: usize) -> String {
    let count = input.chars().count();
    if count <= max_chars {
        return input.to_string();
    }
    let tail: String = input.chars().skip(count - max_chars).collect();
    format!("...{}", tail)
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_line_truncates() {
        assert_eq!(compact_line("a  b\nc", 10), "a b c");
        assert_eq!(compact_line("abcdef", 3), "abc...");
    }

    #[test]
    fn tail_chars_keeps_end() {
        assert_eq!(tail_chars("short", 10), "short");
        assert_eq!(tail_chars("0123456789", 4), "...6789");
    }

    #[test]
    fn preview_messages_counts_overflow() {
        let msgs = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        assert_eq!(preview_messages(&msgs, 2, 20), "one | two (+1 more)");
        assert_eq!(preview_messages(&[], 2, 20), "");
    }
}
