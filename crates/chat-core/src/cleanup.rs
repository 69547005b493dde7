//! Idempotent cleanup of accumulated assistant text.
//!
//! `clean` is a pure function of the full text and `clean(clean(x)) ==
//! clean(x)` for every input.

/// Normalizes whitespace and collapses immediately repeated words.
///
/// - `\r\n` becomes `\n`.
/// - Leading indentation of each line is kept verbatim.
/// - Inside a line, runs of whitespace become a single space, including a
///   trailing run (so a following delta still starts a new word).
/// - A word repeated back to back on the same line is kept once.
/// - Whitespace-only lines become empty, and at most one blank line is kept
///   between paragraphs.
pub fn clean(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    let mut previous_blank = false;
    let mut first = true;

    for line in normalized.split('\n') {
        let blank = line.chars().all(char::is_whitespace);
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;

        if !first {
            out.push('\n');
        }
        first = false;

        if !blank {
            clean_line(line, &mut out);
        }
    }
    out
}

fn clean_line(line: &str, out: &mut String) {
    let body_start = line
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    let (indent, body) = line.split_at(body_start);
    out.push_str(indent);

    let mut last: Option<&str> = None;
    for word in body.split_whitespace() {
        if last == Some(word) {
            continue;
        }
        if last.is_some() {
            out.push(' ');
        }
        out.push_str(word);
        last = Some(word);
    }
    if body.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn collapses_repeated_words() {
        assert_eq!(clean("the the cat sat sat sat down"), "the cat sat down");
    }

    #[test]
    fn repetition_is_case_sensitive_and_line_local() {
        assert_eq!(clean("Hello hello"), "Hello hello");
        assert_eq!(clean("done\ndone"), "done\ndone");
    }

    #[test]
    fn normalizes_interior_whitespace() {
        assert_eq!(clean("a  b\t\tc"), "a b c");
        assert_eq!(clean("ends with   "), "ends with ");
    }

    #[test]
    fn keeps_indentation() {
        assert_eq!(clean("fn main() {\n    let  x = 1;\n}"), "fn main() {\n    let x = 1;\n}");
    }

    #[test]
    fn limits_blank_lines() {
        assert_eq!(clean("a\r\n\r\n\r\n\r\nb"), "a\n\nb");
        assert_eq!(clean("a\n\n  \n\nb"), "a\n\nb");
        assert_eq!(clean("a\n \t\nb"), "a\n\nb");
    }

    #[test]
    fn plain_text_is_untouched() {
        for text in ["", "Hello", "Hello world", "line one\nline two\n", "  indented"] {
            assert_eq!(clean(text), text);
        }
    }

    #[test]
    fn streamed_text_does_not_lose_separators() {
        let mut raw = String::new();
        let mut shown = String::new();
        for delta in ["He", "llo", " ", "wor", "ld"] {
            raw.push_str(delta);
            shown = clean(&raw);
        }
        assert_eq!(shown, "Hello world");
    }

    proptest! {
        #[test]
        fn cleaning_is_idempotent(text in "[ab \t\r\n.]{0,40}") {
            let once = clean(&text);
            prop_assert_eq!(clean(&once), once);
        }

        #[test]
        fn cleaning_is_idempotent_for_any_text(text in any::<String>()) {
            let once = clean(&text);
            prop_assert_eq!(clean(&once), once);
        }
    }
}
