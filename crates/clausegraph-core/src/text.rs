use once_cell::sync::Lazy;
use regex::Regex;

static REPEATED_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("valid regex"));
static REPEATED_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").expect("valid regex"));

/// Normalize raw clause text before it is embedded or stored.
pub fn clean_clause_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.replace('\r', "\n");
    let text = REPEATED_NEWLINES.replace_all(&text, "\n");
    let text = REPEATED_SPACES.replace_all(&text, " ");
    let text = text.replace(['\u{2013}', '\u{2014}'], "-");

    text.trim().to_string()
}

/// Single-line form used for the persisted node table.
pub fn single_line(text: &str) -> String {
    clean_clause_text(text).replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_dashes() {
        let raw = "  Fees\r\n\n\nare   due \u{2014} within 30 days  ";
        assert_eq!(clean_clause_text(raw), "Fees\nare due - within 30 days");
    }

    #[test]
    fn single_line_drops_newlines() {
        assert_eq!(single_line("a\n\nb"), "a b");
        assert_eq!(single_line(""), "");
    }
}
