use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SEPARATOR_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());

/// Derives a URL slug from free text.
///
/// Text is decomposed (NFKD) and reduced to ASCII, characters that are not
/// word characters, whitespace or hyphens are dropped, the result is trimmed
/// and lowercased, and runs of whitespace/hyphens collapse into one hyphen.
pub fn slugify(value: &str) -> String {
    let ascii: String = value.nfkd().filter(char::is_ascii).collect();
    let cleaned = NON_WORD.replace_all(&ascii, "");
    let lowered = cleaned.trim().to_ascii_lowercase();
    SEPARATOR_RUNS.replace_all(&lowered, "-").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenates_title() {
        assert_eq!(slugify("Team Player"), "team-player");
    }

    #[test]
    fn drops_punctuation_and_collapses_separators() {
        assert_eq!(slugify("Rock & Roll"), "rock-roll");
        assert_eq!(slugify("  Early   Bird -- 2024! "), "early-bird-2024");
    }

    #[test]
    fn folds_accents_to_ascii() {
        assert_eq!(slugify("Café Crew"), "cafe-crew");
    }

    #[test]
    fn keeps_underscores() {
        assert_eq!(slugify("bug_hunter"), "bug_hunter");
    }
}
