use std::collections::BTreeSet;

/// Whether badges carry free-form tags. Decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagSupport {
    Enabled,
    #[default]
    Disabled,
}

impl TagSupport {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Parses tags from form input, returning `None` when tagging is disabled.
    pub fn accept(self, raw: &str) -> Option<Vec<String>> {
        self.is_enabled().then(|| normalize_tags(raw))
    }
}

/// Splits comma separated input into trimmed, lowercased, unique tags.
pub fn normalize_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_dedupes() {
        assert_eq!(
            normalize_tags(" Community, code ,,community,Events "),
            vec!["code", "community", "events"]
        );
    }

    #[test]
    fn disabled_support_ignores_input() {
        assert_eq!(TagSupport::Disabled.accept("a,b"), None);
        assert_eq!(TagSupport::from_flag(true).accept("b,a"), Some(vec!["a".into(), "b".into()]));
    }
}
