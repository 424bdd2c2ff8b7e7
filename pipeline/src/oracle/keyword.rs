//! Deterministic keyword classifier.

use triage_core::oracle::{Oracle, OracleFuture};

/// Problem class assigned by [`KeywordOracle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Mentions a database.
    Database,
    /// Mentions a disk.
    DiskSpace,
    /// Anything else.
    Other,
}

impl Category {
    /// Classify a problem description. Database wins over disk when both match.
    #[must_use]
    pub fn classify(payload: &str) -> Self {
        let text = payload.to_lowercase();
        let mentions = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

        if mentions(&["database", "баз"]) {
            Self::Database
        } else if mentions(&["disk", "диск"]) {
            Self::DiskSpace
        } else {
            Self::Other
        }
    }

    /// Diagnosis text published for this category.
    #[must_use]
    pub const fn diagnosis(self) -> &'static str {
        match self {
            Self::Database => "Problem classified as database-related.",
            Self::DiskSpace => "Problem classified as disk-space-related.",
            Self::Other => "General problem, manual review required.",
        }
    }
}

/// Oracle that classifies by substring match; never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordOracle;

impl KeywordOracle {
    /// Create the classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Oracle for KeywordOracle {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn analyze<'a>(&'a self, payload: &'a str) -> OracleFuture<'a> {
        let category = Category::classify(payload);
        tracing::debug!(?category, "Classified payload");
        Box::pin(async move { Ok(category.diagnosis().to_string()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn database_mentions_are_database() {
        assert_eq!(Category::classify("Database connection refused"), Category::Database);
        assert_eq!(Category::classify("Ошибка подключения к базе"), Category::Database);
    }

    #[test]
    fn disk_mentions_are_disk_space() {
        assert_eq!(Category::classify("disk full on db1"), Category::DiskSpace);
        assert_eq!(Category::classify("ДИСК переполнен"), Category::DiskSpace);
    }

    #[test]
    fn database_takes_precedence_over_disk() {
        assert_eq!(
            Category::classify("database disk quota exceeded"),
            Category::Database
        );
    }

    #[test]
    fn everything_else_is_other() {
        assert_eq!(Category::classify("cpu at 100%"), Category::Other);
        assert_eq!(Category::classify(""), Category::Other);
    }

    #[tokio::test]
    async fn analyze_returns_category_diagnosis() {
        let oracle = KeywordOracle::new();
        assert_eq!(
            oracle.analyze("disk full on db1").await.unwrap(),
            Category::DiskSpace.diagnosis()
        );
        assert_eq!(
            oracle.analyze("high latency").await.unwrap(),
            Category::Other.diagnosis()
        );
    }

    fn recase(word: &str, upper: &[bool]) -> String {
        word.chars()
            .zip(upper.iter().cycle())
            .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
            .collect()
    }

    proptest! {
        #[test]
        fn database_anywhere_in_any_case_is_database(
            prefix in "[ -~]{0,30}",
            suffix in "[ -~]{0,30}",
            upper in proptest::collection::vec(any::<bool>(), 1..8),
        ) {
            let payload = format!("{prefix}{}{suffix}", recase("database", &upper));
            prop_assert_eq!(Category::classify(&payload), Category::Database);
        }

        #[test]
        fn text_without_keywords_is_other(payload in "[ac-hj-z0-9 ]{0,60}") {
            prop_assert_eq!(Category::classify(&payload), Category::Other);
        }
    }
}
