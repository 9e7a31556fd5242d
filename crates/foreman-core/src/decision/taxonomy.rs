//! Keyword taxonomy: free-text failure description → situation signature.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Category, Severity, SituationSignature};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taxonomy {
    /// Keywords per category. A category with no entry never matches.
    pub categories: BTreeMap<Category, Vec<String>>,
    pub high_severity: Vec<String>,
    pub low_severity: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for Taxonomy {
    fn default() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            Category::Build,
            words(&["build", "compile", "compiler", "compilation", "linker", "undefined symbol", "xcodebuild"]),
        );
        categories.insert(
            Category::Test,
            words(&["test", "tests", "assertion", "assert", "xctest", "expected"]),
        );
        categories.insert(
            Category::Lint,
            words(&["lint", "swiftlint", "clippy", "format", "formatting", "style", "whitespace"]),
        );
        categories.insert(
            Category::Dependency,
            words(&["dependency", "dependencies", "package", "version conflict", "resolve", "module not found", "npm", "pod"]),
        );

        Self {
            categories,
            high_severity: words(&["critical", "fatal", "panic", "crash", "crashed", "security", "blocker", "data loss"]),
            low_severity: words(&["warning", "deprecated", "minor", "cosmetic", "notice"]),
        }
    }
}

impl Taxonomy {
    /// Category with the most keyword hits; ties go to the earlier category,
    /// no hits at all is `unknown`.
    pub fn category_of(&self, text: &str) -> Category {
        let text = normalize(text);
        let mut best = (Category::Unknown, 0usize);
        for (category, keywords) in &self.categories {
            let hits = keywords.iter().filter(|k| contains_term(&text, k)).count();
            if hits > best.1 {
                best = (*category, hits);
            }
        }
        best.0
    }

    pub fn severity_of(&self, text: &str) -> Severity {
        let text = normalize(text);
        if self.high_severity.iter().any(|k| contains_term(&text, k)) {
            Severity::High
        } else if self.low_severity.iter().any(|k| contains_term(&text, k)) {
            Severity::Low
        } else {
            Severity::Medium
        }
    }

    /// An explicit caller hint wins over keyword-derived severity.
    pub fn classify(&self, text: &str, hint: Option<Severity>) -> SituationSignature {
        let severity = hint.unwrap_or_else(|| self.severity_of(text));
        SituationSignature::new(self.category_of(text), severity)
    }
}

/// Lowercase and collapse every non-alphanumeric run to one space, padded so
/// terms can be matched on word boundaries.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    let mut gap = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
            gap = false;
        } else if !gap {
            out.push(' ');
            gap = true;
        }
    }
    if !gap {
        out.push(' ');
    }
    out
}

fn contains_term(normalized: &str, term: &str) -> bool {
    let term = normalize(term);
    !term.trim().is_empty() && normalized.contains(&term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Build failed: linker command failed", Category::Build)]
    #[case("3 tests failed, assertion `left == right`", Category::Test)]
    #[case("SwiftLint: trailing whitespace", Category::Lint)]
    #[case("npm ERR! version conflict while resolving", Category::Dependency)]
    #[case("Unknown error xyz", Category::Unknown)]
    #[case("contest results", Category::Unknown)]
    fn classifies_category(#[case] text: &str, #[case] expected: Category) {
        assert_eq!(Taxonomy::default().category_of(text), expected);
    }

    #[rstest]
    #[case("FATAL: compiler crashed", Severity::High)]
    #[case("warning: unused variable", Severity::Low)]
    #[case("build failed", Severity::Medium)]
    fn classifies_severity(#[case] text: &str, #[case] expected: Severity) {
        assert_eq!(Taxonomy::default().severity_of(text), expected);
    }

    #[test]
    fn hint_overrides_keywords() {
        let sig = Taxonomy::default().classify("warning: lint style", Some(Severity::High));
        assert_eq!(sig, SituationSignature::new(Category::Lint, Severity::High));
    }
}
