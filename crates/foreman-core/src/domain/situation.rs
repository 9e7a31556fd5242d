//! Situation signatures: the normalized `(category, severity)` key that
//! historical outcomes are filed under.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ForemanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Build,
    Test,
    Lint,
    Dependency,
    Unknown,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Build,
        Category::Test,
        Category::Lint,
        Category::Dependency,
        Category::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Build => "build",
            Category::Test => "test",
            Category::Lint => "lint",
            Category::Dependency => "dependency",
            Category::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ForemanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ForemanError::InvalidArgument {
                field: "category",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ForemanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            _ => Err(ForemanError::InvalidArgument {
                field: "severity",
                value: s.to_string(),
            }),
        }
    }
}

/// Rendered as `category:severity` both on the wire and as a map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SituationSignature {
    pub category: Category,
    pub severity: Severity,
}

impl SituationSignature {
    pub fn new(category: Category, severity: Severity) -> Self {
        Self { category, severity }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SituationSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.severity)
    }
}

impl FromStr for SituationSignature {
    type Err = ForemanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ForemanError::InvalidSignature(s.to_string());
        let (category, severity) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            category: category.parse().map_err(|_| invalid())?,
            severity: severity.parse().map_err(|_| invalid())?,
        })
    }
}

impl From<SituationSignature> for String {
    fn from(sig: SituationSignature) -> Self {
        sig.to_string()
    }
}

impl TryFrom<String> for SituationSignature {
    type Error = ForemanError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}
