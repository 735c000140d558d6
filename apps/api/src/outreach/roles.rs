use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed set of fields the resolver extracts from a contact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticRole {
    FirstName,
    Company,
    Title,
    Industry,
    City,
    State,
    Country,
}

impl SemanticRole {
    pub const ALL: [SemanticRole; 7] = [
        SemanticRole::FirstName,
        SemanticRole::Company,
        SemanticRole::Title,
        SemanticRole::Industry,
        SemanticRole::City,
        SemanticRole::State,
        SemanticRole::Country,
    ];

    /// Human-readable name used in skip markers.
    pub fn label(self) -> &'static str {
        match self {
            SemanticRole::FirstName => "first name",
            SemanticRole::Company => "company",
            SemanticRole::Title => "title",
            SemanticRole::Industry => "industry",
            SemanticRole::City => "city",
            SemanticRole::State => "state",
            SemanticRole::Country => "country",
        }
    }

    /// Substrings that claim a lower-cased column name for this role.
    /// `FirstName` is absent: it has its own two-tier rule in the resolver.
    pub(crate) fn keywords(self) -> &'static [&'static str] {
        match self {
            SemanticRole::FirstName => &[],
            SemanticRole::Company => &["company"],
            SemanticRole::Title => &["title", "job"],
            SemanticRole::Industry => &["industry"],
            SemanticRole::City => &["city"],
            SemanticRole::State => &["state"],
            SemanticRole::Country => &["country"],
        }
    }
}

impl fmt::Display for SemanticRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
