//! Building function classification from the set of usage labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use staging::Tags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionCategory {
    #[serde(rename = "Residential")]
    Residential,
    #[serde(rename = "Mixed-residential")]
    MixedResidential,
    #[serde(rename = "Non-residential (single-function)")]
    NonResidentialSingle,
    #[serde(rename = "Non-residential (multi-function)")]
    NonResidentialMulti,
    #[serde(rename = "Others")]
    Others,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl FunctionCategory {
    pub const ALL: [FunctionCategory; 6] = [
        FunctionCategory::Residential,
        FunctionCategory::MixedResidential,
        FunctionCategory::NonResidentialSingle,
        FunctionCategory::NonResidentialMulti,
        FunctionCategory::Others,
        FunctionCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FunctionCategory::Residential => "Residential",
            FunctionCategory::MixedResidential => "Mixed-residential",
            FunctionCategory::NonResidentialSingle => "Non-residential (single-function)",
            FunctionCategory::NonResidentialMulti => "Non-residential (multi-function)",
            FunctionCategory::Others => "Others",
            FunctionCategory::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for FunctionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FunctionCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown function category `{s}`"))
    }
}

/// The two usage labels the decision table singles out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageVocabulary {
    pub residential: String,
    pub other: String,
}

impl Default for UsageVocabulary {
    fn default() -> Self {
        Self {
            residential: "woonfunctie".to_string(),
            other: "overige gebruiksfunctie".to_string(),
        }
    }
}

struct Rule {
    category: FunctionCategory,
    matches: fn(&Tags, &UsageVocabulary) -> bool,
}

// Ordered; the first matching rule decides.
static DECISION_TABLE: [Rule; 5] = [
    Rule {
        category: FunctionCategory::Residential,
        matches: |t, v| t.len() == 1 && t.contains(&v.residential),
    },
    Rule {
        category: FunctionCategory::MixedResidential,
        matches: |t, v| t.len() > 1 && t.contains(&v.residential),
    },
    Rule {
        category: FunctionCategory::NonResidentialSingle,
        matches: |t, v| t.len() == 1 && !t.contains(&v.residential) && !t.contains(&v.other),
    },
    Rule {
        category: FunctionCategory::NonResidentialMulti,
        matches: |t, v| t.len() > 1 && !t.contains(&v.residential),
    },
    Rule {
        category: FunctionCategory::Others,
        matches: |t, v| t.len() == 1 && t.contains(&v.other),
    },
];

/// Classify a building from its usage labels; no labels at all is `Unknown`.
pub fn classify(tags: Option<&Tags>, vocabulary: &UsageVocabulary) -> FunctionCategory {
    let Some(tags) = tags.filter(|t| !t.is_empty()) else {
        return FunctionCategory::Unknown;
    };

    DECISION_TABLE
        .iter()
        .find(|rule| (rule.matches)(tags, vocabulary))
        .map(|rule| rule.category)
        .unwrap_or(FunctionCategory::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(labels: &[&str]) -> Tags {
        labels.iter().map(|s| s.to_string()).collect()
    }

    fn run(labels: &[&str]) -> FunctionCategory {
        classify(Some(&tags(labels)), &UsageVocabulary::default())
    }

    #[test]
    fn decision_table_scenarios() {
        assert_eq!(run(&["woonfunctie"]), FunctionCategory::Residential);
        assert_eq!(
            run(&["woonfunctie", "winkelfunctie"]),
            FunctionCategory::MixedResidential
        );
        assert_eq!(
            run(&["woonfunctie", "overige gebruiksfunctie"]),
            FunctionCategory::MixedResidential
        );
        assert_eq!(run(&["kantoorfunctie"]), FunctionCategory::NonResidentialSingle);
        assert_eq!(
            run(&["kantoorfunctie", "winkelfunctie"]),
            FunctionCategory::NonResidentialMulti
        );
        assert_eq!(
            run(&["kantoorfunctie", "overige gebruiksfunctie"]),
            FunctionCategory::NonResidentialMulti
        );
        assert_eq!(run(&["overige gebruiksfunctie"]), FunctionCategory::Others);
    }

    #[test]
    fn missing_tags_are_unknown() {
        assert_eq!(run(&[]), FunctionCategory::Unknown);
        assert_eq!(
            classify(None, &UsageVocabulary::default()),
            FunctionCategory::Unknown
        );
    }

    #[test]
    fn vocabulary_is_configurable() {
        let vocab = UsageVocabulary {
            residential: "residential".into(),
            other: "other".into(),
        };
        assert_eq!(
            classify(Some(&tags(&["residential"])), &vocab),
            FunctionCategory::Residential
        );
        // The default Dutch label is now just another function.
        assert_eq!(
            classify(Some(&tags(&["woonfunctie"])), &vocab),
            FunctionCategory::NonResidentialSingle
        );
    }

    #[test]
    fn category_names_round_trip() {
        for category in FunctionCategory::ALL {
            assert_eq!(category.as_str().parse::<FunctionCategory>(), Ok(category));
        }
        let json = serde_json::to_string(&FunctionCategory::NonResidentialSingle).unwrap();
        assert_eq!(json, "\"Non-residential (single-function)\"");
    }
}
