//! Named source groups.
//!
//! A profile resolves to the set of sources a search fans out to. Profiles
//! may extend another profile, adding or excluding sources.

use crate::record::SourceTag;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Profile used when none is named.
pub const DEFAULT_PROFILE: &str = "all";

/// A named search profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Base profile to extend (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Sources to search (if not extending)
    #[serde(default)]
    pub sources: Vec<SourceTag>,

    /// Sources to add (when extending)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<SourceTag>,

    /// Sources to exclude (when extending)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<SourceTag>,
}

impl SourceProfile {
    pub fn new(name: impl Into<String>, sources: Vec<SourceTag>) -> Self {
        Self {
            name: name.into(),
            description: None,
            extends: None,
            sources,
            add: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// Get a built-in profile by name.
    pub fn get_builtin(name: &str) -> Option<Self> {
        BUILTIN_PROFILES
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    pub fn list_builtin() -> &'static [SourceProfile] {
        &BUILTIN_PROFILES
    }

    /// Resolve `extends`, `add` and `exclude` into the final source list.
    pub fn effective_sources(&self) -> Vec<SourceTag> {
        self.resolve(0)
    }

    fn resolve(&self, depth: usize) -> Vec<SourceTag> {
        let base = match &self.extends {
            // bounded against cycles
            Some(extends) if depth < 8 => Self::get_builtin(extends)
                .map(|p| p.resolve(depth + 1))
                .unwrap_or_default(),
            Some(_) => Vec::new(),
            None => self.sources.clone(),
        };

        let mut result: Vec<SourceTag> = base
            .into_iter()
            .filter(|s| !self.exclude.contains(s))
            .collect();
        for source in &self.add {
            if !result.contains(source) {
                result.push(*source);
            }
        }
        result
    }

    pub fn has_source(&self, source: SourceTag) -> bool {
        self.effective_sources().contains(&source)
    }
}

static BUILTIN_PROFILES: Lazy<Vec<SourceProfile>> = Lazy::new(|| {
    vec![
        SourceProfile {
            name: "all".to_string(),
            description: Some("Every supported source".to_string()),
            extends: None,
            sources: SourceTag::ALL.to_vec(),
            add: Vec::new(),
            exclude: Vec::new(),
        },
        SourceProfile {
            name: "biomedical".to_string(),
            description: Some("Life-science literature".to_string()),
            extends: None,
            sources: vec![
                SourceTag::PubMed,
                SourceTag::SemanticScholar,
                SourceTag::Crossref,
            ],
            add: Vec::new(),
            exclude: Vec::new(),
        },
        SourceProfile {
            name: "preprints".to_string(),
            description: Some("Preprint servers only".to_string()),
            extends: None,
            sources: vec![SourceTag::Arxiv],
            add: Vec::new(),
            exclude: Vec::new(),
        },
        SourceProfile {
            name: "computing".to_string(),
            description: Some("Computer science and physics".to_string()),
            extends: Some("all".to_string()),
            sources: Vec::new(),
            add: Vec::new(),
            exclude: vec![SourceTag::PubMed],
        },
    ]
});
