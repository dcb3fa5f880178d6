//! Filename-suffix matching for manifests and lockfiles.

use crate::model::Ecosystem;

/// Accepts file references whose final path segment ends with one of a set
/// of suffixes, compared case-insensitively.
#[derive(Debug, Clone)]
pub struct NameFilter {
    suffixes: Vec<String>,
}

impl NameFilter {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.as_ref().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn for_ecosystem(ecosystem: Ecosystem) -> Self {
        Self::new(ecosystem.file_names())
    }

    /// `reference` may be a bare name, a path, or a full URL; only the last
    /// segment (without query or fragment) is compared.
    pub fn matches(&self, reference: &str) -> bool {
        let without_query = reference.split(['?', '#']).next().unwrap_or_default();
        let file_name = without_query
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        !file_name.is_empty() && self.suffixes.iter().any(|s| file_name.ends_with(s.as_str()))
    }

    pub fn apply(&self, references: Vec<String>) -> Vec<String> {
        references.into_iter().filter(|r| self.matches(r)).collect()
    }
}
