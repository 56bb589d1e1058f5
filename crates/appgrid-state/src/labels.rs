//! Equality-based label selectors.
//!
//! Only the `key=value[,key=value...]` form is supported; it is the sole
//! discovery mechanism the controller uses to find a resource's pods.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// A conjunction of `key=value` requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    /// Selector with a single `key=value` requirement.
    pub fn single(key: &str, value: &str) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.to_string(), value.to_string());
        Self { match_labels }
    }

    /// True if every requirement is present in `labels`. An empty selector
    /// matches everything.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

impl FromStr for LabelSelector {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut match_labels = BTreeMap::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = part
                .split_once('=')
                .ok_or_else(|| StateError::Invalid(format!("bad selector term: {part}")))?;
            let k = k.trim();
            if k.is_empty() {
                return Err(StateError::Invalid(format!("empty label key in: {part}")));
            }
            match_labels.insert(k.to_string(), v.trim().to_string());
        }
        Ok(Self { match_labels })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.match_labels {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn eq_selector_matches_exact_value() {
        let sel = LabelSelector::single("app", "web");
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "x")])));
        assert!(!sel.matches(&labels(&[("app", "web2")])));
        assert!(!sel.matches(&labels(&[])));
    }

    #[test]
    fn empty_selector_matches_all() {
        assert!(LabelSelector::default().matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn parse_and_display() {
        let sel: LabelSelector = "app=web, tier=frontend".parse().unwrap();
        assert_eq!(sel.match_labels.len(), 2);
        assert_eq!(sel.to_string(), "app=web,tier=frontend");
    }

    #[test]
    fn parse_rejects_terms_without_equals() {
        assert!("app".parse::<LabelSelector>().is_err());
        assert!("=web".parse::<LabelSelector>().is_err());
    }
}
