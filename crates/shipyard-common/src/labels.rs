//! Labeling convention and label filters.
//!
//! Labels are the contract with the engine: every resource a session
//! creates carries the domain marker and the session id, and every cleanup
//! selects its targets through a [`LabelFilter`].

use std::collections::{BTreeMap, HashMap};

use crate::constants::{DOMAIN_LABEL_KEY, DOMAIN_LABEL_VALUE, SESSION_LABEL_KEY};
use crate::types::{ContainerStatus, SessionId};

/// Returns the labels attached to every resource of the given session.
#[must_use]
pub fn session_labels(session: &SessionId) -> HashMap<String, String> {
    HashMap::from([
        (DOMAIN_LABEL_KEY.to_string(), DOMAIN_LABEL_VALUE.to_string()),
        (SESSION_LABEL_KEY.to_string(), session.to_string()),
    ])
}

/// Selects engine resources by label equality and optional run status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    labels: BTreeMap<String, String>,
    status: Option<ContainerStatus>,
}

impl LabelFilter {
    /// Creates a filter that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches every resource bearing the domain marker, whatever its session.
    #[must_use]
    pub fn domain() -> Self {
        Self::new().with_label(DOMAIN_LABEL_KEY, DOMAIN_LABEL_VALUE)
    }

    /// Matches only resources created by the given session.
    #[must_use]
    pub fn session(session: &SessionId) -> Self {
        Self::domain().with_label(SESSION_LABEL_KEY, session.as_str())
    }

    /// Adds a `key=value` equality predicate.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.labels.insert(key.into(), value.into());
        self
    }

    /// Restricts the filter to containers in the given status.
    #[must_use]
    pub const fn with_status(mut self, status: ContainerStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns the label predicates.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns the status predicate, if any.
    #[must_use]
    pub const fn status(&self) -> Option<ContainerStatus> {
        self.status
    }

    /// Renders the engine's list filter map (`label` and `status` keys).
    #[must_use]
    pub fn to_engine_filters(&self) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        if !self.labels.is_empty() {
            let pairs = self
                .labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let _ = filters.insert("label".to_string(), pairs);
        }
        if let Some(status) = self.status {
            let _ = filters.insert("status".to_string(), vec![status.as_str().to_string()]);
        }
        filters
    }

    /// Evaluates the filter client-side.
    ///
    /// `running` is ignored when the filter has no status predicate.
    #[must_use]
    pub fn matches(&self, labels: &HashMap<String, String>, running: bool) -> bool {
        let labels_match = self
            .labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v));
        let status_match = match self.status {
            None => true,
            Some(ContainerStatus::Running) => running,
            Some(ContainerStatus::Exited) => !running,
        };
        labels_match && status_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_labels_carry_marker_and_id() {
        let id = SessionId::new("s1");
        let labels = session_labels(&id);
        assert_eq!(labels.get(DOMAIN_LABEL_KEY).map(String::as_str), Some(DOMAIN_LABEL_VALUE));
        assert_eq!(labels.get(SESSION_LABEL_KEY).map(String::as_str), Some("s1"));
    }

    #[test]
    fn engine_filters_use_label_and_status_keys() {
        let filter = LabelFilter::session(&SessionId::new("s1")).with_status(ContainerStatus::Running);
        let filters = filter.to_engine_filters();

        let mut labels = filters.get("label").cloned().unwrap();
        labels.sort();
        assert_eq!(
            labels,
            vec![
                "io.shipyard.domain=functional-test".to_string(),
                "io.shipyard.session=s1".to_string(),
            ]
        );
        assert_eq!(filters.get("status"), Some(&vec!["running".to_string()]));
    }

    #[test]
    fn empty_filter_renders_no_keys() {
        assert!(LabelFilter::new().to_engine_filters().is_empty());
    }

    #[test]
    fn session_filter_rejects_other_session() {
        let mine = LabelFilter::session(&SessionId::new("s1"));
        let other = session_labels(&SessionId::new("s2"));
        assert!(!mine.matches(&other, true));
        assert!(LabelFilter::domain().matches(&other, true));
    }

    #[test]
    fn status_predicate_is_applied() {
        let labels = session_labels(&SessionId::new("s1"));
        let running = LabelFilter::domain().with_status(ContainerStatus::Running);
        let exited = LabelFilter::domain().with_status(ContainerStatus::Exited);
        assert!(running.matches(&labels, true));
        assert!(!running.matches(&labels, false));
        assert!(exited.matches(&labels, false));
        assert!(LabelFilter::domain().matches(&labels, false));
    }
}
