//! Active selection: which collection, and therefore which variants, answer requests.

use super::mock_set::{split_selection, Collection, MockSet, Selection};
use crate::alerts::Alerts;
use crate::logger::Logger;
use std::sync::Arc;

/// Alert id (within the `mock:collections` scope) raised when the selected collection is unusable.
pub(crate) const SELECTED_ALERT: &str = "selected";

/// Immutable view requests resolve against. Replaced wholesale, never mutated.
#[derive(Debug, Clone)]
pub struct MockState {
    mock_set: Arc<MockSet>,
    collection: Option<Arc<Collection>>,
    selections: Vec<Selection>,
    custom: Vec<String>,
}

impl MockState {
    pub fn empty() -> Self {
        Self {
            mock_set: Arc::new(MockSet::empty()),
            collection: None,
            selections: Vec::new(),
            custom: Vec::new(),
        }
    }

    pub fn mock_set(&self) -> &Arc<MockSet> {
        &self.mock_set
    }

    /// Collection actually in use, after fallback.
    pub fn collection(&self) -> Option<&Arc<Collection>> {
        self.collection.as_ref()
    }

    pub fn collection_id(&self) -> Option<&str> {
        self.collection.as_ref().map(|c| c.id())
    }

    /// Effective selections, custom route variants applied.
    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    /// Custom route variants still valid against this mock set.
    pub fn custom_variants(&self) -> &[String] {
        &self.custom
    }
}

/// Compute the state for a mock set and the requested collection.
///
/// An unknown or missing collection falls back to the first declared one and
/// raises a single alert; a valid selection clears it. Custom variants that
/// no longer exist are dropped.
pub(crate) fn compute_state(
    mock_set: Arc<MockSet>,
    requested: Option<&str>,
    custom: &[String],
    alerts: &Alerts,
    logger: &Logger,
) -> MockState {
    let collection = match requested.and_then(|id| mock_set.collection(id)) {
        Some(collection) => {
            alerts.remove(SELECTED_ALERT);
            Some(Arc::clone(collection))
        }
        None => {
            let fallback = mock_set.first_collection().cloned();
            let message = match (requested, &fallback) {
                (_, None) => "No collections found".to_string(),
                (Some(id), Some(first)) => format!(
                    "Collection '{}' was not found in selected collection option. Selecting the first one found: '{}'",
                    id,
                    first.id()
                ),
                (None, Some(first)) => format!(
                    "Option 'mock.collections.selected' was not defined. Selecting the first collection found: '{}'",
                    first.id()
                ),
            };
            if mock_set.version() > 0 {
                alerts.set(SELECTED_ALERT, message, None);
            }
            fallback
        }
    };

    let mut selections: Vec<Selection> = collection
        .as_ref()
        .map(|c| c.selections().to_vec())
        .unwrap_or_default();

    let mut kept = Vec::with_capacity(custom.len());
    for full_id in custom {
        let Some(selection) = mock_set.selection(full_id) else {
            logger.warn(format!(
                "Custom route variant '{}' no longer exists, restoring collection variant",
                full_id
            ));
            continue;
        };
        apply_selection(&mut selections, selection);
        kept.push(full_id.clone());
    }

    logger.debug(format!(
        "Active collection: {}, {} route(s) selected",
        collection.as_ref().map(|c| c.id()).unwrap_or("none"),
        selections.len()
    ));

    MockState {
        mock_set,
        collection,
        selections,
        custom: kept,
    }
}

/// Replace the selection for the same route in place, or append it.
pub(crate) fn apply_selection(selections: &mut Vec<Selection>, selection: Selection) {
    match selections
        .iter_mut()
        .find(|s| s.route.id() == selection.route.id())
    {
        Some(existing) => *existing = selection,
        None => selections.push(selection),
    }
}

/// Keep at most one custom variant per route, last one wins.
pub(crate) fn push_custom(custom: &mut Vec<String>, full_id: &str) {
    let route = split_selection(full_id).map(|(route, _)| route);
    custom.retain(|existing| split_selection(existing).map(|(r, _)| r) != route);
    custom.push(full_id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::definitions::{
        CollectionDefinition, MethodDefinition, MockDefinitions, RouteDefinition, VariantDefinition,
    };
    use crate::mock::handlers::{test_support, HandlerRegistry};
    use serde_json::json;

    fn mock_set() -> Arc<MockSet> {
        let variant = |id: &str| VariantDefinition {
            id: id.to_string(),
            handler_type: "status".to_string(),
            options: json!({"status": 200}),
            delay: None,
        };
        let definitions = MockDefinitions {
            routes: vec![
                RouteDefinition {
                    id: "a".into(),
                    url: "/a".into(),
                    method: MethodDefinition::One("GET".into()),
                    delay: None,
                    variants: vec![variant("one"), variant("two")],
                },
                RouteDefinition {
                    id: "b".into(),
                    url: "/b".into(),
                    method: MethodDefinition::One("GET".into()),
                    delay: None,
                    variants: vec![variant("one")],
                },
            ],
            collections: vec![
                CollectionDefinition {
                    id: "base".into(),
                    from: None,
                    routes: vec!["a:one".into()],
                },
                CollectionDefinition {
                    id: "other".into(),
                    from: None,
                    routes: vec!["a:two".into()],
                },
            ],
        };
        Arc::new(
            MockSet::build(
                definitions,
                &HandlerRegistry::with_builtins(),
                &test_support::core(),
                1,
            )
            .unwrap(),
        )
    }

    fn ids(state: &MockState) -> Vec<String> {
        state.selections().iter().map(Selection::full_id).collect()
    }

    #[test]
    fn test_fallback_raises_single_alert() {
        let alerts = Alerts::new().collection("mock").collection("collections");
        let logger = Logger::new("test");
        let set = mock_set();

        let state = compute_state(Arc::clone(&set), Some("missing"), &[], &alerts, &logger);
        assert_eq!(state.collection_id(), Some("base"));
        let state = compute_state(Arc::clone(&set), Some("missing"), &[], &alerts, &logger);
        assert_eq!(state.collection_id(), Some("base"));
        assert_eq!(alerts.all().len(), 1);
        assert_eq!(
            alerts.get(SELECTED_ALERT).unwrap().id,
            "mock:collections:selected"
        );

        let state = compute_state(set, Some("other"), &[], &alerts, &logger);
        assert_eq!(ids(&state), vec!["a:two"]);
        assert!(alerts.all().is_empty());
    }

    #[test]
    fn test_custom_variants_applied_and_pruned() {
        let alerts = Alerts::new();
        let logger = Logger::new("test");
        let custom = vec!["a:two".to_string(), "b:one".to_string(), "b:gone".to_string()];
        let state = compute_state(mock_set(), Some("base"), &custom, &alerts, &logger);
        assert_eq!(ids(&state), vec!["a:two", "b:one"]);
        assert_eq!(state.custom_variants(), &["a:two".to_string(), "b:one".to_string()]);
    }

    #[test]
    fn test_push_custom_replaces_same_route() {
        let mut custom = vec!["a:one".to_string(), "b:one".to_string()];
        push_custom(&mut custom, "a:two");
        assert_eq!(custom, vec!["b:one", "a:two"]);
    }

    #[test]
    fn test_empty_mock_set_raises_no_alert() {
        let alerts = Alerts::new();
        let state = compute_state(
            Arc::new(MockSet::empty()),
            None,
            &[],
            &alerts,
            &Logger::new("test"),
        );
        assert!(state.collection().is_none());
        assert!(alerts.all().is_empty());
    }
}
