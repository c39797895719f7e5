//! Process-wide alerts.
//!
//! An alert reports a non-fatal condition (invalid selected collection,
//! rejected reload, deprecated option) until the component that raised it
//! removes it. Components receive a scoped view created with
//! [`Alerts::collection`]; ids are prefixed with the scope path.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Full id, e.g. `mock:collections:selected`.
    pub id: String,
    /// Scope that raised the alert, e.g. `mock:collections`.
    pub origin: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Scoped handle to the shared alert list.
#[derive(Debug, Clone, Default)]
pub struct Alerts {
    scope: String,
    store: Arc<RwLock<Vec<Alert>>>,
}

impl Alerts {
    /// Root alert store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope sharing the same store.
    pub fn collection(&self, name: &str) -> Alerts {
        Alerts {
            scope: self.full_id(name),
            store: Arc::clone(&self.store),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn full_id(&self, id: &str) -> String {
        if self.scope.is_empty() {
            id.to_string()
        } else {
            format!("{}:{}", self.scope, id)
        }
    }

    /// Add or replace an alert.
    pub fn set(&self, id: &str, message: impl Into<String>, error: Option<String>) {
        let alert = Alert {
            id: self.full_id(id),
            origin: self.scope.clone(),
            message: message.into(),
            error,
        };
        warn!("Alert '{}': {}", alert.id, alert.message);

        let mut store = self.store.write();
        match store.iter_mut().find(|existing| existing.id == alert.id) {
            Some(existing) => *existing = alert,
            None => store.push(alert),
        }
    }

    pub fn remove(&self, id: &str) {
        let full_id = self.full_id(id);
        let mut store = self.store.write();
        let before = store.len();
        store.retain(|alert| alert.id != full_id);
        if store.len() != before {
            debug!("Alert '{}' removed", full_id);
        }
    }

    /// Remove every alert raised within this scope (including child scopes).
    pub fn clean(&self) {
        let prefix = format!("{}:", self.scope);
        self.store
            .write()
            .retain(|alert| !(alert.origin == self.scope || alert.origin.starts_with(&prefix)));
    }

    /// Alerts raised within this scope (including child scopes), in insertion order.
    pub fn all(&self) -> Vec<Alert> {
        let prefix = format!("{}:", self.scope);
        self.store
            .read()
            .iter()
            .filter(|alert| {
                self.scope.is_empty()
                    || alert.origin == self.scope
                    || alert.origin.starts_with(&prefix)
            })
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Alert> {
        let full_id = self.full_id(id);
        self.store
            .read()
            .iter()
            .find(|alert| alert.id == full_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_alert_with_same_id() {
        let alerts = Alerts::new();
        let mock = alerts.collection("mock");
        mock.set("selected", "first", None);
        mock.set("selected", "second", None);

        let all = alerts.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "mock:selected");
        assert_eq!(all[0].origin, "mock");
        assert_eq!(all[0].message, "second");
    }

    #[test]
    fn test_scoped_views_and_clean() {
        let alerts = Alerts::new();
        let mock = alerts.collection("mock");
        let validation = mock.collection("validation");
        let config = alerts.collection("config");

        mock.set("selected", "invalid selection", None);
        validation.set("0", "duplicated route", Some("route 'a'".into()));
        config.set("deprecated", "legacy option", None);

        assert_eq!(mock.all().len(), 2);
        assert_eq!(validation.all().len(), 1);
        assert_eq!(alerts.all().len(), 3);

        validation.clean();
        assert_eq!(mock.all().len(), 1);
        assert!(validation.get("0").is_none());

        mock.remove("selected");
        assert!(mock.all().is_empty());
        assert_eq!(alerts.all().len(), 1);
    }
}
