//! Request resolution: selected route lookup, delay, handler dispatch.

use super::error::MockError;
use super::handlers::{HandlerContext, MockRequest, MockResponse};
use super::mock_set::Selection;
use super::state::MockState;
use crate::alerts::Alerts;
use crate::config::{ConfigEngine, ConfigOption};
use crate::logger::Logger;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The selection answering a request and the parameters its URL pattern captured.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub selection: Selection,
    pub params: BTreeMap<String, String>,
}

impl Resolution {
    /// Delay to apply: variant, then route, then the global value.
    pub fn delay(&self, global: u64) -> Duration {
        let millis = self
            .selection
            .variant
            .delay()
            .or(self.selection.route.delay())
            .unwrap_or(global);
        Duration::from_millis(millis)
    }
}

/// First selected route, in selection order, answering `method` at `path`.
pub fn resolve(state: &MockState, method: &str, path: &str) -> Result<Resolution, MockError> {
    state
        .selections()
        .iter()
        .filter(|selection| selection.route.methods().allows(method))
        .find_map(|selection| {
            selection
                .route
                .pattern()
                .captures(path)
                .map(|params| Resolution {
                    selection: selection.clone(),
                    params,
                })
        })
        .ok_or_else(|| MockError::RouteNotFound {
            method: method.to_string(),
            path: path.to_string(),
        })
}

pub(crate) struct Resolver {
    config: Arc<ConfigEngine>,
    delay: ConfigOption,
    alerts: Alerts,
    logger: Logger,
}

impl Resolver {
    pub(crate) fn new(config: Arc<ConfigEngine>, delay: ConfigOption, alerts: Alerts, logger: Logger) -> Self {
        Self {
            config,
            delay,
            alerts,
            logger,
        }
    }

    /// Resolve against the captured state and run the selected variant's handler.
    ///
    /// The state is captured by the caller, so a reload that publishes while
    /// this request is delayed does not affect it.
    pub(crate) async fn dispatch(
        &self,
        state: Arc<MockState>,
        mut request: MockRequest,
    ) -> Result<MockResponse, MockError> {
        let resolution = resolve(&state, &request.method, &request.path)?;
        let request_id = Uuid::new_v4().to_string();
        let variant = &resolution.selection.variant;
        self.logger.verbose(format!(
            "Request {} {} => {} ({})",
            request.method,
            request.path,
            variant.full_id(),
            request_id
        ));

        let delay = resolution.delay(self.delay.as_u64().unwrap_or(0));
        if !delay.is_zero() {
            self.logger
                .debug(format!("Delaying response {} by {:?}", request_id, delay));
            tokio::time::sleep(delay).await;
        }

        request.params = resolution.params;
        let context = HandlerContext {
            logger: self.logger.namespace(&variant.full_id()),
            request_id,
            route_id: variant.route_id().to_string(),
            variant_id: variant.id().to_string(),
            config: Arc::clone(&self.config),
            mock_set: Arc::clone(state.mock_set()),
            alerts: self.alerts.clone(),
        };
        variant
            .handler()
            .respond(&request, &context)
            .await
            .map_err(|e| {
                self.logger
                    .error(format!("Variant '{}' failed: {}", variant.full_id(), e));
                MockError::Handler(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::definitions::{
        CollectionDefinition, MethodDefinition, MockDefinitions, RouteDefinition, VariantDefinition,
    };
    use crate::mock::handlers::{test_support, HandlerRegistry};
    use crate::mock::mock_set::MockSet;
    use crate::mock::state::compute_state;
    use serde_json::{json, Value};

    fn state() -> MockState {
        let route = |id: &str, url: &str, method: &str, delay: Option<u64>, variant_delay: Option<u64>| {
            RouteDefinition {
                id: id.into(),
                url: url.into(),
                method: MethodDefinition::One(method.into()),
                delay: delay.map(Value::from),
                variants: vec![VariantDefinition {
                    id: "ok".into(),
                    handler_type: "json".into(),
                    options: json!({"status": 200, "body": {"route": id}}),
                    delay: variant_delay.map(Value::from),
                }],
            }
        };
        let definitions = MockDefinitions {
            routes: vec![
                route("user-me", "/api/users/me", "GET", None, None),
                route("user", "/api/users/:id", "GET", Some(100), None),
                route("user-delete", "/api/users/:id", "DELETE", Some(100), Some(5)),
                route("catch-all", "/api/*", "*", None, None),
            ],
            collections: vec![CollectionDefinition {
                id: "base".into(),
                from: None,
                routes: vec![
                    "user-me:ok".into(),
                    "user:ok".into(),
                    "user-delete:ok".into(),
                    "catch-all:ok".into(),
                ],
            }],
        };
        let set = MockSet::build(
            definitions,
            &HandlerRegistry::with_builtins(),
            &test_support::core(),
            1,
        )
        .unwrap();
        compute_state(Arc::new(set), Some("base"), &[], &Alerts::new(), &Logger::new("test"))
    }

    #[test]
    fn test_first_match_in_selection_order() {
        let state = state();
        let me = resolve(&state, "GET", "/api/users/me").unwrap();
        assert_eq!(me.selection.route.id(), "user-me");

        let user = resolve(&state, "GET", "/api/users/2").unwrap();
        assert_eq!(user.selection.route.id(), "user");
        assert_eq!(user.params.get("id").map(String::as_str), Some("2"));

        let deleted = resolve(&state, "DELETE", "/api/users/2").unwrap();
        assert_eq!(deleted.selection.route.id(), "user-delete");

        let other = resolve(&state, "POST", "/api/books").unwrap();
        assert_eq!(other.selection.route.id(), "catch-all");
    }

    #[test]
    fn test_route_not_found() {
        let err = resolve(&state(), "GET", "/other").unwrap_err();
        assert!(matches!(err, MockError::RouteNotFound { .. }));
        assert_eq!(err.to_string(), "No route found for GET /other");
    }

    #[test]
    fn test_delay_priority() {
        let state = state();
        let global = 1000;
        let me = resolve(&state, "GET", "/api/users/me").unwrap();
        assert_eq!(me.delay(global), Duration::from_millis(1000));
        let user = resolve(&state, "GET", "/api/users/1").unwrap();
        assert_eq!(user.delay(global), Duration::from_millis(100));
        let deleted = resolve(&state, "DELETE", "/api/users/1").unwrap();
        assert_eq!(deleted.delay(global), Duration::from_millis(5));
    }
}
