//! Mock engine: routes, variants, collections, and request resolution.
//!
//! [`Mock`] owns the reload coordinator and the active [`MockState`]. The
//! state is derived from the published [`MockSet`], the selected collection
//! option, and any custom route variants, and is recomputed whenever one of
//! those changes. Requests capture the state once and resolve against it.

pub mod definitions;
mod error;
pub mod handlers;
mod mock_set;
pub mod path;
mod reload;
mod resolver;
mod state;
pub mod validation;

pub use definitions::{
    CollectionDefinition, MethodDefinition, MockDefinitions, RouteDefinition, VariantDefinition,
};
pub use error::{MockError, ReloadError};
pub use handlers::{
    HandlerContext, HandlerCore, HandlerError, HandlerFactory, HandlerRegistry, MockRequest,
    MockResponse, VariantHandler,
};
pub use mock_set::{
    Collection, CollectionInfo, Methods, MockSet, Route, RouteInfo, Selection, Variant, VariantInfo,
};
pub use reload::{ReloadOutcome, ReloadState};
pub use resolver::{resolve, Resolution};
pub use state::MockState;
pub use validation::{IssueKind, ValidationError, ValidationIssue};

use crate::alerts::{Alert, Alerts};
use crate::config::{ConfigEngine, ConfigError, ConfigOption, OptionDef};
use crate::logger::Logger;
use arc_swap::ArcSwap;
use mock_set::split_selection;
use parking_lot::Mutex;
use reload::ReloadCoordinator;
use resolver::Resolver;
use serde_json::Value;
use state::{compute_state, push_custom};
use std::sync::Arc;

const DEPRECATED_SELECTED: &str = "collections.selected";

struct MockOptions {
    selected: ConfigOption,
    legacy_selected: ConfigOption,
}

pub struct Mock {
    coordinator: ReloadCoordinator,
    state: ArcSwap<MockState>,
    refresh_lock: Mutex<()>,
    custom: Mutex<Vec<String>>,
    resolver: Resolver,
    options: MockOptions,
    alerts: Alerts,
    logger: Logger,
}

impl Mock {
    /// Declare the mock options and build an engine with an empty mock set.
    ///
    /// Must run before the configuration is loaded.
    pub fn new(
        config: &Arc<ConfigEngine>,
        registry: HandlerRegistry,
        alerts: &Alerts,
        logger: &Logger,
    ) -> Result<Arc<Self>, ConfigError> {
        let mock_ns = config.add_namespace("mock")?;
        let routes_ns = config.add_child_namespace(mock_ns, "routes")?;
        let delay = config.add_option(
            routes_ns,
            OptionDef::number("delay")
                .describe("Global delay to apply to routes, in milliseconds")
                .default_value(0)
                .parser(|value| match value.as_f64() {
                    Some(millis) if millis < 0.0 => Err("delay cannot be negative".to_string()),
                    _ => Ok(value),
                }),
        )?;
        let collections_ns = config.add_child_namespace(mock_ns, "collections")?;
        let selected = config.add_option(
            collections_ns,
            OptionDef::string("selected")
                .describe("Selected collection")
                .nullable(),
        )?;
        let legacy_ns = config.add_namespace("collections")?;
        let legacy_selected = config.add_option(
            legacy_ns,
            OptionDef::string("selected")
                .describe("Selected collection. Deprecated, use mock.collections.selected")
                .nullable(),
        )?;

        let alerts = alerts.collection("mock");
        let logger = logger.namespace("mock");
        let core = HandlerCore {
            logger: logger.namespace("variantHandlers"),
            alerts: alerts.collection("variantHandlers"),
        };

        let mock = Arc::new_cyclic(|weak: &std::sync::Weak<Mock>| {
            for option in [&selected, &legacy_selected] {
                let weak = weak.clone();
                // Lives as long as the option; nothing to remove.
                let _ = option.on_change(move |_| {
                    if let Some(mock) = weak.upgrade() {
                        mock.refresh();
                    }
                });
            }

            Mock {
                coordinator: ReloadCoordinator::new(
                    registry,
                    core,
                    alerts.clone(),
                    logger.namespace("reload"),
                ),
                state: ArcSwap::from_pointee(MockState::empty()),
                refresh_lock: Mutex::new(()),
                custom: Mutex::new(Vec::new()),
                resolver: Resolver::new(
                    Arc::clone(config),
                    delay,
                    alerts.collection("handlers"),
                    logger.namespace("routes"),
                ),
                options: MockOptions {
                    selected,
                    legacy_selected,
                },
                alerts,
                logger,
            }
        });
        Ok(mock)
    }

    /// Build, validate, and publish new definitions.
    ///
    /// On rejection the previous mock set keeps serving and one alert per
    /// problem is raised under `mock:validation`.
    ///
    /// A superseded caller may still have built and published newer
    /// definitions on behalf of a caller that went away, so the state is
    /// brought up to date whatever the outcome.
    pub async fn reload(&self, definitions: MockDefinitions) -> Result<ReloadOutcome, ReloadError> {
        let result = self.coordinator.reload(definitions).await;
        if !Arc::ptr_eq(self.state().mock_set(), &self.coordinator.active()) {
            self.refresh();
        }
        result
    }

    pub fn reload_state(&self) -> ReloadState {
        self.coordinator.state()
    }

    /// State requests currently resolve against.
    pub fn state(&self) -> Arc<MockState> {
        self.state.load_full()
    }

    pub fn mock_set(&self) -> Arc<MockSet> {
        self.coordinator.active()
    }

    fn refresh(&self) {
        let _guard = self.refresh_lock.lock();

        match self.options.legacy_selected.as_string() {
            Some(_) => self.alerts.collection("deprecated").set(
                DEPRECATED_SELECTED,
                "Option 'collections.selected' is deprecated. Use 'mock.collections.selected' instead",
                None,
            ),
            None => self.alerts.collection("deprecated").remove(DEPRECATED_SELECTED),
        }

        let mut custom = self.custom.lock();
        let state = compute_state(
            self.coordinator.active(),
            self.selected_collection().as_deref(),
            &custom,
            &self.alerts.collection("collections"),
            &self.logger.namespace("collections"),
        );
        *custom = state.custom_variants().to_vec();
        self.state.store(Arc::new(state));
    }

    /// Value of the selected collection option, the legacy option as fallback.
    pub fn selected_collection(&self) -> Option<String> {
        self.options
            .selected
            .as_string()
            .or_else(|| self.options.legacy_selected.as_string())
    }

    /// Collection in use, after fallback.
    pub fn current_collection(&self) -> Option<String> {
        self.state().collection_id().map(str::to_string)
    }

    /// Set the selected collection option. The id must exist in the active mock set.
    pub fn select_collection(&self, id: &str) -> Result<(), MockError> {
        if self.coordinator.active().collection(id).is_none() {
            return Err(MockError::CollectionNotFound(id.to_string()));
        }
        self.options.selected.set(Value::String(id.to_string()))?;
        // Already selected but previously overridden by the legacy option.
        self.refresh();
        Ok(())
    }

    /// Override the selected collection's variant for one route until restored.
    pub fn use_route_variant(&self, full_id: &str) -> Result<(), MockError> {
        let mock_set = self.coordinator.active();
        let (route_id, _) = split_selection(full_id)
            .ok_or_else(|| MockError::UnknownVariant(full_id.to_string()))?;
        if mock_set.route(route_id).is_none() {
            return Err(MockError::UnknownRoute(route_id.to_string()));
        }
        if mock_set.selection(full_id).is_none() {
            return Err(MockError::UnknownVariant(full_id.to_string()));
        }
        push_custom(&mut self.custom.lock(), full_id);
        self.logger
            .info(format!("Using custom route variant '{}'", full_id));
        self.refresh();
        Ok(())
    }

    pub fn restore_route_variants(&self) {
        self.custom.lock().clear();
        self.logger.info("Restoring collection route variants");
        self.refresh();
    }

    pub fn custom_route_variants(&self) -> Vec<String> {
        self.state().custom_variants().to_vec()
    }

    pub fn routes(&self) -> Vec<RouteInfo> {
        self.mock_set().routes().iter().map(|r| r.info()).collect()
    }

    pub fn variants(&self) -> Vec<VariantInfo> {
        self.mock_set().variants().map(|v| v.info()).collect()
    }

    pub fn collections(&self) -> Vec<CollectionInfo> {
        self.mock_set()
            .collections()
            .iter()
            .map(|c| c.info())
            .collect()
    }

    /// Variant answering `route_id` in the current state, if the route is selected.
    pub fn preview(&self, route_id: &str) -> Result<Option<VariantInfo>, MockError> {
        let state = self.state();
        if state.mock_set().route(route_id).is_none() {
            return Err(MockError::UnknownRoute(route_id.to_string()));
        }
        Ok(state
            .selections()
            .iter()
            .find(|s| s.route.id() == route_id)
            .map(|s| s.variant.info()))
    }

    /// Resolve without running the handler.
    pub fn resolve(&self, method: &str, path: &str) -> Result<Resolution, MockError> {
        resolve(&self.state(), method, path)
    }

    /// Resolve a request, apply its delay, and run the selected handler.
    pub async fn handle(&self, request: MockRequest) -> Result<MockResponse, MockError> {
        self.resolver.dispatch(self.state(), request).await
    }

    /// Registered variant handler types.
    pub fn handlers(&self) -> Vec<String> {
        self.coordinator
            .registry()
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.all()
    }

    pub(crate) async fn stop(&self) {
        self.coordinator.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSources;
    use serde_json::json;

    fn definitions() -> MockDefinitions {
        serde_json::from_value(json!({
            "routes": [
                {
                    "id": "get-users",
                    "url": "/api/users",
                    "method": "GET",
                    "variants": [
                        {"id": "success", "type": "json", "options": {"status": 200, "body": [{"id": 1}]}},
                        {"id": "error", "type": "status", "options": {"status": 500}}
                    ]
                },
                {
                    "id": "get-user",
                    "url": "/api/users/:id",
                    "method": "GET",
                    "variants": [
                        {"id": "success", "type": "json", "options": {"status": 200, "body": {"id": 1}}}
                    ]
                }
            ],
            "collections": [
                {"id": "base", "routes": ["get-users:success", "get-user:success"]},
                {"id": "users-error", "from": "base", "routes": ["get-users:error"]}
            ]
        }))
        .unwrap()
    }

    async fn mock() -> (Arc<ConfigEngine>, Arc<Mock>, Alerts) {
        let config = Arc::new(ConfigEngine::new().unwrap());
        let alerts = Alerts::new();
        let mock = Mock::new(
            &config,
            HandlerRegistry::with_builtins(),
            &alerts,
            &Logger::new("test"),
        )
        .unwrap();
        config.load(ConfigSources::new()).await.unwrap();
        (config, mock, alerts)
    }

    #[tokio::test]
    async fn test_selected_option_drives_resolution() {
        let (config, mock, alerts) = mock().await;
        mock.reload(definitions()).await.unwrap();
        // Nothing selected: fallback with an alert.
        assert_eq!(mock.current_collection().as_deref(), Some("base"));
        assert_eq!(alerts.all().len(), 1);

        config.set("mock.collections.selected", json!("users-error")).unwrap();
        assert!(alerts.all().is_empty());
        let response = mock.handle(MockRequest::new("GET", "/api/users")).await.unwrap();
        assert_eq!(response.status, 500);
    }

    #[tokio::test]
    async fn test_select_unknown_collection() {
        let (_config, mock, _alerts) = mock().await;
        mock.reload(definitions()).await.unwrap();
        mock.select_collection("base").unwrap();
        let err = mock.select_collection("missing").unwrap_err();
        assert!(matches!(err, MockError::CollectionNotFound(_)));
        assert_eq!(mock.selected_collection().as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn test_legacy_option_raises_deprecation_alert() {
        let (config, mock, alerts) = mock().await;
        mock.reload(definitions()).await.unwrap();
        config.set("collections.selected", json!("users-error")).unwrap();
        assert_eq!(mock.current_collection().as_deref(), Some("users-error"));
        assert!(alerts
            .get("mock:deprecated:collections.selected")
            .is_some());

        config.set("mock.collections.selected", json!("base")).unwrap();
        assert_eq!(mock.current_collection().as_deref(), Some("base"));
    }

    #[tokio::test]
    async fn test_custom_route_variants_survive_reload() {
        let (_config, mock, _alerts) = mock().await;
        mock.reload(definitions()).await.unwrap();
        mock.select_collection("base").unwrap();
        mock.use_route_variant("get-users:error").unwrap();
        assert_eq!(mock.custom_route_variants(), vec!["get-users:error"]);
        assert_eq!(
            mock.preview("get-users").unwrap().unwrap().id,
            "get-users:error"
        );

        let mut changed = definitions();
        changed.routes[1].url = "/api/people/:id".to_string();
        mock.reload(changed).await.unwrap();
        assert_eq!(mock.custom_route_variants(), vec!["get-users:error"]);

        mock.restore_route_variants();
        assert!(mock.custom_route_variants().is_empty());
        assert_eq!(
            mock.preview("get-users").unwrap().unwrap().id,
            "get-users:success"
        );

        assert!(matches!(
            mock.use_route_variant("nope:x"),
            Err(MockError::UnknownRoute(_))
        ));
        assert!(matches!(
            mock.use_route_variant("get-users:nope"),
            Err(MockError::UnknownVariant(_))
        ));
    }

    #[tokio::test]
    async fn test_listings() {
        let (_config, mock, _alerts) = mock().await;
        mock.reload(definitions()).await.unwrap();
        assert_eq!(mock.routes().len(), 2);
        assert_eq!(mock.variants().len(), 3);
        let collections = mock.collections();
        assert_eq!(collections[1].routes, vec!["get-users:error", "get-user:success"]);
        assert_eq!(mock.handlers(), vec!["json", "text", "status", "middleware"]);
        assert!(matches!(mock.preview("nope"), Err(MockError::UnknownRoute(_))));
    }

    #[tokio::test]
    async fn test_state_follows_publish_when_newest_caller_is_cancelled() {
        let (_config, mock, _alerts) = mock().await;
        mock.reload(definitions()).await.unwrap();
        mock.select_collection("base").unwrap();

        let mut renamed = definitions();
        renamed.routes[1].url = "/api/people/:id".to_string();
        let mut failing = definitions();
        failing.collections[0].routes[0] = "get-users:error".to_string();

        let guard = mock.coordinator.hold_builds().await;
        let first = tokio::spawn({
            let mock = Arc::clone(&mock);
            async move { mock.reload(renamed).await }
        });
        while mock.coordinator.reload_calls() < 2 {
            tokio::task::yield_now().await;
        }
        let newest = tokio::spawn({
            let mock = Arc::clone(&mock);
            async move { mock.reload(failing).await }
        });
        while mock.coordinator.reload_calls() < 3 {
            tokio::task::yield_now().await;
        }
        newest.abort();
        assert!(newest.await.unwrap_err().is_cancelled());
        drop(guard);

        // The first caller builds the newest definitions on their behalf.
        assert_eq!(first.await.unwrap().unwrap(), ReloadOutcome::Superseded);
        assert!(Arc::ptr_eq(mock.state().mock_set(), &mock.mock_set()));
        let response = mock.handle(MockRequest::new("GET", "/api/users")).await.unwrap();
        assert_eq!(response.status, 500);
    }
}
