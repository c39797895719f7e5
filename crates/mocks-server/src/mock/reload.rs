//! Reload coordination: build, validate, and publish mock sets one at a time.
//!
//! Builds are serialized by an async lock. A trigger arriving while a build
//! runs parks its definitions in a single pending slot; a later trigger
//! replaces it, so only the newest queued definitions are ever built. A
//! rejected build leaves the active mock set untouched.

use super::definitions::MockDefinitions;
use super::error::ReloadError;
use super::handlers::{HandlerCore, HandlerRegistry};
use super::mock_set::{MockSet, MockSetBuilder};
use super::validation::ValidationError;
use crate::alerts::Alerts;
use crate::logger::Logger;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReloadState {
    Idle,
    Building,
    Validating,
    Publishing,
    Rejected,
}

/// What happened to the definitions passed to one `reload` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Published { version: u64 },
    /// Identical to the active definitions; the active mock set was kept.
    Unchanged,
    /// Replaced in the queue by newer definitions before being built.
    Superseded,
}

type BuildResult = Result<ReloadOutcome, ValidationError>;

pub(crate) struct ReloadCoordinator {
    active: ArcSwap<MockSet>,
    registry: HandlerRegistry,
    core: HandlerCore,
    pending: Mutex<Option<(u64, MockDefinitions)>>,
    last_result: Mutex<Option<(u64, BuildResult)>>,
    build_lock: tokio::sync::Mutex<()>,
    state: Mutex<ReloadState>,
    next_ticket: AtomicU64,
    next_version: AtomicU64,
    stopped: AtomicBool,
    alerts: Alerts,
    logger: Logger,
}

impl ReloadCoordinator {
    pub(crate) fn new(registry: HandlerRegistry, core: HandlerCore, alerts: Alerts, logger: Logger) -> Self {
        Self {
            active: ArcSwap::from_pointee(MockSet::empty()),
            registry,
            core,
            pending: Mutex::new(None),
            last_result: Mutex::new(None),
            build_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(ReloadState::Idle),
            next_ticket: AtomicU64::new(1),
            next_version: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
            alerts,
            logger,
        }
    }

    /// Currently published mock set.
    pub(crate) fn active(&self) -> Arc<MockSet> {
        self.active.load_full()
    }

    pub(crate) fn state(&self) -> ReloadState {
        *self.state.lock()
    }

    pub(crate) fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn set_state(&self, state: ReloadState) {
        *self.state.lock() = state;
    }

    pub(crate) async fn reload(&self, definitions: MockDefinitions) -> Result<ReloadOutcome, ReloadError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ReloadError::Stopped);
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::AcqRel);
        if self.pending.lock().replace((ticket, definitions)).is_some() {
            self.logger
                .debug("Queued mock definitions superseded by newer ones");
        }

        let _guard = self.build_lock.lock().await;
        if self.stopped.load(Ordering::Acquire) {
            self.pending.lock().take();
            return Err(ReloadError::Stopped);
        }

        let taken = self.pending.lock().take();
        let result = match taken {
            Some((built_ticket, definitions)) => {
                let result = self.build_and_publish(definitions);
                *self.last_result.lock() = Some((built_ticket, result.clone()));
                if built_ticket == ticket {
                    result
                } else {
                    Ok(ReloadOutcome::Superseded)
                }
            }
            // An earlier caller already built the pending definitions.
            None => match self.last_result.lock().as_ref() {
                Some((built_ticket, result)) if *built_ticket == ticket => result.clone(),
                _ => Ok(ReloadOutcome::Superseded),
            },
        };
        result.map_err(ReloadError::Invalid)
    }

    fn build_and_publish(&self, definitions: MockDefinitions) -> BuildResult {
        let validation_alerts = self.alerts.collection("validation");
        if *self.active.load().definitions() == definitions {
            self.logger
                .debug("Mock definitions unchanged, keeping the active mock set");
            validation_alerts.clean();
            return Ok(ReloadOutcome::Unchanged);
        }

        let version = self.next_version.fetch_add(1, Ordering::AcqRel);
        self.set_state(ReloadState::Building);
        let mut builder = MockSetBuilder::new(&self.registry, &self.core);
        builder.build_routes(&definitions.routes);

        self.set_state(ReloadState::Validating);
        builder.build_collections(&definitions.collections);

        match builder.finish(definitions, version) {
            Ok(mock_set) => {
                self.set_state(ReloadState::Publishing);
                self.logger.info(format!(
                    "Publishing mock set v{}: {} route(s), {} collection(s)",
                    version,
                    mock_set.routes().len(),
                    mock_set.collections().len()
                ));
                self.active.store(Arc::new(mock_set));
                validation_alerts.clean();
                self.set_state(ReloadState::Idle);
                Ok(ReloadOutcome::Published { version })
            }
            Err(err) => {
                self.set_state(ReloadState::Rejected);
                self.logger.error(format!(
                    "Mock definitions rejected with {} problem(s), keeping mock set v{}",
                    err.issues.len(),
                    self.active.load().version()
                ));
                validation_alerts.clean();
                for (index, issue) in err.issues.iter().enumerate() {
                    validation_alerts.set(
                        &index.to_string(),
                        format!("Invalid mock definitions: {}", issue.location),
                        Some(issue.to_string()),
                    );
                }
                self.set_state(ReloadState::Idle);
                Err(err)
            }
        }
    }

    /// Block builds until the guard is dropped.
    #[cfg(test)]
    pub(crate) async fn hold_builds(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.build_lock.lock().await
    }

    /// Number of `reload` calls made so far.
    #[cfg(test)]
    pub(crate) fn reload_calls(&self) -> u64 {
        self.next_ticket.load(Ordering::Acquire) - 1
    }

    /// Refuse new reloads and wait for an in-flight build to finish.
    pub(crate) async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _guard = self.build_lock.lock().await;
        self.pending.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::definitions::{CollectionDefinition, MethodDefinition, RouteDefinition, VariantDefinition};
    use crate::mock::handlers::test_support;
    use crate::mock::validation::IssueKind;
    use serde_json::json;

    fn coordinator() -> ReloadCoordinator {
        ReloadCoordinator::new(
            HandlerRegistry::with_builtins(),
            test_support::core(),
            Alerts::new().collection("mock"),
            Logger::new("test"),
        )
    }

    fn definitions(status: u16) -> MockDefinitions {
        MockDefinitions {
            routes: vec![RouteDefinition {
                id: "r".into(),
                url: "/r".into(),
                method: MethodDefinition::One("GET".into()),
                delay: None,
                variants: vec![VariantDefinition {
                    id: "v".into(),
                    handler_type: "status".into(),
                    options: json!({"status": status}),
                    delay: None,
                }],
            }],
            collections: vec![CollectionDefinition {
                id: "base".into(),
                from: None,
                routes: vec!["r:v".into()],
            }],
        }
    }

    fn cyclic() -> MockDefinitions {
        MockDefinitions {
            routes: vec![],
            collections: vec![
                CollectionDefinition {
                    id: "a".into(),
                    from: Some("b".into()),
                    routes: vec![],
                },
                CollectionDefinition {
                    id: "b".into(),
                    from: Some("a".into()),
                    routes: vec![],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_publish_and_unchanged() {
        let coordinator = coordinator();
        let outcome = coordinator.reload(definitions(200)).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::Published { version: 1 });
        let first = coordinator.active();

        let outcome = coordinator.reload(definitions(200)).await.unwrap();
        assert_eq!(outcome, ReloadOutcome::Unchanged);
        assert!(Arc::ptr_eq(&first, &coordinator.active()));
        assert_eq!(coordinator.state(), ReloadState::Idle);
    }

    #[tokio::test]
    async fn test_rejected_keeps_previous_set() {
        let coordinator = coordinator();
        coordinator.reload(definitions(200)).await.unwrap();
        let before = coordinator.active();

        let err = coordinator.reload(cyclic()).await.unwrap_err();
        match err {
            ReloadError::Invalid(validation) => assert!(validation.has(IssueKind::InheritanceCycle)),
            other => panic!("unexpected error: {other}"),
        }
        assert!(Arc::ptr_eq(&before, &coordinator.active()));
        assert_eq!(coordinator.alerts.collection("validation").all().len(), 2);

        coordinator.reload(definitions(201)).await.unwrap();
        assert!(coordinator.alerts.collection("validation").all().is_empty());
        assert_eq!(coordinator.active().version(), 3);
    }

    #[tokio::test]
    async fn test_queued_trigger_is_superseded() {
        let coordinator = Arc::new(coordinator());
        let guard = coordinator.build_lock.lock().await;

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.reload(definitions(201)).await }
        });
        tokio::task::yield_now().await;
        while coordinator.pending.lock().is_none() {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.reload(definitions(202)).await }
        });
        while coordinator.next_ticket.load(Ordering::Acquire) < 3 {
            tokio::task::yield_now().await;
        }
        drop(guard);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, ReloadOutcome::Superseded);
        assert!(matches!(second, ReloadOutcome::Published { .. }));
        assert_eq!(
            coordinator.active().definitions().routes[0].variants[0].options,
            json!({"status": 202})
        );
    }

    #[tokio::test]
    async fn test_stopped_rejects_reload() {
        let coordinator = coordinator();
        coordinator.stop().await;
        assert!(matches!(
            coordinator.reload(definitions(200)).await,
            Err(ReloadError::Stopped)
        ));
    }
}
