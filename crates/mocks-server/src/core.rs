//! Server core: one config engine, one alert store, one mock engine.
//!
//! ```ignore
//! let core = Core::builder()
//!     .with_sources(ConfigSources::from_process())
//!     .build()?;
//! core.start(json!({"mock": {"collections": {"selected": "base"}}})).await?;
//! core.mock().reload(definitions).await?;
//! // ...
//! core.stop().await;
//! ```

use crate::alerts::{Alert, Alerts};
use crate::config::{ConfigEngine, ConfigError, ConfigOption, ConfigSources, OptionDef, DEFAULT_ENV_PREFIX};
use crate::logger::{Logger, LOG_LEVELS};
use crate::mock::{HandlerFactory, HandlerRegistry, Mock, MockError, ReloadError};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mock(#[from] MockError),

    #[error(transparent)]
    Reload(#[from] ReloadError),

    #[error("Cannot {action} while the core is {state:?}")]
    Lifecycle { action: &'static str, state: Lifecycle },

    #[error("Failed to bind {address}: {message}")]
    Bind { address: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Lifecycle {
    Created,
    Initialized,
    Started,
    Stopped,
}

pub struct CoreBuilder {
    sources: ConfigSources,
    registry: HandlerRegistry,
    env_prefix: String,
}

impl Default for CoreBuilder {
    fn default() -> Self {
        Self {
            sources: ConfigSources::new(),
            registry: HandlerRegistry::with_builtins(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }
}

impl CoreBuilder {
    /// Config sources read by `init`. Programmatic values passed to
    /// `init`/`start` are added on top.
    pub fn with_sources(mut self, sources: ConfigSources) -> Self {
        self.sources = sources;
        self
    }

    /// Register a variant handler. Replaces a built-in with the same id.
    pub fn with_handler(mut self, factory: impl HandlerFactory + 'static) -> Self {
        self.registry.register(Arc::new(factory));
        self
    }

    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = prefix.to_string();
        self
    }

    /// Declare every option and assemble the engines.
    pub fn build(self) -> Result<Core, CoreError> {
        let config = Arc::new(ConfigEngine::with_env_prefix(self.env_prefix)?);
        let alerts = Alerts::new();
        let logger = Logger::new("");

        let root = config.root();
        let server = config.add_namespace("server")?;
        let files = config.add_namespace("files")?;
        let options = CoreOptions {
            log: config.add_option(
                root,
                OptionDef::string("log")
                    .describe(format!("Log level. One of {}", LOG_LEVELS.join(", ")))
                    .default_value("info")
                    .one_of(LOG_LEVELS),
            )?,
            host: config.add_option(
                server,
                OptionDef::string("host")
                    .describe("Host for the mock server")
                    .default_value("0.0.0.0"),
            )?,
            port: config.add_option(
                server,
                OptionDef::number("port")
                    .describe("Port number for the mock server")
                    .default_value(3100)
                    .parser(|value| match value.as_u64() {
                        Some(port) if port <= u16::MAX as u64 => Ok(value),
                        _ => Err("port must be an integer between 0 and 65535".to_string()),
                    }),
            )?,
            files_enabled: config.add_option(
                files,
                OptionDef::boolean("enabled")
                    .describe("Load route and collection definitions from files")
                    .default_value(true),
            )?,
            files_path: config.add_option(
                files,
                OptionDef::string("path")
                    .describe("Definitions file, YAML or JSON")
                    .default_value("mocks.yaml"),
            )?,
        };

        let mock = Mock::new(&config, self.registry, &alerts, &logger)?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Core {
            config,
            alerts,
            logger: logger.namespace("core"),
            mock,
            options,
            sources: parking_lot::Mutex::new(Some(self.sources)),
            lifecycle: Mutex::new(Lifecycle::Created),
            shutdown_tx,
        })
    }
}

struct CoreOptions {
    log: ConfigOption,
    host: ConfigOption,
    port: ConfigOption,
    files_enabled: ConfigOption,
    files_path: ConfigOption,
}

pub struct Core {
    config: Arc<ConfigEngine>,
    alerts: Alerts,
    logger: Logger,
    mock: Arc<Mock>,
    options: CoreOptions,
    sources: parking_lot::Mutex<Option<ConfigSources>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Core {
    pub fn builder() -> CoreBuilder {
        CoreBuilder::default()
    }

    /// Load configuration from every source plus `values` (highest precedence).
    pub async fn init(&self, values: Value) -> Result<(), CoreError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.init_locked(&mut lifecycle, values).await
    }

    async fn init_locked(&self, lifecycle: &mut Lifecycle, values: Value) -> Result<(), CoreError> {
        if *lifecycle != Lifecycle::Created {
            return Err(CoreError::Lifecycle {
                action: "initialize",
                state: *lifecycle,
            });
        }
        let sources = self.sources.lock().take().unwrap_or_default();
        self.config.load(sources.with_values(values)).await?;
        *lifecycle = Lifecycle::Initialized;
        self.logger.debug("Core initialized");
        Ok(())
    }

    /// Initialize if needed, apply `values`, and mark the core as serving.
    pub async fn start(&self, values: Value) -> Result<(), CoreError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Created => self.init_locked(&mut lifecycle, values).await?,
            Lifecycle::Initialized => self.config.set_values(&values)?,
            state => {
                return Err(CoreError::Lifecycle {
                    action: "start",
                    state,
                })
            }
        }
        *lifecycle = Lifecycle::Started;
        self.logger.info(format!(
            "Core started, server configured on {}",
            self.server_address()
        ));
        Ok(())
    }

    /// Refuse further reloads, wait for an in-flight build, and signal the
    /// transport to stop accepting connections.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if *lifecycle == Lifecycle::Stopped {
            return;
        }
        self.mock.stop().await;
        // No receivers when no transport was started.
        let _ = self.shutdown_tx.send(());
        *lifecycle = Lifecycle::Stopped;
        self.logger.info("Core stopped");
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().await
    }

    pub fn config(&self) -> &Arc<ConfigEngine> {
        &self.config
    }

    pub fn mock(&self) -> &Arc<Mock> {
        &self.mock
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.all()
    }

    /// Scoped alert handle for components living outside the core.
    pub fn alerts_scope(&self, name: &str) -> Alerts {
        self.alerts.collection(name)
    }

    pub fn log_level(&self) -> String {
        self.options
            .log
            .as_string()
            .unwrap_or_else(|| "info".to_string())
    }

    /// `host:port` the transport binds to.
    pub fn server_address(&self) -> String {
        let host = self
            .options
            .host
            .as_string()
            .unwrap_or_else(|| "0.0.0.0".to_string());
        format!("{}:{}", host, self.options.port.as_u64().unwrap_or(3100))
    }

    /// Definitions file to load, when file loading is enabled.
    pub fn definitions_file(&self) -> Option<PathBuf> {
        if self.options.files_enabled.as_bool() != Some(true) {
            return None;
        }
        self.options.files_path.as_string().map(PathBuf::from)
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValueSource;
    use serde_json::json;

    #[tokio::test]
    async fn test_start_initializes_and_applies_values() {
        let core = Core::builder()
            .with_sources(ConfigSources::new().with_file(ValueSource::new(
                "file",
                json!({"server": {"port": 4000}, "log": "debug"}),
            )))
            .build()
            .unwrap();
        core.start(json!({"server": {"host": "127.0.0.1"}})).await.unwrap();

        assert_eq!(core.lifecycle().await, Lifecycle::Started);
        assert_eq!(core.server_address(), "127.0.0.1:4000");
        assert_eq!(core.log_level(), "debug");
        assert!(core.config().is_locked());
    }

    #[tokio::test]
    async fn test_start_after_init_sets_values() {
        let core = Core::builder().build().unwrap();
        core.init(Value::Null).await.unwrap();
        core.start(json!({"mock": {"routes": {"delay": 250}}})).await.unwrap();
        assert_eq!(core.config().get("mock.routes.delay").unwrap(), json!(250));
        assert!(matches!(
            core.init(Value::Null).await,
            Err(CoreError::Lifecycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_values_abort_start() {
        let core = Core::builder().build().unwrap();
        let err = core.start(json!({"log": "loud"})).await.unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::OptionType { .. })));
        assert_eq!(core.lifecycle().await, Lifecycle::Created);

        let err = core.start(json!({"server": {"port": 70000}})).await.unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_stop_signals_transport_and_refuses_reloads() {
        let core = Core::builder().build().unwrap();
        core.start(Value::Null).await.unwrap();
        let mut shutdown = core.subscribe_shutdown();
        core.stop().await;
        assert!(shutdown.recv().await.is_ok());
        assert_eq!(core.lifecycle().await, Lifecycle::Stopped);
        assert!(matches!(
            core.mock().reload(Default::default()).await,
            Err(ReloadError::Stopped)
        ));
        assert!(matches!(
            core.start(Value::Null).await,
            Err(CoreError::Lifecycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_files_options() {
        let core = Core::builder().build().unwrap();
        core.start(json!({"files": {"path": "defs.json"}})).await.unwrap();
        assert_eq!(core.definitions_file(), Some(PathBuf::from("defs.json")));
        core.config().set("files.enabled", json!(false)).unwrap();
        assert_eq!(core.definitions_file(), None);
    }
}
