// Library exports for the binary and integration tests

// ===== Engines =====
pub mod config;
pub mod mock;

// ===== Shared capabilities =====
pub mod alerts;
pub mod logger;

// ===== Lifecycle and glue =====
pub mod core;
pub mod loader;
pub mod server;

pub use crate::alerts::{Alert, Alerts};
pub use crate::config::{ConfigEngine, ConfigError, ConfigSources};
pub use crate::core::{Core, CoreBuilder, CoreError, Lifecycle};
pub use crate::logger::Logger;
pub use crate::mock::{Mock, MockDefinitions, MockError, MockRequest, MockResponse};
pub use crate::server::MockServer;
