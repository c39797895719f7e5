//! Leveled logger capability handed to components and variant handlers.
//!
//! Events go through `tracing`; the label identifies the emitter
//! (`mock:routes:get-user`). The six levels map onto tracing levels:
//! `verbose` and `debug` both emit at DEBUG, `silly` at TRACE.

use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Allowed values of the `log` option, from quietest to noisiest.
pub const LOG_LEVELS: [&str; 7] = ["silent", "error", "warn", "info", "verbose", "debug", "silly"];

#[derive(Debug, Clone)]
pub struct Logger {
    label: Arc<str>,
}

impl Logger {
    pub fn new(label: &str) -> Self {
        Self {
            label: Arc::from(label),
        }
    }

    /// Child logger labelled `<parent>:<name>`.
    pub fn namespace(&self, name: &str) -> Logger {
        if self.label.is_empty() {
            return Logger::new(name);
        }
        Logger::new(&format!("{}:{}", self.label, name))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn error(&self, message: impl Display) {
        error!(label = %self.label, "{}", message);
    }

    pub fn warn(&self, message: impl Display) {
        warn!(label = %self.label, "{}", message);
    }

    pub fn info(&self, message: impl Display) {
        info!(label = %self.label, "{}", message);
    }

    pub fn verbose(&self, message: impl Display) {
        debug!(label = %self.label, verbose = true, "{}", message);
    }

    pub fn debug(&self, message: impl Display) {
        debug!(label = %self.label, "{}", message);
    }

    pub fn silly(&self, message: impl Display) {
        trace!(label = %self.label, "{}", message);
    }
}

/// Translate a `log` option value into a tracing filter directive.
pub fn filter_directive(level: &str) -> &'static str {
    match level {
        "silent" => "off",
        "error" => "error",
        "warn" => "warn",
        "verbose" | "debug" => "debug",
        "silly" => "trace",
        _ => "info",
    }
}
