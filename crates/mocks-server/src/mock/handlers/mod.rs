//! Variant handlers and the registry that maps handler types to factories.
//!
//! A variant's `type` names a [`HandlerFactory`]. At build time the factory
//! validates the variant's options and constructs a [`VariantHandler`]; at
//! request time the resolver only calls the handler through the trait.
//! The built-in `json`, `text`, `status`, and `middleware` handlers are
//! ordinary registrants.

mod json;
mod middleware;
mod status;
mod text;

pub use json::JsonHandlerFactory;
pub use middleware::{MiddlewareFn, MiddlewareHandlerFactory};
pub use status::StatusHandlerFactory;
pub use text::TextHandlerFactory;

use crate::alerts::Alerts;
use crate::config::ConfigEngine;
use crate::logger::Logger;
use crate::mock::MockSet;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Incoming request as seen by the resolver and handlers.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names are lowercased.
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// Filled in by the resolver from the matched route pattern.
    pub params: BTreeMap<String, String>,
}

impl MockRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl MockResponse {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "text/plain; charset=utf-8".to_string())],
            body: Bytes::from(body.into()),
        }
    }

    /// Add a header, replacing any existing one with the same name.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Handler '{handler}' failed: {message}")]
    Failed { handler: String, message: String },
}

impl HandlerError {
    pub fn failed(handler: &str, message: impl ToString) -> Self {
        HandlerError::Failed {
            handler: handler.to_string(),
            message: message.to_string(),
        }
    }
}

/// Capabilities handed to a factory when it builds a handler.
#[derive(Debug, Clone)]
pub struct HandlerCore {
    pub logger: Logger,
    pub alerts: Alerts,
}

/// Per-request capabilities handed to a handler.
#[derive(Clone)]
pub struct HandlerContext {
    pub logger: Logger,
    pub request_id: String,
    pub route_id: String,
    pub variant_id: String,
    pub config: Arc<ConfigEngine>,
    /// The mock set the request was resolved against.
    pub mock_set: Arc<MockSet>,
    pub alerts: Alerts,
}

/// A constructed handler bound to one variant's options.
#[async_trait]
pub trait VariantHandler: Send + Sync {
    async fn respond(
        &self,
        request: &MockRequest,
        context: &HandlerContext,
    ) -> Result<MockResponse, HandlerError>;

    /// Static description of the response, when one can be given without a request.
    fn preview(&self) -> Option<Value> {
        None
    }
}

pub trait HandlerFactory: Send + Sync {
    /// Handler type name referenced by a variant's `type`.
    fn id(&self) -> &str;

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Check a variant's options without building anything.
    fn validate(&self, options: &Value) -> Result<(), String>;

    fn build(&self, options: &Value, core: &HandlerCore) -> Result<Arc<dyn VariantHandler>, String>;
}

/// Handler types known to the engine.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, Arc<dyn HandlerFactory>>,
    order: Vec<String>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonHandlerFactory));
        registry.register(Arc::new(TextHandlerFactory));
        registry.register(Arc::new(StatusHandlerFactory));
        registry.register(Arc::new(MiddlewareHandlerFactory::new()));
        registry
    }

    /// Register a factory. A factory with the same id is replaced.
    pub fn register(&mut self, factory: Arc<dyn HandlerFactory>) {
        let id = factory.id().to_string();
        if self.factories.insert(id.clone(), factory).is_some() {
            warn!("Variant handler '{}' registered twice, replacing the previous one", id);
        } else {
            self.order.push(id);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn HandlerFactory>> {
        self.factories.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.order)
            .finish()
    }
}

/// Deserialize handler options into their typed form.
pub(crate) fn parse_options<T: DeserializeOwned>(options: &Value) -> Result<T, String> {
    serde_json::from_value(options.clone()).map_err(|e| format!("invalid options: {}", e))
}

pub(crate) fn check_status(status: u16) -> Result<(), String> {
    if (100..=599).contains(&status) {
        Ok(())
    } else {
        Err(format!("status {} is not a valid HTTP status code", status))
    }
}
