//! `middleware` handler: delegates to a named function registered on the factory.
//!
//! ```ignore
//! let factory = MiddlewareHandlerFactory::new().with_sync("echo-id", |request, _ctx| {
//!     Ok(MockResponse::text(200, request.param("id").unwrap_or_default()))
//! });
//! ```

use super::{
    parse_options, HandlerContext, HandlerCore, HandlerError, HandlerFactory, MockRequest,
    MockResponse, VariantHandler,
};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type MiddlewareFn = Arc<
    dyn Fn(MockRequest, HandlerContext) -> BoxFuture<'static, Result<MockResponse, HandlerError>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MiddlewareOptions {
    middleware: String,
}

#[derive(Default)]
pub struct MiddlewareHandlerFactory {
    functions: HashMap<String, MiddlewareFn>,
}

impl MiddlewareHandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F, Fut>(mut self, name: &str, function: F) -> Self
    where
        F: Fn(MockRequest, HandlerContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<MockResponse, HandlerError>> + Send + 'static,
    {
        let function: MiddlewareFn = Arc::new(move |request, context| function(request, context).boxed());
        self.functions.insert(name.to_string(), function);
        self
    }

    pub fn with_sync<F>(self, name: &str, function: F) -> Self
    where
        F: Fn(&MockRequest, &HandlerContext) -> Result<MockResponse, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let function = Arc::new(function);
        self.with_function(name, move |request, context| {
            let result = function(&request, &context);
            async move { result }
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn parse(&self, options: &Value) -> Result<(String, MiddlewareFn), String> {
        let parsed: MiddlewareOptions = parse_options(options)?;
        match self.functions.get(&parsed.middleware) {
            Some(function) => Ok((parsed.middleware, Arc::clone(function))),
            None => Err(format!(
                "middleware function '{}' is not registered",
                parsed.middleware
            )),
        }
    }
}

impl HandlerFactory for MiddlewareHandlerFactory {
    fn id(&self) -> &str {
        "middleware"
    }

    fn validate(&self, options: &Value) -> Result<(), String> {
        self.parse(options).map(|_| ())
    }

    fn build(&self, options: &Value, _core: &HandlerCore) -> Result<Arc<dyn VariantHandler>, String> {
        let (name, function) = self.parse(options)?;
        Ok(Arc::new(MiddlewareHandler { name, function }))
    }
}

struct MiddlewareHandler {
    name: String,
    function: MiddlewareFn,
}

#[async_trait]
impl VariantHandler for MiddlewareHandler {
    async fn respond(
        &self,
        request: &MockRequest,
        context: &HandlerContext,
    ) -> Result<MockResponse, HandlerError> {
        context
            .logger
            .debug(format!("Running middleware '{}'", self.name));
        (self.function)(request.clone(), context.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;
    use serde_json::json;

    fn factory() -> MiddlewareHandlerFactory {
        MiddlewareHandlerFactory::new()
            .with_sync("echo-id", |request, _context| {
                Ok(MockResponse::text(200, request.param("id").unwrap_or("none")))
            })
            .with_function("fail", |_request, _context| async {
                Err(HandlerError::failed("middleware", "boom"))
            })
    }

    #[test]
    fn test_unregistered_function_rejected() {
        let factory = factory();
        assert_eq!(factory.names(), vec!["echo-id", "fail"]);
        assert!(factory.validate(&json!({"middleware": "echo-id"})).is_ok());
        assert!(factory.validate(&json!({"middleware": "missing"})).is_err());
        assert!(factory.validate(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_function_receives_request() {
        let handler = factory()
            .build(&json!({"middleware": "echo-id"}), &test_support::core())
            .unwrap();
        let mut request = MockRequest::new("GET", "/users/7");
        request.params.insert("id".into(), "7".into());
        let response = handler
            .respond(&request, &test_support::context())
            .await
            .unwrap();
        assert_eq!(&response.body[..], b"7");
        assert!(handler.preview().is_none());
    }

    #[tokio::test]
    async fn test_function_error_propagates() {
        let handler = factory()
            .build(&json!({"middleware": "fail"}), &test_support::core())
            .unwrap();
        let err = handler
            .respond(&MockRequest::new("GET", "/"), &test_support::context())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
