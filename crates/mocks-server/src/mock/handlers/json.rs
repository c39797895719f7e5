//! `json` handler: fixed status, headers, and JSON body.

use super::{
    check_status, parse_options, HandlerContext, HandlerCore, HandlerError, HandlerFactory,
    MockRequest, MockResponse, VariantHandler,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JsonOptions {
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    body: Value,
}

impl JsonOptions {
    fn parse(options: &Value) -> Result<Self, String> {
        let parsed: JsonOptions = parse_options(options)?;
        check_status(parsed.status)?;
        Ok(parsed)
    }
}

pub struct JsonHandlerFactory;

impl HandlerFactory for JsonHandlerFactory {
    fn id(&self) -> &str {
        "json"
    }

    fn validate(&self, options: &Value) -> Result<(), String> {
        JsonOptions::parse(options).map(|_| ())
    }

    fn build(&self, options: &Value, _core: &HandlerCore) -> Result<Arc<dyn VariantHandler>, String> {
        Ok(Arc::new(JsonHandler {
            options: JsonOptions::parse(options)?,
        }))
    }
}

struct JsonHandler {
    options: JsonOptions,
}

#[async_trait]
impl VariantHandler for JsonHandler {
    async fn respond(
        &self,
        _request: &MockRequest,
        context: &HandlerContext,
    ) -> Result<MockResponse, HandlerError> {
        context
            .logger
            .verbose(format!("Sending JSON response with status {}", self.options.status));
        let mut response = MockResponse::json(self.options.status, &self.options.body);
        for (name, value) in &self.options.headers {
            response = response.with_header(name, value);
        }
        Ok(response)
    }

    fn preview(&self) -> Option<Value> {
        Some(json!({
            "status": self.options.status,
            "body": self.options.body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support;
    use super::*;

    #[test]
    fn test_validate_options() {
        let factory = JsonHandlerFactory;
        assert!(factory.validate(&json!({"status": 200, "body": []})).is_ok());
        assert!(factory.validate(&json!({"status": 200})).is_err());
        assert!(factory.validate(&json!({"status": "ok", "body": {}})).is_err());
        assert!(factory.validate(&json!({"status": 200, "body": {}, "extra": 1})).is_err());
        assert!(factory.validate(&json!({"status": 1000, "body": {}})).is_err());
    }

    #[tokio::test]
    async fn test_respond_with_headers() {
        let handler = JsonHandlerFactory
            .build(
                &json!({"status": 201, "headers": {"x-custom": "yes"}, "body": {"id": 1}}),
                &test_support::core(),
            )
            .unwrap();
        let response = handler
            .respond(&MockRequest::new("POST", "/"), &test_support::context())
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.header("x-custom"), Some("yes"));
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.body_json(), Some(json!({"id": 1})));
        assert_eq!(handler.preview(), Some(json!({"status": 201, "body": {"id": 1}})));
    }
}
