//! `text` handler: plain text body.

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
struct TextOptions {
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    body: String,
}

impl TextOptions {
    fn parse(options: &Value) -> Result<Self, String> {
        let parsed: TextOptions = parse_options(options)?;
        check_status(parsed.status)?;
        Ok(parsed)
    }
}

pub struct TextHandlerFactory;

impl HandlerFactory for TextHandlerFactory {
    fn id(&self) -> &str {
        "text"
    }

    fn validate(&self, options: &Value) -> Result<(), String> {
        TextOptions::parse(options).map(|_| ())
    }

    fn build(&self, options: &Value, _core: &HandlerCore) -> Result<Arc<dyn VariantHandler>, String> {
        Ok(Arc::new(TextHandler {
            options: TextOptions::parse(options)?,
        }))
    }
}

struct TextHandler {
    options: TextOptions,
}

#[async_trait]
impl VariantHandler for TextHandler {
    async fn respond(
        &self,
        _request: &MockRequest,
        _context: &HandlerContext,
    ) -> Result<MockResponse, HandlerError> {
        let mut response = MockResponse::text(self.options.status, self.options.body.clone());
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

    #[tokio::test]
    async fn test_text_response() {
        let handler = TextHandlerFactory
            .build(&json!({"status": 200, "body": "pong"}), &test_support::core())
            .unwrap();
        let response = handler
            .respond(&MockRequest::new("GET", "/ping"), &test_support::context())
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"pong");
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_body_must_be_string() {
        assert!(TextHandlerFactory
            .validate(&json!({"status": 200, "body": {"a": 1}}))
            .is_err());
    }
}
