//! `status` handler: empty body with the given status.

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
struct StatusOptions {
    status: u16,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl StatusOptions {
    fn parse(options: &Value) -> Result<Self, String> {
        let parsed: StatusOptions = parse_options(options)?;
        check_status(parsed.status)?;
        Ok(parsed)
    }
}

pub struct StatusHandlerFactory;

impl HandlerFactory for StatusHandlerFactory {
    fn id(&self) -> &str {
        "status"
    }

    fn validate(&self, options: &Value) -> Result<(), String> {
        StatusOptions::parse(options).map(|_| ())
    }

    fn build(&self, options: &Value, _core: &HandlerCore) -> Result<Arc<dyn VariantHandler>, String> {
        Ok(Arc::new(StatusHandler {
            options: StatusOptions::parse(options)?,
        }))
    }
}

struct StatusHandler {
    options: StatusOptions,
}

#[async_trait]
impl VariantHandler for StatusHandler {
    async fn respond(
        &self,
        _request: &MockRequest,
        _context: &HandlerContext,
    ) -> Result<MockResponse, HandlerError> {
        let mut response = MockResponse::empty(self.options.status);
        for (name, value) in &self.options.headers {
            response = response.with_header(name, value);
        }
        Ok(response)
    }

    fn preview(&self) -> Option<Value> {
        Some(json!({ "status": self.options.status }))
    }
}
