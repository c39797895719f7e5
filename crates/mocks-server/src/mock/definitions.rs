//! Raw route, variant, and collection definitions as supplied by loaders.
//!
//! These are plain data: nothing here is validated. [`MockSet::build`](super::MockSet::build)
//! turns them into an immutable, validated snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a loader supplies in one reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockDefinitions {
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
    #[serde(default)]
    pub collections: Vec<CollectionDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    pub id: String,
    /// Path pattern: literal segments, `:param` segments, trailing `*`.
    pub url: String,
    pub method: MethodDefinition,
    /// Overrides the global delay for every variant of the route. Kept raw
    /// so a bad value becomes a validation issue rather than a parse error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Value>,
    #[serde(default)]
    pub variants: Vec<VariantDefinition>,
}

/// One method, a list of methods, or `"*"` for any method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodDefinition {
    One(String),
    Many(Vec<String>),
}

impl MethodDefinition {
    pub fn as_vec(&self) -> Vec<&str> {
        match self {
            MethodDefinition::One(method) => vec![method.as_str()],
            MethodDefinition::Many(methods) => methods.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDefinition {
    pub id: String,
    /// Handler type, looked up in the handler registry.
    #[serde(rename = "type")]
    pub handler_type: String,
    #[serde(default)]
    pub options: Value,
    /// Overrides route and global delays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub id: String,
    /// Parent collection; must be declared earlier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Selections in `routeId:variantId` form.
    #[serde(default)]
    pub routes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_deserialize() {
        let yaml = r#"
routes:
  - id: get-users
    url: /api/users
    method: GET
    variants:
      - id: success
        type: json
        options:
          status: 200
          body: []
  - id: update-user
    url: /api/users/:id
    method: [PUT, PATCH]
    delay: 100
    variants:
      - id: error
        type: status
        delay: 0
        options:
          status: 500
collections:
  - id: base
    routes: ["get-users:success"]
  - id: broken
    from: base
    routes: ["update-user:error"]
"#;
        let definitions: MockDefinitions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(definitions.routes.len(), 2);
        assert_eq!(definitions.routes[0].method.as_vec(), vec!["GET"]);
        assert_eq!(definitions.routes[1].method.as_vec(), vec!["PUT", "PATCH"]);
        assert_eq!(definitions.routes[1].delay, Some(Value::from(100)));
        assert_eq!(definitions.routes[1].variants[0].delay, Some(Value::from(0)));
        assert_eq!(definitions.routes[1].variants[0].handler_type, "status");
        assert_eq!(definitions.collections[1].from.as_deref(), Some("base"));
    }

    #[test]
    fn test_null_delay_inherits() {
        let json = r#"{"id": "r", "url": "/", "method": "*", "delay": null, "variants": []}"#;
        let route: RouteDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(route.delay, None);
    }

    #[test]
    fn test_negative_delay_still_deserializes() {
        let json = r#"{"id": "r", "url": "/", "method": "*", "delay": -5, "variants": []}"#;
        let route: RouteDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(route.delay, Some(Value::from(-5)));
    }
}
