//! Definitions file loading.

use crate::mock::MockDefinitions;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Read route and collection definitions from a YAML or JSON file.
pub async fn load_definitions(path: impl AsRef<Path>) -> Result<MockDefinitions> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read definitions file {}", path.display()))?;
    let definitions = parse_definitions(&content)
        .with_context(|| format!("Failed to parse definitions file {}", path.display()))?;
    info!(
        "Loaded {} route(s) and {} collection(s) from {}",
        definitions.routes.len(),
        definitions.collections.len(),
        path.display()
    );
    Ok(definitions)
}

/// YAML is a superset of JSON, so one parser handles both.
pub fn parse_definitions(content: &str) -> Result<MockDefinitions> {
    if content.trim().is_empty() {
        return Ok(MockDefinitions::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "routes:\n  - id: ping\n    url: /ping\n    method: GET\n    variants:\n      - id: ok\n        type: text\n        options: {{status: 200, body: pong}}\ncollections:\n  - id: base\n    routes: [\"ping:ok\"]"
        )
        .unwrap();

        let definitions = load_definitions(file.path()).await.unwrap();
        assert_eq!(definitions.routes[0].id, "ping");
        assert_eq!(definitions.collections[0].routes, vec!["ping:ok"]);
    }

    #[test]
    fn test_parse_json_and_empty() {
        let definitions =
            parse_definitions(r#"{"routes": [], "collections": [{"id": "base"}]}"#).unwrap();
        assert_eq!(definitions.collections[0].id, "base");
        assert_eq!(parse_definitions("  \n").unwrap(), MockDefinitions::default());
        assert!(parse_definitions("routes: 12").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_reports_path() {
        let err = load_definitions("/nonexistent/mocks.yaml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mocks.yaml"));
    }
}
