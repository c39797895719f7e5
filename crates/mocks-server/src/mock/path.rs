//! Route URL patterns.
//!
//! A pattern is a `/`-separated list of literal segments, `:name` parameter
//! segments, and an optional trailing `*` (or `(.*)`) wildcard. Patterns are
//! compiled once into a case-insensitive regex that tolerates a trailing slash.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the capture holding whatever a trailing wildcard matched.
pub const WILDCARD_PARAM: &str = "0";

const WILDCARD_GROUP: &str = "__wildcard";

/// Compiled route URL pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Arc<Regex>,
    params: Vec<String>,
    wildcard: bool,
}

impl PathPattern {
    pub fn compile(url: &str) -> Result<Self, String> {
        let trimmed = url.trim();
        if trimmed == "*" || trimmed == "(.*)" {
            return Self::from_parts(url, "(?:/(?P<__wildcard>.*))?".to_string(), Vec::new(), true);
        }
        if !trimmed.starts_with('/') {
            return Err(format!("url '{}' must start with '/'", url));
        }

        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let mut pattern = String::new();
        let mut params = Vec::new();
        let mut wildcard = false;

        for (index, segment) in segments.iter().enumerate() {
            let last = index + 1 == segments.len();
            if *segment == "*" || *segment == "(.*)" {
                if !last {
                    return Err(format!("url '{}': wildcard is only allowed as the last segment", url));
                }
                pattern.push_str(&format!("(?:/(?P<{}>.*))?", WILDCARD_GROUP));
                wildcard = true;
            } else if let Some(name) = segment.strip_prefix(':') {
                if !is_param_name(name) {
                    return Err(format!("url '{}': invalid parameter name '{}'", url, name));
                }
                if params.iter().any(|p| p == name) {
                    return Err(format!("url '{}': parameter '{}' is declared twice", url, name));
                }
                pattern.push_str(&format!("/(?P<{}>[^/]+)", name));
                params.push(name.to_string());
            } else {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment));
            }
        }

        Self::from_parts(url, pattern, params, wildcard)
    }

    fn from_parts(
        url: &str,
        body: String,
        params: Vec<String>,
        wildcard: bool,
    ) -> Result<Self, String> {
        let regex = Regex::new(&format!("(?i)^{}/?$", body))
            .map_err(|e| format!("url '{}' is not a valid pattern: {}", url, e))?;
        Ok(Self {
            source: url.to_string(),
            regex: Arc::new(regex),
            params,
            wildcard,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Match a request path, returning the extracted parameters.
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut values = BTreeMap::new();
        for name in &self.params {
            if let Some(value) = captures.name(name) {
                values.insert(name.clone(), value.as_str().to_string());
            }
        }
        if self.wildcard {
            let rest = captures.name(WILDCARD_GROUP).map(|m| m.as_str()).unwrap_or("");
            values.insert(WILDCARD_PARAM.to_string(), rest.to_string());
        }
        Some(values)
    }
}

fn is_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name != WILDCARD_GROUP && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let pattern = PathPattern::compile("/api/users").unwrap();
        assert!(pattern.is_match("/api/users"));
        assert!(pattern.is_match("/api/users/"));
        assert!(pattern.is_match("/API/Users"));
        assert!(!pattern.is_match("/api/users/1"));
        assert!(!pattern.is_match("/api"));
    }

    #[test]
    fn test_param_extraction() {
        let pattern = PathPattern::compile("/api/users/:id/books/:bookId").unwrap();
        let params = pattern.captures("/api/users/2/books/abc").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("2"));
        assert_eq!(params.get("bookId").map(String::as_str), Some("abc"));
        assert!(pattern.captures("/api/users/2/books").is_none());
        assert_eq!(pattern.params(), &["id".to_string(), "bookId".to_string()]);
    }

    #[test]
    fn test_trailing_wildcard() {
        let pattern = PathPattern::compile("/api/*").unwrap();
        assert!(pattern.is_match("/api"));
        assert!(pattern.is_match("/api/"));
        let params = pattern.captures("/api/users/1").unwrap();
        assert_eq!(params.get(WILDCARD_PARAM).map(String::as_str), Some("users/1"));
        assert!(!pattern.is_match("/other"));

        let any = PathPattern::compile("*").unwrap();
        assert!(any.is_match("/"));
        assert!(any.is_match("/anything/at/all"));
    }

    #[test]
    fn test_regex_characters_are_literal() {
        let pattern = PathPattern::compile("/files/report.json").unwrap();
        assert!(pattern.is_match("/files/report.json"));
        assert!(!pattern.is_match("/files/reportxjson"));
    }

    #[test]
    fn test_root_pattern() {
        let pattern = PathPattern::compile("/").unwrap();
        assert!(pattern.is_match("/"));
        assert!(!pattern.is_match("/a"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::compile("api/users").is_err());
        assert!(PathPattern::compile("/api/*/users").is_err());
        assert!(PathPattern::compile("/api/:").is_err());
        assert!(PathPattern::compile("/api/:1abc").is_err());
        assert!(PathPattern::compile("/api/:id/:id").is_err());
    }
}
