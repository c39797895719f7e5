//! Collect-all validation report for mock set builds.

use serde::Serialize;
use std::fmt;

/// Category of a mock definition problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueKind {
    MissingId,
    DuplicateRoute,
    DuplicateVariant,
    InvalidUrl,
    InvalidMethod,
    /// Variant `type` is not registered.
    HandlerNotFound,
    InvalidHandlerOptions,
    DuplicateCollection,
    UnknownParent,
    ForwardReference,
    InheritanceCycle,
    InvalidSelection,
    DuplicateSelection,
    UnknownRoute,
    UnknownVariant,
    /// Route or variant `delay` is not a non-negative integer.
    InvalidDelay,
}

impl IssueKind {
    pub fn code(&self) -> &'static str {
        match self {
            IssueKind::MissingId => "E001",
            IssueKind::DuplicateRoute => "E002",
            IssueKind::DuplicateVariant => "E003",
            IssueKind::InvalidUrl => "E004",
            IssueKind::InvalidMethod => "E005",
            IssueKind::HandlerNotFound => "E006",
            IssueKind::InvalidHandlerOptions => "E007",
            IssueKind::DuplicateCollection => "E008",
            IssueKind::UnknownParent => "E009",
            IssueKind::ForwardReference => "E010",
            IssueKind::InheritanceCycle => "E011",
            IssueKind::InvalidSelection => "E012",
            IssueKind::DuplicateSelection => "E013",
            IssueKind::UnknownRoute => "E014",
            IssueKind::UnknownVariant => "E015",
            IssueKind::InvalidDelay => "E016",
        }
    }
}

/// A single problem found while building a mock set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    /// Location within the definitions, e.g. `routes[1].variants[0]`.
    pub location: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind.code(), self.location, self.message)
    }
}

/// Every problem found in one build. The build publishes nothing when this is returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|issue| issue.kind == kind)
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|issue| issue.kind == kind).count()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mock definitions are invalid ({} problem(s)): ", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Accumulates issues during a build.
#[derive(Debug, Default)]
pub(crate) struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub(crate) fn add(&mut self, kind: IssueKind, location: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            kind,
            location: location.into(),
            message: message.into(),
        });
    }

    pub(crate) fn into_result<T>(self, value: T) -> Result<T, ValidationError> {
        if self.issues.is_empty() {
            Ok(value)
        } else {
            Err(ValidationError {
                issues: self.issues,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_collects_all_issues() {
        let mut report = ValidationReport::default();
        report.add(IssueKind::DuplicateRoute, "routes[1]", "route 'a' is duplicated");
        report.add(IssueKind::HandlerNotFound, "routes[2].variants[0]", "no handler 'xml'");
        let err = report.into_result(()).unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert!(err.has(IssueKind::HandlerNotFound));
        assert_eq!(err.count(IssueKind::DuplicateRoute), 1);
        let message = err.to_string();
        assert!(message.contains("2 problem(s)"));
        assert!(message.contains("[E006] routes[2].variants[0]: no handler 'xml'"));
    }

    #[test]
    fn test_empty_report_is_ok() {
        assert_eq!(ValidationReport::default().into_result(5).unwrap(), 5);
    }
}
