//! Validation report types.
//!
//! A [`ValidationReport`] lists every broken invariant of a container. It
//! prints as a grouped terminal listing and serializes to JSON for `--output
//! json`.

use serde::Serialize;
use std::fmt;

use crate::model::ElementKind;

/// Every issue found while validating one container, in discovery order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    /// True when no issue is an error. Warnings are allowed.
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    /// True when there are no issues of any severity.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn has(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// Issues raised against the element called `name`.
    pub fn for_element<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.issues
            .iter()
            .filter(move |i| matches!(&i.context, IssueContext::Element { name: n, .. } if n == name))
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return writeln!(f, "Validation passed: no issues found");
        }

        writeln!(
            f,
            "Validation completed with {} error(s) and {} warning(s):",
            self.error_count(),
            self.warning_count()
        )?;
        // errors first, each group in discovery order
        for severity in [Severity::Error, Severity::Warning] {
            for issue in self.issues.iter().filter(|i| i.severity == severity) {
                writeln!(f, "  {}", issue)?;
            }
        }
        Ok(())
    }
}

/// One broken invariant.
#[derive(Clone, Debug, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
    pub context: IssueContext,
}

impl ValidationIssue {
    pub fn error(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            context,
        }
    }

    pub fn warning(code: IssueCode, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message, context)
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        write!(f, "[{}] {:?} in {}: {}", tag, self.code, self.context, self.message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Suspicious but loadable.
    Warning,
    /// The container breaks an invariant.
    Error,
}

/// Stable issue codes, usable for filtering reports programmatically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum IssueCode {
    /// The same name is used by elements of different kinds.
    DuplicateName,
    /// An element or coordinate system name is empty.
    EmptyName,

    /// A transformation cannot consume its element's native axes.
    AxisMismatch,
    /// A transformation targets a declared system whose axes it does not
    /// produce.
    UnresolvedCoordinateSystem,
    /// A stored transformation is internally malformed.
    InvalidTransformation,

    /// A pyramid level disagrees with level 0.
    MultiscaleInconsistent,

    /// An annotation target names an element that does not exist.
    MissingAnnotationTarget,
    /// An annotation target names an image or a table.
    IncompatibleAnnotationKind,
    /// The region key column is missing or not a string column.
    MissingRegionKey,
    /// The instance key column is missing or not an integer column.
    MissingInstanceKey,
    /// A row names a region outside the annotation target.
    UnknownRegion,
    /// Several rows describe one geometry under a one-to-one policy.
    CardinalityViolation,
    /// A row references an id the annotated element does not have.
    UnknownInstance,

    /// Element data could not be loaded or is inconsistent.
    InvalidElementData,
}

/// Where an issue was found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum IssueContext {
    Container,
    Element { kind: ElementKind, name: String },
    CoordinateSystem { name: String },
}

impl IssueContext {
    pub fn element(kind: ElementKind, name: &str) -> Self {
        IssueContext::Element {
            kind,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for IssueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueContext::Container => write!(f, "container"),
            IssueContext::Element { kind, name } => write!(f, "{} '{}'", kind, name),
            IssueContext::CoordinateSystem { name } => write!(f, "coordinate system '{}'", name),
        }
    }
}
