//! Build output parsing and issue documentation.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::snapshot::{IssueSeverity, IssueStatus, KnownIssue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// A located compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub level: DiagnosticLevel,
    pub message: String,
}

/// Likely cause of a build error, from its message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCause {
    MissingImport,
    TypeMismatch,
    BorrowCheck,
    Syntax,
    Unknown,
}

impl RootCause {
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("cannot find")
            || lower.contains("unresolved import")
            || lower.contains("not found in")
        {
            Self::MissingImport
        } else if lower.contains("mismatched types") || lower.contains("incompatible types") {
            Self::TypeMismatch
        } else if lower.contains("borrow") || lower.contains("moved value") {
            Self::BorrowCheck
        } else if lower.contains("expected") || lower.contains("syntax") {
            Self::Syntax
        } else {
            Self::Unknown
        }
    }

    pub fn resolution_steps(self) -> Vec<String> {
        let steps: &[&str] = match self {
            Self::MissingImport => &[
                "Check the `use` paths for the missing item",
                "Confirm the defining crate is listed in Cargo.toml",
            ],
            Self::TypeMismatch => &[
                "Compare the expected and found types in the diagnostic",
                "Add the missing conversion or adjust the signature",
            ],
            Self::BorrowCheck => &[
                "Shorten the conflicting borrow or clone the value",
                "Re-check ownership across the reported lines",
            ],
            Self::Syntax => &["Fix the token the compiler points at"],
            Self::Unknown => &["Read the full compiler output for this location"],
        };
        steps.iter().map(|s| (*s).to_string()).collect()
    }
}

#[allow(clippy::expect_used)]
static LOCATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w./\\-]+\.[A-Za-z0-9]+):(\d+):(?:\d+:)?[ \t]*([^\r\n]*)")
        .expect("diagnostic pattern is a literal")
});

/// Extract located diagnostics from combined build output.
///
/// Messages that start with `warning` are warnings; everything else that
/// carries a location is an error.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let caps = LOCATED_RE.captures(line)?;
            let file = caps.get(1)?.as_str().to_string();
            let line_no = caps.get(2)?.as_str().parse().ok()?;
            let message = caps.get(3).map_or("", |m| m.as_str()).trim().to_string();
            let level = if message.to_ascii_lowercase().starts_with("warning") {
                DiagnosticLevel::Warning
            } else {
                DiagnosticLevel::Error
            };
            Some(Diagnostic {
                file,
                line: line_no,
                level,
                message,
            })
        })
        .collect()
}

/// Known issues for every error diagnostic, with suggested resolution steps.
pub fn document_issues(diagnostics: &[Diagnostic]) -> Vec<KnownIssue> {
    diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .map(|d| {
            let cause = RootCause::classify(&d.message);
            KnownIssue {
                title: format!("Compilation error at {}:{}", d.file, d.line),
                severity: IssueSeverity::High,
                status: IssueStatus::Open,
                description: Some(d.message.clone()),
                resolution_steps: cause.resolution_steps(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const OUTPUT: &str = "\
    Checking demo v0.1.0 (/work/demo)
src/main.rs:3:5: error[E0425]: cannot find value `x` in this scope
src/lib.rs:10:9: warning: unused variable: `y`
src/store/mod.rs:42:17: error[E0308]: mismatched types
warning: `demo` (lib) generated 1 warning
error: could not compile `demo` due to 2 previous errors
";

    #[test]
    fn parses_located_errors_and_warnings() {
        let diagnostics = parse_diagnostics(OUTPUT);
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(
            diagnostics[0],
            Diagnostic {
                file: "src/main.rs".to_string(),
                line: 3,
                level: DiagnosticLevel::Error,
                message: "error[E0425]: cannot find value `x` in this scope".to_string(),
            }
        );
        assert_eq!(diagnostics[1].level, DiagnosticLevel::Warning);
        assert_eq!(diagnostics[2].file, "src/store/mod.rs");
        assert_eq!(diagnostics[2].line, 42);
    }

    #[test]
    fn classifies_common_root_causes() {
        assert_eq!(
            RootCause::classify("cannot find symbol Foo"),
            RootCause::MissingImport
        );
        assert_eq!(
            RootCause::classify("error[E0308]: mismatched types"),
            RootCause::TypeMismatch
        );
        assert_eq!(
            RootCause::classify("cannot borrow `v` as mutable"),
            RootCause::BorrowCheck
        );
        assert_eq!(RootCause::classify("something odd"), RootCause::Unknown);
    }

    #[test]
    fn documents_one_issue_per_error() {
        let issues = document_issues(&parse_diagnostics(OUTPUT));
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].title, "Compilation error at src/main.rs:3");
        assert_eq!(issues[0].severity, IssueSeverity::High);
        assert!(issues[0].is_open());
        assert!(!issues[1].resolution_steps.is_empty());
    }
}
