//! Pass diagnostics and the report handed back to the converter driver.
//!
//! Every declined or failed rewrite is attributable to one node and one rule.
//! [`Diagnostic`] carries that attribution in structured fields for JSON
//! output and renders as one human-readable line for conversion logs.

use std::fmt;

use serde::{Deserialize, Serialize};

use opmerge_core::NodeId;

/// What went wrong for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// The rule matched but its rewrite still declined when the pass reached
    /// its fixpoint. The node was not converted.
    Declined,
    /// The rule broke its contract for this node. The node was skipped for
    /// the rest of the pass.
    InvariantViolation,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Declined => f.write_str("declined"),
            DiagnosticKind::InvariantViolation => f.write_str("invariant violation"),
        }
    }
}

/// A per-node conversion problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The node the rule was applied to.
    pub node: NodeId,
    /// That node's diagnostic name.
    pub node_name: String,
    /// Name of the rule that matched.
    pub rule: String,
    /// Package the pass was running.
    pub package: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: node '{}' ({}) rule '{}' in package '{}': {}",
            self.kind, self.node_name, self.node, self.rule, self.package, self.message
        )
    }
}

/// A successful rewrite, as recorded in the pass log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRewrite {
    /// The node that was replaced (now retired).
    pub node: NodeId,
    pub node_name: String,
    pub rule: String,
    pub package: String,
    /// The replacement root that took over the node's consumers.
    pub replacement: NodeId,
    /// Scan in which the rewrite happened, starting at 1.
    pub iteration: usize,
}

impl fmt::Display for AppliedRewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node '{}' ({}) -> {} by rule '{}' in package '{}' (scan {})",
            self.node_name, self.node, self.replacement, self.rule, self.package, self.iteration
        )
    }
}

/// Outcome summary in the shape the converter driver reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassStatus {
    /// Every matched node converted.
    Success,
    /// `(node name, reason)` for every node left unconverted.
    Failed(Vec<(String, String)>),
}

/// Result of a completed merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    pub package: String,
    /// Number of full scans performed, including the final no-change scan.
    pub iterations: usize,
    /// Successful rewrites in application order.
    pub applied: Vec<AppliedRewrite>,
    /// Declined-at-fixpoint and invariant-violation records.
    pub diagnostics: Vec<Diagnostic>,
}

impl PassReport {
    pub fn new(package: &str) -> Self {
        PassReport {
            package: package.to_string(),
            ..PassReport::default()
        }
    }

    /// Number of successful rewrites.
    pub fn rewrites(&self) -> usize {
        self.applied.len()
    }

    pub fn is_success(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn status(&self) -> PassStatus {
        if self.diagnostics.is_empty() {
            PassStatus::Success
        } else {
            PassStatus::Failed(
                self.diagnostics
                    .iter()
                    .map(|d| (d.node_name.clone(), format!("{}: {}", d.kind, d.message)))
                    .collect(),
            )
        }
    }

    /// Diagnostics of one kind.
    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declined() -> Diagnostic {
        Diagnostic {
            node: NodeId::new(3, 7),
            node_name: "n2".into(),
            rule: "StridedSlice".into(),
            package: "TFExtra".into(),
            kind: DiagnosticKind::Declined,
            message: "input 1 is not const".into(),
        }
    }

    #[test]
    fn diagnostic_display() {
        insta::assert_snapshot!(
            declined().to_string(),
            @"declined: node 'n2' (3v7) rule 'StridedSlice' in package 'TFExtra': input 1 is not const"
        );
    }

    #[test]
    fn empty_report_is_success() {
        let report = PassReport::new("P");
        assert!(report.is_success());
        assert_eq!(report.status(), PassStatus::Success);
        assert_eq!(report.rewrites(), 0);
    }

    #[test]
    fn status_lists_unconverted_nodes() {
        let mut report = PassReport::new("TFExtra");
        report.diagnostics.push(declined());
        assert_eq!(
            report.status(),
            PassStatus::Failed(vec![(
                "n2".to_string(),
                "declined: input 1 is not const".to_string()
            )])
        );
        assert_eq!(report.diagnostics_of(DiagnosticKind::Declined).count(), 1);
        assert_eq!(
            report
                .diagnostics_of(DiagnosticKind::InvariantViolation)
                .count(),
            0
        );
    }

    #[test]
    fn diagnostic_kind_serializes_snake_case() {
        let json = serde_json::to_string(&DiagnosticKind::InvariantViolation).unwrap();
        assert_eq!(json, "\"invariant_violation\"");
    }
}
