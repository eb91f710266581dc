//! The merge pass: apply one rule package to a graph until nothing changes.
//!
//! Each scan visits the nodes that were live when the scan started, in
//! topological order. For every node the package's rules are tried in
//! registration order and the first rule whose predicate holds is used; no
//! other rule is consulted for that node in that scan. The rewrite then goes
//! one of three ways:
//!
//! - **success**: the replacement is validated and wired in by
//!   [`replace_node`];
//! - **declined**: logged and left alone; the next scan tries again;
//! - **invariant violation** (from the rule, or a replacement that fails
//!   validation): reported and the node is skipped for the rest of the run.
//!
//! A scan with at least one success is followed by another scan. A scan
//! without one is the fixpoint, and whatever declined in it is reported as
//! unconverted. Running out of scans is [`PassError::NonTermination`].

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use opmerge_core::{ConvertGraph, NodeId};

use crate::diagnostics::{AppliedRewrite, Diagnostic, DiagnosticKind, PassReport};
use crate::error::PassError;
use crate::registry::{self, RuleRegistry};
use crate::rewire::{replace_node, ReplaceError};
use crate::rule::{Rule, RewriteError};

/// Merge pass configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// Maximum number of scans that may rewrite something. A scan that
    /// changes nothing always ends the pass, so 0 still lets an already
    /// converged graph through. Default: 100.
    pub max_iterations: usize,
    /// Retire producers left without consumers after a replacement.
    /// Default: true.
    pub reclaim_orphans: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        PassConfig {
            max_iterations: 100,
            reclaim_orphans: true,
        }
    }
}

/// Runs rule packages from a registry over graphs.
pub struct MergePass<'r> {
    registry: &'r RuleRegistry,
    config: PassConfig,
}

/// Per-scan bookkeeping.
#[derive(Default)]
struct Scan {
    rewrites: usize,
    declined: Vec<Diagnostic>,
}

impl<'r> MergePass<'r> {
    /// A pass over `registry` with the default configuration.
    pub fn new(registry: &'r RuleRegistry) -> Self {
        MergePass {
            registry,
            config: PassConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PassConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PassConfig {
        &self.config
    }

    /// Applies `package` to `graph` until a fixpoint.
    ///
    /// Per-node problems end up in the report's diagnostics. Only
    /// non-termination, a cyclic input graph, or a failure while wiring in a
    /// validated replacement return `Err`.
    pub fn run(&self, package: &str, graph: &mut ConvertGraph) -> Result<PassReport, PassError> {
        let rules = self.registry.lookup(package).unwrap_or_default();
        let mut report = PassReport::new(package);
        let mut failed: HashSet<NodeId> = HashSet::new();

        if rules.is_empty() {
            tracing::debug!(package, "no rules registered; nothing to merge");
        }

        loop {
            report.iterations += 1;

            let scan = self.scan(package, &rules, graph, &mut failed, &mut report)?;
            if scan.rewrites == 0 {
                report.diagnostics.extend(scan.declined);
                break;
            }

            if report.iterations >= self.config.max_iterations {
                let last = report.applied.last().cloned();
                tracing::error!(
                    package,
                    iterations = report.iterations,
                    last = ?last.as_ref().map(|l| l.to_string()),
                    "merge pass did not reach a fixpoint"
                );
                return Err(PassError::NonTermination {
                    package: package.to_string(),
                    iterations: report.iterations,
                    last,
                });
            }
        }

        // A failed node that was later reclaimed as an orphan is gone from
        // the graph and no longer counts as unconverted.
        report.diagnostics.retain(|d| {
            let live = graph.contains(d.node);
            if !live {
                tracing::debug!(node = %d.node_name, rule = %d.rule, package, "dropping diagnostic of reclaimed node");
            }
            live
        });

        tracing::info!(
            package,
            iterations = report.iterations,
            rewrites = report.rewrites(),
            unconverted = report.diagnostics.len(),
            "merge pass finished"
        );
        Ok(report)
    }

    /// One full scan over the nodes live at its start.
    fn scan(
        &self,
        package: &str,
        rules: &[Arc<dyn Rule>],
        graph: &mut ConvertGraph,
        failed: &mut HashSet<NodeId>,
        report: &mut PassReport,
    ) -> Result<Scan, PassError> {
        let mut scan = Scan::default();
        if rules.is_empty() {
            return Ok(scan);
        }

        for id in graph.topological_order()? {
            // Retired earlier in this scan, or given up on.
            if !graph.contains(id) || failed.contains(&id) {
                continue;
            }
            let Some(rule) = rules.iter().find(|rule| rule.matches(graph, id)) else {
                continue;
            };
            let node_name = graph
                .node(id)
                .map(|n| n.name.clone())
                .unwrap_or_default();

            let outcome = rule
                .rewrite(graph, id)
                .map_err(|err| match err {
                    RewriteError::Declined { reason } => Miss::Declined(reason),
                    RewriteError::Invariant { reason } => Miss::Invariant(reason),
                })
                .and_then(|replacement| {
                    replace_node(graph, id, replacement, self.config.reclaim_orphans).map_err(
                        |err| match err {
                            ReplaceError::Invalid { reason } => Miss::Invariant(reason),
                            ReplaceError::Rewire(source) => Miss::Fatal(source),
                        },
                    )
                });

            match outcome {
                Ok(rewired) => {
                    let applied = AppliedRewrite {
                        node: id,
                        node_name,
                        rule: rule.name().to_string(),
                        package: package.to_string(),
                        replacement: rewired.replacement,
                        iteration: report.iterations,
                    };
                    tracing::debug!(
                        node = %applied.node_name,
                        rule = %applied.rule,
                        package,
                        replacement = %rewired.replacement,
                        "applied rewrite"
                    );
                    report.applied.push(applied);
                    scan.rewrites += 1;
                }
                Err(Miss::Declined(reason)) => {
                    tracing::warn!(
                        node = %node_name,
                        rule = rule.name(),
                        package,
                        "rewrite declined, retrying next scan: {}",
                        reason
                    );
                    scan.declined.push(Diagnostic {
                        node: id,
                        node_name,
                        rule: rule.name().to_string(),
                        package: package.to_string(),
                        kind: DiagnosticKind::Declined,
                        message: reason,
                    });
                }
                Err(Miss::Invariant(reason)) => {
                    tracing::error!(
                        node = %node_name,
                        rule = rule.name(),
                        package,
                        "rewrite invariant violated: {}",
                        reason
                    );
                    failed.insert(id);
                    report.diagnostics.push(Diagnostic {
                        node: id,
                        node_name,
                        rule: rule.name().to_string(),
                        package: package.to_string(),
                        kind: DiagnosticKind::InvariantViolation,
                        message: reason,
                    });
                }
                Err(Miss::Fatal(source)) => {
                    tracing::error!(node = %node_name, rule = rule.name(), package, "rewiring failed: {}", source);
                    return Err(PassError::Rewire { node: id, source });
                }
            }
        }

        Ok(scan)
    }
}

/// Why a matched node was not replaced.
enum Miss {
    Declined(String),
    Invariant(String),
    Fatal(opmerge_core::CoreError),
}

/// Runs `package` from the process-wide registry with the default
/// configuration.
pub fn run_pass(package: &str, graph: &mut ConvertGraph) -> Result<PassReport, PassError> {
    MergePass::new(registry::global()).run(package, graph)
}
