//! Pass-level errors. Per-node problems are diagnostics, not errors; these
//! abort the whole pass.

use thiserror::Error;

use opmerge_core::{CoreError, NodeId};

use crate::diagnostics::AppliedRewrite;

/// Errors that abort a merge pass.
#[derive(Debug, Error)]
pub enum PassError {
    /// The pass kept finding rewrites after `iterations` scans. Usually a
    /// rule whose output matches itself, or two rules undoing each other.
    #[error(
        "merge pass '{package}' did not reach a fixpoint after {iterations} scans{suffix}",
        suffix = last_rewrite_suffix(.last)
    )]
    NonTermination {
        package: String,
        iterations: usize,
        last: Option<AppliedRewrite>,
    },

    /// A validated replacement could not be wired in. The graph may hold a
    /// partial rewiring and must not be used further.
    #[error("rewiring node {node} failed: {source}")]
    Rewire {
        node: NodeId,
        #[source]
        source: CoreError,
    },

    /// The input graph itself is unusable (for example, cyclic).
    #[error(transparent)]
    Graph(#[from] CoreError),
}

fn last_rewrite_suffix(last: &Option<AppliedRewrite>) -> String {
    last.as_ref()
        .map(|l| format!("; last rewrite: {}", l))
        .unwrap_or_default()
}
