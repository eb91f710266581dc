//! Rule-based graph rewriting for the model converter.
//!
//! Rule packages register [`Rule`]s into a [`RuleRegistry`]; a [`MergePass`]
//! applies one package to a [`ConvertGraph`](opmerge_core::ConvertGraph)
//! until no rule fires, rewiring consumers of each replaced node through
//! [`replace_node`].

pub mod diagnostics;
pub mod error;
pub mod extra;
pub mod mapping;
pub mod pass;
pub mod registry;
pub mod rewire;
pub mod rule;

// Re-export commonly used types
pub use diagnostics::{AppliedRewrite, Diagnostic, DiagnosticKind, PassReport, PassStatus};
pub use error::PassError;
pub use extra::{ExtraManager, ExtraRule, ExtraTransform, TENSORFLOW, TF_EXTRA_PACKAGE};
pub use mapping::{register_mappings, KindMapRule, KindMapping};
pub use pass::{run_pass, MergePass, PassConfig};
pub use registry::{global, register, RuleRegistry};
pub use rewire::{replace_node, ReplaceError, Rewired};
pub use rule::{Input, Planned, PlannedNode, Replacement, ReplacementBuilder, RewriteError, Rule};
