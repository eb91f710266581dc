pub mod edge;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;

// Re-export commonly used types
pub use edge::Binding;
pub use error::CoreError;
pub use graph::{Consumer, ConvertGraph, MAX_INPUTS};
pub use id::{EdgeId, NodeId, OutputRef};
pub use node::{Node, NodeKind};
