pub mod distribution;
pub mod edge;
pub mod error;
pub mod function;
pub mod graph;
pub mod id;
pub mod node;
pub mod tree;
pub mod value;

// Re-export commonly used types
pub use distribution::{Distribution, Exponential, Normal, Uniform, UniformTimeTree};
pub use error::{CoreError, DensityError};
pub use function::{Exp, FnFunction, Function, Product, Sum, TreeLength};
pub use graph::ModelGraph;
pub use id::{NodeId, TreeNodeId};
pub use node::{GraphNode, NodeKind, NodeState};
pub use tree::{ExchangeRecord, RegraftRecord, TimeTree, TreeBuilder, TreeNode};
pub use value::Value;
