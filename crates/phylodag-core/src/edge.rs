//! Dependency edges of the model graph.
//!
//! An edge points from a parent (input) to a child (consumer). The child
//! owns the ordered parent list; edges exist so that dirty propagation can
//! walk from a node to its consumers in O(children).

use serde::{Deserialize, Serialize};

/// A parent -> child dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Argument position of the parent in the child's parent list.
    pub slot: u16,
}
