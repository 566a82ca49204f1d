//! Core error types for phylodag-core.
//!
//! Uses `thiserror` for structured, matchable error variants. Two layers
//! exist: [`DensityError`] is what a distribution or function returns, and
//! [`CoreError`] is what the model graph returns. Only
//! [`CoreError::Evaluation`] is recoverable by rejecting the current proposal;
//! every other variant means the graph protocol itself was misused.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{NodeId, TreeNodeId};

/// Failure of a single density or function evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum DensityError {
    /// The value lies outside the support (negative branch length, a
    /// probability outside [0, 1], ...). Treated as zero probability.
    #[error("constraint violation: {reason}")]
    ConstraintViolation { reason: String },

    /// The computation itself broke down (singular matrix, NaN, ...).
    #[error("numerical failure: {reason}")]
    NumericalFailure { reason: String },
}

impl DensityError {
    pub fn constraint(reason: impl Into<String>) -> Self {
        DensityError::ConstraintViolation {
            reason: reason.into(),
        }
    }

    pub fn numerical(reason: impl Into<String>) -> Self {
        DensityError::NumericalFailure {
            reason: reason.into(),
        }
    }
}

/// Errors produced by the model graph and tree primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A node index was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A tree node index was not found in a tree.
    #[error("tree node not found: TreeNodeId({id})", id = id.0)]
    TreeNodeNotFound { id: TreeNodeId },

    /// An edge failed validation.
    #[error("invalid edge: {reason}")]
    InvalidEdge { reason: String },

    /// Adding a dependency would close a cycle.
    #[error("dependency {from} -> {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    /// Attempted to mutate a constant, clamped or deterministic node.
    #[error("node {id} cannot be mutated: {reason}")]
    ImmutableNode { id: NodeId, reason: String },

    /// A value had a different shape than the caller expected.
    #[error("type mismatch at node {node}: expected {expected}, got {got}")]
    TypeMismatch {
        node: NodeId,
        expected: &'static str,
        got: &'static str,
    },

    /// A distribution or function failed while evaluating a node.
    #[error("evaluation of node {node} failed: {source}")]
    Evaluation {
        node: NodeId,
        #[source]
        source: DensityError,
    },

    /// Sampling the initial value of a node under construction failed.
    #[error("initial draw from {distribution} failed: {source}")]
    InitialDraw {
        distribution: String,
        #[source]
        source: DensityError,
    },

    /// The touch/keep/restore protocol or a tree invariant was violated.
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },
}

impl CoreError {
    /// Returns `true` if the error only invalidates the current proposal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CoreError::Evaluation { .. })
    }

    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        CoreError::InvariantViolation {
            reason: reason.into(),
        }
    }
}
