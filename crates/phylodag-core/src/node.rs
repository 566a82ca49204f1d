//! Model-graph nodes and their per-iteration state machine.
//!
//! A [`GraphNode`] wraps one [`NodeKind`] (constant, deterministic or
//! stochastic) with its ordered parent list and the bookkeeping of the
//! touch/keep/restore protocol. Child back-references are not stored here;
//! they are the outgoing edges of the graph arena owned by
//! [`ModelGraph`](crate::graph::ModelGraph).
//!
//! State transitions within one proposal cycle:
//!
//! ```text
//! Clean --touch--> Touched --recompute--> Recomputed --touch--> Touched
//!   ^                 |                       |
//!   +----keep/restore-+-----------------------+
//! ```
//!
//! The first touch of a cycle snapshots the value (unless it is structural)
//! and the cached log-probability. Later touches in the same cycle keep that
//! first snapshot, so restore always returns to the pre-iteration state.
//! A structural value is snapshotted only when it is replaced outright;
//! edits in place are reverted by the proposal that made them.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::distribution::Distribution;
use crate::error::CoreError;
use crate::function::Function;
use crate::id::NodeId;
use crate::value::Value;

/// Where a node stands in the current proposal cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Cached value and log-probability agree with all ancestors.
    Clean,
    /// An ancestor (or the node itself) changed; caches are stale.
    Touched,
    /// Caches were refreshed this cycle but not yet committed.
    Recomputed,
}

/// What provides a node's value.
#[derive(Debug)]
pub enum NodeKind {
    /// Immutable value.
    Constant { value: Value },
    /// Pure function of the parents. `value` is the cached result.
    Deterministic {
        function: Box<dyn Function>,
        value: Option<Value>,
    },
    /// Random variable with a distribution over the parents.
    Stochastic {
        distribution: Box<dyn Distribution>,
        value: Value,
        clamped: bool,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Constant { .. } => "constant",
            NodeKind::Deterministic { .. } => "deterministic",
            NodeKind::Stochastic { .. } => "stochastic",
        }
    }
}

/// One node of the model graph.
#[derive(Debug)]
pub struct GraphNode {
    pub(crate) id: NodeId,
    pub(crate) name: Option<String>,
    pub(crate) kind: NodeKind,
    pub(crate) parents: SmallVec<[NodeId; 4]>,
    pub(crate) state: NodeState,
    pub(crate) stored_value: Option<Value>,
    pub(crate) stored_ln_probability: Option<f64>,
    pub(crate) cached_ln_probability: Option<f64>,
    /// A structural value was handed out for in-place editing this cycle.
    pub(crate) edited_in_place: bool,
}

impl GraphNode {
    pub(crate) fn new(id: NodeId, kind: NodeKind, parents: SmallVec<[NodeId; 4]>) -> Self {
        GraphNode {
            id,
            name: None,
            kind,
            parents,
            state: NodeState::Clean,
            stored_value: None,
            stored_ln_probability: None,
            cached_ln_probability: None,
            edited_in_place: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Parents in argument order.
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_clean(&self) -> bool {
        self.state == NodeState::Clean
    }

    pub fn is_stochastic(&self) -> bool {
        matches!(self.kind, NodeKind::Stochastic { .. })
    }

    pub fn is_clamped(&self) -> bool {
        matches!(self.kind, NodeKind::Stochastic { clamped: true, .. })
    }

    /// The value as currently cached, without recomputation.
    ///
    /// `None` for a deterministic node that has never been computed.
    pub fn cached_value(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Constant { value } => Some(value),
            NodeKind::Deterministic { value, .. } => value.as_ref(),
            NodeKind::Stochastic { value, .. } => Some(value),
        }
    }

    /// The log-probability as currently cached, without recomputation.
    pub fn cached_ln_probability(&self) -> Option<f64> {
        match self.kind {
            NodeKind::Stochastic { .. } => self.cached_ln_probability,
            _ => Some(0.0),
        }
    }

    /// Returns `true` if the node's caches must be refreshed before use.
    pub(crate) fn needs_recompute(&self) -> bool {
        match &self.kind {
            NodeKind::Constant { .. } => false,
            NodeKind::Deterministic { value, .. } => {
                self.state == NodeState::Touched || value.is_none()
            }
            NodeKind::Stochastic { .. } => {
                self.state == NodeState::Touched || self.cached_ln_probability.is_none()
            }
        }
    }

    /// Marks the node stale. Returns `true` if this is the first touch of
    /// the cycle (the node was Clean).
    pub(crate) fn touch(&mut self) -> bool {
        let first = self.state == NodeState::Clean;
        if first {
            self.stored_value = match &self.kind {
                NodeKind::Constant { .. } => None,
                NodeKind::Deterministic { value, .. } => value.clone(),
                NodeKind::Stochastic { clamped: true, .. } => None,
                NodeKind::Stochastic { value, .. } if value.is_structural() => None,
                NodeKind::Stochastic { value, .. } => Some(value.clone()),
            };
            self.stored_ln_probability = self.cached_ln_probability;
        }
        self.state = NodeState::Touched;
        first
    }

    /// Replaces the value of a touched stochastic node outright.
    ///
    /// The first replacement of a structural value keeps the outgoing value
    /// as the snapshot. Once the structure has been edited in place there is
    /// no pre-iteration copy left to keep, so the replacement is refused.
    pub(crate) fn replace_value(&mut self, new: Value) -> Result<(), CoreError> {
        let id = self.id;
        let NodeKind::Stochastic { value, .. } = &mut self.kind else {
            return Err(CoreError::invariant(format!("node {} is not stochastic", id)));
        };
        if value.is_structural() && self.stored_value.is_none() {
            if self.edited_in_place {
                return Err(CoreError::ImmutableNode {
                    id,
                    reason: "structure was already edited in place this cycle".into(),
                });
            }
            self.stored_value = Some(std::mem::replace(value, new));
        } else {
            *value = new;
        }
        Ok(())
    }

    /// Commits the current caches. A no-op on a Clean node.
    pub(crate) fn keep(&mut self) {
        self.edited_in_place = false;
        self.stored_value = None;
        self.stored_ln_probability = None;
        self.state = NodeState::Clean;
    }

    /// Reinstates the first-touch snapshot and marks the node Clean.
    ///
    /// A structural value edited in place must already have been reverted
    /// by the proposal that edited it.
    pub(crate) fn restore(&mut self) {
        if self.state == NodeState::Clean {
            return;
        }
        self.edited_in_place = false;
        let stored = self.stored_value.take();
        match &mut self.kind {
            NodeKind::Constant { .. } => {}
            // A deterministic node first touched before it was ever computed
            // goes back to "never computed".
            NodeKind::Deterministic { value, .. } => *value = stored,
            NodeKind::Stochastic { value, .. } => {
                if let Some(stored) = stored {
                    *value = stored;
                }
            }
        }
        self.cached_ln_probability = self.stored_ln_probability.take();
        self.state = NodeState::Clean;
    }
}
