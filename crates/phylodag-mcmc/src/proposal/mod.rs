//! Proposals: self-contained mutation strategies bound to stochastic nodes.
//!
//! A [`Proposal`] goes through one lifecycle per move attempt:
//!
//! - [`prepare`](Proposal::prepare): optional setup such as picking one node
//!   from a registered set. Never mutates the graph.
//! - [`propose`](Proposal::propose): mutates the graph through
//!   [`ModelGraph::value_mut`] (so every mutated node is touched first) and
//!   returns the log Hastings ratio, or [`ProposalOutcome::Failed`] with the
//!   graph untouched when no valid mutation exists.
//! - [`undo`](Proposal::undo) on rejection: reverses structural side effects
//!   the graph snapshot does not cover. Runs before the graph is restored.
//! - [`cleanup`](Proposal::cleanup) on acceptance: drops per-attempt state.

pub mod scalar;
pub mod tree;

use std::fmt;

use phylodag_core::{CoreError, ModelGraph, NodeId, Value};
use rand::RngCore;

pub use scalar::{ScalingProposal, SlidingProposal};
pub use tree::{NarrowExchangeProposal, PruneAndRegraftProposal};

/// Result of [`Proposal::propose`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProposalOutcome {
    /// The graph was mutated; `ln_hastings_ratio` is
    /// `ln q(old | new) - ln q(new | old)`.
    Proposed { ln_hastings_ratio: f64 },
    /// No valid mutation exists. The graph was not touched.
    Failed,
}

/// A mutation strategy for one or more stochastic nodes.
pub trait Proposal: fmt::Debug + Send {
    fn name(&self) -> &str;

    /// The model-graph nodes this proposal may mutate.
    fn nodes(&self) -> &[NodeId];

    fn prepare(&mut self, _graph: &ModelGraph, _rng: &mut dyn RngCore) -> Result<(), CoreError> {
        Ok(())
    }

    fn propose(
        &mut self,
        graph: &mut ModelGraph,
        rng: &mut dyn RngCore,
    ) -> Result<ProposalOutcome, CoreError>;

    /// Exact inverse of the last `propose`'s structural side effects.
    /// A no-op for proposals that only change snapshotted values.
    fn undo(&mut self, _graph: &mut ModelGraph) -> Result<(), CoreError> {
        Ok(())
    }

    fn cleanup(&mut self) {}

    /// Current value of the tuning parameter, if the proposal has one.
    fn tuning_parameter(&self) -> Option<f64> {
        None
    }

    /// Adjusts the tuning parameter towards `target` given the acceptance
    /// rate observed since the last call.
    fn tune(&mut self, _acceptance_rate: f64, _target: f64) {}
}

/// Tuning update for a step-size parameter.
///
/// Grows the parameter when acceptance is above target and shrinks it when
/// below, proportionally to the distance from the target.
pub fn tuned(parameter: f64, acceptance_rate: f64, target: f64) -> f64 {
    if acceptance_rate > target {
        parameter * (1.0 + (acceptance_rate - target) / (1.0 - target))
    } else {
        parameter / (2.0 - acceptance_rate / target)
    }
}

/// Picks one node uniformly from a non-empty set.
pub(crate) fn pick(nodes: &[NodeId], rng: &mut dyn RngCore) -> Option<NodeId> {
    use rand::Rng;
    if nodes.is_empty() {
        return None;
    }
    Some(nodes[rng.gen_range(0..nodes.len())])
}

/// Reads the current real value of a stochastic node without touching it.
pub(crate) fn current_real(graph: &ModelGraph, node: NodeId) -> Result<f64, CoreError> {
    let value = graph.node(node)?.cached_value();
    match value {
        Some(Value::Real(x)) => Ok(*x),
        Some(other) => Err(CoreError::TypeMismatch {
            node,
            expected: "Real",
            got: other.kind(),
        }),
        None => Err(CoreError::TypeMismatch {
            node,
            expected: "Real",
            got: "uncomputed",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_moves_towards_target() {
        assert!(tuned(1.0, 0.8, 0.44) > 1.0);
        assert!(tuned(1.0, 0.1, 0.44) < 1.0);
        assert_eq!(tuned(1.0, 0.44, 0.44), 1.0);
        // Zero acceptance halves the step.
        assert_eq!(tuned(1.0, 0.0, 0.44), 0.5);
    }

    #[test]
    fn current_real_rejects_trees() {
        let mut g = ModelGraph::new();
        let mut tree = phylodag_core::TreeBuilder::new();
        let a = tree.tip("A", 0.0);
        let b = tree.tip("B", 0.0);
        tree.join(&[a, b], 1.0).unwrap();
        let id = g.add_constant(tree.build().unwrap());
        assert!(matches!(
            current_real(&g, id),
            Err(CoreError::TypeMismatch { got: "Tree", .. })
        ));
    }
}
