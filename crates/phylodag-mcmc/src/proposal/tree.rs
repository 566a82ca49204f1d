//! Topology proposals on time-tree nodes.
//!
//! Trees edited in place are not snapshotted by the graph, so both
//! proposals keep the record returned by the structural primitive and replay
//! it backwards in `undo`. Ages never change, so neither proposal needs a
//! Hastings correction.

use phylodag_core::{
    CoreError, ExchangeRecord, ModelGraph, NodeId, RegraftRecord, TimeTree, TreeNodeId,
};
use rand::{Rng, RngCore};

use super::{pick, Proposal, ProposalOutcome};

fn current_tree(graph: &ModelGraph, node: NodeId) -> Result<&TimeTree, CoreError> {
    let value = graph.node(node)?.cached_value();
    match value {
        Some(v) => v.expect_tree(node),
        None => Err(CoreError::TypeMismatch {
            node,
            expected: "Tree",
            got: "uncomputed",
        }),
    }
}

fn pick_tree_node(candidates: &[TreeNodeId], rng: &mut dyn RngCore) -> Option<TreeNodeId> {
    if candidates.is_empty() {
        None
    } else {
        Some(candidates[rng.gen_range(0..candidates.len())])
    }
}

/// Fixed-node-height prune and regraft.
///
/// Picks a tree node whose parent is not the root, prunes the parent
/// together with that node, and regrafts it onto a branch that crosses the
/// parent's age. Fails when the tree has fewer than three tips or no branch
/// qualifies.
#[derive(Debug, Clone)]
pub struct PruneAndRegraftProposal {
    nodes: Vec<NodeId>,
    chosen: Option<NodeId>,
    record: Option<(NodeId, RegraftRecord)>,
}

impl PruneAndRegraftProposal {
    pub fn new(tree: NodeId) -> Self {
        Self::over(vec![tree])
    }

    /// Binds the proposal to several tree nodes; one is picked per attempt.
    pub fn over(trees: Vec<NodeId>) -> Self {
        PruneAndRegraftProposal {
            nodes: trees,
            chosen: None,
            record: None,
        }
    }

    /// Record of the last successful proposal, until cleanup or undo.
    pub fn last_record(&self) -> Option<&RegraftRecord> {
        self.record.as_ref().map(|(_, r)| r)
    }
}

impl Proposal for PruneAndRegraftProposal {
    fn name(&self) -> &str {
        "FNPR"
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn prepare(&mut self, _graph: &ModelGraph, rng: &mut dyn RngCore) -> Result<(), CoreError> {
        self.chosen = pick(&self.nodes, rng);
        self.record = None;
        Ok(())
    }

    fn propose(
        &mut self,
        graph: &mut ModelGraph,
        rng: &mut dyn RngCore,
    ) -> Result<ProposalOutcome, CoreError> {
        let Some(node) = self.chosen else {
            return Ok(ProposalOutcome::Failed);
        };

        // Decide everything on a shared borrow; touch only once a valid
        // rearrangement is known.
        let (pruned, target) = {
            let tree = current_tree(graph, node)?;
            if tree.num_tips() < 3 {
                return Ok(ProposalOutcome::Failed);
            }
            let Some(pruned) = pick_tree_node(&tree.nodes_with_grandparent(), rng) else {
                return Ok(ProposalOutcome::Failed);
            };
            let parent = tree
                .node(pruned)?
                .parent()
                .ok_or(CoreError::TreeNodeNotFound { id: pruned })?;
            let Some(target) = pick_tree_node(&tree.regraft_targets(parent)?, rng) else {
                return Ok(ProposalOutcome::Failed);
            };
            (pruned, target)
        };

        let record = graph
            .value_mut(node)?
            .expect_tree_mut(node)?
            .prune_and_regraft(pruned, target)?;
        tracing::trace!(tree = %node, pruned = %pruned, target = %target, "pruned and regrafted");
        self.record = Some((node, record));
        Ok(ProposalOutcome::Proposed {
            ln_hastings_ratio: 0.0,
        })
    }

    fn undo(&mut self, graph: &mut ModelGraph) -> Result<(), CoreError> {
        if let Some((node, record)) = self.record.take() {
            graph
                .value_mut(node)?
                .expect_tree_mut(node)?
                .undo_regraft(&record)?;
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        self.chosen = None;
        self.record = None;
    }
}

/// Narrow exchange: swaps a node with its uncle without changing ages.
///
/// Fails when the uncle is not younger than the node's parent, since the
/// uncle could not hang below it.
#[derive(Debug, Clone)]
pub struct NarrowExchangeProposal {
    nodes: Vec<NodeId>,
    chosen: Option<NodeId>,
    record: Option<(NodeId, ExchangeRecord)>,
}

impl NarrowExchangeProposal {
    pub fn new(tree: NodeId) -> Self {
        Self::over(vec![tree])
    }

    pub fn over(trees: Vec<NodeId>) -> Self {
        NarrowExchangeProposal {
            nodes: trees,
            chosen: None,
            record: None,
        }
    }
}

impl Proposal for NarrowExchangeProposal {
    fn name(&self) -> &str {
        "NarrowExchange"
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn prepare(&mut self, _graph: &ModelGraph, rng: &mut dyn RngCore) -> Result<(), CoreError> {
        self.chosen = pick(&self.nodes, rng);
        self.record = None;
        Ok(())
    }

    fn propose(
        &mut self,
        graph: &mut ModelGraph,
        rng: &mut dyn RngCore,
    ) -> Result<ProposalOutcome, CoreError> {
        let Some(node) = self.chosen else {
            return Ok(ProposalOutcome::Failed);
        };

        let picked = {
            let tree = current_tree(graph, node)?;
            let Some(picked) = pick_tree_node(&tree.nodes_with_grandparent(), rng) else {
                return Ok(ProposalOutcome::Failed);
            };
            let parent = tree
                .node(picked)?
                .parent()
                .ok_or(CoreError::TreeNodeNotFound { id: picked })?;
            let uncle = tree.sibling(parent)?;
            if tree.age(uncle)? >= tree.age(parent)? {
                return Ok(ProposalOutcome::Failed);
            }
            picked
        };

        let record = graph
            .value_mut(node)?
            .expect_tree_mut(node)?
            .exchange_with_uncle(picked)?;
        tracing::trace!(tree = %node, node = %picked, uncle = %record.uncle, "exchanged with uncle");
        self.record = Some((node, record));
        Ok(ProposalOutcome::Proposed {
            ln_hastings_ratio: 0.0,
        })
    }

    fn undo(&mut self, graph: &mut ModelGraph) -> Result<(), CoreError> {
        if let Some((node, record)) = self.record.take() {
            graph
                .value_mut(node)?
                .expect_tree_mut(node)?
                .undo_exchange(&record)?;
        }
        Ok(())
    }

    fn cleanup(&mut self) {
        self.chosen = None;
        self.record = None;
    }
}
