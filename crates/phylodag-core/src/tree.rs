//! Rooted time trees and the structural primitives used by tree proposals.
//!
//! A [`TimeTree`] is an arena of [`TreeNode`]s addressed by [`TreeNodeId`].
//! Each node stores its age (time before present), its parent and an ordered
//! list of child slots. Slot order is part of the tree's identity: two trees
//! compare equal only if every node has the same children in the same slots.
//!
//! Rearrangements return a record ([`RegraftRecord`], [`ExchangeRecord`])
//! holding the slots and endpoints they touched. Undoing a rearrangement
//! replays the record in reverse and never searches the tree again.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::TreeNodeId;

/// One node of a [`TimeTree`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Taxon name for tips; internal nodes are usually unnamed.
    pub name: Option<String>,
    /// Age of the node, measured backwards from the present.
    pub age: f64,
    parent: Option<TreeNodeId>,
    children: SmallVec<[TreeNodeId; 2]>,
}

impl TreeNode {
    pub fn parent(&self) -> Option<TreeNodeId> {
        self.parent
    }

    pub fn children(&self) -> &[TreeNodeId] {
        &self.children
    }

    pub fn is_tip(&self) -> bool {
        self.children.is_empty()
    }
}

/// Incrementally assembles a [`TimeTree`] from tips upwards.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    nodes: Vec<TreeNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named tip with the given age.
    pub fn tip(&mut self, name: impl Into<String>, age: f64) -> TreeNodeId {
        self.push(TreeNode {
            name: Some(name.into()),
            age,
            parent: None,
            children: SmallVec::new(),
        })
    }

    /// Adds an internal node joining `children` (in slot order).
    ///
    /// Errors if a child does not exist or already has a parent.
    pub fn join(&mut self, children: &[TreeNodeId], age: f64) -> Result<TreeNodeId, CoreError> {
        for &child in children {
            let node = self
                .nodes
                .get(child.index())
                .ok_or(CoreError::TreeNodeNotFound { id: child })?;
            if node.parent.is_some() {
                return Err(CoreError::invariant(format!(
                    "tree node {} already has a parent",
                    child
                )));
            }
        }
        let id = self.push(TreeNode {
            name: None,
            age,
            parent: None,
            children: children.iter().copied().collect(),
        });
        for &child in children {
            self.nodes[child.index()].parent = Some(id);
        }
        Ok(id)
    }

    /// Finishes the tree. Exactly one node may be left without a parent.
    pub fn build(self) -> Result<TimeTree, CoreError> {
        let mut roots = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| TreeNodeId(i as u32));
        let root = roots
            .next()
            .ok_or_else(|| CoreError::invariant("tree has no nodes"))?;
        if roots.next().is_some() {
            return Err(CoreError::invariant("tree has more than one root"));
        }
        Ok(TimeTree {
            nodes: self.nodes,
            root,
        })
    }

    fn push(&mut self, node: TreeNode) -> TreeNodeId {
        let id = TreeNodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

/// Everything needed to invert one prune-and-regraft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegraftRecord {
    /// The internal node that was moved, together with `node`.
    pub parent: TreeNodeId,
    /// The child that travelled with `parent`.
    pub node: TreeNodeId,
    /// `parent`'s parent before the move.
    pub grandparent: TreeNodeId,
    /// `parent`'s other child before the move; now a child of `grandparent`.
    pub sibling: TreeNodeId,
    /// The node `parent` was regrafted onto; now `parent`'s child.
    pub target: TreeNodeId,
    /// Slot of `parent` in `grandparent`, taken over by `sibling`.
    pub parent_slot: usize,
    /// Slot of `sibling` in `parent`, taken over by `target`.
    pub sibling_slot: usize,
    /// Slot of `target` in its old parent, taken over by `parent`.
    pub target_slot: usize,
}

/// Everything needed to invert one narrow exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeRecord {
    pub node: TreeNodeId,
    pub uncle: TreeNodeId,
    pub parent: TreeNodeId,
    pub grandparent: TreeNodeId,
    pub node_slot: usize,
    pub uncle_slot: usize,
}

/// A rooted tree with node ages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeTree {
    nodes: Vec<TreeNode>,
    root: TreeNodeId,
}

impl TimeTree {
    pub fn root(&self) -> TreeNodeId {
        self.root
    }

    pub fn node(&self, id: TreeNodeId) -> Result<&TreeNode, CoreError> {
        self.nodes
            .get(id.index())
            .ok_or(CoreError::TreeNodeNotFound { id })
    }

    fn node_mut(&mut self, id: TreeNodeId) -> Result<&mut TreeNode, CoreError> {
        self.nodes
            .get_mut(id.index())
            .ok_or(CoreError::TreeNodeNotFound { id })
    }

    /// Iterates over all node ids in arena order.
    pub fn node_ids(&self) -> impl Iterator<Item = TreeNodeId> + '_ {
        (0..self.nodes.len()).map(|i| TreeNodeId(i as u32))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_tips(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_tip()).count()
    }

    pub fn is_root(&self, id: TreeNodeId) -> bool {
        id == self.root
    }

    pub fn age(&self, id: TreeNodeId) -> Result<f64, CoreError> {
        Ok(self.node(id)?.age)
    }

    /// Sum of all branch lengths.
    pub fn tree_length(&self) -> f64 {
        self.nodes
            .iter()
            .filter_map(|n| n.parent.map(|p| self.nodes[p.index()].age - n.age))
            .sum()
    }

    // -----------------------------------------------------------------------
    // Slot-level primitives
    // -----------------------------------------------------------------------

    /// Detaches `child` from `parent` and returns the slot it occupied.
    ///
    /// The child's parent pointer is cleared; the caller re-attaches it.
    pub fn remove_child(
        &mut self,
        parent: TreeNodeId,
        child: TreeNodeId,
    ) -> Result<usize, CoreError> {
        let slot = self
            .node(parent)?
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| {
                CoreError::invariant(format!("tree node {} is not a child of {}", child, parent))
            })?;
        self.node_mut(parent)?.children.remove(slot);
        self.node_mut(child)?.parent = None;
        Ok(slot)
    }

    /// Attaches `child` under `parent` at `slot` and sets its parent pointer.
    pub fn insert_child(
        &mut self,
        parent: TreeNodeId,
        child: TreeNodeId,
        slot: usize,
    ) -> Result<(), CoreError> {
        if self.node(child)?.parent.is_some() {
            return Err(CoreError::invariant(format!(
                "tree node {} is still attached",
                child
            )));
        }
        let children = &mut self.node_mut(parent)?.children;
        if slot > children.len() {
            return Err(CoreError::invariant(format!(
                "slot {} out of range for tree node {} with {} children",
                slot,
                parent,
                children.len()
            )));
        }
        children.insert(slot, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Neighbourhood queries
    // -----------------------------------------------------------------------

    /// Nodes that are neither the root nor a child of the root.
    pub fn nodes_with_grandparent(&self) -> Vec<TreeNodeId> {
        self.node_ids()
            .filter(|&id| {
                self.nodes[id.index()]
                    .parent
                    .is_some_and(|p| !self.is_root(p))
            })
            .collect()
    }

    /// The other child of `id`'s parent in a binary tree.
    pub fn sibling(&self, id: TreeNodeId) -> Result<TreeNodeId, CoreError> {
        let parent = self
            .node(id)?
            .parent
            .ok_or_else(|| CoreError::invariant(format!("tree node {} is the root", id)))?;
        let children = &self.node(parent)?.children;
        if children.len() != 2 {
            return Err(CoreError::invariant(format!(
                "tree node {} has {} children, expected 2",
                parent,
                children.len()
            )));
        }
        Ok(if children[0] == id {
            children[1]
        } else {
            children[0]
        })
    }

    /// Candidate regraft points for the subtree rooted at `pruned`.
    ///
    /// Walks down from the root. A child younger than `pruned` is a
    /// candidate; an older child is descended into. `pruned`'s own subtree is
    /// never entered, so no candidate can lie below it.
    pub fn regraft_targets(&self, pruned: TreeNodeId) -> Result<Vec<TreeNodeId>, CoreError> {
        let limit = self.age(pruned)?;
        let mut targets = Vec::new();
        self.collect_targets(self.root, pruned, limit, &mut targets);
        Ok(targets)
    }

    fn collect_targets(
        &self,
        at: TreeNodeId,
        pruned: TreeNodeId,
        limit: f64,
        out: &mut Vec<TreeNodeId>,
    ) {
        let node = &self.nodes[at.index()];
        if node.is_tip() || at == pruned {
            return;
        }
        for &child in &node.children {
            if self.nodes[child.index()].age < limit {
                out.push(child);
            } else {
                self.collect_targets(child, pruned, limit, out);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rearrangements
    // -----------------------------------------------------------------------

    /// Prunes `node`'s parent (with `node` attached) and regrafts it onto the
    /// branch above `target`.
    ///
    /// `node`'s sibling takes the parent's slot under the grandparent, the
    /// parent takes `target`'s slot under `target`'s parent, and `target`
    /// takes the sibling's old slot under the parent. Ages are unchanged.
    pub fn prune_and_regraft(
        &mut self,
        node: TreeNodeId,
        target: TreeNodeId,
    ) -> Result<RegraftRecord, CoreError> {
        let parent = self.parent_of(node)?;
        let grandparent = self.parent_of(parent)?;
        let sibling = self.sibling(node)?;
        let new_grandparent = self.parent_of(target)?;
        if target == parent || target == node || target == sibling {
            return Err(CoreError::invariant(format!(
                "tree node {} cannot be its own regraft target",
                target
            )));
        }

        // prune
        let parent_slot = self.remove_child(grandparent, parent)?;
        let sibling_slot = self.remove_child(parent, sibling)?;
        self.insert_child(grandparent, sibling, parent_slot)?;

        // regraft
        let target_slot = self.remove_child(new_grandparent, target)?;
        self.insert_child(new_grandparent, parent, target_slot)?;
        self.insert_child(parent, target, sibling_slot)?;

        Ok(RegraftRecord {
            parent,
            node,
            grandparent,
            sibling,
            target,
            parent_slot,
            sibling_slot,
            target_slot,
        })
    }

    /// Reverses a [`prune_and_regraft`](Self::prune_and_regraft).
    pub fn undo_regraft(&mut self, record: &RegraftRecord) -> Result<(), CoreError> {
        let new_grandparent = self.parent_of(record.parent)?;

        self.remove_child(new_grandparent, record.parent)?;
        self.remove_child(record.parent, record.target)?;
        self.insert_child(new_grandparent, record.target, record.target_slot)?;

        self.remove_child(record.grandparent, record.sibling)?;
        self.insert_child(record.parent, record.sibling, record.sibling_slot)?;
        self.insert_child(record.grandparent, record.parent, record.parent_slot)?;
        Ok(())
    }

    /// Exchanges `node` with its uncle (the parent's sibling).
    pub fn exchange_with_uncle(&mut self, node: TreeNodeId) -> Result<ExchangeRecord, CoreError> {
        let parent = self.parent_of(node)?;
        let grandparent = self.parent_of(parent)?;
        let uncle = self.sibling(parent)?;

        let node_slot = self.remove_child(parent, node)?;
        let uncle_slot = self.remove_child(grandparent, uncle)?;
        self.insert_child(grandparent, node, uncle_slot)?;
        self.insert_child(parent, uncle, node_slot)?;

        Ok(ExchangeRecord {
            node,
            uncle,
            parent,
            grandparent,
            node_slot,
            uncle_slot,
        })
    }

    /// Reverses an [`exchange_with_uncle`](Self::exchange_with_uncle).
    pub fn undo_exchange(&mut self, record: &ExchangeRecord) -> Result<(), CoreError> {
        self.remove_child(record.parent, record.uncle)?;
        self.remove_child(record.grandparent, record.node)?;
        self.insert_child(record.grandparent, record.uncle, record.uncle_slot)?;
        self.insert_child(record.parent, record.node, record.node_slot)?;
        Ok(())
    }

    fn parent_of(&self, id: TreeNodeId) -> Result<TreeNodeId, CoreError> {
        self.node(id)?
            .parent
            .ok_or_else(|| CoreError::invariant(format!("tree node {} has no parent", id)))
    }

    // -----------------------------------------------------------------------
    // Validation and rendering
    // -----------------------------------------------------------------------

    /// Returns the first node whose age is not below its parent's age.
    pub fn first_age_violation(&self) -> Option<TreeNodeId> {
        self.node_ids().find(|&id| {
            let node = &self.nodes[id.index()];
            node.parent
                .is_some_and(|p| self.nodes[p.index()].age < node.age)
        })
    }

    /// Checks that parent and child pointers agree and every node is
    /// reachable from the root exactly once.
    pub fn check_structure(&self) -> Result<(), CoreError> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        if self.node(self.root)?.parent.is_some() {
            return Err(CoreError::invariant("root has a parent"));
        }
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.index()], true) {
                return Err(CoreError::invariant(format!("tree node {} visited twice", id)));
            }
            for &child in &self.node(id)?.children {
                if self.node(child)?.parent != Some(id) {
                    return Err(CoreError::invariant(format!(
                        "tree node {} does not point back to parent {}",
                        child, id
                    )));
                }
                stack.push(child);
            }
        }
        match seen.iter().position(|s| !s) {
            Some(i) => Err(CoreError::invariant(format!(
                "tree node {} is unreachable from the root",
                i
            ))),
            None => Ok(()),
        }
    }

    /// Renders the tree in Newick format with branch lengths.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        self.write_newick(self.root, &mut out);
        out.push(';');
        out
    }

    fn write_newick(&self, id: TreeNodeId, out: &mut String) {
        let node = &self.nodes[id.index()];
        if !node.is_tip() {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.write_newick(child, out);
            }
            out.push(')');
        }
        if let Some(name) = &node.name {
            out.push_str(name);
        }
        if let Some(parent) = node.parent {
            let _ = write!(out, ":{}", self.nodes[parent.index()].age - node.age);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// ((((A:1,B:1):1,C:2):1,D:3):1,E:4); with every tip at age 0.
    pub(crate) fn caterpillar_five() -> TimeTree {
        let mut b = TreeBuilder::new();
        let a = b.tip("A", 0.0);
        let bb = b.tip("B", 0.0);
        let c = b.tip("C", 0.0);
        let d = b.tip("D", 0.0);
        let e = b.tip("E", 0.0);
        let ab = b.join(&[a, bb], 1.0).unwrap();
        let abc = b.join(&[ab, c], 2.0).unwrap();
        let abcd = b.join(&[abc, d], 3.0).unwrap();
        b.join(&[abcd, e], 4.0).unwrap();
        b.build().unwrap()
    }

    fn id(tree: &TimeTree, name: &str) -> TreeNodeId {
        tree.node_ids()
            .find(|&i| tree.node(i).unwrap().name.as_deref() == Some(name))
            .unwrap()
    }

    #[test]
    fn builder_links_parents_and_children() {
        let tree = caterpillar_five();
        assert_eq!(tree.num_nodes(), 9);
        assert_eq!(tree.num_tips(), 5);
        assert!(tree.check_structure().is_ok());
        assert_eq!(tree.first_age_violation(), None);
        assert_eq!(tree.tree_length(), 14.0);
    }

    #[test]
    fn builder_rejects_two_roots() {
        let mut b = TreeBuilder::new();
        b.tip("A", 0.0);
        b.tip("B", 0.0);
        assert!(b.build().is_err());
    }

    #[test]
    fn newick_rendering() {
        insta::assert_snapshot!(
            caterpillar_five().to_newick(),
            @"((((A:1,B:1):1,C:2):1,D:3):1,E:4);"
        );
    }

    #[test]
    fn regraft_targets_respect_age_order() {
        let tree = caterpillar_five();
        let a = id(&tree, "A");
        let ab = tree.node(a).unwrap().parent().unwrap();
        // Moving (A,B) at age 1: C, D and E attach below age 1 on their branches.
        let mut targets = tree.regraft_targets(ab).unwrap();
        targets.sort();
        let mut expected = vec![id(&tree, "C"), id(&tree, "D"), id(&tree, "E")];
        expected.sort();
        assert_eq!(targets, expected);
    }

    #[test]
    fn regraft_targets_exclude_own_subtree() {
        let tree = caterpillar_five();
        let c = id(&tree, "C");
        let abc = tree.node(c).unwrap().parent().unwrap();
        let targets = tree.regraft_targets(abc).unwrap();
        assert!(!targets.contains(&c));
        assert!(!targets.contains(&id(&tree, "A")));
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn prune_and_regraft_then_undo_restores_exactly() {
        let original = caterpillar_five();
        let mut tree = original.clone();
        let a = id(&tree, "A");
        let e = id(&tree, "E");

        let record = tree.prune_and_regraft(a, e).unwrap();
        assert!(tree.check_structure().is_ok());
        assert_ne!(tree, original);
        assert_eq!(tree.node(e).unwrap().parent(), Some(record.parent));
        insta::assert_snapshot!(tree.to_newick(), @"(((B:2,C:2):1,D:3):1,(A:1,E:1):3);");

        tree.undo_regraft(&record).unwrap();
        assert_eq!(tree, original);
    }

    #[test]
    fn regraft_onto_uncle_round_trips() {
        let original = caterpillar_five();
        let mut tree = original.clone();
        let a = id(&tree, "A");
        let c = id(&tree, "C");
        let record = tree.prune_and_regraft(a, c).unwrap();
        assert_eq!(tree.node(record.parent).unwrap().parent(), Some(record.grandparent));
        tree.undo_regraft(&record).unwrap();
        assert_eq!(tree, original);
    }

    #[test]
    fn exchange_swaps_slots_and_undo_restores() {
        let original = caterpillar_five();
        let mut tree = original.clone();
        let a = id(&tree, "A");
        let record = tree.exchange_with_uncle(a).unwrap();
        assert_eq!(record.uncle, id(&tree, "C"));
        insta::assert_snapshot!(tree.to_newick(), @"((((C:1,B:1):1,A:2):1,D:3):1,E:4);");
        tree.undo_exchange(&record).unwrap();
        assert_eq!(tree, original);
    }

    #[test]
    fn insert_child_rejects_out_of_range_slot() {
        let mut tree = caterpillar_five();
        let a = id(&tree, "A");
        let ab = tree.node(a).unwrap().parent().unwrap();
        tree.remove_child(ab, a).unwrap();
        assert!(tree.insert_child(ab, a, 5).is_err());
        tree.insert_child(ab, a, 0).unwrap();
        assert_eq!(tree, caterpillar_five());
    }
}
