//! ModelGraph: the DAG of random and derived variables for one model.
//!
//! [`ModelGraph`] owns every [`GraphNode`] in a petgraph `StableGraph` arena.
//! Edges run parent -> child and are only used to find consumers when
//! propagating dirtiness; argument order lives in each node's parent list.
//!
//! # Touch / keep / restore
//!
//! A proposal cycle mutates stochastic values through [`ModelGraph::value_mut`],
//! which touches the node before handing out the reference. Touching marks
//! the node and all of its transitive consumers stale and records each of
//! them in the per-cycle touched set. Evaluation refreshes only stale nodes.
//! The cycle ends with [`ModelGraph::keep`] (commit) or
//! [`ModelGraph::restore`] (revert every node in the touched set to its
//! first-touch snapshot). Either way the touched set ends empty and every
//! node ends Clean.
//!
//! # Joint probability
//!
//! The graph remembers the committed joint log-probability of the last kept
//! state. [`ModelGraph::joint_ln_probability`] adds the change of every
//! touched stochastic node to it, which costs O(touched set), not O(graph).
//! [`ModelGraph::full_ln_probability`] recomputes everything from scratch
//! without touching any cache and is used to check the incremental path.

use std::collections::HashMap;

use indexmap::IndexSet;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use rand::RngCore;
use smallvec::SmallVec;

use crate::distribution::Distribution;
use crate::edge::DependencyEdge;
use crate::error::{CoreError, DensityError};
use crate::function::Function;
use crate::id::NodeId;
use crate::node::{GraphNode, NodeKind, NodeState};
use crate::value::Value;

type Arena = StableGraph<GraphNode, DependencyEdge, Directed, u32>;

fn ix(id: NodeId) -> NodeIndex<u32> {
    id.into()
}

/// The model graph: nodes, dependency edges and the per-cycle touched set.
#[derive(Debug, Default)]
pub struct ModelGraph {
    arena: Arena,
    /// Nodes touched in the current proposal cycle, in touch order.
    touched: IndexSet<NodeId>,
    /// Designated roots; the model is everything connected to them.
    roots: Vec<NodeId>,
    /// Cached model membership, rebuilt after structural changes.
    members: Option<IndexSet<NodeId>>,
    /// Joint log-probability of the last committed state.
    committed_ln_probability: Option<f64>,
    names: HashMap<String, NodeId>,
}

/// Result of evaluating one node, produced under a shared borrow and
/// applied under an exclusive one.
enum Fresh {
    Value(Result<Value, DensityError>),
    LnProbability(Result<f64, DensityError>),
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Adds a constant node.
    pub fn add_constant(&mut self, value: impl Into<Value>) -> NodeId {
        self.insert(
            NodeKind::Constant {
                value: value.into(),
            },
            SmallVec::new(),
        )
    }

    /// Adds a deterministic node computing `function` over `parents`.
    ///
    /// The value is computed lazily on first use.
    pub fn add_deterministic(
        &mut self,
        function: impl Function + 'static,
        parents: &[NodeId],
    ) -> Result<NodeId, CoreError> {
        let parents = self.checked_parents(parents)?;
        let id = self.insert(
            NodeKind::Deterministic {
                function: Box::new(function),
                value: None,
            },
            parents,
        );
        Ok(id)
    }

    /// Adds a stochastic node with an explicit initial value.
    pub fn add_stochastic(
        &mut self,
        distribution: impl Distribution + 'static,
        parents: &[NodeId],
        initial: impl Into<Value>,
    ) -> Result<NodeId, CoreError> {
        let parents = self.checked_parents(parents)?;
        let id = self.insert(
            NodeKind::Stochastic {
                distribution: Box::new(distribution),
                value: initial.into(),
                clamped: false,
            },
            parents,
        );
        Ok(id)
    }

    /// Adds a stochastic node whose initial value is drawn from its
    /// distribution.
    pub fn add_stochastic_sampled(
        &mut self,
        distribution: impl Distribution + 'static,
        parents: &[NodeId],
        rng: &mut dyn RngCore,
    ) -> Result<NodeId, CoreError> {
        let checked = self.checked_parents(parents)?;
        for &p in &checked {
            self.refresh_value(p)?;
        }
        let initial = {
            let args = self.parent_values(&checked)?;
            distribution.sample(&args, rng)
        };
        let initial = initial.map_err(|source| CoreError::InitialDraw {
            distribution: distribution.name().to_string(),
            source,
        })?;
        self.add_stochastic(distribution, &checked, initial)
    }

    /// Fixes a stochastic node to observed data.
    ///
    /// Clamped nodes still contribute their density but can no longer be
    /// mutated by proposals. Only allowed between proposal cycles.
    pub fn clamp(&mut self, id: NodeId, observed: impl Into<Value>) -> Result<(), CoreError> {
        self.require_idle("clamp")?;
        match &mut self.node_mut(id)?.kind {
            NodeKind::Stochastic { value, clamped, .. } => {
                *value = observed.into();
                *clamped = true;
            }
            other => {
                return Err(CoreError::ImmutableNode {
                    id,
                    reason: format!("cannot clamp a {} node", other.label()),
                })
            }
        }
        self.invalidate_from(id);
        Ok(())
    }

    /// Appends `parent` to `child`'s parent list after construction.
    ///
    /// Fails with [`CoreError::CycleDetected`] if `parent` already depends on
    /// `child`.
    pub fn add_dependency(&mut self, parent: NodeId, child: NodeId) -> Result<(), CoreError> {
        self.require_idle("add_dependency")?;
        self.node(parent)?;
        self.node(child)?;
        if parent == child || has_path_connecting(&self.arena, child.into(), parent.into(), None) {
            return Err(CoreError::CycleDetected {
                from: parent,
                to: child,
            });
        }
        if matches!(self.node(child)?.kind, NodeKind::Constant { .. }) {
            return Err(CoreError::InvalidEdge {
                reason: format!("constant node {} cannot have parents", child),
            });
        }
        let node = self.node_mut(child)?;
        let slot = node.parents.len() as u16;
        node.parents.push(parent);
        self.arena
            .add_edge(parent.into(), child.into(), DependencyEdge { slot });
        self.members = None;
        self.invalidate_from(child);
        Ok(())
    }

    /// Designates the model roots. With no roots every node belongs to the
    /// model.
    pub fn set_roots(&mut self, roots: &[NodeId]) -> Result<(), CoreError> {
        for &r in roots {
            self.node(r)?;
        }
        self.roots = roots.to_vec();
        self.members = None;
        self.committed_ln_probability = None;
        Ok(())
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), CoreError> {
        let name = name.into();
        self.node_mut(id)?.name = Some(name.clone());
        self.names.insert(name, id);
        Ok(())
    }

    /// Looks up a node by the name given with [`set_name`](Self::set_name).
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    fn insert(&mut self, kind: NodeKind, parents: SmallVec<[NodeId; 4]>) -> NodeId {
        let placeholder = NodeId(u32::MAX);
        let idx = self
            .arena
            .add_node(GraphNode::new(placeholder, kind, parents.clone()));
        let id = NodeId::from(idx);
        self.arena[idx].id = id;
        for (slot, &p) in parents.iter().enumerate() {
            self.arena.add_edge(
                p.into(),
                idx,
                DependencyEdge { slot: slot as u16 },
            );
        }
        self.members = None;
        self.committed_ln_probability = None;
        id
    }

    fn checked_parents(&self, parents: &[NodeId]) -> Result<SmallVec<[NodeId; 4]>, CoreError> {
        for &p in parents {
            self.node(p)?;
        }
        Ok(parents.iter().copied().collect())
    }

    fn require_idle(&self, operation: &str) -> Result<(), CoreError> {
        if self.touched.is_empty() {
            Ok(())
        } else {
            Err(CoreError::invariant(format!(
                "{} called with {} node(s) touched in an open proposal cycle",
                operation,
                self.touched.len()
            )))
        }
    }

    /// Drops cached results of `id` and everything downstream of it.
    fn invalidate_from(&mut self, id: NodeId) {
        let mut stack = vec![id];
        let mut seen = IndexSet::new();
        while let Some(n) = stack.pop() {
            if !seen.insert(n) {
                continue;
            }
            let idx: NodeIndex<u32> = n.into();
            let node = &mut self.arena[idx];
            if let NodeKind::Deterministic { value, .. } = &mut node.kind {
                *value = None;
            }
            node.cached_ln_probability = None;
            stack.extend(
                self.arena
                    .neighbors_directed(idx, Direction::Outgoing)
                    .map(NodeId::from),
            );
        }
        self.committed_ln_probability = None;
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Result<&GraphNode, CoreError> {
        self.arena
            .node_weight(id.into())
            .ok_or(CoreError::NodeNotFound { id })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut GraphNode, CoreError> {
        self.arena
            .node_weight_mut(id.into())
            .ok_or(CoreError::NodeNotFound { id })
    }

    /// All node ids in arena order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.arena.node_indices().map(NodeId::from)
    }

    pub fn node_count(&self) -> usize {
        self.arena.node_count()
    }

    /// Nodes touched in the open proposal cycle, in touch order.
    pub fn touched(&self) -> &IndexSet<NodeId> {
        &self.touched
    }

    pub fn committed_ln_probability(&self) -> Option<f64> {
        self.committed_ln_probability
    }

    /// Current value of `id` without recomputation.
    ///
    /// Returns `None` for a stale or never-computed deterministic node.
    pub fn current_value(&self, id: NodeId) -> Option<&Value> {
        let node = self.arena.node_weight(id.into())?;
        match node.kind {
            NodeKind::Deterministic { .. } if node.state == NodeState::Touched => None,
            _ => node.cached_value(),
        }
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    /// Current value of `id`, recomputing a stale deterministic node first.
    pub fn value(&mut self, id: NodeId) -> Result<&Value, CoreError> {
        self.refresh_value(id)?;
        self.node(id)?
            .cached_value()
            .ok_or_else(|| CoreError::invariant(format!("node {} has no value after refresh", id)))
    }

    /// Touches an unclamped stochastic node and returns its value for
    /// in-place mutation.
    ///
    /// The touch happens before the reference is handed out, so the
    /// snapshot always holds the pre-mutation value.
    pub fn value_mut(&mut self, id: NodeId) -> Result<&mut Value, CoreError> {
        self.touch_free(id)?;
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Stochastic { value, .. } => {
                node.edited_in_place |= value.is_structural();
                Ok(value)
            }
            _ => Err(CoreError::invariant("node kind changed during touch")),
        }
    }

    /// Replaces the value of an unclamped stochastic node.
    ///
    /// Unlike [`value_mut`](Self::value_mut) this also snapshots a tree, so
    /// [`restore`](Self::restore) brings the old tree back.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<Value>) -> Result<(), CoreError> {
        self.touch_free(id)?;
        self.node_mut(id)?.replace_value(value.into())
    }

    /// Touches `id` if it is an unclamped stochastic node.
    fn touch_free(&mut self, id: NodeId) -> Result<(), CoreError> {
        match &self.node(id)?.kind {
            NodeKind::Stochastic { clamped: false, .. } => {}
            NodeKind::Stochastic { clamped: true, .. } => {
                return Err(CoreError::ImmutableNode {
                    id,
                    reason: "node is clamped to observed data".into(),
                })
            }
            other => {
                return Err(CoreError::ImmutableNode {
                    id,
                    reason: format!("{} nodes are not mutated directly", other.label()),
                })
            }
        }
        self.touch(id)
    }

    /// Draws a new value for an unclamped stochastic node from its
    /// distribution.
    pub fn redraw(&mut self, id: NodeId, rng: &mut dyn RngCore) -> Result<(), CoreError> {
        let parents = self.node(id)?.parents.clone();
        for &p in &parents {
            self.refresh_value(p)?;
        }
        let drawn = {
            let node = self.node(id)?;
            let args = self.parent_values(&parents)?;
            match &node.kind {
                NodeKind::Stochastic { distribution, .. } => distribution.sample(&args, rng),
                other => {
                    return Err(CoreError::ImmutableNode {
                        id,
                        reason: format!("cannot redraw a {} node", other.label()),
                    })
                }
            }
        }
        .map_err(|source| CoreError::Evaluation { node: id, source })?;
        self.set_value(id, drawn)
    }

    // -----------------------------------------------------------------------
    // Touch / keep / restore
    // -----------------------------------------------------------------------

    /// Marks `id` and all of its transitive consumers stale.
    ///
    /// A node's first touch in a cycle snapshots it; later touches keep that
    /// snapshot. Propagation stops at nodes that are already Touched, since
    /// all of their consumers are Touched too.
    pub fn touch(&mut self, id: NodeId) -> Result<(), CoreError> {
        if let NodeKind::Constant { .. } = self.node(id)?.kind {
            return Err(CoreError::ImmutableNode {
                id,
                reason: "constant nodes cannot be touched".into(),
            });
        }
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let idx: NodeIndex<u32> = n.into();
            if n != id && self.arena[idx].state == NodeState::Touched {
                continue;
            }
            if self.arena[idx].touch() {
                self.touched.insert(n);
            }
            for child in self.arena.neighbors_directed(idx, Direction::Outgoing) {
                if self.arena[child].state != NodeState::Touched {
                    stack.push(NodeId::from(child));
                }
            }
        }
        Ok(())
    }

    /// Commits the open cycle: every touched node is refreshed, its
    /// snapshot dropped and its state set to Clean.
    ///
    /// A second `keep` with nothing touched is a no-op. If refreshing fails
    /// the error is returned and the cycle stays open so the caller can
    /// [`restore`](Self::restore).
    pub fn keep(&mut self) -> Result<(), CoreError> {
        if self.touched.is_empty() {
            return Ok(());
        }
        let total = self.joint_ln_probability()?;
        for id in std::mem::take(&mut self.touched) {
            self.arena[ix(id)].keep();
        }
        self.committed_ln_probability = Some(total);
        tracing::trace!(total, "kept proposal cycle");
        Ok(())
    }

    /// Reverts the open cycle: every touched node gets its first-touch
    /// snapshot back and is set to Clean.
    ///
    /// Restoration is node-local, so the order of the touched set does not
    /// matter. Structural values must already have been reverted by the
    /// proposal that changed them.
    pub fn restore(&mut self) {
        let count = self.touched.len();
        for id in std::mem::take(&mut self.touched) {
            self.arena[ix(id)].restore();
        }
        tracing::trace!(count, "restored proposal cycle");
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Log-probability contribution of `id`: the density of a stochastic
    /// node, zero otherwise. Refreshes stale caches first.
    pub fn ln_probability(&mut self, id: NodeId) -> Result<f64, CoreError> {
        self.refresh(id)?;
        self.node(id)?
            .cached_ln_probability()
            .ok_or_else(|| CoreError::invariant(format!("node {} has no density after refresh", id)))
    }

    /// Joint log-probability of the model's stochastic nodes.
    ///
    /// Refreshes every touched node (surfacing evaluation failures before any
    /// acceptance decision) and adds their change to the committed total.
    /// Falls back to summing every cached contribution when no finite
    /// committed total or snapshot is available.
    pub fn joint_ln_probability(&mut self) -> Result<f64, CoreError> {
        let touched: Vec<NodeId> = self.touched.iter().copied().collect();
        for &id in &touched {
            self.refresh(id)?;
        }
        self.ensure_members();

        let Some(total) = self.committed_ln_probability.filter(|t| t.is_finite()) else {
            return self.sum_cached();
        };
        let mut delta = 0.0;
        for id in touched {
            if !self.is_member(id) {
                continue;
            }
            let node = self.node(id)?;
            if !node.is_stochastic() {
                continue;
            }
            let new = node.cached_ln_probability.unwrap_or(f64::NEG_INFINITY);
            match node.stored_ln_probability {
                Some(old) if old.is_finite() => delta += new - old,
                _ => return self.sum_cached(),
            }
        }
        Ok(total + delta)
    }

    /// Joint log-probability recomputed from scratch for every node, leaving
    /// all caches untouched.
    pub fn full_ln_probability(&self) -> Result<f64, CoreError> {
        let order = self.topological_order()?;
        let members = self.collect_members();
        let mut scratch: HashMap<NodeId, Value> = HashMap::new();
        let mut total = 0.0;

        for id in order {
            let node = self.node(id)?;
            let fresh = {
                let args = node
                    .parents
                    .iter()
                    .map(|p| self.scratch_value(&scratch, *p))
                    .collect::<Result<Vec<&Value>, CoreError>>()?;
                match &node.kind {
                    NodeKind::Constant { .. } => None,
                    NodeKind::Deterministic { function, .. } => Some(Fresh::Value(function.compute(&args))),
                    NodeKind::Stochastic {
                        distribution,
                        value,
                        ..
                    } => Some(Fresh::LnProbability(distribution.ln_density(value, &args))),
                }
            };
            match fresh {
                None => {}
                Some(Fresh::Value(result)) => {
                    let value = result.map_err(|source| CoreError::Evaluation { node: id, source })?;
                    scratch.insert(id, value);
                }
                Some(Fresh::LnProbability(result)) => {
                    let ln = checked_density(id, result)?;
                    if members.contains(&id) {
                        total += ln;
                    }
                }
            }
        }
        Ok(total)
    }

    /// Recomputes every cached value and density in dependency order and
    /// resets the committed total. Only allowed between proposal cycles.
    ///
    /// Used after construction and periodically to shed floating-point drift
    /// accumulated by the incremental total.
    pub fn reevaluate(&mut self) -> Result<f64, CoreError> {
        self.require_idle("reevaluate")?;
        let order = self.topological_order()?;
        for &id in &order {
            let node = self.node_mut(id)?;
            if let NodeKind::Deterministic { value, .. } = &mut node.kind {
                *value = None;
            }
            node.cached_ln_probability = None;
        }
        for &id in &order {
            self.refresh(id)?;
        }
        self.ensure_members();
        let total = self.sum_cached()?;
        self.committed_ln_probability = Some(total);
        Ok(total)
    }

    /// Checks that node states and the touched set agree.
    ///
    /// Every non-Clean node is in the touched set and every touched node is
    /// non-Clean. Every consumer of a Touched node is Touched. Each incoming
    /// edge names the parent-list slot its source occupies.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        for idx in self.arena.node_indices() {
            let node = &self.arena[idx];
            let id = NodeId::from(idx);
            if node.is_clean() == self.touched.contains(&id) {
                return Err(CoreError::invariant(format!(
                    "node {} is {:?} but {} the touched set",
                    id,
                    node.state,
                    if node.is_clean() { "in" } else { "not in" }
                )));
            }
            let mut incoming = 0;
            for edge in self.arena.edges_directed(idx, Direction::Incoming) {
                incoming += 1;
                let slot = edge.weight().slot as usize;
                let parent = NodeId::from(edge.source());
                if node.parents.get(slot) != Some(&parent) {
                    return Err(CoreError::invariant(format!(
                        "edge {} -> {} claims slot {} but that slot holds {:?}",
                        parent,
                        id,
                        slot,
                        node.parents.get(slot)
                    )));
                }
            }
            if incoming != node.parents.len() {
                return Err(CoreError::invariant(format!(
                    "node {} has {} parents but {} incoming edges",
                    id,
                    node.parents.len(),
                    incoming
                )));
            }
            if node.state == NodeState::Touched {
                for child in self.arena.neighbors_directed(idx, Direction::Outgoing) {
                    if self.arena[child].state != NodeState::Touched {
                        return Err(CoreError::invariant(format!(
                            "node {} is Touched but its consumer {} is {:?}",
                            id,
                            NodeId::from(child),
                            self.arena[child].state
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Brings the value of a deterministic node (and its ancestors) up to
    /// date. Constant and stochastic values are always current.
    fn refresh_value(&mut self, id: NodeId) -> Result<(), CoreError> {
        let node = self.node(id)?;
        if !matches!(node.kind, NodeKind::Deterministic { .. }) || !node.needs_recompute() {
            return Ok(());
        }
        let parents = node.parents.clone();
        for &p in &parents {
            self.refresh_value(p)?;
        }
        self.recompute(id, &parents)
    }

    /// Brings both the value and the density of `id` up to date.
    fn refresh(&mut self, id: NodeId) -> Result<(), CoreError> {
        let node = self.node(id)?;
        if !node.needs_recompute() {
            return Ok(());
        }
        let parents = node.parents.clone();
        for &p in &parents {
            self.refresh_value(p)?;
        }
        self.recompute(id, &parents)
    }

    fn recompute(&mut self, id: NodeId, parents: &[NodeId]) -> Result<(), CoreError> {
        let fresh = {
            let node = self.node(id)?;
            let args = self.parent_values(parents)?;
            match &node.kind {
                NodeKind::Constant { .. } => return Ok(()),
                NodeKind::Deterministic { function, .. } => Fresh::Value(function.compute(&args)),
                NodeKind::Stochastic {
                    distribution,
                    value,
                    ..
                } => Fresh::LnProbability(distribution.ln_density(value, &args)),
            }
        };
        let node = self.node_mut(id)?;
        match fresh {
            Fresh::Value(result) => {
                let computed = result.map_err(|source| CoreError::Evaluation { node: id, source })?;
                if let NodeKind::Deterministic { value, .. } = &mut node.kind {
                    *value = Some(computed);
                }
            }
            Fresh::LnProbability(result) => {
                node.cached_ln_probability = Some(checked_density(id, result)?);
            }
        }
        if node.state == NodeState::Touched {
            node.state = NodeState::Recomputed;
        }
        Ok(())
    }

    fn parent_values(&self, parents: &[NodeId]) -> Result<Vec<&Value>, CoreError> {
        parents
            .iter()
            .map(|&p| {
                self.node(p)?.cached_value().ok_or_else(|| {
                    CoreError::invariant(format!("parent {} has no value", p))
                })
            })
            .collect()
    }

    fn scratch_value<'a>(
        &'a self,
        scratch: &'a HashMap<NodeId, Value>,
        id: NodeId,
    ) -> Result<&'a Value, CoreError> {
        match &self.node(id)?.kind {
            NodeKind::Constant { value } | NodeKind::Stochastic { value, .. } => Ok(value),
            NodeKind::Deterministic { .. } => scratch.get(&id).ok_or_else(|| {
                CoreError::invariant(format!("node {} evaluated before its parent", id))
            }),
        }
    }

    fn topological_order(&self) -> Result<Vec<NodeId>, CoreError> {
        toposort(&self.arena, None)
            .map(|order| order.into_iter().map(NodeId::from).collect())
            .map_err(|cycle| {
                CoreError::invariant(format!(
                    "model graph contains a cycle through node {}",
                    cycle.node_id().index()
                ))
            })
    }

    fn sum_cached(&mut self) -> Result<f64, CoreError> {
        self.ensure_members();
        let stochastic: Vec<NodeId> = self
            .members
            .iter()
            .flatten()
            .copied()
            .filter(|&id| self.arena[ix(id)].is_stochastic())
            .collect();
        let mut total = 0.0;
        for id in stochastic {
            total += self.ln_probability(id)?;
        }
        Ok(total)
    }

    fn is_member(&self, id: NodeId) -> bool {
        self.members.as_ref().is_some_and(|m| m.contains(&id))
    }

    fn ensure_members(&mut self) {
        if self.members.is_none() {
            self.members = Some(self.collect_members());
        }
    }

    /// Nodes connected (in either direction) to a root, or every node when no
    /// roots are designated.
    fn collect_members(&self) -> IndexSet<NodeId> {
        if self.roots.is_empty() {
            return self.node_ids().collect();
        }
        let mut members = IndexSet::new();
        let mut stack = self.roots.clone();
        while let Some(n) = stack.pop() {
            if !members.insert(n) {
                continue;
            }
            stack.extend(
                self.arena
                    .neighbors_undirected(n.into())
                    .map(NodeId::from)
                    .filter(|m| !members.contains(m)),
            );
        }
        members
    }
}

/// Maps a density result onto the numeric contract: constraint violations
/// become `-inf`, NaN becomes a numerical failure.
fn checked_density(node: NodeId, result: Result<f64, DensityError>) -> Result<f64, CoreError> {
    match result {
        Ok(ln) if ln.is_nan() => Err(CoreError::Evaluation {
            node,
            source: DensityError::numerical("density evaluated to NaN"),
        }),
        Ok(ln) => Ok(ln),
        Err(DensityError::ConstraintViolation { .. }) => Ok(f64::NEG_INFINITY),
        Err(source) => Err(CoreError::Evaluation { node, source }),
    }
}
