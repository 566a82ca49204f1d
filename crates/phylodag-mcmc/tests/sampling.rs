//! End-to-end sampling tests.
//!
//! Each test builds a small model graph, drives it through moves or a full
//! chain, and checks either the sampled distribution or the graph state
//! after the run.
//!
//! Tests cover:
//! - Detailed balance: a standard normal sampled with a sliding window
//! - Tree moves: prune-and-regraft and narrow exchange inside a chain
//! - Failed proposals on a two-tip tree
//! - Exact restore of a rejected tree proposal
//! - Rejected regrafts inside `Move::perform` on a topology-sensitive model
//! - Randomised FNPR round trips on sampled trees (proptest)

use phylodag_core::value::tree_arg;
use phylodag_core::{
    DensityError, FnFunction, ModelGraph, NodeId, Normal, TimeTree, TreeBuilder, TreeLength,
    UniformTimeTree, Value,
};
use phylodag_mcmc::{
    Chain, ChainConfig, Move, MoveOutcome, NarrowExchangeProposal, Proposal, ProposalOutcome,
    PruneAndRegraftProposal, ScheduleKind, SlidingProposal,
};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

fn taxa(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("t{}", i)).collect()
}

/// `((((A:1,B:1):1,C:2):1,D:3):1,E:4);`
fn caterpillar_five() -> TimeTree {
    let mut b = TreeBuilder::new();
    let tips: Vec<_> = ["A", "B", "C", "D", "E"]
        .iter()
        .map(|name| b.tip(*name, 0.0))
        .collect();
    let ab = b.join(&[tips[0], tips[1]], 1.0).unwrap();
    let abc = b.join(&[ab, tips[2]], 2.0).unwrap();
    let abcd = b.join(&[abc, tips[3]], 3.0).unwrap();
    b.join(&[abcd, tips[4]], 4.0).unwrap();
    b.build().unwrap()
}

fn tree_of(graph: &ModelGraph, id: NodeId) -> TimeTree {
    match graph.current_value(id) {
        Some(Value::Tree(tree)) => tree.clone(),
        other => panic!("expected a tree, got {:?}", other),
    }
}

/// A tree node with a uniform topology prior and a total-length monitor.
fn tree_model(tree: TimeTree) -> (ModelGraph, NodeId, NodeId) {
    let mut g = ModelGraph::new();
    let root_age = tree.age(tree.root()).unwrap();
    let n = tree.num_tips();
    let id = g
        .add_stochastic(UniformTimeTree::new(taxa(n), root_age), &[], tree)
        .unwrap();
    let length = g.add_deterministic(TreeLength, &[id]).unwrap();
    (g, id, length)
}

// ---------------------------------------------------------------------------
// Detailed balance
// ---------------------------------------------------------------------------

#[test]
fn sliding_window_samples_standard_normal() {
    let mut g = ModelGraph::new();
    let zero = g.add_constant(0.0);
    let one = g.add_constant(1.0);
    let x = g.add_stochastic(Normal, &[zero, one], 0.0).unwrap();

    let config = ChainConfig {
        generations: 101_000,
        burnin: 1_000,
        thinning: 1,
        seed: 2024,
        ..ChainConfig::default()
    };
    let mut chain = Chain::new(g, config).unwrap();
    chain
        .add_move(Move::weighted(SlidingProposal::new(x, 2.5), 1.0))
        .unwrap();
    chain.monitor("x", x).unwrap();
    let summary = chain.run().unwrap();

    let samples: Vec<f64> = chain.samples().iter().map(|s| s.values[0]).collect();
    assert_eq!(samples.len(), 100_000);

    let stats = &summary.monitors["x"];
    assert!(stats.mean.abs() < 0.04, "mean {}", stats.mean);
    assert!((stats.variance - 1.0).abs() < 0.06, "variance {}", stats.variance);

    // Mass within one and two standard deviations.
    let within = |k: f64| samples.iter().filter(|v| v.abs() < k).count() as f64 / samples.len() as f64;
    assert!((within(1.0) - 0.6827).abs() < 0.02, "one-sigma mass {}", within(1.0));
    assert!((within(2.0) - 0.9545).abs() < 0.01, "two-sigma mass {}", within(2.0));

    // Tuning ran during burn-in and moved the window towards 44% acceptance.
    let rate = summary.moves[0].acceptance_rate;
    assert!(rate > 0.25 && rate < 0.75, "acceptance {}", rate);
}

// ---------------------------------------------------------------------------
// Tree moves
// ---------------------------------------------------------------------------

#[test]
fn tree_chain_keeps_valid_trees_and_constant_length_sum() {
    let (g, tree, length) = tree_model(caterpillar_five());
    let config = ChainConfig {
        generations: 500,
        burnin: 0,
        thinning: 5,
        resync_interval: 50,
        schedule: ScheduleKind::Sequential,
        ..ChainConfig::default()
    };
    let mut chain = Chain::new(g, config).unwrap();
    chain
        .add_move(Move::weighted(PruneAndRegraftProposal::new(tree), 2.0))
        .unwrap();
    chain
        .add_move(Move::weighted(NarrowExchangeProposal::new(tree), 1.0))
        .unwrap();
    chain.monitor("length", length).unwrap();
    let summary = chain.run().unwrap();

    let current = tree_of(chain.graph(), tree);
    assert!(current.check_structure().is_ok());
    assert_eq!(current.first_age_violation(), None);
    assert_eq!(current.num_tips(), 5);
    // The uniform prior is flat, so every valid proposal is accepted.
    for mv in &summary.moves {
        assert_eq!(mv.stats.accepts + mv.stats.failures, mv.stats.tries);
        assert!(mv.stats.accepts > 0);
    }
    assert!(summary.ln_probability.is_finite());
    // Rearrangements at fixed ages preserve the total branch length.
    assert!((summary.monitors["length"].mean - 14.0).abs() < 1e-9);
}

#[test]
fn failed_proposal_on_two_tips_is_a_no_op() {
    let mut b = TreeBuilder::new();
    let x = b.tip("X", 0.0);
    let y = b.tip("Y", 0.0);
    b.join(&[x, y], 1.0).unwrap();
    let original = b.build().unwrap();
    let (mut g, tree, _) = tree_model(original.clone());
    g.reevaluate().unwrap();
    let before = g.joint_ln_probability().unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let mut mv = Move::weighted(PruneAndRegraftProposal::new(tree), 1.0);
    for _ in 0..10 {
        assert_eq!(mv.perform(&mut g, 1.0, &mut rng).unwrap(), MoveOutcome::Failed);
        assert!(g.touched().is_empty());
    }
    assert_eq!(mv.stats().failures, 10);
    assert_eq!(tree_of(&g, tree), original);
    assert_eq!(g.joint_ln_probability().unwrap().to_bits(), before.to_bits());
}

#[test]
fn rejected_regraft_restores_tree_and_caches_exactly() {
    let original = caterpillar_five();
    let (mut g, tree, length) = tree_model(original.clone());
    g.reevaluate().unwrap();
    let length_before = g.value(length).unwrap().clone();
    let joint_before = g.joint_ln_probability().unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let mut p = PruneAndRegraftProposal::new(tree);
    p.prepare(&g, &mut rng).unwrap();
    let outcome = p.propose(&mut g, &mut rng).unwrap();
    assert!(matches!(outcome, ProposalOutcome::Proposed { .. }));
    let record = *p.last_record().unwrap();
    // Ages never change, so the total length stays put as well.
    assert_eq!(g.value(length).unwrap(), &length_before);
    assert_ne!(tree_of(&g, tree), original);

    // Reject: structural undo first, then restore.
    p.undo(&mut g).unwrap();
    g.restore();

    let restored = tree_of(&g, tree);
    assert_eq!(restored, original);
    let parent = restored.node(record.parent).unwrap();
    assert_eq!(parent.children()[record.sibling_slot], record.sibling);
    assert_eq!(parent.parent(), Some(record.grandparent));
    assert_eq!(
        restored.node(record.grandparent).unwrap().children()[record.parent_slot],
        record.parent
    );
    assert_eq!(g.joint_ln_probability().unwrap().to_bits(), joint_before.to_bits());
    g.check_invariants().unwrap();
}

/// Age of the parent of tip "A". Regrafts at fixed heights change it, so an
/// observation clamped to its current value makes most regrafts lose.
fn parent_age_of_a(args: &[&Value]) -> Result<Value, DensityError> {
    let tree = tree_arg(args, 0)?;
    let tip = tree
        .node_ids()
        .find(|&id| tree.node(id).is_ok_and(|n| n.name.as_deref() == Some("A")))
        .ok_or_else(|| DensityError::numerical("tip A not found"))?;
    let parent = tree
        .node(tip)
        .ok()
        .and_then(|n| n.parent())
        .ok_or_else(|| DensityError::numerical("tip A has no parent"))?;
    let age = tree
        .age(parent)
        .map_err(|e| DensityError::numerical(e.to_string()))?;
    Ok(Value::Real(age))
}

#[test]
fn rejected_regrafts_inside_moves_restore_the_tree() {
    let (mut g, tree, length) = tree_model(caterpillar_five());
    let pinned = g
        .add_deterministic(FnFunction::new("parent_age_of_a", parent_age_of_a), &[tree])
        .unwrap();
    let sd = g.add_constant(0.05);
    let observed = g.add_stochastic(Normal, &[pinned, sd], 1.0).unwrap();
    g.clamp(observed, 1.0).unwrap();
    g.reevaluate().unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let mut mv = Move::weighted(PruneAndRegraftProposal::new(tree), 1.0);
    let mut rejected = 0;
    for _ in 0..200 {
        let before_tree = tree_of(&g, tree);
        let before_length = g.value(length).unwrap().clone();
        let before_joint = g.joint_ln_probability().unwrap();

        let outcome = mv.perform(&mut g, 1.0, &mut rng).unwrap();
        assert!(g.touched().is_empty());
        g.check_invariants().unwrap();
        if outcome == MoveOutcome::Rejected {
            rejected += 1;
            assert_eq!(tree_of(&g, tree), before_tree);
            assert_eq!(g.value(length).unwrap(), &before_length);
            assert_eq!(g.joint_ln_probability().unwrap().to_bits(), before_joint.to_bits());
        }
        let full = g.full_ln_probability().unwrap();
        assert!((g.joint_ln_probability().unwrap() - full).abs() < 1e-9);
    }

    let stats = mv.stats();
    assert!(rejected > 0);
    assert_eq!(stats.tries, 200);
    assert_eq!(stats.tries, stats.accepts + stats.failures + rejected);
    assert_eq!(tree_of(&g, tree).first_age_violation(), None);
}

// ---------------------------------------------------------------------------
// Randomised round trips
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn regraft_then_undo_is_identity(seed in any::<u64>(), tips in 3usize..12) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut g = ModelGraph::new();
        let tree = g
            .add_stochastic_sampled(UniformTimeTree::new(taxa(tips), 5.0), &[], &mut rng)
            .unwrap();
        g.reevaluate().unwrap();
        let original = tree_of(&g, tree);

        let mut p = PruneAndRegraftProposal::new(tree);
        for _ in 0..5 {
            p.prepare(&g, &mut rng).unwrap();
            if let ProposalOutcome::Proposed { .. } = p.propose(&mut g, &mut rng).unwrap() {
                let proposed = tree_of(&g, tree);
                prop_assert!(proposed.check_structure().is_ok());
                prop_assert_eq!(proposed.first_age_violation(), None);
            }
            p.undo(&mut g).unwrap();
            g.restore();
            prop_assert_eq!(&tree_of(&g, tree), &original);
        }
    }
}
