//! Proposals on real-valued stochastic nodes.

use phylodag_core::{CoreError, ModelGraph, NodeId, Value};
use rand::{Rng, RngCore};

use super::{current_real, pick, tuned, Proposal, ProposalOutcome};

/// Symmetric sliding window: `x' = x + delta * (u - 0.5)`, `u ~ U(0, 1)`.
///
/// Bound to a set of real nodes; one is picked uniformly per attempt.
#[derive(Debug, Clone)]
pub struct SlidingProposal {
    nodes: Vec<NodeId>,
    delta: f64,
    chosen: Option<NodeId>,
}

impl SlidingProposal {
    pub fn new(node: NodeId, delta: f64) -> Self {
        Self::over(vec![node], delta)
    }

    pub fn over(nodes: Vec<NodeId>, delta: f64) -> Self {
        SlidingProposal {
            nodes,
            delta,
            chosen: None,
        }
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }
}

impl Proposal for SlidingProposal {
    fn name(&self) -> &str {
        "Sliding"
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn prepare(&mut self, _graph: &ModelGraph, rng: &mut dyn RngCore) -> Result<(), CoreError> {
        self.chosen = pick(&self.nodes, rng);
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
        let x = current_real(graph, node)?;
        let u: f64 = rng.gen();
        graph.set_value(node, Value::Real(x + self.delta * (u - 0.5)))?;
        Ok(ProposalOutcome::Proposed {
            ln_hastings_ratio: 0.0,
        })
    }

    fn cleanup(&mut self) {
        self.chosen = None;
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.delta)
    }

    fn tune(&mut self, acceptance_rate: f64, target: f64) {
        self.delta = tuned(self.delta, acceptance_rate, target);
    }
}

/// Multiplier proposal: `x' = x * m`, `m = exp(lambda * (u - 0.5))`.
///
/// Keeps the sign of `x`; the Hastings ratio is `ln m`.
#[derive(Debug, Clone)]
pub struct ScalingProposal {
    nodes: [NodeId; 1],
    lambda: f64,
}

impl ScalingProposal {
    pub fn new(node: NodeId, lambda: f64) -> Self {
        ScalingProposal {
            nodes: [node],
            lambda,
        }
    }
}

impl Proposal for ScalingProposal {
    fn name(&self) -> &str {
        "Scaling"
    }

    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn propose(
        &mut self,
        graph: &mut ModelGraph,
        rng: &mut dyn RngCore,
    ) -> Result<ProposalOutcome, CoreError> {
        let node = self.nodes[0];
        let x = current_real(graph, node)?;
        let u: f64 = rng.gen();
        let ln_m = self.lambda * (u - 0.5);
        graph.set_value(node, Value::Real(x * ln_m.exp()))?;
        Ok(ProposalOutcome::Proposed {
            ln_hastings_ratio: ln_m,
        })
    }

    fn tuning_parameter(&self) -> Option<f64> {
        Some(self.lambda)
    }

    fn tune(&mut self, acceptance_rate: f64, target: f64) {
        self.lambda = tuned(self.lambda, acceptance_rate, target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylodag_core::{Exponential, Normal};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn normal_pair() -> (ModelGraph, NodeId, NodeId) {
        let mut g = ModelGraph::new();
        let zero = g.add_constant(0.0);
        let one = g.add_constant(1.0);
        let a = g.add_stochastic(Normal, &[zero, one], 0.0).unwrap();
        let b = g.add_stochastic(Normal, &[zero, one], 0.0).unwrap();
        g.reevaluate().unwrap();
        (g, a, b)
    }

    #[test]
    fn sliding_stays_within_window() {
        let (mut g, a, _) = normal_pair();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut p = SlidingProposal::new(a, 0.5);
        for _ in 0..50 {
            p.prepare(&g, &mut rng).unwrap();
            let out = p.propose(&mut g, &mut rng).unwrap();
            assert_eq!(out, ProposalOutcome::Proposed { ln_hastings_ratio: 0.0 });
            let x = g.value(a).unwrap().as_real().unwrap();
            assert!(x.abs() <= 0.25);
            g.restore();
        }
    }

    #[test]
    fn sliding_touches_only_the_chosen_node() {
        let (mut g, a, b) = normal_pair();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut p = SlidingProposal::over(vec![a, b], 1.0);
        p.prepare(&g, &mut rng).unwrap();
        p.propose(&mut g, &mut rng).unwrap();
        assert_eq!(g.touched().len(), 1);
        g.restore();
    }

    #[test]
    fn sliding_without_nodes_fails() {
        let (mut g, _, _) = normal_pair();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut p = SlidingProposal::over(Vec::new(), 1.0);
        p.prepare(&g, &mut rng).unwrap();
        assert_eq!(p.propose(&mut g, &mut rng).unwrap(), ProposalOutcome::Failed);
        assert!(g.touched().is_empty());
    }

    #[test]
    fn scaling_reports_log_multiplier() {
        let mut g = ModelGraph::new();
        let rate = g.add_constant(1.0);
        let x = g.add_stochastic(Exponential, &[rate], 2.0).unwrap();
        g.reevaluate().unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut p = ScalingProposal::new(x, 1.0);
        let ProposalOutcome::Proposed { ln_hastings_ratio } = p.propose(&mut g, &mut rng).unwrap()
        else {
            panic!("scaling never fails");
        };
        let new = g.value(x).unwrap().as_real().unwrap();
        assert!((new - 2.0 * ln_hastings_ratio.exp()).abs() < 1e-12);
        assert!(ln_hastings_ratio.abs() <= 0.5);
    }

    #[test]
    fn type_mismatch_leaves_graph_untouched() {
        let mut g = ModelGraph::new();
        let taxa = vec!["A".to_string(), "B".to_string()];
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let tree = g
            .add_stochastic_sampled(phylodag_core::UniformTimeTree::new(taxa, 1.0), &[], &mut rng)
            .unwrap();
        let mut p = SlidingProposal::new(tree, 1.0);
        p.prepare(&g, &mut rng).unwrap();
        assert!(matches!(
            p.propose(&mut g, &mut rng),
            Err(CoreError::TypeMismatch { .. })
        ));
        assert!(g.touched().is_empty());
    }
}
