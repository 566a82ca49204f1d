//! A single Metropolis-Hastings chain.
//!
//! A [`Chain`] owns its [`ModelGraph`], its moves, a move schedule and a
//! seeded `ChaCha8Rng`. One generation performs as many scheduled moves as
//! the schedule asks for, then:
//!
//! - during burn-in, tunes every move each `tune_interval` generations;
//! - every `resync_interval` generations, re-evaluates the whole graph and
//!   warns if the incremental joint probability had drifted;
//! - after burn-in, records a sample of the monitored nodes every
//!   `thinning` generations (cold chain only).

use indexmap::IndexMap;
use phylodag_core::{CoreError, ModelGraph, NodeId};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::config::ChainConfig;
use crate::error::McmcError;
use crate::moves::{Move, MoveSummary};
use crate::schedule::MoveSchedule;

/// Drift between incremental and full joint probability tolerated at a
/// resynchronisation point.
const DRIFT_TOLERANCE: f64 = 1e-6;

/// One recorded state of the cold chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub generation: u64,
    pub ln_probability: f64,
    /// Monitored values, in monitor registration order.
    pub values: Vec<f64>,
}

/// Mean and variance of one monitored node over the recorded samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    pub mean: f64,
    pub variance: f64,
}

/// End-of-run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainSummary {
    pub generations: u64,
    pub heat: f64,
    pub ln_probability: f64,
    pub samples: usize,
    pub moves: Vec<MoveSummary>,
    pub monitors: IndexMap<String, MonitorSummary>,
}

#[derive(Debug)]
pub struct Chain {
    graph: ModelGraph,
    moves: Vec<Move>,
    schedule: Box<dyn MoveSchedule>,
    config: ChainConfig,
    rng: ChaCha8Rng,
    heat: f64,
    generation: u64,
    monitors: IndexMap<String, NodeId>,
    samples: Vec<Sample>,
}

impl Chain {
    /// Creates a cold chain seeded from `config.seed`.
    pub fn new(graph: ModelGraph, config: ChainConfig) -> Result<Self, McmcError> {
        Self::with_stream(graph, config, 0)
    }

    /// Creates a cold chain on RNG stream `stream` of `config.seed`, so
    /// chains sharing a seed still draw independent numbers.
    pub fn with_stream(
        mut graph: ModelGraph,
        config: ChainConfig,
        stream: u64,
    ) -> Result<Self, McmcError> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(stream);
        let initial = graph.reevaluate()?;
        tracing::debug!(stream, initial, nodes = graph.node_count(), "chain created");
        Ok(Chain {
            graph,
            moves: Vec::new(),
            schedule: config.schedule.build(),
            config,
            rng,
            heat: 1.0,
            generation: 0,
            monitors: IndexMap::new(),
            samples: Vec::new(),
        })
    }

    pub fn add_move(&mut self, mv: Move) -> Result<(), McmcError> {
        mv.config().validate()?;
        for &node in mv.proposal().nodes() {
            self.graph.node(node)?;
        }
        self.moves.push(mv);
        Ok(())
    }

    /// Records the value of a real-valued node with every sample.
    pub fn monitor(&mut self, name: impl Into<String>, node: NodeId) -> Result<(), McmcError> {
        if !self.samples.is_empty() {
            return Err(McmcError::config(format!(
                "cannot add a monitor after {} samples were recorded",
                self.samples.len()
            )));
        }
        let value = self.graph.value(node)?;
        if value.as_real().is_none() {
            return Err(CoreError::TypeMismatch {
                node,
                expected: "Real",
                got: value.kind(),
            }
            .into());
        }
        self.monitors.insert(name.into(), node);
        Ok(())
    }

    pub fn set_schedule(&mut self, schedule: Box<dyn MoveSchedule>) {
        self.schedule = schedule;
    }

    pub fn graph(&self) -> &ModelGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ModelGraph {
        &mut self.graph
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn heat(&self) -> f64 {
        self.heat
    }

    pub fn set_heat(&mut self, heat: f64) {
        self.heat = heat;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Joint log-probability of the current (committed) state.
    pub fn ln_probability(&mut self) -> Result<f64, McmcError> {
        Ok(self.graph.joint_ln_probability()?)
    }

    /// Runs one generation.
    pub fn step(&mut self) -> Result<(), McmcError> {
        if self.moves.is_empty() {
            return Err(McmcError::NoMoves);
        }
        let attempts = self.schedule.moves_per_generation(&self.moves);
        for _ in 0..attempts {
            let index = self
                .schedule
                .next(&self.moves, &mut self.rng)
                .ok_or(McmcError::NoMoves)?;
            self.moves[index].perform(&mut self.graph, self.heat, &mut self.rng)?;
        }
        self.generation += 1;

        if self.generation <= self.config.burnin
            && self.generation % self.config.tune_interval == 0
        {
            for mv in &mut self.moves {
                mv.tune();
            }
        }
        if self.config.resync_interval > 0 && self.generation % self.config.resync_interval == 0 {
            self.resync()?;
        }
        if self.heat == 1.0
            && self.generation > self.config.burnin
            && (self.generation - self.config.burnin) % self.config.thinning == 0
        {
            self.record()?;
        }
        Ok(())
    }

    /// Runs `generations` generations.
    pub fn run_for(&mut self, generations: u64) -> Result<(), McmcError> {
        for _ in 0..generations {
            self.step()?;
        }
        Ok(())
    }

    /// Runs the configured number of generations and summarises the run.
    pub fn run(&mut self) -> Result<ChainSummary, McmcError> {
        tracing::info!(
            generations = self.config.generations,
            moves = self.moves.len(),
            schedule = self.schedule.name(),
            "chain starting"
        );
        self.run_for(self.config.generations)?;
        let summary = self.summary()?;
        tracing::info!(
            ln_probability = summary.ln_probability,
            samples = summary.samples,
            "chain finished"
        );
        Ok(summary)
    }

    /// Re-evaluates the graph from scratch, replacing the incremental total.
    pub fn resync(&mut self) -> Result<f64, McmcError> {
        let incremental = self.graph.joint_ln_probability()?;
        let full = self.graph.reevaluate()?;
        let drift = (incremental - full).abs();
        if drift > DRIFT_TOLERANCE {
            tracing::warn!(
                generation = self.generation,
                incremental,
                full,
                "joint probability drifted; resynchronised"
            );
        }
        Ok(full)
    }

    fn record(&mut self) -> Result<(), McmcError> {
        let ln_probability = self.graph.joint_ln_probability()?;
        let mut values = Vec::with_capacity(self.monitors.len());
        for &node in self.monitors.values() {
            let value = self.graph.value(node)?;
            values.push(value.expect_real(node)?);
        }
        self.samples.push(Sample {
            generation: self.generation,
            ln_probability,
            values,
        });
        Ok(())
    }

    pub fn summary(&mut self) -> Result<ChainSummary, McmcError> {
        let monitors = self
            .monitors
            .keys()
            .enumerate()
            .map(|(i, name)| (name.clone(), summarise(self.samples.iter().map(|s| s.values[i]))))
            .collect();
        Ok(ChainSummary {
            generations: self.generation,
            heat: self.heat,
            ln_probability: self.ln_probability()?,
            samples: self.samples.len(),
            moves: self.moves.iter().map(Move::summary).collect(),
            monitors,
        })
    }
}

fn summarise(values: impl Iterator<Item = f64>) -> MonitorSummary {
    let (mut n, mut mean, mut m2) = (0.0, 0.0, 0.0);
    for x in values {
        n += 1.0;
        let delta = x - mean;
        mean += delta / n;
        m2 += delta * (x - mean);
    }
    MonitorSummary {
        mean: if n > 0.0 { mean } else { f64::NAN },
        variance: if n > 1.0 { m2 / (n - 1.0) } else { f64::NAN },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::{ScalingProposal, SlidingProposal};
    use phylodag_core::{Exponential, Normal, UniformTimeTree};

    fn normal_chain(config: ChainConfig) -> (Chain, NodeId) {
        let mut g = ModelGraph::new();
        let zero = g.add_constant(0.0);
        let one = g.add_constant(1.0);
        let x = g.add_stochastic(Normal, &[zero, one], 0.0).unwrap();
        let mut chain = Chain::new(g, config).unwrap();
        chain.add_move(Move::weighted(SlidingProposal::new(x, 1.0), 1.0)).unwrap();
        chain.monitor("x", x).unwrap();
        (chain, x)
    }

    fn small_config() -> ChainConfig {
        ChainConfig {
            generations: 300,
            burnin: 100,
            thinning: 10,
            tune_interval: 20,
            resync_interval: 50,
            ..ChainConfig::default()
        }
    }

    #[test]
    fn samples_follow_burnin_and_thinning() {
        let (mut chain, _) = normal_chain(small_config());
        let summary = chain.run().unwrap();
        assert_eq!(summary.generations, 300);
        assert_eq!(summary.samples, 20);
        assert_eq!(chain.samples()[0].generation, 110);
        assert!(summary.monitors["x"].mean.is_finite());
        assert!(chain.graph().touched().is_empty());
    }

    #[test]
    fn same_seed_same_trajectory() {
        let (mut a, _) = normal_chain(small_config());
        let (mut b, _) = normal_chain(small_config());
        a.run().unwrap();
        b.run().unwrap();
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn chain_without_moves_refuses_to_step() {
        let g = ModelGraph::new();
        let mut chain = Chain::new(g, ChainConfig::default()).unwrap();
        assert!(matches!(chain.step(), Err(McmcError::NoMoves)));
    }

    #[test]
    fn moves_must_target_existing_nodes() {
        let (mut chain, _) = normal_chain(small_config());
        let err = chain
            .add_move(Move::weighted(ScalingProposal::new(NodeId(99), 1.0), 1.0))
            .unwrap_err();
        assert!(matches!(err, McmcError::Core(CoreError::NodeNotFound { .. })));
    }

    #[test]
    fn tree_nodes_cannot_be_monitored_directly() {
        let mut g = ModelGraph::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let taxa = vec!["A".into(), "B".into(), "C".into()];
        let tree = g
            .add_stochastic_sampled(UniformTimeTree::new(taxa, 2.0), &[], &mut rng)
            .unwrap();
        let mut chain = Chain::new(g, ChainConfig::default()).unwrap();
        assert!(chain.monitor("tree", tree).is_err());
    }

    #[test]
    fn monitors_are_fixed_once_sampling_starts() {
        let config = ChainConfig {
            burnin: 0,
            thinning: 1,
            ..small_config()
        };
        let (mut chain, x) = normal_chain(config);
        chain.run_for(5).unwrap();
        let err = chain.monitor("y", x).unwrap_err();
        assert!(matches!(err, McmcError::InvalidConfig { .. }));

        chain.run_for(5).unwrap();
        let summary = chain.summary().unwrap();
        assert_eq!(summary.samples, 10);
        assert_eq!(summary.monitors.len(), 1);
        assert!(chain.samples().iter().all(|s| s.values.len() == 1));
    }

    #[test]
    fn resync_matches_incremental_total() {
        let mut g = ModelGraph::new();
        let rate = g.add_constant(2.0);
        let x = g.add_stochastic(Exponential, &[rate], 1.0).unwrap();
        let mut chain = Chain::new(g, small_config()).unwrap();
        chain.add_move(Move::weighted(ScalingProposal::new(x, 0.5), 1.0)).unwrap();
        chain.run_for(37).unwrap();
        let incremental = chain.ln_probability().unwrap();
        let full = chain.resync().unwrap();
        assert!((incremental - full).abs() < 1e-9);
    }

    #[test]
    fn summarise_uses_sample_variance() {
        let s = summarise([1.0, 2.0, 3.0, 4.0].into_iter());
        assert_eq!(s.mean, 2.5);
        assert!((s.variance - 5.0 / 3.0).abs() < 1e-12);
        assert!(summarise(std::iter::empty()).mean.is_nan());
    }
}
