//! Parallel tempering (Metropolis-coupled MCMC).
//!
//! Each chain owns an independent [`ModelGraph`](phylodag_core::ModelGraph)
//! and RNG and runs on its own OS thread for `swap_interval` generations.
//! At each synchronisation point all chains have stopped, and chains with
//! adjacent heats attempt a swap. A swap exchanges *heats*, not states, so
//! no graph ever crosses a thread boundary while chains run.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::chain::{Chain, ChainSummary, Sample};
use crate::config::ChainConfig;
use crate::error::McmcError;

/// Swap counters for one pair of adjacent heat ranks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwapStats {
    pub attempts: u64,
    pub accepts: u64,
}

/// End-of-run report for the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperedSummary {
    pub heats: Vec<f64>,
    /// `swaps[r]` covers heat ranks `r` and `r + 1`.
    pub swaps: Vec<SwapStats>,
    pub chains: Vec<ChainSummary>,
}

#[derive(Debug)]
pub struct TemperedChains {
    chains: Vec<Chain>,
    /// Heats in rank order, hottest last.
    heats: Vec<f64>,
    /// `ranks[r]` is the index of the chain currently holding heat rank `r`.
    ranks: Vec<usize>,
    swaps: Vec<SwapStats>,
    swap_interval: u64,
    generations: u64,
    rng: ChaCha8Rng,
}

impl TemperedChains {
    /// Builds one chain per configured heat; `build(i)` creates the chain
    /// that starts with heat rank `i`.
    pub fn from_factory(
        config: &ChainConfig,
        mut build: impl FnMut(usize) -> Result<Chain, McmcError>,
    ) -> Result<Self, McmcError> {
        let chains = (0..config.num_chains())
            .map(&mut build)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(chains, config)
    }

    pub fn new(mut chains: Vec<Chain>, config: &ChainConfig) -> Result<Self, McmcError> {
        config.validate()?;
        if chains.len() != config.heats.len() {
            return Err(McmcError::config(format!(
                "{} chains given for {} heats",
                chains.len(),
                config.heats.len()
            )));
        }
        for (chain, &heat) in chains.iter_mut().zip(&config.heats) {
            chain.set_heat(heat);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        // Stream 0.. belong to the chains; the swap RNG uses the last one.
        rng.set_stream(u64::MAX);
        Ok(TemperedChains {
            ranks: (0..chains.len()).collect(),
            swaps: vec![SwapStats::default(); chains.len().saturating_sub(1)],
            heats: config.heats.clone(),
            chains,
            swap_interval: config.swap_interval,
            generations: config.generations,
            rng,
        })
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn swaps(&self) -> &[SwapStats] {
        &self.swaps
    }

    /// Index of the chain currently at heat 1.
    pub fn cold_chain(&self) -> usize {
        self.ranks[0]
    }

    /// Heat currently held by each chain, in chain order.
    pub fn chain_heats(&self) -> Vec<f64> {
        self.chains.iter().map(Chain::heat).collect()
    }

    /// Samples recorded at heat 1 across all chains, ordered by generation.
    pub fn cold_samples(&self) -> Vec<Sample> {
        let mut samples: Vec<Sample> = self
            .chains
            .iter()
            .flat_map(|c| c.samples().iter().cloned())
            .collect();
        samples.sort_by_key(|s| s.generation);
        samples
    }

    /// Runs every chain for `generations` generations, attempting swaps
    /// every `swap_interval` generations.
    pub fn run_for(&mut self, generations: u64) -> Result<(), McmcError> {
        let mut done = 0;
        while done < generations {
            let block = self.swap_interval.min(generations - done);
            self.run_block(block)?;
            done += block;
            if block == self.swap_interval {
                self.attempt_swaps()?;
            }
        }
        Ok(())
    }

    /// Runs the configured number of generations and summarises.
    pub fn run(&mut self) -> Result<TemperedSummary, McmcError> {
        tracing::info!(
            chains = self.chains.len(),
            generations = self.generations,
            swap_interval = self.swap_interval,
            "tempered run starting"
        );
        self.run_for(self.generations)?;
        let chains = self
            .chains
            .iter_mut()
            .map(Chain::summary)
            .collect::<Result<Vec<_>, _>>()?;
        for (rank, stats) in self.swaps.iter().enumerate() {
            tracing::info!(rank, attempts = stats.attempts, accepts = stats.accepts, "swap rate");
        }
        Ok(TemperedSummary {
            heats: self.heats.clone(),
            swaps: self.swaps.clone(),
            chains,
        })
    }

    fn run_block(&mut self, generations: u64) -> Result<(), McmcError> {
        let results: Vec<Result<(), McmcError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .chains
                .iter_mut()
                .map(|chain| scope.spawn(move || chain.run_for(generations)))
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(McmcError::ChainPanicked { index }))
                })
                .collect()
        });
        results.into_iter().collect()
    }

    /// Attempts one swap for every adjacent pair of heat ranks.
    fn attempt_swaps(&mut self) -> Result<(), McmcError> {
        for rank in 0..self.swaps.len() {
            let (i, j) = (self.ranks[rank], self.ranks[rank + 1]);
            let (beta_i, beta_j) = (self.chains[i].heat(), self.chains[j].heat());
            let ln_i = self.chains[i].ln_probability()?;
            let ln_j = self.chains[j].ln_probability()?;
            let ln_ratio = (beta_i - beta_j) * (ln_j - ln_i);

            let stats = &mut self.swaps[rank];
            stats.attempts += 1;
            let u: f64 = self.rng.gen();
            if u.ln() < ln_ratio {
                stats.accepts += 1;
                self.chains[i].set_heat(beta_j);
                self.chains[j].set_heat(beta_i);
                self.ranks.swap(rank, rank + 1);
                tracing::trace!(rank, chain_i = i, chain_j = j, "swapped heats");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::Move;
    use crate::proposal::SlidingProposal;
    use phylodag_core::{ModelGraph, Normal};

    fn normal_chain(config: &ChainConfig, index: usize) -> Result<Chain, McmcError> {
        let mut g = ModelGraph::new();
        let zero = g.add_constant(0.0);
        let one = g.add_constant(1.0);
        let x = g.add_stochastic(Normal, &[zero, one], 0.0)?;
        let mut chain = Chain::with_stream(g, config.clone(), index as u64)?;
        chain.add_move(Move::weighted(SlidingProposal::new(x, 1.0), 1.0))?;
        chain.monitor("x", x)?;
        Ok(chain)
    }

    fn config() -> ChainConfig {
        ChainConfig {
            generations: 200,
            burnin: 0,
            thinning: 1,
            swap_interval: 10,
            heats: vec![1.0, 0.5, 0.25],
            ..ChainConfig::default()
        }
    }

    #[test]
    fn heat_count_must_match_chains() {
        let config = config();
        let chains = vec![normal_chain(&config, 0).unwrap()];
        assert!(matches!(
            TemperedChains::new(chains, &config),
            Err(McmcError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn swap_bookkeeping_is_consistent() {
        let config = config();
        let mut ensemble = TemperedChains::from_factory(&config, |i| normal_chain(&config, i)).unwrap();
        let summary = ensemble.run().unwrap();

        for stats in ensemble.swaps() {
            assert_eq!(stats.attempts, 20);
            assert!(stats.accepts <= stats.attempts);
        }
        assert!(ensemble.swaps().iter().any(|s| s.accepts > 0));

        let mut heats = ensemble.chain_heats();
        heats.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(heats, config.heats);
        assert_eq!(ensemble.chains()[ensemble.cold_chain()].heat(), 1.0);
        assert_eq!(summary.chains.len(), 3);
    }

    #[test]
    fn exactly_one_cold_sample_per_generation() {
        let config = config();
        let mut ensemble = TemperedChains::from_factory(&config, |i| normal_chain(&config, i)).unwrap();
        ensemble.run().unwrap();
        let generations: Vec<u64> = ensemble.cold_samples().iter().map(|s| s.generation).collect();
        assert_eq!(generations, (1..=200).collect::<Vec<_>>());
    }
}
