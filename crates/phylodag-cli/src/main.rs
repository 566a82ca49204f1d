//! phylodag command-line runner.
//!
//! Provides the `phylodag` binary, which builds one of the demonstration
//! models, runs it under MCMC (optionally with heated chains) and prints a
//! JSON run summary to stdout. Logs go to stderr and are filtered with
//! `RUST_LOG`.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

use phylodag_core::{
    CoreError, Distribution, Exponential, ModelGraph, Normal, Product, TreeLength,
    UniformTimeTree, Value,
};
use phylodag_mcmc::{
    Chain, ChainConfig, McmcError, Move, NarrowExchangeProposal, PruneAndRegraftProposal,
    ScalingProposal, SlidingProposal, TemperedChains,
};

/// Spacing of the default heat ladder when `--chains` asks for more chains
/// than the configuration lists.
const HEAT_DELTA: f64 = 0.2;

/// Stream of the data-simulation RNG; chain streams count up from zero.
const DATA_STREAM: u64 = u64::MAX - 1;

/// Probabilistic graphical model runner.
#[derive(Parser)]
#[command(name = "phylodag", about = "Run MCMC on demonstration models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run a chain (or a tempered ensemble) and print a JSON summary.
    Run {
        /// Which demonstration model to sample.
        #[arg(short, long, value_enum, default_value = "normal")]
        model: ModelKind,

        /// Generations to run (overrides the configuration file).
        #[arg(short, long)]
        generations: Option<u64>,

        /// RNG seed (overrides the configuration file).
        #[arg(short, long)]
        seed: Option<u64>,

        /// JSON chain configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of tempered chains (overrides the configured heats).
        #[arg(long)]
        chains: Option<usize>,

        /// Number of taxa in the tree model.
        #[arg(long, default_value_t = 8)]
        taxa: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModelKind {
    /// Mean and standard deviation of simulated normal observations.
    Normal,
    /// Topology of a fixed-age time tree with a clock rate.
    Tree,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            model,
            generations,
            seed,
            config,
            chains,
            taxa,
        } => {
            let exit_code = run(model, generations, seed, config, chains, taxa);
            process::exit(exit_code);
        }
    }
}

/// Execute the run subcommand.
///
/// Returns exit code: 0 = success, 1 = sampling error,
/// 2 = invalid configuration, 3 = I/O error.
fn run(
    model: ModelKind,
    generations: Option<u64>,
    seed: Option<u64>,
    config_path: Option<PathBuf>,
    chains: Option<usize>,
    taxa: usize,
) -> i32 {
    let mut config = match config_path {
        Some(path) => {
            let text = match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("Error: failed to read '{}': {}", path.display(), e);
                    return 3;
                }
            };
            match ChainConfig::from_json(&text) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return 2;
                }
            }
        }
        None => ChainConfig::default(),
    };

    // Flags win over the configuration file.
    if let Some(generations) = generations {
        config.generations = generations;
    }
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(chains) = chains {
        if chains != config.num_chains() {
            config.heats = ChainConfig::incremental_heats(chains, HEAT_DELTA);
        }
    }
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return 2;
    }
    tracing::info!(
        ?model,
        chains = config.num_chains(),
        generations = config.generations,
        "starting run"
    );

    let summary = if config.num_chains() == 1 {
        build_chain(model, &config, 0, taxa)
            .and_then(|mut chain| chain.run())
            .map(|summary| to_json(&summary))
    } else {
        TemperedChains::from_factory(&config, |index| {
            build_chain(model, &config, index as u64, taxa)
        })
        .and_then(|mut ensemble| ensemble.run())
        .map(|summary| to_json(&summary))
    };

    match summary {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(McmcError::InvalidConfig { reason }) => {
            eprintln!("Error: invalid configuration: {}", reason);
            2
        }
        Err(e) => {
            eprintln!("Sampling error: {}", e);
            1
        }
    }
}

/// Renders a summary as pretty JSON for machine-readable output.
fn to_json(summary: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(summary).unwrap_or_else(|e| {
        format!("{{\"error\": \"failed to serialize summary: {}\"}}", e)
    })
}

/// Builds chain `index` of the requested model. Every chain sees the same
/// simulated data; only its RNG stream differs.
fn build_chain(
    model: ModelKind,
    config: &ChainConfig,
    index: u64,
    taxa: usize,
) -> Result<Chain, McmcError> {
    let mut data_rng = ChaCha8Rng::seed_from_u64(config.seed);
    data_rng.set_stream(DATA_STREAM);
    match model {
        ModelKind::Normal => normal_model(config, index, &mut data_rng),
        ModelKind::Tree => tree_model(config, index, taxa, &mut data_rng),
    }
}

/// `mu ~ Normal(0, 10)`, `sigma ~ Exponential(1)`, twenty observations
/// `y_i ~ Normal(mu, sigma)` simulated at `mu = 3`, `sigma = 1.5`.
fn normal_model(
    config: &ChainConfig,
    index: u64,
    data_rng: &mut ChaCha8Rng,
) -> Result<Chain, McmcError> {
    let mut g = ModelGraph::new();
    let zero = g.add_constant(0.0);
    let ten = g.add_constant(10.0);
    let one = g.add_constant(1.0);
    let mu = g.add_stochastic(Normal, &[zero, ten], 0.0)?;
    let sigma = g.add_stochastic(Exponential, &[one], 1.0)?;
    g.set_name(mu, "mu")?;
    g.set_name(sigma, "sigma")?;

    let (true_mu, true_sigma) = (Value::Real(3.0), Value::Real(1.5));
    for i in 0..20 {
        let observed = Normal
            .sample(&[&true_mu, &true_sigma], data_rng)
            .map_err(|source| CoreError::Evaluation { node: mu, source })?;
        let y = g.add_stochastic(Normal, &[mu, sigma], observed.clone())?;
        g.clamp(y, observed)?;
        g.set_name(y, format!("y{}", i))?;
    }
    g.set_roots(&[mu])?;

    let mut chain = Chain::with_stream(g, config.clone(), index)?;
    chain.add_move(Move::weighted(SlidingProposal::new(mu, 1.0), 1.0))?;
    chain.add_move(Move::weighted(ScalingProposal::new(sigma, 1.0), 1.0))?;
    chain.monitor("mu", mu)?;
    chain.monitor("sigma", sigma)?;
    Ok(chain)
}

/// A uniform time tree with root age 1 and a clock rate; the observed total
/// substitution length is `Normal(rate * tree_length, 0.5)`.
fn tree_model(
    config: &ChainConfig,
    index: u64,
    taxa: usize,
    data_rng: &mut ChaCha8Rng,
) -> Result<Chain, McmcError> {
    let names = (0..taxa).map(|i| format!("taxon{}", i)).collect();
    let mut g = ModelGraph::new();
    let tree = g.add_stochastic_sampled(UniformTimeTree::new(names, 1.0), &[], data_rng)?;
    let one = g.add_constant(1.0);
    let rate = g.add_stochastic(Exponential, &[one], 1.0)?;
    let length = g.add_deterministic(TreeLength, &[tree])?;
    let expected = g.add_deterministic(Product, &[rate, length])?;
    let noise = g.add_constant(0.5);
    let observed = g.add_stochastic(Normal, &[expected, noise], 5.0)?;
    g.clamp(observed, 5.0)?;
    g.set_name(tree, "tree")?;
    g.set_name(rate, "rate")?;

    let mut chain = Chain::with_stream(g, config.clone(), index)?;
    chain.add_move(Move::weighted(PruneAndRegraftProposal::new(tree), 2.0))?;
    chain.add_move(Move::weighted(NarrowExchangeProposal::new(tree), 2.0))?;
    chain.add_move(Move::weighted(ScalingProposal::new(rate, 0.5), 1.0))?;
    chain.monitor("rate", rate)?;
    chain.monitor("tree_length", length)?;
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> ChainConfig {
        ChainConfig {
            generations: 200,
            burnin: 50,
            thinning: 5,
            ..ChainConfig::default()
        }
    }

    #[test]
    fn normal_model_runs() {
        let mut chain = build_chain(ModelKind::Normal, &quick_config(), 0, 0).unwrap();
        let summary = chain.run().unwrap();
        assert_eq!(summary.samples, 30);
        assert!(summary.monitors["sigma"].mean > 0.0);
    }

    #[test]
    fn chains_share_simulated_data() {
        let config = quick_config();
        let mut a = build_chain(ModelKind::Normal, &config, 0, 0).unwrap();
        let mut b = build_chain(ModelKind::Normal, &config, 1, 0).unwrap();
        assert_eq!(
            a.ln_probability().unwrap().to_bits(),
            b.ln_probability().unwrap().to_bits()
        );
    }

    #[test]
    fn tree_model_runs_tempered() {
        let config = ChainConfig {
            heats: ChainConfig::incremental_heats(2, HEAT_DELTA),
            swap_interval: 20,
            ..quick_config()
        };
        let mut ensemble =
            TemperedChains::from_factory(&config, |i| build_chain(ModelKind::Tree, &config, i as u64, 6))
                .unwrap();
        let summary = ensemble.run().unwrap();
        assert_eq!(summary.chains.len(), 2);
        assert_eq!(summary.swaps[0].attempts, 10);
        assert!(to_json(&summary).contains("\"swaps\""));
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "phylodag", "run", "--model", "tree", "--generations", "10", "--chains", "3",
        ])
        .unwrap();
        let Commands::Run {
            model,
            generations,
            chains,
            ..
        } = cli.command;
        assert_eq!(model, ModelKind::Tree);
        assert_eq!(generations, Some(10));
        assert_eq!(chains, Some(3));
    }
}
