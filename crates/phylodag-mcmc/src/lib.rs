//! Metropolis-Hastings machinery on top of the phylodag model graph.
//!
//! - [`proposal`]: the [`Proposal`] contract plus scalar and tree-topology
//!   proposals.
//! - [`moves`]: [`Move`] wraps a proposal with the accept/reject cycle,
//!   statistics and auto-tuning.
//! - [`schedule`]: weighted-random and sequential move selection.
//! - [`chain`]: a single seeded chain with monitors and periodic
//!   resynchronisation.
//! - [`tempering`]: heated chains on separate threads with heat swaps.

pub mod chain;
pub mod config;
pub mod error;
pub mod moves;
pub mod proposal;
pub mod schedule;
pub mod tempering;

pub use chain::{Chain, ChainSummary, MonitorSummary, Sample};
pub use config::ChainConfig;
pub use error::McmcError;
pub use moves::{Move, MoveConfig, MoveOutcome, MoveState, MoveStats, MoveSummary};
pub use proposal::{
    NarrowExchangeProposal, Proposal, ProposalOutcome, PruneAndRegraftProposal, ScalingProposal,
    SlidingProposal,
};
pub use schedule::{MoveSchedule, RandomMoveSchedule, ScheduleKind, SequentialMoveSchedule};
pub use tempering::{SwapStats, TemperedChains, TemperedSummary};
