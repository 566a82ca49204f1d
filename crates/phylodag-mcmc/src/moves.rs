//! Moves: a proposal plus acceptance bookkeeping, tuning and a weight.
//!
//! [`Move::perform`] runs one complete proposal cycle against a
//! [`ModelGraph`] and always leaves the graph with an empty touched set:
//!
//! 1. `prepare`, then `propose`.
//! 2. On [`ProposalOutcome::Failed`]: nothing was touched; counted as a
//!    rejection.
//! 3. Otherwise the joint log-probability is evaluated (only dirty nodes
//!    recompute) and the Metropolis-Hastings test is applied.
//! 4. Accept: `keep` + `cleanup`. Reject: `undo` + `restore`.
//!
//! A numerical failure during evaluation rejects the proposal. Only fatal
//! errors (invariant violations, unknown nodes) escape.

use phylodag_core::{CoreError, ModelGraph};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::McmcError;
use crate::proposal::{Proposal, ProposalOutcome};

/// Position of a move in its proposal cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveState {
    Idle,
    Prepared,
    Proposed,
    Accepted,
    Rejected,
}

impl MoveState {
    fn can_advance_to(self, next: MoveState) -> bool {
        use MoveState::*;
        matches!(
            (self, next),
            (Idle, Prepared)
                | (Prepared, Proposed)
                | (Prepared, Rejected)
                | (Proposed, Accepted)
                | (Proposed, Rejected)
                | (Accepted, Idle)
                | (Rejected, Idle)
        )
    }
}

/// What one call to [`Move::perform`] ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveOutcome {
    Accepted,
    Rejected,
    /// The proposal found no valid mutation.
    Failed,
    /// Evaluating the proposed state failed numerically.
    EvaluationFailed,
}

/// Per-move settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveConfig {
    /// Relative selection weight; also the expected number of attempts per
    /// generation.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Acceptance rate the tuner aims for.
    #[serde(default = "default_target_acceptance")]
    pub target_acceptance: f64,
    #[serde(default = "default_auto_tune")]
    pub auto_tune: bool,
}

fn default_weight() -> f64 {
    1.0
}

fn default_target_acceptance() -> f64 {
    0.44
}

fn default_auto_tune() -> bool {
    true
}

impl Default for MoveConfig {
    fn default() -> Self {
        MoveConfig {
            weight: default_weight(),
            target_acceptance: default_target_acceptance(),
            auto_tune: default_auto_tune(),
        }
    }
}

impl MoveConfig {
    pub fn with_weight(weight: f64) -> Self {
        MoveConfig {
            weight,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), McmcError> {
        if !(self.weight >= 0.0 && self.weight.is_finite()) {
            return Err(McmcError::config(format!(
                "move weight must be finite and non-negative, got {}",
                self.weight
            )));
        }
        if !(self.target_acceptance > 0.0 && self.target_acceptance < 1.0) {
            return Err(McmcError::config(format!(
                "target acceptance must lie in (0, 1), got {}",
                self.target_acceptance
            )));
        }
        Ok(())
    }
}

/// Acceptance counters for one move.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MoveStats {
    pub tries: u64,
    pub accepts: u64,
    /// Attempts where the proposal found no valid mutation.
    pub failures: u64,
    /// Attempts rejected because evaluation failed numerically.
    pub evaluation_errors: u64,
    /// Counters since the last tuning step.
    pub window_tries: u64,
    pub window_accepts: u64,
}

impl MoveStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.tries == 0 {
            0.0
        } else {
            self.accepts as f64 / self.tries as f64
        }
    }

    fn record(&mut self, outcome: MoveOutcome) {
        self.tries += 1;
        self.window_tries += 1;
        match outcome {
            MoveOutcome::Accepted => {
                self.accepts += 1;
                self.window_accepts += 1;
            }
            MoveOutcome::Rejected => {}
            MoveOutcome::Failed => self.failures += 1,
            MoveOutcome::EvaluationFailed => self.evaluation_errors += 1,
        }
    }
}

/// Serializable end-of-run report for one move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveSummary {
    pub name: String,
    pub weight: f64,
    pub acceptance_rate: f64,
    pub tuning_parameter: Option<f64>,
    #[serde(flatten)]
    pub stats: MoveStats,
}

/// A proposal wrapped with acceptance bookkeeping.
#[derive(Debug)]
pub struct Move {
    proposal: Box<dyn Proposal>,
    config: MoveConfig,
    state: MoveState,
    stats: MoveStats,
}

impl Move {
    pub fn new(proposal: impl Proposal + 'static, config: MoveConfig) -> Self {
        Move {
            proposal: Box::new(proposal),
            config,
            state: MoveState::Idle,
            stats: MoveStats::default(),
        }
    }

    /// A move with weight `weight` and default tuning settings.
    pub fn weighted(proposal: impl Proposal + 'static, weight: f64) -> Self {
        Self::new(proposal, MoveConfig::with_weight(weight))
    }

    pub fn name(&self) -> &str {
        self.proposal.name()
    }

    pub fn weight(&self) -> f64 {
        self.config.weight
    }

    pub fn config(&self) -> &MoveConfig {
        &self.config
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn stats(&self) -> &MoveStats {
        &self.stats
    }

    pub fn proposal(&self) -> &dyn Proposal {
        self.proposal.as_ref()
    }

    pub fn summary(&self) -> MoveSummary {
        MoveSummary {
            name: self.name().to_string(),
            weight: self.config.weight,
            acceptance_rate: self.stats.acceptance_rate(),
            tuning_parameter: self.proposal.tuning_parameter(),
            stats: self.stats.clone(),
        }
    }

    fn advance(&mut self, next: MoveState) -> Result<(), McmcError> {
        if !self.state.can_advance_to(next) {
            return Err(McmcError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Runs one proposal cycle at the given heat.
    ///
    /// The graph must have no open cycle on entry and has none on return,
    /// whatever the outcome, unless a fatal error is returned.
    pub fn perform(
        &mut self,
        graph: &mut ModelGraph,
        heat: f64,
        rng: &mut dyn RngCore,
    ) -> Result<MoveOutcome, McmcError> {
        if !graph.touched().is_empty() {
            return Err(CoreError::InvariantViolation {
                reason: format!(
                    "move {} started with {} node(s) already touched",
                    self.name(),
                    graph.touched().len()
                ),
            }
            .into());
        }
        let before = graph.joint_ln_probability()?;

        self.advance(MoveState::Prepared)?;
        self.proposal.prepare(graph, rng)?;

        let outcome = match self.proposal.propose(graph, rng) {
            Ok(ProposalOutcome::Failed) => {
                if !graph.touched().is_empty() {
                    return Err(CoreError::InvariantViolation {
                        reason: format!("failed {} proposal touched the graph", self.name()),
                    }
                    .into());
                }
                self.proposal.cleanup();
                self.advance(MoveState::Rejected)?;
                MoveOutcome::Failed
            }
            Ok(ProposalOutcome::Proposed { ln_hastings_ratio }) => {
                self.advance(MoveState::Proposed)?;
                self.decide(graph, heat, before, ln_hastings_ratio, rng)?
            }
            Err(err) if err.is_recoverable() => {
                tracing::debug!(proposal = self.name(), error = %err, "proposal failed to evaluate");
                self.advance(MoveState::Rejected)?;
                self.reject(graph)?;
                MoveOutcome::EvaluationFailed
            }
            Err(err) => return Err(err.into()),
        };

        self.stats.record(outcome);
        self.advance(MoveState::Idle)?;
        Ok(outcome)
    }

    fn decide(
        &mut self,
        graph: &mut ModelGraph,
        heat: f64,
        before: f64,
        ln_hastings_ratio: f64,
        rng: &mut dyn RngCore,
    ) -> Result<MoveOutcome, McmcError> {
        let after = match graph.joint_ln_probability() {
            Ok(after) => after,
            Err(err) if err.is_recoverable() => {
                tracing::debug!(proposal = self.name(), error = %err, "rejecting numerically failed state");
                self.advance(MoveState::Rejected)?;
                self.reject(graph)?;
                return Ok(MoveOutcome::EvaluationFailed);
            }
            Err(err) => return Err(err.into()),
        };

        let ln_ratio = heat * (after - before) + ln_hastings_ratio;
        let u: f64 = rng.gen();
        let accept = after != f64::NEG_INFINITY && u.ln() < ln_ratio;
        tracing::trace!(
            proposal = self.name(),
            before,
            after,
            ln_hastings_ratio,
            accept,
            "metropolis-hastings decision"
        );

        if accept {
            self.advance(MoveState::Accepted)?;
            graph.keep()?;
            self.proposal.cleanup();
            Ok(MoveOutcome::Accepted)
        } else {
            self.advance(MoveState::Rejected)?;
            self.reject(graph)?;
            Ok(MoveOutcome::Rejected)
        }
    }

    fn reject(&mut self, graph: &mut ModelGraph) -> Result<(), McmcError> {
        self.proposal.undo(graph)?;
        graph.restore();
        self.proposal.cleanup();
        Ok(())
    }

    /// Feeds the acceptance rate of the current window to the proposal and
    /// starts a new window. Does nothing if tuning is off or nothing was
    /// tried.
    pub fn tune(&mut self) {
        if !self.config.auto_tune || self.stats.window_tries == 0 {
            return;
        }
        let rate = self.stats.window_accepts as f64 / self.stats.window_tries as f64;
        self.proposal.tune(rate, self.config.target_acceptance);
        tracing::debug!(
            proposal = self.name(),
            rate,
            parameter = ?self.proposal.tuning_parameter(),
            "tuned move"
        );
        self.stats.window_tries = 0;
        self.stats.window_accepts = 0;
    }
}
