//! Error types for chains, moves and tempering.
//!
//! Per-iteration failures (constraint violations, numerical failures,
//! proposals with no valid mutation) are resolved inside
//! [`Move::perform`](crate::moves::Move::perform) as rejections and never
//! surface here. What does surface is fatal for the run.

use phylodag_core::CoreError;

use crate::moves::MoveState;

#[derive(Debug, thiserror::Error)]
pub enum McmcError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("illegal move transition: {from:?} -> {to:?}")]
    IllegalTransition { from: MoveState, to: MoveState },

    #[error("no moves registered on chain")]
    NoMoves,

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("chain {index} panicked")]
    ChainPanicked { index: usize },
}

impl McmcError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        McmcError::InvalidConfig {
            reason: reason.into(),
        }
    }
}
