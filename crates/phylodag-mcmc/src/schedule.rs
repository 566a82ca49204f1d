//! Move schedules: which move runs next within a generation.

use std::fmt;

use rand::distributions::{Distribution as _, WeightedIndex};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::moves::Move;

/// Selects moves for one chain.
pub trait MoveSchedule: fmt::Debug + Send {
    fn name(&self) -> &str;

    /// Number of move attempts that make up one generation.
    fn moves_per_generation(&self, moves: &[Move]) -> usize;

    /// Index into `moves` of the next move to perform, or `None` if no move
    /// can be scheduled.
    fn next(&mut self, moves: &[Move], rng: &mut dyn RngCore) -> Option<usize>;
}

/// Schedule selection in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    #[default]
    Random,
    Sequential,
}

impl ScheduleKind {
    pub fn build(self) -> Box<dyn MoveSchedule> {
        match self {
            ScheduleKind::Random => Box::new(RandomMoveSchedule),
            ScheduleKind::Sequential => Box::new(SequentialMoveSchedule::default()),
        }
    }
}

/// Draws each move independently with probability proportional to its
/// weight. A generation is as many draws as the rounded total weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomMoveSchedule;

impl MoveSchedule for RandomMoveSchedule {
    fn name(&self) -> &str {
        "random"
    }

    fn moves_per_generation(&self, moves: &[Move]) -> usize {
        let total: f64 = moves.iter().map(Move::weight).sum();
        (total.round() as usize).max(1)
    }

    fn next(&mut self, moves: &[Move], rng: &mut dyn RngCore) -> Option<usize> {
        let index = WeightedIndex::new(moves.iter().map(Move::weight)).ok()?;
        Some(index.sample(rng))
    }
}

/// Cycles through moves in registration order, repeating each one
/// `round(weight)` times. Moves with a rounded weight of zero are skipped.
#[derive(Debug, Clone, Default)]
pub struct SequentialMoveSchedule {
    position: usize,
    repeats_done: usize,
}

fn repeats(m: &Move) -> usize {
    m.weight().round() as usize
}

impl MoveSchedule for SequentialMoveSchedule {
    fn name(&self) -> &str {
        "sequential"
    }

    fn moves_per_generation(&self, moves: &[Move]) -> usize {
        moves.iter().map(repeats).sum::<usize>().max(1)
    }

    fn next(&mut self, moves: &[Move], _rng: &mut dyn RngCore) -> Option<usize> {
        if moves.iter().all(|m| repeats(m) == 0) {
            return None;
        }
        loop {
            if self.position >= moves.len() {
                self.position = 0;
            }
            if self.repeats_done < repeats(&moves[self.position]) {
                self.repeats_done += 1;
                return Some(self.position);
            }
            self.position += 1;
            self.repeats_done = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::SlidingProposal;
    use phylodag_core::NodeId;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn moves(weights: &[f64]) -> Vec<Move> {
        weights
            .iter()
            .enumerate()
            .map(|(i, &w)| Move::weighted(SlidingProposal::new(NodeId(i as u32), 1.0), w))
            .collect()
    }

    #[test]
    fn random_schedule_follows_weights() {
        let moves = moves(&[1.0, 3.0]);
        let mut schedule = RandomMoveSchedule;
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let mut counts = [0usize; 2];
        for _ in 0..40_000 {
            counts[schedule.next(&moves, &mut rng).unwrap()] += 1;
        }
        let share = counts[1] as f64 / 40_000.0;
        assert!((share - 0.75).abs() < 0.01, "share was {}", share);
        assert_eq!(schedule.moves_per_generation(&moves), 4);
    }

    #[test]
    fn random_schedule_with_zero_weights_picks_nothing() {
        let moves = moves(&[0.0, 0.0]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(RandomMoveSchedule.next(&moves, &mut rng), None);
        assert_eq!(RandomMoveSchedule.next(&[], &mut rng), None);
    }

    #[test]
    fn sequential_schedule_repeats_by_weight() {
        let moves = moves(&[2.0, 0.0, 1.0]);
        let mut schedule = SequentialMoveSchedule::default();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let picked: Vec<usize> = (0..6)
            .map(|_| schedule.next(&moves, &mut rng).unwrap())
            .collect();
        assert_eq!(picked, vec![0, 0, 2, 0, 0, 2]);
        assert_eq!(schedule.moves_per_generation(&moves), 3);
    }

    #[test]
    fn schedule_kind_parses_lowercase() {
        let kind: ScheduleKind = serde_json::from_str("\"sequential\"").unwrap();
        assert_eq!(kind, ScheduleKind::Sequential);
        assert_eq!(kind.build().name(), "sequential");
    }
}
