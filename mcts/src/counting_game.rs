//! A tiny deterministic game for tests: each player may increment,
//! decrement, or keep a shared counter; player 1 wins at the upper limit,
//! player 2 wins at zero.

use anyhow::Result;
use engine::{
    Descriptor, Distance, EndgameOracle, GameRules, Outcome, PreconditionError, Probe, Solved,
};
use model::{Evaluator, PositionEval};

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CountingPosition {
    pub p1_turn: bool,
    pub count: u8,
}

pub fn position(p1_turn: bool, count: u8) -> CountingPosition {
    CountingPosition { p1_turn, count }
}

#[derive(Clone)]
pub struct CountingRules {
    limit: u8,
}

impl CountingRules {
    pub fn new(limit: u8) -> Self {
        Self { limit }
    }
}

impl GameRules for CountingRules {
    type Position = CountingPosition;

    fn successors(&self, pos: &CountingPosition) -> Vec<CountingPosition> {
        if self.is_terminal(pos, None) {
            return Vec::new();
        }
        vec![
            position(!pos.p1_turn, pos.count + 1),
            position(!pos.p1_turn, pos.count - 1),
            position(!pos.p1_turn, pos.count),
        ]
    }

    fn is_terminal(&self, pos: &CountingPosition, _successors: Option<&[CountingPosition]>) -> bool {
        pos.count == 0 || pos.count == self.limit
    }

    fn winner(&self, pos: &CountingPosition) -> Result<Outcome, PreconditionError> {
        if pos.count == self.limit {
            Ok(Outcome::Win)
        } else if pos.count == 0 {
            Ok(Outcome::Loss)
        } else {
            Err(PreconditionError::new("the counting game is not over"))
        }
    }

    fn is_white_to_move(&self, pos: &CountingPosition) -> bool {
        pos.p1_turn
    }

    fn material_advantage(&self, _pos: &CountingPosition) -> i32 {
        0
    }

    fn descriptor(&self, _pos: &CountingPosition) -> Descriptor {
        Descriptor::new("counting")
    }
}

/// Values a position by how close the counter is to player 1's goal and
/// slightly prefers staying put, like the reference analyzer.
pub struct CountingEvaluator {
    rules: CountingRules,
}

impl CountingEvaluator {
    pub fn new(rules: CountingRules) -> Self {
        Self { rules }
    }
}

impl Evaluator<CountingRules> for CountingEvaluator {
    fn evaluate(&self, positions: &[CountingPosition]) -> Vec<PositionEval> {
        positions
            .iter()
            .map(|pos| {
                let value = (pos.count as f32 / self.rules.limit as f32) * 2.0 - 1.0;
                let policy = if self.rules.is_terminal(pos, None) {
                    Vec::new()
                } else {
                    vec![0.3, 0.3, 0.4]
                };
                PositionEval::new(policy, value)
            })
            .collect()
    }
}

/// A fake endgame oracle: every position at or above the threshold counts
/// as a proven player-1 win, with incrementing as the best move.
pub struct CountingOracle {
    threshold: u8,
    limit: u8,
}

impl CountingOracle {
    pub fn solving_at(threshold: u8, limit: u8) -> Self {
        Self { threshold, limit }
    }
}

impl EndgameOracle for CountingOracle {
    type Position = CountingPosition;

    fn query(
        &mut self,
        pos: &CountingPosition,
        outcome_only: bool,
    ) -> Result<Probe<CountingPosition>> {
        if pos.count < self.threshold {
            return Ok(Probe::Unknown);
        }

        let best_move = if outcome_only || pos.count == self.limit {
            None
        } else {
            Some(position(!pos.p1_turn, pos.count + 1))
        };
        Ok(Probe::Solved(Solved {
            best_move,
            outcome: Outcome::Win,
            distance: Distance::Finite((self.limit - pos.count) as u32),
        }))
    }
}
