use std::marker::PhantomData;

use anyhow::Result;

use crate::distance::Distance;
use crate::outcome::Outcome;

/// Result of asking an endgame oracle about a position. `Unknown` is a
/// normal value, distinct from a known draw; it must never be collapsed into
/// an outcome of 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe<P> {
    Unknown,
    Solved(Solved<P>),
}

/// An exact answer: the position after the best move (absent for terminal
/// positions and trivially drawn material), the proven outcome and the
/// distance to the end of the game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solved<P> {
    pub best_move: Option<P>,
    pub outcome: Outcome,
    pub distance: Distance,
}

impl<P> Probe<P> {
    pub fn is_solved(&self) -> bool {
        matches!(self, Probe::Solved(_))
    }
}

/// Answers "is this position already solved" with exact knowledge. The
/// search consults this before creating any genuine search node.
pub trait EndgameOracle {
    type Position;

    /// `outcome_only` skips materializing the best-move position for speed.
    fn query(&mut self, position: &Self::Position, outcome_only: bool)
        -> Result<Probe<Self::Position>>;
}

/// An oracle that recognizes nothing. Used for games without tablebases.
pub struct NullOracle<P> {
    _position: PhantomData<P>,
}

impl<P> NullOracle<P> {
    pub fn new() -> Self {
        Self {
            _position: PhantomData,
        }
    }
}

impl<P> Default for NullOracle<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EndgameOracle for NullOracle<P> {
    type Position = P;

    fn query(&mut self, _position: &P, _outcome_only: bool) -> Result<Probe<P>> {
        Ok(Probe::Unknown)
    }
}
