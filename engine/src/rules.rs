use std::fmt::Debug;
use std::hash::Hash;

use crate::board::Board;
use crate::codec::{self, CodecError};
use crate::descriptor::Descriptor;
use crate::error::PreconditionError;
use crate::outcome::Outcome;

/// The rules contract consumed by the search. Every operation is pure; the
/// core never mutates a position in place and assumes nothing about move
/// legality or branching factor beyond what these functions return.
///
/// Implementations are plain immutable ruleset values passed into every call;
/// game constants (board shape, starting position, move shape) live on the
/// value, never in module-level state.
pub trait GameRules {
    type Position: Clone + Eq + Hash + Debug;

    /// All positions reachable in one ply.
    fn successors(&self, position: &Self::Position) -> Vec<Self::Position>;

    /// Whether the game is over. Callers that already hold the successor
    /// list pass it in to avoid regenerating it.
    fn is_terminal(&self, position: &Self::Position, successors: Option<&[Self::Position]>)
        -> bool;

    /// The result of a finished game. Fails if the position is not terminal.
    fn winner(&self, position: &Self::Position) -> Result<Outcome, PreconditionError>;

    fn is_white_to_move(&self, position: &Self::Position) -> bool;

    /// Signed material balance, positive when white is ahead. Used by the
    /// canonicalizer to decide which side is attacking.
    fn material_advantage(&self, position: &Self::Position) -> i32;

    /// The material signature selecting which tablebase governs the position.
    fn descriptor(&self, position: &Self::Position) -> Descriptor;
}

/// What the tablebase subsystem needs from a board game on top of
/// [`GameRules`].
pub trait ChessRules: GameRules<Position = Board> {
    /// The board shape this ruleset plays on, `(rows, cols)`.
    fn board_shape(&self) -> (u8, u8);

    /// Whether a piece placement is reachable at all: the side that is *not*
    /// to move must not be capturable.
    fn position_legal(&self, board: &Board) -> bool;

    /// Material signatures that are drawn by insufficient material. The
    /// manager answers these without touching disk.
    fn drawing_descriptors(&self) -> &[Descriptor];

    /// Bit-exact position serialization; `decode_position(encode_position(p))
    /// == p` for every position this ruleset can produce.
    fn encode_position(&self, board: &Board) -> Result<Vec<u8>, CodecError> {
        codec::encode_board(board)
    }

    fn decode_position(&self, bytes: &[u8]) -> Result<Board, CodecError> {
        let (rows, cols) = self.board_shape();
        codec::decode_board(rows, cols, bytes)
    }
}
