use log::warn;
use thiserror::Error;

use crate::board::{Board, Piece, PieceKind, Side, Sq};
use crate::distance::Distance;
use crate::outcome::Outcome;

/// Bit-exact serialization of positions and move records.
///
/// A position encodes as one presence-bitmask byte per row (bit `j` set when
/// square `(i, j)` is occupied) followed by a nibble-packed stream of piece
/// codes covering only the occupied squares, in row-major scan order. An odd
/// occupancy count puts the first code alone in its own byte; every following
/// byte packs the earlier code in the high nibble.
///
/// Piece codes: 0-5 = white KQRBNP, 8-13 = black. Three markers are folded
/// into the codes instead of spending separate bits: 6/14 = the king of the
/// side to move, 7/15 = a rook still eligible to castle (home-rank corner
/// with its castle-target flag set) or an enemy pawn that just advanced two
/// squares (with its en-passant-target flag set), disambiguated by square.

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("board shape {rows}x{cols} cannot be encoded (at most 8 columns)")]
    UnsupportedShape { rows: u8, cols: u8 },
    #[error("byte sequence too short for the board shape")]
    Truncated,
    #[error("occupancy claims {expected} pieces but the piece stream holds {found}")]
    PieceCountMismatch { expected: usize, found: usize },
    #[error("invalid piece code {0}")]
    InvalidPieceCode(u8),
    #[error("special piece marker on an impossible square ({row}, {col})")]
    InvalidSpecial { row: u8, col: u8 },
    #[error("second en-passant marker found")]
    DuplicateEnPassant,
    #[error("the side to move cannot own the en-passant pawn")]
    InconsistentEnPassant,
    #[error("move record outcome bits are out of range")]
    InvalidOutcome,
}

pub fn encode_board(board: &Board) -> Result<Vec<u8>, CodecError> {
    let (rows, cols) = board.shape();
    if cols > 8 {
        return Err(CodecError::UnsupportedShape { rows, cols });
    }

    let mut mask = vec![0u8; rows as usize];
    let mut nibbles = Vec::with_capacity(board.occupied_count());
    for (sq, piece) in board.pieces() {
        mask[sq.row as usize] |= 1 << sq.col;
        nibbles.push(nibble_for(board, sq, piece));
    }

    let mut bytes = mask;
    let mut rest = &nibbles[..];
    if nibbles.len() % 2 == 1 {
        bytes.push(nibbles[0]);
        rest = &nibbles[1..];
    }
    for pair in rest.chunks_exact(2) {
        bytes.push((pair[0] << 4) | pair[1]);
    }

    Ok(bytes)
}

fn nibble_for(board: &Board, sq: Sq, piece: Piece) -> u8 {
    let side_bits = if piece.side.is_white() { 0 } else { 8 };
    let (rows, cols) = board.shape();

    if piece.kind == PieceKind::King && piece.side == board.side_to_move() {
        return side_bits + 6;
    }

    if piece.kind == PieceKind::Rook {
        let home = if piece.side.is_white() { rows - 1 } else { 0 };
        if sq.row == home {
            let target_col = if sq.col == 0 {
                Some(2)
            } else if sq.col == cols - 1 {
                Some(cols - 2)
            } else {
                None
            };
            if let Some(col) = target_col {
                if board.special_at(Sq::new(home, col)) {
                    return side_bits + 7;
                }
            }
        }
    }

    if piece.kind == PieceKind::Pawn && piece.side != board.side_to_move() {
        let (two_square_row, target_row) = pawn_two_square_rows(rows, piece.side);
        if sq.row == two_square_row && board.special_at(Sq::new(target_row, sq.col)) {
            return side_bits + 7;
        }
    }

    side_bits + piece.kind.code()
}

/// The row a pawn lands on after advancing two squares and the row of the
/// en-passant target square behind it.
fn pawn_two_square_rows(rows: u8, side: Side) -> (u8, u8) {
    match side {
        Side::White => (rows / 2, rows / 2 + 1),
        Side::Black => (rows / 2 - 1, rows / 2 - 2),
    }
}

pub fn decode_board(rows: u8, cols: u8, bytes: &[u8]) -> Result<Board, CodecError> {
    if cols > 8 {
        return Err(CodecError::UnsupportedShape { rows, cols });
    }
    if bytes.len() < rows as usize {
        return Err(CodecError::Truncated);
    }

    let (mask, payload) = bytes.split_at(rows as usize);
    let mut occupied = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if mask[row as usize] & (1 << col) != 0 {
                occupied.push(Sq::new(row, col));
            }
        }
    }

    let expected_payload = (occupied.len() + 1) / 2;
    if payload.len() != expected_payload {
        return Err(CodecError::PieceCountMismatch {
            expected: occupied.len(),
            found: payload.len() * 2,
        });
    }

    let mut nibbles = Vec::with_capacity(occupied.len());
    let mut rest = payload;
    if occupied.len() % 2 == 1 {
        if payload[0] > 15 {
            return Err(CodecError::InvalidPieceCode(payload[0]));
        }
        nibbles.push(payload[0]);
        rest = &payload[1..];
    }
    for &byte in rest {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }

    let mut board = Board::new(rows, cols);
    let mut en_passant_side: Option<Side> = None;

    for (&sq, value) in occupied.iter().zip(nibbles) {
        let side = if value < 8 { Side::White } else { Side::Black };
        let code = value % 8;

        let kind = match code {
            6 => {
                if side.is_white() {
                    board.set_white_to_move(true);
                }
                PieceKind::King
            }
            7 => decode_special(&mut board, sq, side, &mut en_passant_side)?,
            code => PieceKind::from_code(code).expect("codes 0-5 are always valid"),
        };

        board.set_piece(sq, Some(Piece::new(side, kind)));
    }

    if let Some(side) = en_passant_side {
        // the pawn that just advanced two squares cannot belong to the mover
        if side.is_white() == board.white_to_move() {
            return Err(CodecError::InconsistentEnPassant);
        }
    }

    Ok(board)
}

fn decode_special(
    board: &mut Board,
    sq: Sq,
    side: Side,
    en_passant_side: &mut Option<Side>,
) -> Result<PieceKind, CodecError> {
    let (rows, cols) = board.shape();
    let invalid = CodecError::InvalidSpecial {
        row: sq.row,
        col: sq.col,
    };

    if sq.row == 0 || sq.row == rows - 1 {
        let home = if side.is_white() { rows - 1 } else { 0 };
        if sq.row != home {
            return Err(invalid);
        }
        let target_col = if sq.col == 0 {
            2
        } else if sq.col == cols - 1 {
            cols - 2
        } else {
            return Err(invalid);
        };
        board.set_special(Sq::new(home, target_col), true);
        return Ok(PieceKind::Rook);
    }

    let (two_square_row, target_row) = pawn_two_square_rows(rows, side);
    if sq.row != two_square_row {
        return Err(invalid);
    }
    if en_passant_side.replace(side).is_some() {
        return Err(CodecError::DuplicateEnPassant);
    }
    board.set_special(Sq::new(target_row, sq.col), true);
    Ok(PieceKind::Pawn)
}

pub const DISTANCE_INFINITE_SENTINEL: u16 = (1 << 10) - 1;
pub const DISTANCE_MAX: u16 = DISTANCE_INFINITE_SENTINEL - 1;

/// A tablebase entry: the best move's squares, the proven outcome and the
/// distance to the end of the game. Terminal entries carry distance 0 and
/// zeroed squares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveRecord {
    pub outcome: Outcome,
    pub start: Sq,
    pub end: Sq,
    pub distance: Distance,
}

/// 3-byte packing: outcome (2 bits, stored +1), start row/col (3+3 bits),
/// end row/col (3+3 bits), distance (10 bits, all-ones = infinite).
pub fn encode_record(record: &MoveRecord) -> [u8; 3] {
    debug_assert!(record.start.row < 8 && record.start.col < 8);
    debug_assert!(record.end.row < 8 && record.end.col < 8);

    let distance = match record.distance {
        Distance::Infinite => DISTANCE_INFINITE_SENTINEL,
        Distance::Finite(d) if d >= DISTANCE_MAX as u32 => {
            warn!(
                "terminal distance {} exceeds the representable range, clamping to {}",
                d, DISTANCE_MAX
            );
            DISTANCE_MAX
        }
        Distance::Finite(d) => d as u16,
    };

    let outcome_bits = (record.outcome.signum() + 1) as u8;
    [
        (outcome_bits << 6) | (record.start.row << 3) | record.start.col,
        (record.end.row << 5) | (record.end.col << 2) | (distance >> 8) as u8,
        (distance & 0xFF) as u8,
    ]
}

pub fn decode_record(bytes: [u8; 3]) -> Result<MoveRecord, CodecError> {
    let outcome = Outcome::from_signum((bytes[0] >> 6) as i8 - 1).ok_or(CodecError::InvalidOutcome)?;
    let start = Sq::new((bytes[0] >> 3) & 0b111, bytes[0] & 0b111);
    let end = Sq::new(bytes[1] >> 5, (bytes[1] >> 2) & 0b111);

    let raw = (((bytes[1] & 0b11) as u16) << 8) | bytes[2] as u16;
    let distance = if raw == DISTANCE_INFINITE_SENTINEL {
        Distance::Infinite
    } else {
        if raw == DISTANCE_MAX {
            warn!("terminal distance {} may be the result of clamping", raw);
        }
        Distance::Finite(raw as u32)
    };

    Ok(MoveRecord {
        outcome,
        start,
        end,
        distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with(pieces: &[(u8, u8, char)], white_to_move: bool) -> Board {
        let mut board = Board::new(8, 8);
        for &(row, col, letter) in pieces {
            board.set_piece(Sq::new(row, col), PieceKind::from_letter(letter));
        }
        board.set_white_to_move(white_to_move);
        board
    }

    #[test]
    fn test_board_round_trip_even_count() {
        let board = board_with(&[(7, 4, 'K'), (0, 4, 'k'), (3, 3, 'Q'), (5, 5, 'n')], true);
        let bytes = encode_board(&board).unwrap();
        assert_eq!(decode_board(8, 8, &bytes).unwrap(), board);
    }

    #[test]
    fn test_board_round_trip_odd_count_black_to_move() {
        let board = board_with(&[(7, 4, 'K'), (0, 4, 'k'), (2, 6, 'r')], false);
        let bytes = encode_board(&board).unwrap();
        assert_eq!(decode_board(8, 8, &bytes).unwrap(), board);
    }

    #[test]
    fn test_board_round_trip_empty() {
        let board = Board::new(8, 8);
        let bytes = encode_board(&board).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_board(8, 8, &bytes).unwrap(), board);
    }

    #[test]
    fn test_castle_flag_round_trip() {
        let mut board = board_with(&[(7, 4, 'K'), (7, 0, 'R'), (0, 4, 'k'), (0, 7, 'r')], true);
        board.set_special(Sq::new(7, 2), true);
        board.set_special(Sq::new(0, 6), true);
        let bytes = encode_board(&board).unwrap();
        assert_eq!(decode_board(8, 8, &bytes).unwrap(), board);
    }

    #[test]
    fn test_en_passant_round_trip() {
        // white pawn just advanced two squares, black to move
        let mut board = board_with(&[(7, 4, 'K'), (0, 4, 'k'), (4, 2, 'P'), (4, 3, 'p')], false);
        board.set_special(Sq::new(5, 2), true);
        let bytes = encode_board(&board).unwrap();
        assert_eq!(decode_board(8, 8, &bytes).unwrap(), board);
    }

    #[test]
    fn test_decode_rejects_piece_count_mismatch() {
        let board = board_with(&[(7, 4, 'K'), (0, 4, 'k'), (3, 3, 'Q')], true);
        let mut bytes = encode_board(&board).unwrap();
        // drop part of the piece stream so it no longer matches the occupancy
        bytes.pop();
        assert!(matches!(
            decode_board(8, 8, &bytes),
            Err(CodecError::PieceCountMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        assert!(matches!(
            decode_board(8, 8, &[0; 4]),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_decode_rejects_two_en_passant_markers() {
        let mut board = board_with(&[(7, 4, 'K'), (0, 4, 'k'), (4, 2, 'P'), (4, 5, 'P')], false);
        board.set_special(Sq::new(5, 2), true);
        board.set_special(Sq::new(5, 5), true);
        let bytes = encode_board(&board).unwrap();
        assert!(matches!(
            decode_board(8, 8, &bytes),
            Err(CodecError::DuplicateEnPassant)
        ));
    }

    #[test]
    fn test_decode_rejects_en_passant_for_side_to_move() {
        // mask: white king at (7,4), white pawn at (4,2)
        let mut bytes = vec![0u8; 8];
        bytes[4] = 1 << 2;
        bytes[7] = 1 << 4;
        // pawn claims the two-square marker (7) but white is to move (king code 6)
        bytes.push((7 << 4) | 6);
        assert!(matches!(
            decode_board(8, 8, &bytes),
            Err(CodecError::InconsistentEnPassant)
        ));
    }

    #[test]
    fn test_decode_rejects_special_marker_on_bad_square() {
        // white rook claims the special marker away from any corner
        let mut bytes = vec![0u8; 8];
        bytes[3] = 1 << 3;
        bytes[7] = 1 << 4;
        bytes.push((7 << 4) | 6);
        assert!(matches!(
            decode_board(8, 8, &bytes),
            Err(CodecError::InvalidSpecial { .. })
        ));
    }

    #[test]
    fn test_record_round_trip() {
        for outcome in [Outcome::Loss, Outcome::Draw, Outcome::Win] {
            for distance in [Distance::Finite(0), Distance::Finite(517), Distance::Infinite] {
                let record = MoveRecord {
                    outcome,
                    start: Sq::new(6, 1),
                    end: Sq::new(2, 7),
                    distance,
                };
                assert_eq!(decode_record(encode_record(&record)).unwrap(), record);
            }
        }
    }

    #[test]
    fn test_record_clamps_oversized_distance() {
        let record = MoveRecord {
            outcome: Outcome::Win,
            start: Sq::new(0, 0),
            end: Sq::new(1, 1),
            distance: Distance::Finite(5000),
        };
        let decoded = decode_record(encode_record(&record)).unwrap();
        assert_eq!(decoded.distance, Distance::Finite(DISTANCE_MAX as u32));
    }

    #[test]
    fn test_record_preserves_max_representable_distance() {
        let record = MoveRecord {
            outcome: Outcome::Loss,
            start: Sq::new(5, 5),
            end: Sq::new(5, 6),
            distance: Distance::Finite(1021),
        };
        assert_eq!(decode_record(encode_record(&record)).unwrap(), record);
    }
}
