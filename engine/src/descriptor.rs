use std::fmt;

use thiserror::Error;

use crate::board::{Board, Piece, PieceKind, Side};

/// Material signature identifying which tablebase governs a position, e.g.
/// `KQkn` (king and queen vs king and knight). Uppercase letters belong to
/// the side assumed to be ahead in material. A letter may be followed by
/// digits constraining that piece to specific ranks, counted from the white
/// home rank (used for pawns, e.g. `KP27k`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("invalid character {0:?} in descriptor")]
    InvalidChar(char),
    #[error("descriptor must contain exactly one king per side")]
    Kings,
    #[error("rank constraint digits must follow a piece letter")]
    DanglingDigit,
}

/// One piece demanded by a descriptor, with its optional rank constraint
/// (1-based, rank 1 = white home rank).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PieceSpec {
    pub piece: Piece,
    pub ranks: Option<Vec<u8>>,
}

impl Descriptor {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The signature of a position: piece letters in the fixed
    /// KQRBNP/kqrbnp order, one letter per piece on the board.
    pub fn of_board(board: &Board) -> Self {
        let mut signature = String::new();
        for side in [Side::White, Side::Black] {
            for kind in PieceKind::ALL {
                let count = board
                    .pieces()
                    .filter(|(_, piece)| piece.side == side && piece.kind == kind)
                    .count();
                for _ in 0..count {
                    signature.push(kind.letter(side));
                }
            }
        }
        Self(signature)
    }

    pub fn parse(&self) -> Result<Vec<PieceSpec>, DescriptorError> {
        let mut specs: Vec<PieceSpec> = Vec::new();

        for ch in self.0.chars() {
            if let Some(digit) = ch.to_digit(10) {
                let spec = specs.last_mut().ok_or(DescriptorError::DanglingDigit)?;
                spec.ranks.get_or_insert_with(Vec::new).push(digit as u8);
                continue;
            }
            let piece = PieceKind::from_letter(ch).ok_or(DescriptorError::InvalidChar(ch))?;
            specs.push(PieceSpec { piece, ranks: None });
        }

        for side in [Side::White, Side::Black] {
            let kings = specs
                .iter()
                .filter(|spec| spec.piece == Piece::new(side, PieceKind::King))
                .count();
            if kings != 1 {
                return Err(DescriptorError::Kings);
            }
        }

        Ok(specs)
    }

    pub fn is_pawnless(&self) -> bool {
        !self.0.contains('P') && !self.0.contains('p')
    }

    pub fn has_pawns_of_both_sides(&self) -> bool {
        self.0.contains('P') && self.0.contains('p')
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Descriptor({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Sq;

    #[test]
    fn test_parse_simple() {
        let specs = Descriptor::new("KQk").parse().unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].piece, Piece::new(Side::White, PieceKind::King));
        assert_eq!(specs[1].piece, Piece::new(Side::White, PieceKind::Queen));
        assert_eq!(specs[2].piece, Piece::new(Side::Black, PieceKind::King));
        assert!(specs.iter().all(|spec| spec.ranks.is_none()));
    }

    #[test]
    fn test_parse_rank_constraints() {
        let specs = Descriptor::new("KP27k").parse().unwrap();
        assert_eq!(specs[1].piece, Piece::new(Side::White, PieceKind::Pawn));
        assert_eq!(specs[1].ranks, Some(vec![2, 7]));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            Descriptor::new("KXk").parse(),
            Err(DescriptorError::InvalidChar('X'))
        );
        assert_eq!(Descriptor::new("Kk2").parse().unwrap().len(), 2);
        assert_eq!(
            Descriptor::new("2Kk").parse(),
            Err(DescriptorError::DanglingDigit)
        );
        assert_eq!(Descriptor::new("KKk").parse(), Err(DescriptorError::Kings));
        assert_eq!(Descriptor::new("Qk").parse(), Err(DescriptorError::Kings));
    }

    #[test]
    fn test_of_board_uses_fixed_order() {
        let mut board = Board::new(8, 8);
        board.set_piece(Sq::new(0, 0), Some(Piece::new(Side::Black, PieceKind::King)));
        board.set_piece(Sq::new(5, 5), Some(Piece::new(Side::White, PieceKind::Knight)));
        board.set_piece(Sq::new(7, 7), Some(Piece::new(Side::White, PieceKind::King)));
        board.set_piece(Sq::new(3, 3), Some(Piece::new(Side::Black, PieceKind::Queen)));
        assert_eq!(Descriptor::of_board(&board).as_str(), "KNkq");
    }

    #[test]
    fn test_pawn_queries() {
        assert!(Descriptor::new("KQk").is_pawnless());
        assert!(!Descriptor::new("KPk").is_pawnless());
        assert!(Descriptor::new("KPkp").has_pawns_of_both_sides());
        assert!(!Descriptor::new("KPk").has_pawns_of_both_sides());
    }
}
