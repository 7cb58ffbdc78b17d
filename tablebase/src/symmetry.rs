use engine::{Board, ChessRules, Outcome, Side, Sq};
use rand::Rng;

/// A composition of up to four independent, self-inverse board flips mapping
/// a position to its canonical symmetry-class representative. Swapping
/// colors composes an implicit vertical flip so pawns keep moving in the
/// right direction; it also negates outcomes.
///
/// The canonical form puts the attacking king in the fundamental domain:
/// `row < rows/2, col < cols/2, row <= col` when pawnless, `col < cols/2`
/// otherwise (vertical and diagonal flips are unsound with pawns present).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SymmetryTransform {
    pub flip_colors: bool,
    pub flip_vertical: bool,
    pub flip_horizontal: bool,
    pub flip_diagonal: bool,
}

impl SymmetryTransform {
    pub fn identity() -> Self {
        Self::default()
    }

    /// The transform canonicalizing `board`. Each flip is chosen only when
    /// the attacking king still sits outside the fundamental domain after
    /// the previous step.
    pub fn new<R: ChessRules>(rules: &R, board: &Board) -> Self {
        let mut transform = Self::identity();
        let (rows, cols) = board.shape();
        let half_rows = (rows + 1) / 2;
        let half_cols = (cols + 1) / 2;

        let king_sq = if should_swap_colors(rules, board) {
            transform.flip_colors = true;
            // the color swap flips the board vertically, carrying the
            // attacking (black) king along with it
            let sq = board.king_sq(Side::Black).expect("position has both kings");
            Sq::new(rows - 1 - sq.row, sq.col)
        } else {
            board.king_sq(Side::White).expect("position has both kings")
        };

        let pawnless = !board.has_pawns();
        let mut row = king_sq.row;
        let mut col = king_sq.col;

        if pawnless && row >= half_rows {
            transform.flip_vertical = true;
            row = rows - 1 - row;
        }
        // horizontal flipping is sound even with pawns present
        if col >= half_cols {
            transform.flip_horizontal = true;
            col = cols - 1 - col;
        }
        if pawnless && rows == cols && row > col {
            transform.flip_diagonal = true;
        }

        transform
    }

    /// A uniformly random transform, used to de-canonicalize sampled endgame
    /// positions. Vertical and diagonal flips stay off when pawns are
    /// involved.
    pub fn random<G: Rng>(rng: &mut G, pawnless: bool) -> Self {
        Self {
            flip_colors: rng.gen(),
            flip_horizontal: rng.gen(),
            flip_vertical: pawnless && rng.gen(),
            flip_diagonal: pawnless && rng.gen(),
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn apply(&self, board: &Board) -> Board {
        let mut board = board.clone();
        if self.flip_colors {
            board = board.swap_sides();
        }
        if self.flip_vertical {
            board = board.flip_vertical();
        }
        if self.flip_horizontal {
            board = board.flip_horizontal();
        }
        if self.flip_diagonal {
            board = board.transpose();
        }
        board
    }

    /// Every flip is its own inverse, so unapplying is replaying them in
    /// reverse order.
    pub fn unapply(&self, board: &Board) -> Board {
        let mut board = board.clone();
        if self.flip_diagonal {
            board = board.transpose();
        }
        if self.flip_horizontal {
            board = board.flip_horizontal();
        }
        if self.flip_vertical {
            board = board.flip_vertical();
        }
        if self.flip_colors {
            board = board.swap_sides();
        }
        board
    }

    pub fn transform_outcome(&self, outcome: Outcome) -> Outcome {
        if self.flip_colors {
            outcome.flipped()
        } else {
            outcome
        }
    }
}

/// Whether canonicalization swaps the two sides: black strictly ahead in
/// material, or material equal and black's pawns more advanced. The pawn
/// comparison walks rank pairs from most advanced to least (home ranks are
/// skipped; with everything else equal those must match anyway) and swaps at
/// the first rank where black outnumbers white.
fn should_swap_colors<R: ChessRules>(rules: &R, board: &Board) -> bool {
    let advantage = rules.material_advantage(board);
    if advantage > 0 {
        return false;
    }
    if advantage < 0 {
        return true;
    }

    let rows = board.rows();
    for black_row in (2..=rows.saturating_sub(2)).rev() {
        let white_row = rows - 1 - black_row;
        if board.pawn_count(Side::Black, black_row) > board.pawn_count(Side::White, white_row) {
            return true;
        }
    }
    false
}

/// Fundamental-domain squares for the attacking king on a pawnless board.
pub fn pawnless_unique_squares(rows: u8, cols: u8) -> Vec<Sq> {
    let half_rows = (rows + 1) / 2;
    let half_cols = (cols + 1) / 2;
    (0..rows)
        .flat_map(|row| (0..cols).map(move |col| Sq::new(row, col)))
        .filter(|sq| sq.row < half_rows && sq.col < half_cols && sq.row <= sq.col)
        .collect()
}

/// Fundamental-domain squares when pawns restrict the symmetry group to
/// horizontal flips.
pub fn unique_squares(rows: u8, cols: u8) -> Vec<Sq> {
    let half_cols = (cols + 1) / 2;
    (0..rows)
        .flat_map(|row| (0..cols).map(move |col| Sq::new(row, col)))
        .filter(|sq| sq.col < half_cols)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minichess::MiniChess;
    use engine::{GameRules, Piece, PieceKind};

    fn board_with(rows: u8, cols: u8, pieces: &[(u8, u8, char)], white_to_move: bool) -> Board {
        let mut board = Board::new(rows, cols);
        for &(row, col, letter) in pieces {
            board.set_piece(Sq::new(row, col), PieceKind::from_letter(letter));
        }
        board.set_white_to_move(white_to_move);
        board
    }

    #[test]
    fn test_identity_for_canonical_position() {
        let rules = MiniChess::new(8, 8);
        let board = board_with(8, 8, &[(1, 2, 'K'), (6, 5, 'k'), (3, 3, 'Q')], true);
        let transform = SymmetryTransform::new(&rules, &board);
        assert!(transform.is_identity());
    }

    #[test]
    fn test_unapply_inverts_apply() {
        let rules = MiniChess::new(8, 8);
        let boards = [
            board_with(8, 8, &[(6, 6, 'K'), (1, 2, 'k'), (4, 4, 'R')], true),
            board_with(8, 8, &[(0, 7, 'K'), (7, 0, 'k'), (5, 1, 'Q')], false),
            // black ahead in material, forcing a color swap
            board_with(8, 8, &[(3, 3, 'K'), (5, 6, 'k'), (2, 2, 'q')], true),
        ];
        for board in boards {
            let transform = SymmetryTransform::new(&rules, &board);
            assert_eq!(transform.unapply(&transform.apply(&board)), board);
        }
    }

    #[test]
    fn test_canonical_king_lands_in_fundamental_domain() {
        let rules = MiniChess::new(8, 8);
        for (king, queen) in [((7, 7), (2, 3)), ((6, 1), (0, 0)), ((2, 6), (5, 5))] {
            let board = board_with(
                8,
                8,
                &[
                    (king.0, king.1, 'K'),
                    (0, 4, 'k'),
                    (queen.0, queen.1, 'Q'),
                ],
                true,
            );
            let transform = SymmetryTransform::new(&rules, &board);
            let canonical = transform.apply(&board);
            let king_sq = canonical.king_sq(Side::White).unwrap();
            assert!(king_sq.row < 4 && king_sq.col < 4 && king_sq.row <= king_sq.col);
        }
    }

    #[test]
    fn test_color_swap_when_black_ahead() {
        let rules = MiniChess::new(8, 8);
        let board = board_with(8, 8, &[(4, 4, 'K'), (1, 1, 'k'), (3, 3, 'q')], true);
        let transform = SymmetryTransform::new(&rules, &board);
        assert!(transform.flip_colors);

        let canonical = transform.apply(&board);
        // the attacking side is white after the swap
        assert!(rules.material_advantage(&canonical) > 0);
        assert!(!canonical.white_to_move());
    }

    #[test]
    fn test_transform_outcome_negates_only_on_color_swap() {
        let swap = SymmetryTransform {
            flip_colors: true,
            ..SymmetryTransform::identity()
        };
        assert_eq!(swap.transform_outcome(Outcome::Win), Outcome::Loss);
        assert_eq!(
            swap.transform_outcome(swap.transform_outcome(Outcome::Win)),
            Outcome::Win
        );
        assert_eq!(
            SymmetryTransform::identity().transform_outcome(Outcome::Win),
            Outcome::Win
        );
    }

    #[test]
    fn test_equal_material_pawn_tiebreak_swaps() {
        let rules = MiniChess::new(8, 8);
        // equal material, but the black pawn is further advanced
        let mut board = board_with(8, 8, &[(7, 4, 'K'), (0, 4, 'k'), (5, 2, 'P')], true);
        board.set_piece(
            Sq::new(5, 6),
            Some(Piece::new(Side::Black, PieceKind::Pawn)),
        );
        // black pawn on row 5 is compared against white pawns on row 2
        let transform = SymmetryTransform::new(&rules, &board);
        assert!(transform.flip_colors);

        // with the pawns mirrored neither side is favored
        let mut mirrored = board_with(8, 8, &[(7, 4, 'K'), (0, 4, 'k'), (5, 2, 'P')], true);
        mirrored.set_piece(
            Sq::new(2, 6),
            Some(Piece::new(Side::Black, PieceKind::Pawn)),
        );
        assert!(!SymmetryTransform::new(&rules, &mirrored).flip_colors);
    }

    #[test]
    fn test_pawns_block_vertical_and_diagonal_flips() {
        let rules = MiniChess::new(8, 8);
        // white king on the far half would need a vertical flip, but the
        // pawn forbids it; only the horizontal flip applies
        let board = board_with(8, 8, &[(6, 6, 'K'), (1, 1, 'k'), (3, 2, 'P')], true);
        let transform = SymmetryTransform::new(&rules, &board);
        assert!(!transform.flip_vertical);
        assert!(!transform.flip_diagonal);
        assert!(transform.flip_horizontal);
    }

    #[test]
    fn test_fundamental_domain_sizes() {
        assert_eq!(pawnless_unique_squares(8, 8).len(), 10);
        assert_eq!(unique_squares(8, 8).len(), 32);
        assert_eq!(pawnless_unique_squares(4, 4).len(), 3);
    }
}
