//! A small chess subset on a configurable board, used as the concrete rules
//! implementation in tests. Standard piece movement for K/Q/R/B/N, single-
//! step pawns with auto-queen promotion, no castling and no en passant.

use engine::{
    Board, ChessRules, Descriptor, GameRules, Outcome, Piece, PieceKind, PreconditionError, Side,
    Sq,
};

const KING_STEPS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];
const KNIGHT_JUMPS: [(i8, i8); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
];
const ROOK_RAYS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_RAYS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

#[derive(Clone)]
pub struct MiniChess {
    rows: u8,
    cols: u8,
    drawing: Vec<Descriptor>,
}

impl MiniChess {
    pub fn new(rows: u8, cols: u8) -> Self {
        Self {
            rows,
            cols,
            drawing: vec![Descriptor::new("Kk")],
        }
    }

    pub fn without_drawing_descriptors(mut self) -> Self {
        self.drawing.clear();
        self
    }

    fn on_board(&self, row: i8, col: i8) -> Option<Sq> {
        if row >= 0 && (row as u8) < self.rows && col >= 0 && (col as u8) < self.cols {
            Some(Sq::new(row as u8, col as u8))
        } else {
            None
        }
    }

    fn attacked(&self, board: &Board, target: Sq, by: Side) -> bool {
        for (dr, dc) in KING_STEPS {
            if let Some(sq) = self.on_board(target.row as i8 + dr, target.col as i8 + dc) {
                if board.piece_at(sq) == Some(Piece::new(by, PieceKind::King)) {
                    return true;
                }
            }
        }
        for (dr, dc) in KNIGHT_JUMPS {
            if let Some(sq) = self.on_board(target.row as i8 + dr, target.col as i8 + dc) {
                if board.piece_at(sq) == Some(Piece::new(by, PieceKind::Knight)) {
                    return true;
                }
            }
        }
        for (dr, dc) in ROOK_RAYS {
            if let Some(piece) = self.first_along(board, target, dr, dc) {
                if piece.side == by
                    && (piece.kind == PieceKind::Rook || piece.kind == PieceKind::Queen)
                {
                    return true;
                }
            }
        }
        for (dr, dc) in BISHOP_RAYS {
            if let Some(piece) = self.first_along(board, target, dr, dc) {
                if piece.side == by
                    && (piece.kind == PieceKind::Bishop || piece.kind == PieceKind::Queen)
                {
                    return true;
                }
            }
        }
        // white pawns attack towards row 0, black pawns towards the last row
        let pawn_row = match by {
            Side::White => target.row as i8 + 1,
            Side::Black => target.row as i8 - 1,
        };
        for dc in [-1, 1] {
            if let Some(sq) = self.on_board(pawn_row, target.col as i8 + dc) {
                if board.piece_at(sq) == Some(Piece::new(by, PieceKind::Pawn)) {
                    return true;
                }
            }
        }
        false
    }

    fn first_along(&self, board: &Board, from: Sq, dr: i8, dc: i8) -> Option<Piece> {
        let mut row = from.row as i8 + dr;
        let mut col = from.col as i8 + dc;
        while let Some(sq) = self.on_board(row, col) {
            if let Some(piece) = board.piece_at(sq) {
                return Some(piece);
            }
            row += dr;
            col += dc;
        }
        None
    }

    fn apply(&self, board: &Board, start: Sq, end: Sq) -> Board {
        let mut next = board.clone();
        let mut piece = board.piece_at(start).expect("moving an existing piece");
        if piece.kind == PieceKind::Pawn {
            let promotion_row = match piece.side {
                Side::White => 0,
                Side::Black => self.rows - 1,
            };
            if end.row == promotion_row {
                piece.kind = PieceKind::Queen;
            }
        }
        next.set_piece(start, None);
        next.set_piece(end, Some(piece));
        next.set_white_to_move(!board.white_to_move());
        next
    }

    fn pseudo_destinations(&self, board: &Board, sq: Sq, piece: Piece) -> Vec<Sq> {
        let mut out = Vec::new();
        let steps: &[(i8, i8)] = match piece.kind {
            PieceKind::King => &KING_STEPS,
            PieceKind::Knight => &KNIGHT_JUMPS,
            PieceKind::Rook => &ROOK_RAYS,
            PieceKind::Bishop => &BISHOP_RAYS,
            PieceKind::Queen => &KING_STEPS,
            PieceKind::Pawn => {
                let dir = if piece.side.is_white() { -1 } else { 1 };
                if let Some(forward) = self.on_board(sq.row as i8 + dir, sq.col as i8) {
                    if board.piece_at(forward).is_none() {
                        out.push(forward);
                    }
                }
                for dc in [-1, 1] {
                    if let Some(diag) = self.on_board(sq.row as i8 + dir, sq.col as i8 + dc) {
                        if board
                            .piece_at(diag)
                            .map_or(false, |other| other.side != piece.side)
                        {
                            out.push(diag);
                        }
                    }
                }
                return out;
            }
        };

        let sliding = matches!(
            piece.kind,
            PieceKind::Queen | PieceKind::Rook | PieceKind::Bishop
        );
        for &(dr, dc) in steps {
            let mut row = sq.row as i8 + dr;
            let mut col = sq.col as i8 + dc;
            while let Some(target) = self.on_board(row, col) {
                match board.piece_at(target) {
                    None => out.push(target),
                    Some(other) => {
                        if other.side != piece.side {
                            out.push(target);
                        }
                        break;
                    }
                }
                if !sliding {
                    break;
                }
                row += dr;
                col += dc;
            }
        }
        out
    }

    fn insufficient_material(&self, board: &Board) -> bool {
        board.pieces().all(|(_, piece)| piece.kind == PieceKind::King)
    }

    fn in_check(&self, board: &Board, side: Side) -> bool {
        match board.king_sq(side) {
            Some(sq) => self.attacked(board, sq, side.opponent()),
            None => false,
        }
    }
}

impl GameRules for MiniChess {
    type Position = Board;

    fn successors(&self, board: &Board) -> Vec<Board> {
        let mover = board.side_to_move();
        let mut out = Vec::new();
        for (sq, piece) in board.pieces() {
            if piece.side != mover {
                continue;
            }
            for target in self.pseudo_destinations(board, sq, piece) {
                let next = self.apply(board, sq, target);
                if !self.in_check(&next, mover) {
                    out.push(next);
                }
            }
        }
        out
    }

    fn is_terminal(&self, board: &Board, successors: Option<&[Board]>) -> bool {
        if self.insufficient_material(board) {
            return true;
        }
        match successors {
            Some(successors) => successors.is_empty(),
            None => self.successors(board).is_empty(),
        }
    }

    fn winner(&self, board: &Board) -> Result<Outcome, PreconditionError> {
        if !self.is_terminal(board, None) {
            return Err(PreconditionError::new(
                "winner requested for a position that is not over",
            ));
        }
        if self.insufficient_material(board) {
            return Ok(Outcome::Draw);
        }
        let mover = board.side_to_move();
        if self.in_check(board, mover) {
            // checkmate: the side to move has lost
            Ok(if mover.is_white() {
                Outcome::Loss
            } else {
                Outcome::Win
            })
        } else {
            Ok(Outcome::Draw)
        }
    }

    fn is_white_to_move(&self, board: &Board) -> bool {
        board.white_to_move()
    }

    fn material_advantage(&self, board: &Board) -> i32 {
        board
            .pieces()
            .map(|(_, piece)| {
                let value = match piece.kind {
                    PieceKind::King => 0,
                    PieceKind::Queen => 9,
                    PieceKind::Rook => 5,
                    PieceKind::Bishop => 3,
                    PieceKind::Knight => 3,
                    PieceKind::Pawn => 1,
                };
                if piece.side.is_white() {
                    value
                } else {
                    -value
                }
            })
            .sum()
    }

    fn descriptor(&self, board: &Board) -> Descriptor {
        Descriptor::of_board(board)
    }
}

impl ChessRules for MiniChess {
    fn board_shape(&self) -> (u8, u8) {
        (self.rows, self.cols)
    }

    fn position_legal(&self, board: &Board) -> bool {
        board.king_sq(Side::White).is_some()
            && board.king_sq(Side::Black).is_some()
            && !self.in_check(board, board.side_to_move().opponent())
    }

    fn drawing_descriptors(&self) -> &[Descriptor] {
        &self.drawing
    }
}
