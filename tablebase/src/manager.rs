use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Result;
use fnv::FnvHashMap;
use log::warn;
use rand::Rng;
use thiserror::Error;

use engine::{
    codec, from_to, Board, ChessRules, CodecError, Descriptor, Distance, EndgameOracle, Outcome,
    Probe, Solved, Sq,
};

use crate::options::ManagerOptions;
use crate::store::{self, StoreError, TablebaseMap};
use crate::symmetry::SymmetryTransform;

#[derive(Debug, Error)]
pub enum TablebaseError {
    #[error("no tablebase available for descriptor {0}")]
    Unavailable(Descriptor),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

struct Loaded {
    entries: TablebaseMap,
    bytes: usize,
}

/// Answers "is this position already solved, and what is the best move"
/// across the set of generated tablebases. Tablebases load lazily and are
/// evicted least-recently-used under a byte budget; the budget grows rather
/// than fail when a single tablebase exceeds it.
///
/// The cache is owned by this value alone. Concurrent users each hold their
/// own manager (or serialize access themselves); no cross-instance
/// synchronization is provided.
pub struct TablebaseManager<R: ChessRules> {
    rules: R,
    dir: PathBuf,
    available: Vec<Descriptor>,
    loaded: FnvHashMap<Descriptor, Loaded>,
    recency: VecDeque<Descriptor>,
    cached_bytes: usize,
    budget_bytes: usize,
}

impl<R: ChessRules> TablebaseManager<R> {
    pub fn new(rules: R, dir: impl Into<PathBuf>) -> Self {
        Self::with_options(rules, dir, ManagerOptions::default())
    }

    pub fn with_options(rules: R, dir: impl Into<PathBuf>, options: ManagerOptions) -> Self {
        let dir = dir.into();
        let available = store::available_descriptors(&dir);
        Self {
            rules,
            dir,
            available,
            loaded: FnvHashMap::default(),
            recency: VecDeque::new(),
            cached_bytes: 0,
            budget_bytes: options.cache_budget_bytes,
        }
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn available(&self) -> &[Descriptor] {
        &self.available
    }

    /// Picks up tablebase files generated since construction.
    pub fn refresh_available(&mut self) {
        for descriptor in store::available_descriptors(&self.dir) {
            if !self.available.contains(&descriptor) {
                self.available.push(descriptor);
            }
        }
    }

    /// Descriptors currently held in memory, least recently used first.
    pub fn cached_descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.recency.iter()
    }

    /// Checks whether the position is covered by a tablebase and, if so,
    /// returns the best move (already rotated back into the caller's
    /// orientation), the outcome and the terminal distance.
    ///
    /// `Probe::Unknown` is the answer for positions outside every tablebase;
    /// trivially drawn material answers `(None, draw, 0)` without touching
    /// disk. `outcome_only` skips materializing the best-move position.
    pub fn query(&mut self, board: &Board, outcome_only: bool) -> Result<Probe<Board>> {
        // castling and en-passant rights are never covered by the generator
        if board.has_special_flags() {
            return Ok(Probe::Unknown);
        }

        let transform = SymmetryTransform::new(&self.rules, board);
        let canonical = transform.apply(board);
        let descriptor = Descriptor::of_board(&canonical);

        if self.rules.drawing_descriptors().contains(&descriptor) {
            return Ok(Probe::Solved(Solved {
                best_move: None,
                outcome: Outcome::Draw,
                distance: Distance::ZERO,
            }));
        }

        if !self.available.contains(&descriptor) {
            return Ok(Probe::Unknown);
        }

        self.ensure_loaded(&descriptor)?;

        let key = self.rules.encode_position(&canonical)?;
        let entries = &self.loaded[&descriptor].entries;
        let Some(&record_bytes) = entries.get(&key) else {
            warn!("position missing from tablebase {}", descriptor);
            return Ok(Probe::Unknown);
        };

        let record = codec::decode_record(record_bytes)?;
        let outcome = transform.transform_outcome(record.outcome);

        if outcome_only || record.distance == Distance::ZERO {
            return Ok(Probe::Solved(Solved {
                best_move: None,
                outcome,
                distance: record.distance,
            }));
        }

        let successor = apply_from_to(&self.rules, &canonical, record.start, record.end)
            .ok_or_else(|| {
                anyhow::anyhow!("stored best move is not legal in tablebase {}", descriptor)
            })?;
        let best_move = transform.unapply(&successor);

        Ok(Probe::Solved(Solved {
            best_move: Some(best_move),
            outcome,
            distance: record.distance,
        }))
    }

    /// A uniformly random position from the given tablebase, de-canonicalized
    /// with a random symmetry transform.
    pub fn random_endgame<G: Rng>(
        &mut self,
        descriptor: &Descriptor,
        rng: &mut G,
    ) -> Result<Board, TablebaseError> {
        self.random_endgame_matching(descriptor, rng, |_, _| true)?
            .ok_or_else(|| TablebaseError::Unavailable(descriptor.clone()))
    }

    /// A random position from the tablebase with the given outcome, skipping
    /// positions where the game is already over. `None` when nothing matches.
    pub fn random_endgame_with_outcome<G: Rng>(
        &mut self,
        descriptor: &Descriptor,
        outcome: Outcome,
        rng: &mut G,
    ) -> Result<Option<Board>, TablebaseError>
    where
        R: Clone,
    {
        let rules = self.rules.clone();
        self.random_endgame_matching(descriptor, rng, move |board, record| {
            record.outcome == outcome && !rules.is_terminal(board, None)
        })
    }

    fn random_endgame_matching<G: Rng>(
        &mut self,
        descriptor: &Descriptor,
        rng: &mut G,
        condition: impl Fn(&Board, &codec::MoveRecord) -> bool,
    ) -> Result<Option<Board>, TablebaseError> {
        self.ensure_loaded(descriptor)?;
        let entries = &self.loaded[descriptor].entries;

        let mut candidates = Vec::new();
        for (key, &record_bytes) in entries {
            let board = self.rules.decode_position(key)?;
            let record = codec::decode_record(record_bytes)?;
            if condition(&board, &record) {
                candidates.push(board);
            }
        }

        if candidates.is_empty() {
            return Ok(None);
        }
        let board = candidates.swap_remove(rng.gen_range(0..candidates.len()));
        let transform = SymmetryTransform::random(rng, !board.has_pawns());
        Ok(Some(transform.apply(&board)))
    }

    fn ensure_loaded(&mut self, descriptor: &Descriptor) -> Result<(), TablebaseError> {
        if self.loaded.contains_key(descriptor) {
            self.touch(descriptor);
            return Ok(());
        }

        if !self.available.contains(descriptor) {
            self.refresh_available();
            if !self.available.contains(descriptor) {
                return Err(TablebaseError::Unavailable(descriptor.clone()));
            }
        }

        let entries = store::read_tablebase(&store::tablebase_path(&self.dir, descriptor))?;
        let bytes = store::approximate_size(&entries);

        // a single tablebase larger than the whole budget is admitted by
        // growing the budget instead of failing
        if bytes > self.budget_bytes {
            self.budget_bytes = bytes;
        }

        self.loaded
            .insert(descriptor.clone(), Loaded { entries, bytes });
        self.recency.push_back(descriptor.clone());
        self.cached_bytes += bytes;

        while self.cached_bytes > self.budget_bytes && self.recency.len() > 1 {
            if let Some(evicted) = self.recency.pop_front() {
                if let Some(loaded) = self.loaded.remove(&evicted) {
                    self.cached_bytes -= loaded.bytes;
                }
            }
        }

        Ok(())
    }

    fn touch(&mut self, descriptor: &Descriptor) {
        if let Some(position) = self.recency.iter().position(|d| d == descriptor) {
            self.recency.remove(position);
            self.recency.push_back(descriptor.clone());
        }
    }
}

/// The successor of `board` whose move matches the given from/to squares.
pub fn apply_from_to<R: ChessRules>(rules: &R, board: &Board, start: Sq, end: Sq) -> Option<Board> {
    rules
        .successors(board)
        .into_iter()
        .find(|successor| from_to(board, successor) == Some((start, end)))
}

impl<R: ChessRules> EndgameOracle for TablebaseManager<R> {
    type Position = Board;

    fn query(&mut self, position: &Board, outcome_only: bool) -> Result<Probe<Board>> {
        TablebaseManager::query(self, position, outcome_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minichess::MiniChess;
    use engine::PieceKind;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tablebase-manager-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn board_with(pieces: &[(u8, u8, char)], white_to_move: bool) -> Board {
        let mut board = Board::new(4, 4);
        for &(row, col, letter) in pieces {
            board.set_piece(Sq::new(row, col), PieceKind::from_letter(letter));
        }
        board.set_white_to_move(white_to_move);
        board
    }

    #[test]
    fn test_two_kings_is_a_known_draw_everywhere() {
        let dir = temp_dir("two-kings");
        let mut manager = TablebaseManager::new(MiniChess::new(4, 4), &dir);

        for white_row in 0..4u8 {
            for white_col in 0..4u8 {
                for black_row in 0..4u8 {
                    for black_col in 0..4u8 {
                        if (white_row, white_col) == (black_row, black_col) {
                            continue;
                        }
                        let board = board_with(
                            &[(white_row, white_col, 'K'), (black_row, black_col, 'k')],
                            true,
                        );
                        let probe = manager.query(&board, false).unwrap();
                        assert_eq!(
                            probe,
                            Probe::Solved(Solved {
                                best_move: None,
                                outcome: Outcome::Draw,
                                distance: Distance::ZERO,
                            })
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_unknown_descriptor_is_a_value_not_an_error() {
        let dir = temp_dir("unknown");
        let mut manager = TablebaseManager::new(MiniChess::new(4, 4), &dir);
        let board = board_with(&[(3, 1, 'K'), (0, 2, 'k'), (2, 2, 'Q')], true);
        assert_eq!(manager.query(&board, false).unwrap(), Probe::Unknown);
        assert_eq!(manager.query(&board, true).unwrap(), Probe::Unknown);
    }

    #[test]
    fn test_special_flags_are_not_covered() {
        let dir = temp_dir("special");
        let mut manager = TablebaseManager::new(MiniChess::new(4, 4), &dir);
        let mut board = board_with(&[(3, 1, 'K'), (0, 2, 'k')], true);
        board.set_special(Sq::new(0, 1), true);
        assert_eq!(manager.query(&board, false).unwrap(), Probe::Unknown);
    }

    #[test]
    fn test_lru_eviction_under_byte_budget() {
        let dir = temp_dir("lru");
        let mut big = TablebaseMap::default();
        for i in 0..64u8 {
            big.insert(vec![i; 6], [0, 0, 0]);
        }
        for name in ["KQk", "KRk", "KNk2"] {
            store::write_tablebase(&store::tablebase_path(&dir, &Descriptor::new(name)), &big)
                .unwrap();
        }

        let budget = store::approximate_size(&big) * 2 + 8;
        let mut manager = TablebaseManager::with_options(
            MiniChess::new(4, 4),
            &dir,
            ManagerOptions {
                cache_budget_bytes: budget,
            },
        );

        manager.ensure_loaded(&Descriptor::new("KQk")).unwrap();
        manager.ensure_loaded(&Descriptor::new("KRk")).unwrap();
        assert_eq!(manager.cached_descriptors().count(), 2);

        // touching KQk makes KRk the eviction victim
        manager.ensure_loaded(&Descriptor::new("KQk")).unwrap();
        manager.ensure_loaded(&Descriptor::new("KNk2")).unwrap();

        let cached: Vec<String> = manager
            .cached_descriptors()
            .map(|d| d.as_str().to_string())
            .collect();
        assert_eq!(cached, vec!["KQk".to_string(), "KNk2".to_string()]);
    }

    #[test]
    fn test_budget_grows_for_single_oversized_tablebase() {
        let dir = temp_dir("oversized");
        let mut big = TablebaseMap::default();
        for i in 0..64u8 {
            big.insert(vec![i; 6], [0, 0, 0]);
        }
        store::write_tablebase(&store::tablebase_path(&dir, &Descriptor::new("KQk")), &big)
            .unwrap();

        let mut manager = TablebaseManager::with_options(
            MiniChess::new(4, 4),
            &dir,
            ManagerOptions {
                cache_budget_bytes: 16,
            },
        );
        manager.ensure_loaded(&Descriptor::new("KQk")).unwrap();
        assert_eq!(manager.cached_descriptors().count(), 1);
    }

    #[test]
    fn test_unavailable_tablebase_error_for_direct_load() {
        let dir = temp_dir("direct-load");
        let mut manager = TablebaseManager::new(MiniChess::new(4, 4), &dir);
        let mut rng = rand::thread_rng();
        assert!(matches!(
            manager.random_endgame(&Descriptor::new("KQk"), &mut rng),
            Err(TablebaseError::Unavailable(_))
        ));
    }
}
