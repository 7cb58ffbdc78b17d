use std::collections::HashSet;
use std::path::PathBuf;

use fnv::FnvHashMap;
use log::{info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use thiserror::Error;

use engine::{
    codec, from_to, Board, ChessRules, CodecError, Descriptor, DescriptorError, Distance,
    MoveRecord, Outcome, PieceSpec, PreconditionError, Probe, Sq,
};

use crate::manager::TablebaseManager;
use crate::options::GeneratorOptions;
use crate::store::{self, StoreError, TablebaseMap};
use crate::symmetry::{pawnless_unique_squares, unique_squares, SymmetryTransform};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("descriptor {0} is not supported: {1}")]
    Unsupported(Descriptor, String),
    #[error("a successor with descriptor {0} is not solved in any tablebase; generate simpler descriptors first")]
    RequiredTerminal(Descriptor),
    #[error("canonical successor missing from the node set")]
    MissingSuccessor,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Query(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug)]
pub struct GenerationSummary {
    pub positions: usize,
    pub iterations: usize,
}

enum ChildLink {
    /// Same-descriptor successor, stored as the canonical key until every
    /// node exists, then resolved to an index.
    Pending(Vec<u8>),
    Internal(usize),
    /// Successor governed by an already-solved simpler tablebase.
    Foreign {
        key: Vec<u8>,
        outcome: Outcome,
        distance: Distance,
    },
}

struct Child {
    link: ChildLink,
    transform: SymmetryTransform,
}

struct Node {
    key: Vec<u8>,
    is_maximizing: bool,
    has_material_advantage: bool,
    children: Vec<Child>,
    outcome: Outcome,
    distance: Distance,
    best: Option<usize>,
}

/// Builds one tablebase by retrograde analysis: enumerate every legal
/// placement of the descriptor's pieces over the canonical squares for the
/// attacking king, resolve successors that leave the descriptor through the
/// manager, then iterate best-child updates to a fixed point.
///
/// Every non-terminal node starts as a draw at infinite distance; only wins
/// and losses propagate information backwards, which is what lets pure
/// repetition cycles settle at infinity instead of oscillating.
pub struct TablebaseGenerator<R: ChessRules + Clone + Send + Sync> {
    rules: R,
    dir: PathBuf,
    options: GeneratorOptions,
}

impl<R: ChessRules + Clone + Send + Sync> TablebaseGenerator<R> {
    pub fn new(rules: R, dir: impl Into<PathBuf>) -> Self {
        Self::with_options(rules, dir, GeneratorOptions::default())
    }

    pub fn with_options(rules: R, dir: impl Into<PathBuf>, options: GeneratorOptions) -> Self {
        Self {
            rules,
            dir: dir.into(),
            options,
        }
    }

    pub fn generate(&self, descriptor: &Descriptor) -> Result<GenerationSummary, GeneratorError> {
        let specs = self.validate(descriptor)?;
        let mut nodes = self.build_nodes(descriptor, &specs)?;
        resolve_pending(&mut nodes)?;

        let mut iterations = 0;
        loop {
            let mut updated = false;
            for index in 0..nodes.len() {
                updated |= update_node(&mut nodes, index);
            }
            iterations += 1;
            if iterations % 10 == 0 {
                info!("{} retrograde iterations completed", iterations);
            }
            if !updated {
                break;
            }
        }

        if self.options.verify_closure {
            verify_closure(&mut nodes);
        }

        let detached = detach(nodes);
        let entries = self.encode_all(&detached)?;

        store::write_tablebase(&store::tablebase_path(&self.dir, descriptor), &entries)?;
        info!(
            "generated tablebase {} with {} positions in {} iterations",
            descriptor,
            entries.len(),
            iterations
        );

        Ok(GenerationSummary {
            positions: entries.len(),
            iterations,
        })
    }

    fn validate(&self, descriptor: &Descriptor) -> Result<Vec<PieceSpec>, GeneratorError> {
        let unsupported =
            |reason: &str| GeneratorError::Unsupported(descriptor.clone(), reason.to_string());

        let (rows, cols) = self.rules.board_shape();
        if rows > 8 || cols > 8 {
            return Err(unsupported("boards larger than 8x8 cannot be recorded"));
        }

        let specs = descriptor.parse()?;

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.piece) {
                return Err(unsupported("duplicate pieces are not implemented"));
            }
        }

        // en-passant interactions between the two sides are not modeled
        if descriptor.has_pawns_of_both_sides() {
            return Err(unsupported("pawns of both colors are not supported"));
        }

        Ok(specs)
    }

    /// Step 1: every legal placement over the canonical squares, one node per
    /// side to move. Placements are independent, so they fan out on rayon;
    /// foreign successors are resolved through a shared manager.
    fn build_nodes(
        &self,
        descriptor: &Descriptor,
        specs: &[PieceSpec],
    ) -> Result<Vec<Node>, GeneratorError> {
        let (rows, cols) = self.rules.board_shape();
        let king_squares = if descriptor.is_pawnless() {
            pawnless_unique_squares(rows, cols)
        } else {
            unique_squares(rows, cols)
        };

        // the attacking king is placed first, restricted to the fundamental
        // domain; every other piece ranges over its allowed squares
        let mut ordered: Vec<&PieceSpec> = Vec::with_capacity(specs.len());
        let attacking_king = specs
            .iter()
            .find(|spec| spec.piece.side.is_white() && spec.piece.kind == engine::PieceKind::King)
            .expect("validated descriptors contain a white king");
        ordered.push(attacking_king);
        ordered.extend(specs.iter().filter(|spec| !std::ptr::eq(*spec, attacking_king)));

        let allowed: Vec<Vec<Sq>> = ordered
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                if index == 0 {
                    return king_squares.clone();
                }
                match &spec.ranks {
                    None => all_squares(rows, cols),
                    Some(ranks) => all_squares(rows, cols)
                        .into_iter()
                        .filter(|sq| ranks.iter().any(|&rank| sq.row == rows - rank))
                        .collect(),
                }
            })
            .collect();

        let placements: Vec<Vec<Sq>> = PlacementIter::new(allowed).collect();
        let manager = Mutex::new(TablebaseManager::new(self.rules.clone(), &self.dir));

        let groups: Result<Vec<Vec<Node>>, GeneratorError> = placements
            .par_iter()
            .map(|placement| self.nodes_for_placement(descriptor, &ordered, placement, &manager))
            .collect();

        let mut nodes = Vec::new();
        let mut keys = HashSet::new();
        for group in groups? {
            for node in group {
                if keys.insert(node.key.clone()) {
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    fn nodes_for_placement(
        &self,
        descriptor: &Descriptor,
        ordered: &[&PieceSpec],
        placement: &[Sq],
        manager: &Mutex<TablebaseManager<R>>,
    ) -> Result<Vec<Node>, GeneratorError> {
        let (rows, cols) = self.rules.board_shape();
        let mut nodes = Vec::new();

        for white_to_move in [true, false] {
            let mut board = Board::new(rows, cols);
            for (spec, &sq) in ordered.iter().zip(placement) {
                board.set_piece(sq, Some(spec.piece));
            }
            board.set_white_to_move(white_to_move);

            // the side that is not to move may not stand in check
            if !self.rules.position_legal(&board) {
                continue;
            }
            if pawn_on_back_rank(&board) {
                continue;
            }
            // placements whose canonical form would swap colors are covered
            // by the swapped enumeration; keeping them would make the
            // color-flip choice unstable across a pass
            if SymmetryTransform::new(&self.rules, &board).flip_colors {
                continue;
            }

            nodes.push(self.create_node(descriptor, board, manager)?);
        }

        Ok(nodes)
    }

    /// Step 2: classify each successor as in-descriptor (deferred) or
    /// foreign (resolved through the manager right away).
    fn create_node(
        &self,
        descriptor: &Descriptor,
        board: Board,
        manager: &Mutex<TablebaseManager<R>>,
    ) -> Result<Node, GeneratorError> {
        let key = self.rules.encode_position(&board)?;
        let is_maximizing = self.rules.is_white_to_move(&board);
        let advantage = self.rules.material_advantage(&board);
        let has_material_advantage = if is_maximizing {
            advantage > 0
        } else {
            advantage < 0
        };

        let successors = self.rules.successors(&board);
        if self.rules.is_terminal(&board, Some(&successors)) {
            return Ok(Node {
                key,
                is_maximizing,
                has_material_advantage,
                children: Vec::new(),
                outcome: self.rules.winner(&board)?,
                distance: Distance::ZERO,
                best: None,
            });
        }

        let mut children = Vec::with_capacity(successors.len());
        for successor in successors {
            // compare descriptors, not piece counts: promotions change the
            // signature without changing the count
            let successor_descriptor = self.rules.descriptor(&successor);
            if successor_descriptor == *descriptor {
                let transform = SymmetryTransform::new(&self.rules, &successor);
                let canonical_key = self.rules.encode_position(&transform.apply(&successor))?;
                children.push(Child {
                    link: ChildLink::Pending(canonical_key),
                    transform,
                });
            } else {
                let probe = manager.lock().query(&successor, true)?;
                match probe {
                    Probe::Solved(solved) => children.push(Child {
                        link: ChildLink::Foreign {
                            key: self.rules.encode_position(&successor)?,
                            outcome: solved.outcome,
                            distance: solved.distance,
                        },
                        transform: SymmetryTransform::identity(),
                    }),
                    Probe::Unknown => {
                        return Err(GeneratorError::RequiredTerminal(successor_descriptor))
                    }
                }
            }
        }

        Ok(Node {
            key,
            is_maximizing,
            has_material_advantage,
            children,
            // assume a draw (by fortress) until proven otherwise: a win
            // overwrites this through any child, a loss only once every
            // child is proven lost
            outcome: Outcome::Draw,
            distance: Distance::Infinite,
            best: None,
        })
    }

    /// Step 5: decode each node and its detached best move, recover the
    /// from/to squares and pack the record. Nodes no longer reference each
    /// other, so this pass runs in parallel.
    fn encode_all(&self, detached: &[DetachedNode]) -> Result<TablebaseMap, GeneratorError> {
        let entries: Result<Vec<(Vec<u8>, [u8; 3])>, GeneratorError> = detached
            .par_iter()
            .map(|node| {
                let record = match &node.best_key {
                    None => MoveRecord {
                        outcome: node.outcome,
                        start: Sq::new(0, 0),
                        end: Sq::new(0, 0),
                        distance: node.distance,
                    },
                    Some(best_key) => {
                        let board = self.rules.decode_position(&node.key)?;
                        let canonical_successor = self.rules.decode_position(best_key)?;
                        let successor = node.best_transform.unapply(&canonical_successor);
                        let (start, end) = from_to(&board, &successor)
                            .ok_or(GeneratorError::MissingSuccessor)?;
                        MoveRecord {
                            outcome: node.outcome,
                            start,
                            end,
                            distance: node.distance,
                        }
                    }
                };
                Ok((node.key.clone(), codec::encode_record(&record)))
            })
            .collect();

        Ok(entries?.into_iter().collect())
    }
}

struct DetachedNode {
    key: Vec<u8>,
    outcome: Outcome,
    distance: Distance,
    best_key: Option<Vec<u8>>,
    best_transform: SymmetryTransform,
}

fn all_squares(rows: u8, cols: u8) -> Vec<Sq> {
    (0..rows)
        .flat_map(|row| (0..cols).map(move |col| Sq::new(row, col)))
        .collect()
}

fn pawn_on_back_rank(board: &Board) -> bool {
    let rows = board.rows();
    board.pieces().any(|(sq, piece)| {
        piece.kind == engine::PieceKind::Pawn && (sq.row == 0 || sq.row == rows - 1)
    })
}

/// Odometer over one square list per piece, most significant digit first
/// (the attacking king). Skips configurations with two pieces on a square.
struct PlacementIter {
    allowed: Vec<Vec<Sq>>,
    counters: Vec<usize>,
    done: bool,
}

impl PlacementIter {
    fn new(allowed: Vec<Vec<Sq>>) -> Self {
        let done = allowed.iter().any(|squares| squares.is_empty());
        let counters = vec![0; allowed.len()];
        Self {
            allowed,
            counters,
            done,
        }
    }

    fn advance(&mut self) {
        for index in (0..self.counters.len()).rev() {
            self.counters[index] += 1;
            if self.counters[index] < self.allowed[index].len() {
                return;
            }
            self.counters[index] = 0;
        }
        self.done = true;
    }
}

impl Iterator for PlacementIter {
    type Item = Vec<Sq>;

    fn next(&mut self) -> Option<Vec<Sq>> {
        while !self.done {
            let placement: Vec<Sq> = self
                .counters
                .iter()
                .zip(&self.allowed)
                .map(|(&counter, squares)| squares[counter])
                .collect();
            self.advance();

            let mut distinct = HashSet::new();
            if placement.iter().all(|sq| distinct.insert(*sq)) {
                return Some(placement);
            }
        }
        None
    }
}

fn resolve_pending(nodes: &mut [Node]) -> Result<(), GeneratorError> {
    let index: FnvHashMap<Vec<u8>, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.key.clone(), i))
        .collect();

    for node in nodes.iter_mut() {
        for child in node.children.iter_mut() {
            if let ChildLink::Pending(key) = &child.link {
                let target = *index.get(key).ok_or(GeneratorError::MissingSuccessor)?;
                child.link = ChildLink::Internal(target);
            }
        }
    }
    Ok(())
}

fn child_value(nodes: &[Node], child: &Child) -> (Outcome, Distance) {
    match &child.link {
        ChildLink::Internal(index) => (nodes[*index].outcome, nodes[*index].distance),
        ChildLink::Foreign {
            outcome, distance, ..
        } => (*outcome, *distance),
        ChildLink::Pending(_) => unreachable!("pending links are resolved before iteration"),
    }
}

/// Step 3: one Gauss-Seidel sweep entry. Recomputes the node's best child
/// under the mover-relative ordering and reports whether anything changed.
///
/// Ordering: strictly better outcome first. Among equal draws, delay the
/// draw when this mover started materially ahead, hasten it otherwise.
/// Among equal decisive outcomes, prefer the faster win and the slower loss.
fn update_node(nodes: &mut [Node], index: usize) -> bool {
    if nodes[index].children.is_empty() {
        // terminal from the start, nothing to update
        return false;
    }

    let (best_slot, best_outcome, best_distance) = {
        let node = &nodes[index];
        let losing = Outcome::optimal_for(!node.is_maximizing);

        let mut best_slot = 0;
        let (mut best_outcome, mut best_distance) = child_value(nodes, &node.children[0]);

        for (slot, child) in node.children.iter().enumerate().skip(1) {
            let (outcome, distance) = child_value(nodes, child);

            let better = if outcome != best_outcome {
                if node.is_maximizing {
                    outcome > best_outcome
                } else {
                    outcome < best_outcome
                }
            } else if outcome == Outcome::Draw {
                if node.has_material_advantage {
                    distance > best_distance
                } else {
                    distance < best_distance
                }
            } else if outcome != losing {
                distance < best_distance
            } else {
                distance > best_distance
            };

            if better {
                best_slot = slot;
                best_outcome = outcome;
                best_distance = distance;
            }
        }

        (best_slot, best_outcome, best_distance)
    };

    let node = &mut nodes[index];
    let mut updated = false;

    if node.best != Some(best_slot) {
        node.best = Some(best_slot);
        // draws do not count as updates; a cyclic draw line would otherwise
        // keep the fixed point from ever settling
        if node.outcome != Outcome::Draw {
            updated = true;
        }
    }
    if node.outcome != best_outcome {
        node.outcome = best_outcome;
        updated = true;
    }
    let distance = best_distance.plus_one();
    if node.distance != distance {
        node.distance = distance;
        if node.outcome != Outcome::Draw {
            updated = true;
        }
    }

    updated
}

/// Optional sanity pass: following best moves from a node with a finite
/// distance must never revisit a position. When it does, the finite distance
/// is a lie; force it to infinite rather than trust the number.
fn verify_closure(nodes: &mut [Node]) {
    for start in 0..nodes.len() {
        if !nodes[start].distance.is_finite() || nodes[start].children.is_empty() {
            continue;
        }

        let mut seen = HashSet::new();
        let mut current = start;
        loop {
            if !seen.insert(current) {
                warn!("terminal distance was finite despite a cycle in the best-move chain");
                nodes[start].distance = Distance::Infinite;
                break;
            }
            let node = &nodes[current];
            if node.children.is_empty() {
                break;
            }
            match node.best {
                Some(slot) => match &node.children[slot].link {
                    ChildLink::Internal(next) => current = *next,
                    ChildLink::Foreign { .. } => break,
                    ChildLink::Pending(_) => break,
                },
                None => break,
            }
        }
    }
}

/// Step 4: sever the cyclic references. Each node keeps only the encoded
/// identity of its best child, which makes the final encode pass free to run
/// in parallel.
fn detach(nodes: Vec<Node>) -> Vec<DetachedNode> {
    let best_keys: Vec<Option<(Vec<u8>, SymmetryTransform)>> = nodes
        .iter()
        .map(|node| {
            node.best.map(|slot| {
                let child = &node.children[slot];
                let key = match &child.link {
                    ChildLink::Internal(index) => nodes[*index].key.clone(),
                    ChildLink::Foreign { key, .. } => key.clone(),
                    ChildLink::Pending(key) => key.clone(),
                };
                (key, child.transform)
            })
        })
        .collect();

    nodes
        .into_iter()
        .zip(best_keys)
        .map(|(node, best)| {
            let (best_key, best_transform) = match best {
                Some((key, transform)) => (Some(key), transform),
                None => (None, SymmetryTransform::identity()),
            };
            DetachedNode {
                key: node.key,
                outcome: node.outcome,
                distance: node.distance,
                best_key,
                best_transform,
            }
        })
        .collect()
}
