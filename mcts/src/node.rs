use engine::{Distance, Outcome};
use generational_arena::Index;

/// Per-position search state. One closed set of strategies shares the
/// selection and backpropagation machinery: random-rollout estimation,
/// learned-heuristic estimation, and exact tablebase knowledge. Terminal
/// positions are represented as exact nodes with distance 0 and no move.
#[derive(Debug)]
pub enum NodeKind<P> {
    Rollout {
        /// Running sum and count of terminal outcomes seen by playouts
        /// through this node.
        sum: f32,
        count: u32,
    },
    Heuristic {
        /// Current minimax-backed value estimate in [-1, 1].
        value: f32,
        /// Prior over this node's successors, parallel to their order.
        policy: Vec<f32>,
        expansions: u32,
    },
    Tablebase {
        best_move: Option<P>,
        distance: Distance,
    },
}

/// A node in the search tree. Children are owned (arena indices held by
/// exactly one parent); the parent link is a non-owning back-reference used
/// only for backpropagation.
#[derive(Debug)]
pub struct SearchNode<P> {
    pub(crate) position: P,
    pub(crate) parent: Option<Index>,
    pub(crate) is_maximizing: bool,
    /// Absorbing: once set, the evaluation is a proven minimax value forever.
    pub(crate) fully_expanded: bool,
    pub(crate) proven: Option<Outcome>,
    pub(crate) children: Option<Vec<Index>>,
    pub(crate) kind: NodeKind<P>,
}

impl<P> SearchNode<P> {
    pub fn position(&self) -> &P {
        &self.position
    }

    pub fn is_fully_expanded(&self) -> bool {
        self.fully_expanded
    }

    pub fn proven_outcome(&self) -> Option<Outcome> {
        self.proven
    }

    /// The current value estimate in [-1, 1], exact once fully expanded.
    pub fn evaluation(&self) -> f32 {
        if let Some(outcome) = self.proven {
            return outcome.value();
        }
        match &self.kind {
            NodeKind::Rollout { sum, count } => {
                if *count == 0 {
                    0.0
                } else {
                    sum / *count as f32
                }
            }
            NodeKind::Heuristic { value, .. } => *value,
            NodeKind::Tablebase { .. } => unreachable!("exact nodes always carry a proven outcome"),
        }
    }

    /// Visit-count proxy used by the exploration term and final move
    /// weighting. Infinite once the value is proven.
    pub fn expansion_count(&self) -> f32 {
        if self.fully_expanded {
            return f32::INFINITY;
        }
        match &self.kind {
            NodeKind::Rollout { count, .. } => *count as f32,
            NodeKind::Heuristic { expansions, .. } => *expansions as f32,
            NodeKind::Tablebase { .. } => f32::INFINITY,
        }
    }

    pub(crate) fn set_fully_expanded(&mut self, minimax: Outcome) {
        self.fully_expanded = true;
        self.proven = Some(minimax);
    }
}
