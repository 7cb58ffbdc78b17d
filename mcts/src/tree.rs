use std::cmp::Ordering;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use generational_arena::{Arena, Index};
use itertools::Itertools;
use log::warn;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rayon::prelude::*;

use common::softmax;
use engine::{EndgameOracle, GameRules, Outcome, Probe};
use model::{Evaluator, PositionEval};

use crate::node::{NodeKind, SearchNode};
use crate::options::SearchOptions;

/// Depths beyond this are indistinguishable when weighting final moves;
/// infinite distances (proven draw cycles) map here.
const DEPTH_CLAMP: f32 = 10_000.0;

/// How this tree estimates unproven positions.
pub enum TreeMode<R: GameRules> {
    /// Random playouts to a terminal state.
    Rollout,
    /// One batched evaluator call per expansion.
    Heuristic {
        evaluator: Box<dyn Evaluator<R> + Send>,
    },
}

/// Best-first search driver: repeatedly select the most promising unproven
/// node, expand it, and back-propagate. Positions recognized by the endgame
/// oracle short-circuit into exact, immediately-proven nodes.
///
/// Nodes live in an arena owned by the tree; a node is created the first
/// time the tree visits its position and freed only when its whole subtree
/// is discarded.
pub struct SearchTree<R, O>
where
    R: GameRules + Sync,
    R::Position: Send + Sync,
    O: EndgameOracle<Position = R::Position>,
{
    rules: R,
    mode: TreeMode<R>,
    oracle: O,
    options: SearchOptions,
    arena: Arena<SearchNode<R::Position>>,
    root: Index,
}

impl<R, O> SearchTree<R, O>
where
    R: GameRules + Sync,
    R::Position: Send + Sync,
    O: EndgameOracle<Position = R::Position>,
{
    pub fn new(
        rules: R,
        mode: TreeMode<R>,
        mut oracle: O,
        position: R::Position,
        options: SearchOptions,
    ) -> Result<Self> {
        let mut arena = Arena::new();
        let node = create_node(&rules, &mode, &mut oracle, position, None, None)?;
        let root = arena.insert(node);

        Ok(Self {
            rules,
            mode,
            oracle,
            options,
            arena,
            root,
        })
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn root_position(&self) -> &R::Position {
        &self.arena[self.root].position
    }

    pub fn root_is_terminal(&self) -> bool {
        self.rules.is_terminal(self.root_position(), None)
    }

    pub fn root_fully_expanded(&self) -> bool {
        self.arena[self.root].fully_expanded
    }

    pub fn root_proven_outcome(&self) -> Option<Outcome> {
        self.arena[self.root].proven
    }

    pub fn root_evaluation(&self) -> f32 {
        self.arena[self.root].evaluation()
    }

    /// Expands until the tree is proven or `visits` expansions have run.
    /// Returns the number of expansions performed.
    pub fn search_visits(&mut self, visits: usize) -> Result<usize> {
        let mut expansions = 0;
        while expansions < visits {
            match self.choose_expansion_node()? {
                Some(node) => {
                    self.expand(node)?;
                    expansions += 1;
                }
                None => break,
            }
        }
        Ok(expansions)
    }

    /// Expands until the tree is proven or the wall clock runs out. The
    /// budget is advisory: it is polled between expansions, never inside
    /// one.
    pub fn search_for(&mut self, budget: Duration) -> Result<usize> {
        let deadline = Instant::now() + budget;
        let mut expansions = 0;
        while Instant::now() < deadline {
            match self.choose_expansion_node()? {
                Some(node) => {
                    self.expand(node)?;
                    expansions += 1;
                }
                None => break,
            }
        }
        Ok(expansions)
    }

    /// Selects the next node worth expanding, or `None` once the whole tree
    /// is proven. Walking down, a proven-optimal child proves its parent;
    /// proving a node retries the selection from its parent.
    pub fn choose_expansion_node(&mut self) -> Result<Option<Index>> {
        let mut current = self.root;

        loop {
            if self.arena[current].fully_expanded {
                // only the root can be entered fully expanded; a parent
                // never descends into a proven child
                return Ok(None);
            }
            if self.arena[current].expansion_count() == 0.0 {
                return Ok(Some(current));
            }

            self.ensure_children(current)?;
            let children = self.arena[current]
                .children
                .clone()
                .expect("children exist after ensure_children");
            let is_maximizing = self.arena[current].is_maximizing;
            let optimal = Outcome::optimal_for(is_maximizing);

            let mut best_score = if is_maximizing {
                f32::NEG_INFINITY
            } else {
                f32::INFINITY
            };
            let mut best_child: Option<Index> = None;
            let mut proven_optimal = false;
            let mut short_circuit: Option<Index> = None;

            for (slot, &child_index) in children.iter().enumerate() {
                let child = &self.arena[child_index];

                if child.fully_expanded {
                    // a child already achieving the optimum proves this node
                    if child.proven == Some(optimal) {
                        proven_optimal = true;
                        break;
                    }
                    // another child may still be more optimal; keep looking
                    continue;
                }

                // the priority comes first: an unvisited child would divide
                // by zero in the evaluation
                let priority = self.priority(current, child_index, slot);
                if priority.is_infinite() {
                    short_circuit = Some(child_index);
                    break;
                }

                let score = if is_maximizing {
                    child.evaluation() + priority
                } else {
                    child.evaluation() - priority
                };
                let improves = if is_maximizing {
                    score > best_score
                } else {
                    score < best_score
                };
                if improves {
                    best_score = score;
                    best_child = Some(child_index);
                }
            }

            if proven_optimal {
                self.arena[current].set_fully_expanded(optimal);
                match self.arena[current].parent {
                    Some(parent) => {
                        current = parent;
                        continue;
                    }
                    None => return Ok(None),
                }
            }

            if let Some(child) = short_circuit {
                return Ok(Some(child));
            }

            match best_child {
                Some(child) => current = child,
                None => {
                    // every child is proven: this node's value is the
                    // min/max over them, and the parent should choose again
                    let minimax = children
                        .iter()
                        .map(|&child| {
                            self.arena[child]
                                .proven
                                .expect("all children are proven here")
                        })
                        .reduce(|a, b| {
                            if is_maximizing {
                                a.max(b)
                            } else {
                                a.min(b)
                            }
                        })
                        .ok_or_else(|| anyhow!("node has no children to prove it"))?;
                    self.arena[current].set_fully_expanded(minimax);
                    match self.arena[current].parent {
                        Some(parent) => current = parent,
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Expands one node: rollout nodes run a batch of independent playouts
    /// and add the results to every ancestor; heuristic nodes materialize
    /// children with one batched evaluator call, take the min/max as their
    /// new value and push it upward only while it actually improves each
    /// ancestor's optimum (expansion counts climb all the way regardless).
    pub fn expand(&mut self, index: Index) -> Result<()> {
        if self.arena[index].fully_expanded {
            bail!("expand called on a fully expanded node");
        }

        if matches!(self.mode, TreeMode::Rollout) {
            let position = self.arena[index].position.clone();
            let batch = self.options.rollout_batch_size.max(1);
            let rules = &self.rules;
            let outcomes: Result<Vec<f32>> = (0..batch)
                .into_par_iter()
                .map(|_| random_playout(rules, &position))
                .collect();
            let sum: f32 = outcomes?.iter().sum();

            let mut cursor = Some(index);
            while let Some(node_index) = cursor {
                let parent = self.arena[node_index].parent;
                if let NodeKind::Rollout {
                    sum: node_sum,
                    count,
                } = &mut self.arena[node_index].kind
                {
                    *node_sum += sum;
                    *count += batch as u32;
                }
                cursor = parent;
            }
        } else {
            self.ensure_children(index)?;
            let children = self.arena[index]
                .children
                .clone()
                .expect("children exist after ensure_children");

            let is_maximizing = self.arena[index].is_maximizing;
            let critical = children
                .iter()
                .map(|&child| self.arena[child].evaluation())
                .reduce(|a, b| if is_maximizing { a.max(b) } else { a.min(b) })
                .ok_or_else(|| anyhow!("expanded a node with no successors"))?;

            if let NodeKind::Heuristic { value, .. } = &mut self.arena[index].kind {
                *value = critical;
            }

            let mut improving = true;
            let mut cursor = self.arena[index].parent;
            while let Some(node_index) = cursor {
                let parent = self.arena[node_index].parent;
                let node = &mut self.arena[node_index];
                let node_is_maximizing = node.is_maximizing;
                if let NodeKind::Heuristic {
                    value, expansions, ..
                } = &mut node.kind
                {
                    if improving {
                        let improves = if node_is_maximizing {
                            critical > *value
                        } else {
                            critical < *value
                        };
                        if improves {
                            *value = critical;
                        } else {
                            // ancestors past the first unaffected one cannot
                            // be affected either
                            improving = false;
                        }
                    }
                    *expansions += 1;
                }
                cursor = parent;
            }
        }

        Ok(())
    }

    /// Builds the final move distribution over the root's children and picks
    /// one: the argmax when `optimal`, a sample otherwise.
    ///
    /// A proven root only considers children sharing its proven value,
    /// weighted `exp(-depth)` when winning (fast wins) and `exp(depth)`
    /// otherwise (slow losses and draws). An unproven root weights unproven
    /// children by visit count, proven-losing children at zero, and other
    /// proven children by how little the current evaluation says a draw
    /// costs.
    pub fn choose_best<G: Rng>(
        &mut self,
        optimal: bool,
        rng: &mut G,
    ) -> Result<(Index, Vec<f32>)> {
        let root = self.root;

        if let NodeKind::Tablebase { best_move, .. } = &self.arena[root].kind {
            let best = best_move.clone();
            self.ensure_children(root)?;
            let children = self.arena[root]
                .children
                .clone()
                .expect("children exist after ensure_children");

            let weights: Vec<f32> = children
                .iter()
                .map(|&child| {
                    if Some(&self.arena[child].position) == best.as_ref() {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            let slot = weights.iter().position(|&w| w == 1.0);
            return match slot {
                Some(slot) if weights.iter().sum::<f32>() == 1.0 => Ok((children[slot], weights)),
                _ => Err(anyhow!("inconsistent tablebase results at the root")),
            };
        }

        self.ensure_children(root)?;
        let children = self.arena[root]
            .children
            .clone()
            .expect("children exist after ensure_children");
        if children.is_empty() {
            bail!("cannot choose a move in a terminal position");
        }

        let node = &self.arena[root];
        let optimal_value = Outcome::optimal_for(node.is_maximizing);

        let weights: Vec<f32> = if node.fully_expanded {
            let proven = node.proven.expect("fully expanded nodes are proven");
            let winning = proven == optimal_value;
            let logits: Vec<f32> = children
                .iter()
                .map(|&child_index| {
                    let child = &self.arena[child_index];
                    // only children matching the proven optimum are playable
                    if !child.fully_expanded || child.proven != Some(proven) {
                        return f32::NEG_INFINITY;
                    }
                    let depth = self.depth_to_end(child_index).as_f32().min(DEPTH_CLAMP);
                    if winning {
                        -depth
                    } else {
                        depth
                    }
                })
                .collect();
            softmax(&logits, 1.0)
        } else {
            let raw: Vec<f32> = children
                .iter()
                .map(|&child_index| {
                    let child = &self.arena[child_index];
                    if !child.fully_expanded {
                        return child.expansion_count();
                    }
                    if child.proven == Some(optimal_value.flipped()) {
                        // guaranteed loss
                        return 0.0;
                    }
                    // the evaluation is a proxy for the chance of winning:
                    // the better our chances, the less appealing the draw
                    let winning_chance = (node.evaluation() * optimal_value.value()) / 2.0 + 0.5;
                    node.expansion_count() * (1.0 - winning_chance)
                })
                .collect();
            let total: f32 = raw.iter().sum();
            if total > 0.0 {
                raw.iter().map(|w| w / total).collect()
            } else {
                vec![1.0 / raw.len() as f32; raw.len()]
            }
        };

        let slot = if optimal {
            weights
                .iter()
                .position_max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
                .expect("weights are non-empty")
        } else {
            match WeightedIndex::new(&weights) {
                Ok(weighted) => weighted.sample(rng),
                Err(_) => {
                    warn!("degenerate move weights, selecting uniformly at random");
                    rng.gen_range(0..weights.len())
                }
            }
        };

        Ok((children[slot], weights))
    }

    /// Plies from this proven node to the end of the game under the play
    /// that `choose_best` prefers.
    fn depth_to_end(&self, index: Index) -> engine::Distance {
        let node = &self.arena[index];
        debug_assert!(node.fully_expanded);

        if let NodeKind::Tablebase { distance, .. } = &node.kind {
            return *distance;
        }
        let Some(children) = &node.children else {
            return engine::Distance::ZERO;
        };

        let optimal = Outcome::optimal_for(node.is_maximizing);
        let depths = children
            .iter()
            .filter(|&&child| {
                self.arena[child].fully_expanded && self.arena[child].proven == node.proven
            })
            .map(|&child| self.depth_to_end(child));

        let depth = if node.proven == Some(optimal) {
            // winning: end it as fast as possible
            depths.min()
        } else {
            // losing or drawing: drag it out
            depths.max()
        };
        depth
            .expect("a proven node has a child matching its value")
            .plus_one()
    }

    /// Re-roots the tree at the given successor of the current root,
    /// discarding every sibling subtree.
    pub fn advance_to(&mut self, position: &R::Position) -> Result<()> {
        self.ensure_children(self.root)?;
        let children = self.arena[self.root]
            .children
            .clone()
            .expect("children exist after ensure_children");

        let chosen = children
            .iter()
            .copied()
            .find(|&child| &self.arena[child].position == position)
            .ok_or_else(|| anyhow!("position is not a successor of the current root"))?;

        for &child in &children {
            if child != chosen {
                self.remove_subtree(child);
            }
        }
        let old_root = self.root;
        self.arena[old_root].children = Some(Vec::new());
        self.arena.remove(old_root);

        self.arena[chosen].parent = None;
        self.root = chosen;
        Ok(())
    }

    /// Plays optimal moves while the same player stays to move (some games
    /// grant several plies per turn) and returns the chosen line with its
    /// move distributions.
    pub fn play_line<G: Rng>(&mut self, rng: &mut G) -> Result<Vec<(R::Position, Vec<f32>)>> {
        let starting_side = self.rules.is_white_to_move(self.root_position());
        let mut line = Vec::new();

        while self.rules.is_white_to_move(self.root_position()) == starting_side {
            if self.root_is_terminal() {
                break;
            }
            if self.arena[self.root].children.is_none() {
                if let Some(node) = self.choose_expansion_node()? {
                    self.expand(node)?;
                }
            }
            let (child, weights) = self.choose_best(true, rng)?;
            let position = self.arena[child].position.clone();
            self.advance_to(&position)?;
            line.push((position, weights));
        }

        Ok(line)
    }

    /// Creates the children of a node on first visit. The oracle is
    /// consulted for every successor before a genuine search node is built;
    /// recognized positions become exact nodes instead.
    fn ensure_children(&mut self, index: Index) -> Result<()> {
        if self.arena[index].children.is_some() {
            return Ok(());
        }

        let position = self.arena[index].position.clone();
        let successors = self.rules.successors(&position);

        let evals: Vec<Option<PositionEval>> = match &self.mode {
            TreeMode::Heuristic { evaluator } => evaluator
                .evaluate(&successors)
                .into_iter()
                .map(Some)
                .collect(),
            TreeMode::Rollout => successors.iter().map(|_| None).collect(),
        };

        let mut child_indices = Vec::with_capacity(successors.len());
        for (successor, eval) in successors.into_iter().zip(evals) {
            let node = create_node(
                &self.rules,
                &self.mode,
                &mut self.oracle,
                successor,
                Some(index),
                eval,
            )?;
            child_indices.push(self.arena.insert(node));
        }

        let node = &mut self.arena[index];
        node.children = Some(child_indices);
        if let NodeKind::Heuristic { expansions, .. } = &mut node.kind {
            *expansions = 1;
        }
        Ok(())
    }

    /// Selection priority of an unproven child: the exploration term, plus
    /// the weighted policy prior for heuristic nodes. Infinite for an
    /// unvisited rollout child.
    fn priority(&self, parent: Index, child: Index, slot: usize) -> f32 {
        let c = self.options.exploration;
        match &self.arena[parent].kind {
            NodeKind::Rollout { count, .. } => {
                let child_count = match &self.arena[child].kind {
                    NodeKind::Rollout { count, .. } => *count,
                    _ => unreachable!("rollout parents have rollout or exact children"),
                };
                if child_count == 0 {
                    return f32::INFINITY;
                }
                c * ((*count as f32).ln() / child_count as f32).sqrt()
            }
            NodeKind::Heuristic {
                expansions, policy, ..
            } => {
                let child_expansions = match &self.arena[child].kind {
                    NodeKind::Heuristic { expansions, .. } => *expansions,
                    _ => unreachable!("heuristic parents have heuristic or exact children"),
                };
                let exploration =
                    c * ((*expansions as f32).ln() / (child_expansions as f32 + 1.0)).sqrt();
                exploration + self.options.policy_weight * policy[slot]
            }
            NodeKind::Tablebase { .. } => {
                unreachable!("exact nodes are proven and never selected for descent")
            }
        }
    }

    fn remove_subtree(&mut self, index: Index) {
        if let Some(node) = self.arena.remove(index) {
            if let Some(children) = node.children {
                for child in children {
                    self.remove_subtree(child);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn root_children_kinds(&mut self) -> Result<Vec<String>> {
        self.ensure_children(self.root)?;
        Ok(self.arena[self.root]
            .children
            .clone()
            .unwrap()
            .iter()
            .map(|&child| match self.arena[child].kind {
                NodeKind::Rollout { .. } => "rollout".to_string(),
                NodeKind::Heuristic { .. } => "heuristic".to_string(),
                NodeKind::Tablebase { .. } => "tablebase".to_string(),
            })
            .collect())
    }
}

fn create_node<R, O>(
    rules: &R,
    mode: &TreeMode<R>,
    oracle: &mut O,
    position: R::Position,
    parent: Option<Index>,
    eval: Option<PositionEval>,
) -> Result<SearchNode<R::Position>>
where
    R: GameRules,
    O: EndgameOracle<Position = R::Position>,
{
    let is_maximizing = rules.is_white_to_move(&position);

    if rules.is_terminal(&position, None) {
        let outcome = rules.winner(&position)?;
        return Ok(SearchNode {
            position,
            parent,
            is_maximizing,
            fully_expanded: true,
            proven: Some(outcome),
            children: None,
            kind: NodeKind::Tablebase {
                best_move: None,
                distance: engine::Distance::ZERO,
            },
        });
    }

    if let Probe::Solved(solved) = oracle.query(&position, false)? {
        return Ok(SearchNode {
            position,
            parent,
            is_maximizing,
            fully_expanded: true,
            proven: Some(solved.outcome),
            children: None,
            kind: NodeKind::Tablebase {
                best_move: solved.best_move,
                distance: solved.distance,
            },
        });
    }

    let kind = match mode {
        TreeMode::Rollout => NodeKind::Rollout { sum: 0.0, count: 0 },
        TreeMode::Heuristic { evaluator } => {
            let PositionEval { policy, value } = match eval {
                Some(eval) => eval,
                None => evaluator
                    .evaluate(std::slice::from_ref(&position))
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("evaluator returned no result"))?,
            };
            NodeKind::Heuristic {
                value,
                policy,
                expansions: 0,
            }
        }
    };

    Ok(SearchNode {
        position,
        parent,
        is_maximizing,
        fully_expanded: false,
        proven: None,
        children: None,
        kind,
    })
}

/// One random playout from `position` to a terminal state; the result is
/// the terminal outcome's value.
fn random_playout<R: GameRules>(rules: &R, position: &R::Position) -> Result<f32> {
    let mut rng = rand::thread_rng();
    let mut state = position.clone();

    loop {
        let mut successors = rules.successors(&state);
        if rules.is_terminal(&state, Some(&successors)) {
            return Ok(rules.winner(&state)?.value());
        }
        let pick = rng.gen_range(0..successors.len());
        state = successors.swap_remove(pick);
    }
}
