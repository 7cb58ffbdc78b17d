use engine::GameRules;

/// A learned estimate of one position: a prior over its successors (parallel
/// to the order `GameRules::successors` returns them) and a scalar value in
/// [-1, 1] from white's point of view.
#[derive(Clone, Debug)]
pub struct PositionEval {
    pub policy: Vec<f32>,
    pub value: f32,
}

impl PositionEval {
    pub fn new(policy: Vec<f32>, value: f32) -> Self {
        Self { policy, value }
    }
}

/// The learned-evaluator contract. Calls are batched: one inference pass
/// covers every position handed in, in order.
pub trait Evaluator<R: GameRules> {
    fn evaluate(&self, positions: &[R::Position]) -> Vec<PositionEval>;
}

/// A no-knowledge baseline: uniform policy, neutral value. Useful as a
/// stand-in wherever an evaluator is required but none is trained.
pub struct UniformEvaluator<R> {
    rules: R,
}

impl<R> UniformEvaluator<R> {
    pub fn new(rules: R) -> Self {
        Self { rules }
    }
}

impl<R: GameRules> Evaluator<R> for UniformEvaluator<R> {
    fn evaluate(&self, positions: &[R::Position]) -> Vec<PositionEval> {
        positions
            .iter()
            .map(|position| {
                let branching = self.rules.successors(position).len();
                let prior = if branching == 0 {
                    Vec::new()
                } else {
                    vec![1.0 / branching as f32; branching]
                };
                PositionEval::new(prior, 0.0)
            })
            .collect()
    }
}
