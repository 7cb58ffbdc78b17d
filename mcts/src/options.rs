use std::time::Duration;

use anyhow::Result;
use common::{Config, ConfigLoader};

#[derive(Clone, Debug)]
pub struct SearchOptions {
    /// Exploration coefficient `c` in the selection priority.
    pub exploration: f32,
    /// Weight `d` of the learned policy prior (heuristic nodes only).
    pub policy_weight: f32,
    /// Independent random playouts run per rollout expansion.
    pub rollout_batch_size: usize,
    /// Wall-clock budget granted to a "decide now" request. Checked between
    /// expansions, never inside one.
    pub decide_budget: Duration,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            exploration: std::f32::consts::SQRT_2,
            policy_weight: 1.0,
            rollout_batch_size: 1,
            decide_budget: Duration::from_secs(3),
        }
    }
}

impl Config for SearchOptions {
    fn load(config: &ConfigLoader) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            exploration: config
                .get("exploration")
                .and_then(|value| value.as_f32())
                .unwrap_or(defaults.exploration),
            policy_weight: config
                .get("policy_weight")
                .and_then(|value| value.as_f32())
                .unwrap_or(defaults.policy_weight),
            rollout_batch_size: config
                .get("rollout_batch_size")
                .and_then(|value| value.as_usize())
                .unwrap_or(defaults.rollout_batch_size),
            decide_budget: config
                .get("decide_budget_ms")
                .and_then(|value| value.as_usize())
                .map(|ms| Duration::from_millis(ms as u64))
                .unwrap_or(defaults.decide_budget),
        })
    }
}
