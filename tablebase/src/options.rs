use anyhow::Result;
use common::{Config, ConfigLoader};

const BYTES_PER_MB: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// Byte budget for tablebases held in memory at once. The least recently
    /// used tablebase is unloaded when the budget would be exceeded; the
    /// budget grows to admit a single tablebase larger than it.
    pub cache_budget_bytes: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            cache_budget_bytes: 512 * BYTES_PER_MB,
        }
    }
}

impl Config for ManagerOptions {
    fn load(config: &ConfigLoader) -> Result<Self> {
        let defaults = Self::default();
        let cache_budget_mb = config
            .get("tablebase_cache_mb")
            .and_then(|value| value.as_usize());

        Ok(Self {
            cache_budget_bytes: cache_budget_mb
                .map(|mb| mb * BYTES_PER_MB)
                .unwrap_or(defaults.cache_budget_bytes),
        })
    }
}

#[derive(Clone, Debug)]
pub struct GeneratorOptions {
    /// Walk every node's best-move chain after the fixed point and force the
    /// distance to infinite when a cycle contradicts a finite value.
    pub verify_closure: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            verify_closure: true,
        }
    }
}

impl Config for GeneratorOptions {
    fn load(config: &ConfigLoader) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            verify_closure: config
                .get("verify_closure")
                .and_then(|value| value.as_bool())
                .unwrap_or(defaults.verify_closure),
        })
    }
}
