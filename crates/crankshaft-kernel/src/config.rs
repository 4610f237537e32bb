use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Default number of kernel cranks allowed per block.
pub const DEFAULT_CRANK_BUDGET: u64 = 1000;

/// Kernel driver tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DriverConfig {
    /// Upper bound on cranks per `END_BLOCK`. Unused work carries over.
    pub crank_budget: u64,
    /// Kernel statistic names the metrics mirror expects. Empty means the
    /// first report defines them.
    pub expected_stats: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            crank_budget: DEFAULT_CRANK_BUDGET,
            expected_stats: Vec::new(),
        }
    }
}

impl DriverConfig {
    pub fn with_crank_budget(mut self, crank_budget: u64) -> Self {
        self.crank_budget = crank_budget;
        self
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.crank_budget == 0 {
            return Err(KernelError::Config("crank_budget must be at least 1".into()));
        }
        Ok(())
    }
}
