// cosmolite-core/src/config.rs
// Repository configuration: paging, procedure budget, retry policy

use std::path::Path;
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::budget::ExecutionBudget;
use crate::collection_core::DEFAULT_PAGE_SIZE;
use crate::error::{Result, CosmoLiteError};
use crate::procedure::ExecuteOptions;

/// Settings for a [`Repository`](crate::repository::Repository).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use cosmolite_core::RepositoryConfig;
///
/// let config = RepositoryConfig::from_json_str(r#"{"page_size": 50, "retry": {"max_attempts": 3}}"#).unwrap();
/// assert_eq!(config.page_size, 50);
/// assert_eq!(config.retry.max_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Documents examined per query page
    pub page_size: usize,
    /// Budget for each stored procedure invocation
    pub budget: BudgetConfig,
    pub retry: RetryPolicy,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        RepositoryConfig {
            page_size: DEFAULT_PAGE_SIZE,
            budget: BudgetConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RepositoryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(CosmoLiteError::Validation("page_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(CosmoLiteError::Validation("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Options for one procedure invocation; the time budget starts now
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions {
            budget: self.budget.start(),
            page_size: self.page_size,
        }
    }
}

/// Per-invocation execution ceiling. `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_operations: Option<u64>,
    pub max_duration_ms: Option<u64>,
}

impl BudgetConfig {
    pub fn operations(max: u64) -> Self {
        BudgetConfig {
            max_operations: Some(max),
            ..Default::default()
        }
    }

    pub fn start(&self) -> ExecutionBudget {
        let mut budget = ExecutionBudget::unlimited();
        if let Some(max) = self.max_operations {
            budget = budget.and_operations(max);
        }
        if let Some(ms) = self.max_duration_ms {
            budget = budget.and_timeout(Duration::from_millis(ms));
        }
        budget
    }
}

/// Bounded retry with exponential backoff for retryable failures
/// (concurrency conflicts, exhausted budgets).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 5,
            max_backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}
