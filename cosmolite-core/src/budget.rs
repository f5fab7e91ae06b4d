// src/budget.rs
// Per-invocation execution budget for stored procedures

use std::time::{Duration, Instant};

/// Ceiling on the work one procedure invocation may do.
///
/// Every store step asks [`try_accept`](Self::try_accept) first. Once a step
/// has been refused, every later step is refused too, so a procedure that
/// ignores one refusal still cannot sneak more writes in.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    max_operations: Option<u64>,
    deadline: Option<Instant>,
    used: u64,
    exhausted: bool,
}

impl ExecutionBudget {
    pub fn unlimited() -> Self {
        ExecutionBudget {
            max_operations: None,
            deadline: None,
            used: 0,
            exhausted: false,
        }
    }

    /// Accept at most `max` store operations
    pub fn with_operations(max: u64) -> Self {
        ExecutionBudget {
            max_operations: Some(max),
            ..Self::unlimited()
        }
    }

    /// Accept operations until `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        ExecutionBudget {
            deadline: Instant::now().checked_add(timeout),
            ..Self::unlimited()
        }
    }

    pub fn and_operations(mut self, max: u64) -> Self {
        self.max_operations = Some(max);
        self
    }

    pub fn and_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn try_accept(&mut self) -> bool {
        if self.exhausted {
            return false;
        }

        let over_count = self.max_operations.map_or(false, |max| self.used >= max);
        let over_time = self.deadline.map_or(false, |deadline| Instant::now() >= deadline);
        if over_count || over_time {
            self.exhausted = true;
            return false;
        }

        self.used += 1;
        true
    }

    /// Operations accepted so far
    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}
