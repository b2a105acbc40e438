//! Operation timing with tracing output
//!
//! `measure_time_async!` wraps a single awaited expression. `Timer` covers
//! spans that cross several statements and can carry a latency budget: when
//! it drops after the budget has elapsed it logs a warning instead of a debug
//! line, so slow recoveries show up without failing the call.

use std::time::{Duration, Instant};

/// Measure execution time of an asynchronous expression
///
/// Logs via `tracing::debug!` with fields `operation` and `elapsed_ms`, and
/// returns the awaited result.
///
/// ```rust,no_run
/// use continuity_core::measure_time_async;
///
/// # async fn probe() -> u32 { 1 }
/// # async fn run() {
/// let value = measure_time_async!("probe_build", probe());
/// # }
/// ```
#[macro_export]
macro_rules! measure_time_async {
    ($label:expr, $block:expr) => {{
        let __start = std::time::Instant::now();
        let __result = $block.await;
        ::tracing::debug!(
            operation = $label,
            elapsed_ms = __start.elapsed().as_millis() as u64,
            "Operation completed"
        );
        __result
    }};
}

/// Manual timer that logs on drop.
#[derive(Debug)]
pub struct Timer {
    operation: String,
    start: Instant,
    budget: Option<Duration>,
}

impl Timer {
    /// Create and start a new timer
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
            budget: None,
        }
    }

    /// Start a timer that warns when `budget` is exceeded.
    pub fn with_budget(operation: impl Into<String>, budget: Duration) -> Self {
        let mut timer = Self::new(operation);
        timer.budget = Some(budget);
        timer
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn over_budget(&self) -> bool {
        self.budget.is_some_and(|budget| self.elapsed() > budget)
    }

    /// Stop the timer and return elapsed duration (logs automatically)
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        match self.budget {
            Some(budget) if elapsed > budget => tracing::warn!(
                operation = %self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "Operation exceeded latency budget"
            ),
            _ => tracing::debug!(
                operation = %self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "Operation completed"
            ),
        }
    }
}
