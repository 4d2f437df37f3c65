//! Execution scheduler - determines which stages run next

use crate::core::Pipeline;

/// Strategy for scheduling stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute stages in dependency order, one at a time
    #[default]
    Sequential,

    /// Execute all ready stages in parallel
    Parallel,

    /// Limited parallelism (max N concurrent stages)
    LimitedParallel(usize),
}

/// Selects the next batch of ready stages according to the strategy.
/// Within a batch, stages run concurrently; batches themselves run to
/// completion before the next is selected.
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// Get the next batch of stages to execute
    pub fn next_batch(&self, pipeline: &Pipeline) -> Vec<String> {
        let ready = pipeline.ready_stages();

        match self.strategy {
            SchedulingStrategy::Sequential => ready.into_iter().take(1).collect(),
            SchedulingStrategy::Parallel => ready,
            SchedulingStrategy::LimitedParallel(max) => {
                ready.into_iter().take(max.max(1)).collect()
            }
        }
    }
}
