//! Host-side drivers for the group reduction kernels
//!
//! A reduction over a buffer of length `N` with a local size of `L` runs in
//! 2 phases:
//! 1. a single launch of `N` work-items (in groups of `L`) writes one partial
//!    result per group (see [`kernelgrid_nostd_internal::reductions`])
//! 2. the host folds the `N / L` partial results sequentially
//!
//! [`reduction_task`] adds phase 1 to a caller-built graph. [`reduce`] and
//! [`partial_reduce`] (and the more configurable [`DeviceReduction`]) do
//! everything, using a throwaway plan.

use crate::buffer::TypedBuffer;
use crate::config::RuntimeConfig;
use crate::device::DeviceArray;
use crate::error::Error;
use crate::graph::{DataTransferMode, TaskGraph, TaskRequirement};
use crate::plan::ExecutionPlan;
use crate::scheduler::{GridScheduler, task_key};
use kernelgrid_nostd_internal::reductions::reduce_group;
use kernelgrid_nostd_internal::{Element, ReduceOp, ReductionStrategy, WorkerGrid, sequential_fold};

const GRAPH_NAME: &str = "reduction";
const TASK_NAME: &str = "partials";

/// Add a task to `graph` that writes the `op`-reduction of each group's
/// slice of `input` to `output[group_idx]`.
///
/// The task requires a 1D grid with a power-of-two local size, one
/// work-item per element of `input` and one element of `output` per group.
/// With [`ReductionStrategy::GlobalMemory`], the device copy of `input` is
/// overwritten.
pub fn reduction_task<'g, T: Element>(
    graph: &'g mut TaskGraph,
    name: &str,
    op: ReduceOp,
    strategy: ReductionStrategy,
    input: &TypedBuffer<T>,
    output: &TypedBuffer<T>,
) -> Result<&'g mut TaskGraph, Error> {
    graph
        .task2(
            name,
            move |ctx, input: &DeviceArray<T>, output: &DeviceArray<T>| {
                reduce_group(ctx, op, strategy, input, output)
            },
            input,
            output,
        )?
        .require(TaskRequirement::OneDimensional)?
        .require(TaskRequirement::PowerOfTwoGroups)?
        .require(TaskRequirement::ArgLenEqualsWorkItems(0))?
        .require(TaskRequirement::ArgLenEqualsGroups(1))
}

/// Configures a reduction that runs on a private execution plan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceReduction {
    op: ReduceOp,
    local_size: usize,
    strategy: ReductionStrategy,
    config: RuntimeConfig,
}

impl DeviceReduction {
    pub fn new(op: ReduceOp, local_size: usize) -> Self {
        DeviceReduction {
            op,
            local_size,
            strategy: ReductionStrategy::default(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn strategy(mut self, strategy: ReductionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Compute the per-group partial results
    pub fn partials<T: Element>(&self, input: &TypedBuffer<T>) -> Result<Vec<T>, Error> {
        let key = task_key(GRAPH_NAME, TASK_NAME);
        let mut grid = WorkerGrid::new_1d(input.len());
        grid.set_local_work(self.local_size, 1, 1);
        let n_groups = grid.n_groups().map_err(|e| Error::grid(&key, e))?[0];

        let output = TypedBuffer::<T>::new(n_groups);
        let mut graph = TaskGraph::new(GRAPH_NAME);
        graph.transfer_to_device(DataTransferMode::EveryExecution, &[input])?;
        reduction_task(&mut graph, TASK_NAME, self.op, self.strategy, input, &output)?
            .transfer_to_host(DataTransferMode::EveryExecution, &[&output])?;

        let mut plan = ExecutionPlan::new(graph.snapshot()?);
        plan.with_config(self.config.clone())?
            .with_grid_scheduler(GridScheduler::with_grid(key, grid));
        plan.execute()?;
        plan.close();
        Ok(output.to_vec())
    }

    /// Reduce `input` to a single value
    pub fn reduce<T: Element>(&self, input: &TypedBuffer<T>) -> Result<T, Error> {
        let partials = self.partials(input)?;
        Ok(sequential_fold(self.op, &partials))
    }
}

/// Compute the per-group partial results of reducing `input` with groups of
/// `local_size` work-items
pub fn partial_reduce<T: Element>(
    op: ReduceOp,
    strategy: ReductionStrategy,
    input: &TypedBuffer<T>,
    local_size: usize,
) -> Result<Vec<T>, Error> {
    DeviceReduction::new(op, local_size)
        .strategy(strategy)
        .partials(input)
}

/// Reduce `input` to a single value with groups of `local_size` work-items
pub fn reduce<T: Element>(
    op: ReduceOp,
    strategy: ReductionStrategy,
    input: &TypedBuffer<T>,
    local_size: usize,
) -> Result<T, Error> {
    DeviceReduction::new(op, local_size)
        .strategy(strategy)
        .reduce(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::IntArray;
    use kernelgrid_nostd_internal::BarrierPlacement;

    #[test]
    fn concrete_partials() {
        let input = IntArray::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let partials = partial_reduce(ReduceOp::Add, ReductionStrategy::default(), &input, 4);
        assert_eq!(partials.unwrap(), vec![10, 26]);
        let total = reduce(
            ReduceOp::Add,
            ReductionStrategy::LocalMemory(BarrierPlacement::AfterCombine),
            &input,
            4,
        );
        assert_eq!(total.unwrap(), 36);
        // the host buffer is untouched, even by the in-place kernel
        let max = reduce(ReduceOp::Max, ReductionStrategy::GlobalMemory, &input, 2).unwrap();
        assert_eq!(max, 8);
        assert_eq!(input.to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn bad_local_sizes() {
        let input = IntArray::new(12);
        let err = partial_reduce(ReduceOp::Min, ReductionStrategy::default(), &input, 5).unwrap_err();
        assert!(err.is_configuration());
        let err = partial_reduce(ReduceOp::Min, ReductionStrategy::default(), &input, 6).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("power-of-two"), "{err}");
    }
}
