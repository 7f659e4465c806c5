//! Execution plans run one or more frozen task graphs.
//!
//! Each call to [`ExecutionPlan::execute`] proceeds in 2 phases:
//! 1. validation: every task's worker grid is resolved and checked against
//!    the configuration and the task's requirements, and every transfer to
//!    the host is checked to refer to memory that will exist on the device.
//!    Configuration errors are reported here, before any memory is touched
//!    or any kernel runs.
//! 2. execution: the steps run in order. Copies to the host are staged and
//!    only applied once every step succeeded, so a failed execution never
//!    leaves a host buffer partially updated.
//!
//! Device memory persists between executions (that's what makes
//! [`DataTransferMode::FirstExecution`] useful). A fault raised by a kernel
//! leaves that memory in an unknown state, so the plan refuses to run again
//! until [`ExecutionPlan::reset_device`] is called.

use crate::buffer::{BufferId, StagedWrite};
use crate::config::RuntimeConfig;
use crate::device::DeviceMemory;
use crate::error::Error;
use crate::executor::{Executor, ExecutorKind, SerialExecutor};
use crate::graph::{DataTransferMode, ImmutableTaskGraph, Step, Task, TaskRequirement, TransferHint};
use crate::scheduler::{GridScheduler, task_key};
use kernelgrid_nostd_internal::{LaunchGeometry, WorkerGrid};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn};

/// Timing and traffic measurements of a single task launch
#[derive(Clone, Debug, PartialEq)]
pub struct TaskProfile {
    pub key: String,
    pub kernel_time: Duration,
    pub n_groups: usize,
    pub n_work_items: usize,
}

/// Measurements gathered during an execution when profiling is enabled
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProfilerResult {
    pub total_time: Duration,
    pub tasks: Vec<TaskProfile>,
    pub bytes_to_device: usize,
    pub bytes_to_host: usize,
}

impl ProfilerResult {
    pub fn kernel_time(&self) -> Duration {
        self.tasks.iter().map(|task| task.kernel_time).sum()
    }

    pub fn task(&self, key: &str) -> Option<&TaskProfile> {
        self.tasks.iter().find(|task| task.key == key)
    }

    pub fn n_groups_launched(&self) -> usize {
        self.tasks.iter().map(|task| task.n_groups).sum()
    }

    pub fn n_work_items_launched(&self) -> usize {
        self.tasks.iter().map(|task| task.n_work_items).sum()
    }
}

/// Describes a successful execution
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    execution_index: u64,
    first_execution: bool,
    profiler: Option<ProfilerResult>,
}

impl ExecutionResult {
    /// counts executions of the plan, starting from 0
    pub fn execution_index(&self) -> u64 {
        self.execution_index
    }

    /// whether [`DataTransferMode::FirstExecution`] transfers were performed
    pub fn was_first_execution(&self) -> bool {
        self.first_execution
    }

    /// `None` unless the plan was built with the profiler enabled
    pub fn profiler_result(&self) -> Option<&ProfilerResult> {
        self.profiler.as_ref()
    }
}

// the outcome of validating a single step
enum ResolvedStep {
    Transfer,
    Launch { key: String, geometry: LaunchGeometry },
}

pub struct ExecutionPlan {
    graphs: Vec<ImmutableTaskGraph>,
    scheduler: Option<GridScheduler>,
    use_default_scheduler: bool,
    config: RuntimeConfig,
    executor: Box<dyn Executor>,
    profiler: bool,
    memory: DeviceMemory,
    execution_count: u64,
    // true until the first execution after creation (or after reset_device)
    // succeeds
    first_pending: bool,
    // key of the task that faulted
    poisoned: Option<String>,
    closed: bool,
}

impl ExecutionPlan {
    pub fn new(graph: ImmutableTaskGraph) -> Self {
        Self::from_graphs([graph])
    }

    /// A plan that runs several graphs in order during each execution
    pub fn from_graphs(graphs: impl IntoIterator<Item = ImmutableTaskGraph>) -> Self {
        ExecutionPlan {
            graphs: graphs.into_iter().collect(),
            scheduler: None,
            use_default_scheduler: false,
            config: RuntimeConfig::default(),
            executor: Box::new(SerialExecutor),
            profiler: false,
            memory: DeviceMemory::new(),
            execution_count: 0,
            first_pending: true,
            poisoned: None,
            closed: false,
        }
    }

    pub fn with_grid_scheduler(&mut self, scheduler: GridScheduler) -> &mut Self {
        self.scheduler = Some(scheduler);
        self.use_default_scheduler = false;
        self
    }

    /// Ignore the grid scheduler: every task runs on its default grid
    pub fn with_default_scheduler(&mut self) -> &mut Self {
        self.use_default_scheduler = true;
        self
    }

    pub fn grid_scheduler(&self) -> Option<&GridScheduler> {
        self.scheduler.as_ref()
    }

    /// Adjust the bound scheduler between executions
    pub fn grid_scheduler_mut(&mut self) -> Option<&mut GridScheduler> {
        self.scheduler.as_mut()
    }

    pub fn with_config(&mut self, config: RuntimeConfig) -> Result<&mut Self, Error> {
        self.executor = config.build_executor()?;
        self.config = config;
        Ok(self)
    }

    pub fn with_executor(&mut self, kind: ExecutorKind) -> Result<&mut Self, Error> {
        let config = RuntimeConfig {
            executor: kind,
            ..self.config.clone()
        };
        self.with_config(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn with_profiler(&mut self, enabled: bool) -> &mut Self {
        self.profiler = enabled;
        self
    }

    /// Run the validation phase of an execution without launching anything.
    ///
    /// This surfaces configuration errors early; no memory is allocated and
    /// the execution count is unchanged.
    pub fn with_warm_up(&mut self) -> Result<&mut Self, Error> {
        self.check_runnable()?;
        self.validate()?;
        Ok(self)
    }

    /// Release all device memory and forget about earlier faults.
    ///
    /// The next execution is treated as a first execution again (so
    /// [`DataTransferMode::FirstExecution`] transfers are repeated).
    pub fn reset_device(&mut self) -> &mut Self {
        debug!(n_buffers = self.memory.len(), "resetting device memory");
        self.memory.clear();
        self.first_pending = true;
        self.poisoned = None;
        self
    }

    /// Release device memory. Closing an already-closed plan does nothing.
    pub fn close(&mut self) {
        if !self.closed {
            self.memory.clear();
            self.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// number of successful executions so far
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// bytes of device memory currently held by the plan
    pub fn device_memory_bytes(&self) -> usize {
        self.memory.total_bytes()
    }

    fn check_runnable(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::plan_closed())
        } else if let Some(key) = &self.poisoned {
            Err(Error::plan_poisoned(key))
        } else if self.graphs.iter().all(|graph| graph.n_steps() == 0) {
            Err(Error::empty_plan())
        } else {
            Ok(())
        }
    }

    fn resolve_grid(
        &self,
        key: &str,
        task: &Task,
        hints: &HashMap<BufferId, TransferHint>,
    ) -> Result<WorkerGrid, Error> {
        let scheduled = if self.use_default_scheduler {
            None
        } else {
            self.scheduler.as_ref().and_then(|s| s.get(key))
        };
        let grid = match scheduled {
            Some(grid) => grid.clone(),
            None if task.requires(TaskRequirement::ExplicitGrid) => {
                return Err(Error::missing_grid(key));
            }
            None => {
                // the default grid is 1D, with one work-item per element of
                // the first argument
                let first = task.args().first().ok_or_else(|| Error::no_default_grid(key))?;
                let mut grid = WorkerGrid::new_1d(first.len());
                if let Some(TransferHint::LocalSize(local)) = hints.get(&first.id()) {
                    grid.set_local_work(*local, 1, 1);
                }
                grid
            }
        };
        Ok(grid.with_local_size_chosen(self.config.local_size_budget()))
    }

    fn check_requirements(
        key: &str,
        task: &Task,
        grid: &WorkerGrid,
        geometry: &LaunchGeometry,
    ) -> Result<(), Error> {
        let arg_len = |arg: usize| {
            task.args().get(arg).map(|buffer| buffer.len()).ok_or_else(|| {
                Error::config(format!(
                    "a requirement of task \"{key}\" refers to argument {arg}, but the task has \
                     {} arguments",
                    task.args().len()
                ))
            })
        };
        for requirement in task.requirements() {
            match *requirement {
                TaskRequirement::ExplicitGrid => (), // handled while resolving the grid
                TaskRequirement::PowerOfTwoGroups => {
                    if !geometry.local().iter().all(|n| n.is_power_of_two()) {
                        return Err(Error::non_power_of_two_group(key, geometry.local()));
                    }
                }
                TaskRequirement::OneDimensional => {
                    if grid.dimensions() != 1 {
                        return Err(Error::not_one_dimensional(key, grid.dimensions()));
                    }
                }
                TaskRequirement::ArgLenEqualsWorkItems(arg) => {
                    let len = arg_len(arg)?;
                    if len != geometry.n_work_items() {
                        return Err(Error::partition_mismatch(key, arg, geometry.n_work_items(), len));
                    }
                }
                TaskRequirement::ArgLenEqualsGroups(arg) => {
                    let len = arg_len(arg)?;
                    if len != geometry.total_groups() {
                        return Err(Error::partition_mismatch(key, arg, geometry.total_groups(), len));
                    }
                }
            }
        }
        Ok(())
    }

    /// The validation phase. Produces one entry per step of every graph.
    fn validate(&self) -> Result<Vec<ResolvedStep>, Error> {
        let mut names = HashSet::new();
        for graph in &self.graphs {
            if !names.insert(graph.name()) {
                return Err(Error::config(format!(
                    "the plan holds more than one graph named \"{}\"",
                    graph.name()
                )));
            }
        }

        let max_group_size = self.config.max_work_group_size;
        let mut resolved = Vec::new();
        // buffers that will have a device copy when the step runs
        let mut resident: HashSet<BufferId> = HashSet::new();
        let mut hints = HashMap::new();

        for graph in &self.graphs {
            for step in graph.steps() {
                match step {
                    Step::ToDevice { buffer, hint, .. } => {
                        // a FirstExecution transfer that doesn't apply now
                        // was performed by an earlier execution
                        resident.insert(buffer.id());
                        if let Some(hint) = hint {
                            hints.insert(buffer.id(), *hint);
                        }
                        resolved.push(ResolvedStep::Transfer);
                    }
                    Step::Task(task) => {
                        let key = task_key(graph.name(), task.name());
                        let grid = self.resolve_grid(&key, task, &hints)?;
                        grid.validate_with_limit(max_group_size)
                            .map_err(|e| Error::grid(&key, e))?;
                        let geometry = grid.launch_geometry().map_err(|e| Error::grid(&key, e))?;
                        Self::check_requirements(&key, task, &grid, &geometry)?;
                        resident.extend(task.args().iter().map(|arg| arg.id()));
                        resolved.push(ResolvedStep::Launch { key, geometry });
                    }
                    Step::ToHost { buffer, .. } => {
                        if !resident.contains(&buffer.id()) && !self.memory.contains(buffer.id()) {
                            return Err(Error::never_transferred(graph.name(), buffer.id()));
                        }
                        resolved.push(ResolvedStep::Transfer);
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Run every step of every graph once.
    pub fn execute(&mut self) -> Result<ExecutionResult, Error> {
        self.check_runnable()?;
        let span = info_span!(
            "execute",
            index = self.execution_count,
            executor = self.executor.kind().name()
        );
        let _guard = span.enter();
        let start = Instant::now();

        let resolved = self.validate()?;
        let first_execution = self.first_pending;
        let mut profile = ProfilerResult::default();
        let mut staged: Vec<StagedWrite> = Vec::new();

        let steps = self.graphs.iter().flat_map(|graph| graph.steps());
        for (step, resolution) in steps.zip(resolved) {
            match (step, resolution) {
                (Step::ToDevice { mode, buffer, .. }, _) => {
                    if mode.applies(first_execution) || !self.memory.contains(buffer.id()) {
                        debug!(buffer = %buffer.id(), bytes = buffer.byte_size(), "copy to device");
                        profile.bytes_to_device += buffer.byte_size();
                        self.memory.insert(buffer.id(), buffer.upload());
                    }
                }
                (Step::Task(task), ResolvedStep::Launch { key, geometry }) => {
                    for arg in task.args() {
                        if !self.memory.contains(arg.id()) {
                            debug!(buffer = %arg.id(), "zero-filled device allocation");
                            self.memory.insert(arg.id(), arg.allocate());
                        }
                    }
                    let kernel = task.bind(&self.memory, &key)?;
                    debug!(
                        key = %key,
                        global = ?geometry.global(),
                        local = ?geometry.local(),
                        "launching task"
                    );
                    let launch_start = Instant::now();
                    match self.executor.launch(&key, &geometry, &*kernel) {
                        Ok(stats) => profile.tasks.push(TaskProfile {
                            key,
                            kernel_time: launch_start.elapsed(),
                            n_groups: stats.n_groups,
                            n_work_items: stats.n_work_items,
                        }),
                        Err(err) => {
                            if err.poisons_plan() {
                                warn!(key = %key, error = %err, "kernel fault poisoned the plan");
                                self.poisoned = Some(key);
                            }
                            return Err(err);
                        }
                    }
                }
                (Step::Task(task), ResolvedStep::Transfer) => {
                    return Err(Error::config(format!(
                        "task \"{}\" was not resolved to a launch",
                        task.name()
                    )));
                }
                (Step::ToHost { mode, buffer }, _) => {
                    if mode.applies(first_execution) {
                        let slot = self
                            .memory
                            .get(buffer.id())
                            .ok_or_else(|| Error::config(format!("buffer {} has no device copy", buffer.id())))?;
                        debug!(buffer = %buffer.id(), bytes = buffer.byte_size(), "copy to host");
                        profile.bytes_to_host += buffer.byte_size();
                        staged.push(buffer.stage_download(slot)?);
                    }
                }
            }
        }

        for write in staged {
            write.commit();
        }

        let execution_index = self.execution_count;
        self.execution_count += 1;
        self.first_pending = false;
        profile.total_time = start.elapsed();
        Ok(ExecutionResult {
            execution_index,
            first_execution,
            profiler: self.profiler.then_some(profile),
        })
    }
}

impl Drop for ExecutionPlan {
    fn drop(&mut self) {
        self.close();
    }
}

impl core::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("graphs", &self.graphs)
            .field("executor", &self.executor.kind())
            .field("execution_count", &self.execution_count)
            .field("poisoned", &self.poisoned)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::IntArray;
    use crate::device::DeviceArray;
    use crate::graph::TaskGraph;
    use kernelgrid_nostd_internal::{ArrayAccess, KernelContext};

    fn increment_graph(buf: &IntArray, mode: DataTransferMode) -> ImmutableTaskGraph {
        let mut graph = TaskGraph::new("s0");
        graph
            .transfer_to_device(mode, &[buf])
            .unwrap()
            .task1(
                "t0",
                |ctx, a: &DeviceArray<i32>| a.set(ctx.global_idx(), a.get(ctx.global_idx()) + 1),
                buf,
            )
            .unwrap()
            .transfer_to_host(DataTransferMode::EveryExecution, &[buf])
            .unwrap();
        graph.snapshot().unwrap()
    }

    #[test]
    fn first_execution_transfers_happen_once() {
        let buf = IntArray::from_slice(&[0, 10, 20, 30]);
        let mut plan = ExecutionPlan::new(increment_graph(&buf, DataTransferMode::FirstExecution));
        assert!(plan.execute().unwrap().was_first_execution());
        assert_eq!(buf.to_vec(), vec![1, 11, 21, 31]);

        // the device copy is reused, so the host change is ignored
        buf.fill(100);
        let result = plan.execute().unwrap();
        assert_eq!(result.execution_index(), 1);
        assert!(!result.was_first_execution());
        assert_eq!(buf.to_vec(), vec![2, 12, 22, 32]);

        plan.reset_device();
        buf.fill(100);
        plan.execute().unwrap();
        assert_eq!(buf.to_vec(), vec![101; 4]);
        assert_eq!(plan.execution_count(), 3);
    }

    #[test]
    fn lifecycle() {
        let buf = IntArray::new(4);
        let mut plan = ExecutionPlan::new(increment_graph(&buf, DataTransferMode::EveryExecution));
        plan.with_warm_up().unwrap();
        assert_eq!(plan.execution_count(), 0);
        assert_eq!(plan.device_memory_bytes(), 0);
        plan.execute().unwrap();
        assert_eq!(plan.device_memory_bytes(), 16);
        plan.close();
        plan.close();
        assert!(plan.is_closed());
        assert_eq!(plan.device_memory_bytes(), 0);
        assert!(plan.execute().unwrap_err().is_plan_closed());
    }

    #[test]
    fn empty_plan_is_rejected() {
        let mut graph = TaskGraph::new("empty");
        let mut plan = ExecutionPlan::new(graph.snapshot().unwrap());
        assert!(plan.execute().unwrap_err().is_configuration());
    }

    #[test]
    fn profiler_counts_traffic() {
        let buf = IntArray::new(8);
        let mut plan = ExecutionPlan::new(increment_graph(&buf, DataTransferMode::EveryExecution));
        plan.with_profiler(true);
        let result = plan.execute().unwrap();
        let profile = result.profiler_result().unwrap();
        assert_eq!(profile.bytes_to_device, 32);
        assert_eq!(profile.bytes_to_host, 32);
        assert_eq!(profile.task("s0.t0").unwrap().n_work_items, 8);
        assert_eq!(profile.n_groups_launched(), 1);
    }
}
