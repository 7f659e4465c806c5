//! Task graphs describe the work that an execution plan performs.
//!
//! A [`TaskGraph`] is an ordered list of steps:
//! - transfers of host buffers to the device
//! - kernel invocations (tasks) with their arguments bound to host buffers
//! - transfers of device memory back to the host
//!
//! The graph only records the steps. Nothing is validated against a worker
//! grid or executed until an [`ExecutionPlan`](crate::ExecutionPlan) runs
//! it. Once the graph is complete, [`TaskGraph::snapshot`] freezes it into
//! an [`ImmutableTaskGraph`].

use crate::buffer::{BufferId, HostBuffer, TypedBuffer};
use crate::context::EmulatedContext;
use crate::device::{DeviceArray, DeviceMemory};
use crate::error::Error;
use crate::executor::BoundKernel;
use kernelgrid_nostd_internal::Element;
use std::collections::HashSet;
use std::sync::Arc;

/// Controls how often a transfer is performed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataTransferMode {
    /// transfer during every execution
    EveryExecution,
    /// transfer during the first execution of a plan (or the first one after
    /// [`ExecutionPlan::reset_device`](crate::ExecutionPlan::reset_device)).
    /// Later changes to the host buffer are NOT picked up.
    FirstExecution,
}

impl DataTransferMode {
    pub(crate) fn applies(self, first_execution: bool) -> bool {
        match self {
            DataTransferMode::EveryExecution => true,
            DataTransferMode::FirstExecution => first_execution,
        }
    }
}

/// Extra information attached to a transfer that helps the runtime pick a
/// launch configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferHint {
    /// preferred local work size for tasks whose default grid is derived
    /// from this buffer
    LocalSize(usize),
}

/// A constraint that a task places on its launch configuration.
///
/// These are checked at execute-time, before anything is launched. A
/// violated requirement is a configuration error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskRequirement {
    /// the grid scheduler must have an entry for the task
    ExplicitGrid,
    /// every dimension of the work-group must be a power of two
    PowerOfTwoGroups,
    /// the worker grid must be 1D
    OneDimensional,
    /// argument `i` must hold one element per work-item
    ArgLenEqualsWorkItems(usize),
    /// argument `i` must hold one element per work-group
    ArgLenEqualsGroups(usize),
}

type Binder = dyn Fn(&DeviceMemory, &str) -> Result<Box<BoundKernel<'static>>, Error> + Send + Sync;

pub(crate) struct Task {
    name: String,
    args: Vec<Arc<dyn HostBuffer>>,
    requirements: Vec<TaskRequirement>,
    binder: Box<Binder>,
}

impl Task {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn args(&self) -> &[Arc<dyn HostBuffer>] {
        &self.args
    }

    pub(crate) fn requirements(&self) -> &[TaskRequirement] {
        &self.requirements
    }

    pub(crate) fn requires(&self, requirement: TaskRequirement) -> bool {
        self.requirements.contains(&requirement)
    }

    /// Look up the device copy of every argument and produce a kernel that
    /// can be handed to an executor
    pub(crate) fn bind(&self, memory: &DeviceMemory, key: &str) -> Result<Box<BoundKernel<'static>>, Error> {
        (self.binder)(memory, key)
    }
}

pub(crate) enum Step {
    ToDevice {
        mode: DataTransferMode,
        buffer: Arc<dyn HostBuffer>,
        hint: Option<TransferHint>,
    },
    Task(Task),
    ToHost {
        mode: DataTransferMode,
        buffer: Arc<dyn HostBuffer>,
    },
}

fn bind_arg<T: Element>(
    memory: &DeviceMemory,
    key: &str,
    arg: usize,
    id: BufferId,
) -> Result<DeviceArray<T>, Error> {
    let slot = memory.get(id).ok_or_else(|| {
        Error::config(format!(
            "argument {arg} of task \"{key}\" (buffer {id}) has no device allocation"
        ))
    })?;
    // a buffer id belongs to exactly one TypedBuffer<T>, so its slot always
    // holds that T
    debug_assert_eq!(slot.kind(), T::KIND);
    slot.typed::<T>().cloned().ok_or_else(|| {
        Error::config(format!(
            "argument {arg} of task \"{key}\" (buffer {id}) holds {} elements, not {}",
            slot.kind(),
            T::KIND
        ))
    })
}

/// A mutable, ordered list of steps
pub struct TaskGraph {
    name: String,
    steps: Vec<Step>,
    task_names: HashSet<String>,
    snapshotted: bool,
}

impl TaskGraph {
    pub fn new(name: impl Into<String>) -> Self {
        TaskGraph {
            name: name.into(),
            steps: Vec::new(),
            task_names: HashSet::new(),
            snapshotted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn is_snapshotted(&self) -> bool {
        self.snapshotted
    }

    fn check_mutable(&self) -> Result<(), Error> {
        if self.snapshotted {
            Err(Error::graph_snapshotted(&self.name))
        } else {
            Ok(())
        }
    }

    /// Copy each of `buffers` to the device before the following steps run
    pub fn transfer_to_device(
        &mut self,
        mode: DataTransferMode,
        buffers: &[&dyn HostBuffer],
    ) -> Result<&mut Self, Error> {
        self.check_mutable()?;
        for buffer in buffers {
            self.steps.push(Step::ToDevice {
                mode,
                buffer: buffer.to_handle(),
                hint: None,
            });
        }
        Ok(self)
    }

    pub fn transfer_to_device_with_hint(
        &mut self,
        mode: DataTransferMode,
        buffer: &dyn HostBuffer,
        hint: TransferHint,
    ) -> Result<&mut Self, Error> {
        self.check_mutable()?;
        self.steps.push(Step::ToDevice {
            mode,
            buffer: buffer.to_handle(),
            hint: Some(hint),
        });
        Ok(self)
    }

    /// Copy the device contents of each of `buffers` back to the host.
    ///
    /// The copy becomes visible in the host buffer once the whole execution
    /// has succeeded.
    pub fn transfer_to_host(
        &mut self,
        mode: DataTransferMode,
        buffers: &[&dyn HostBuffer],
    ) -> Result<&mut Self, Error> {
        self.check_mutable()?;
        for buffer in buffers {
            self.steps.push(Step::ToHost {
                mode,
                buffer: buffer.to_handle(),
            });
        }
        Ok(self)
    }

    /// Attach a requirement to the most recently added task
    pub fn require(&mut self, requirement: TaskRequirement) -> Result<&mut Self, Error> {
        self.check_mutable()?;
        let task = self.steps.iter_mut().rev().find_map(|step| match step {
            Step::Task(task) => Some(task),
            _ => None,
        });
        match task {
            Some(task) => {
                task.requirements.push(requirement);
                Ok(self)
            }
            None => Err(Error::requirement_without_task(&self.name)),
        }
    }

    fn push_task(
        &mut self,
        name: &str,
        args: Vec<Arc<dyn HostBuffer>>,
        binder: Box<Binder>,
    ) -> Result<&mut Self, Error> {
        self.check_mutable()?;
        if !self.task_names.insert(name.to_owned()) {
            return Err(Error::duplicate_task(&self.name, name));
        }
        self.steps.push(Step::Task(Task {
            name: name.to_owned(),
            args,
            requirements: Vec::new(),
            binder,
        }));
        Ok(self)
    }

    /// Freeze the graph.
    ///
    /// Any later attempt to modify this graph (or to snapshot it again)
    /// fails with a lifecycle error.
    pub fn snapshot(&mut self) -> Result<ImmutableTaskGraph, Error> {
        self.check_mutable()?;
        self.snapshotted = true;
        let steps = std::mem::take(&mut self.steps);
        Ok(ImmutableTaskGraph {
            name: self.name.clone(),
            steps: steps.into(),
        })
    }
}

// generates `task1` through `task4`. Each argument is given as
// `index: name: Type`
macro_rules! impl_task_methods {
    ($($(#[$attr:meta])* $method:ident => ($($idx:literal: $arg:ident: $ty:ident),+));+ $(;)?) => {
        impl TaskGraph {
            $(
                $(#[$attr])*
                pub fn $method<K, $($ty: Element),+>(
                    &mut self,
                    name: &str,
                    kernel: K,
                    $($arg: &TypedBuffer<$ty>),+
                ) -> Result<&mut Self, Error>
                where
                    K: Fn(&EmulatedContext<'_>, $(&DeviceArray<$ty>),+) + Send + Sync + 'static,
                {
                    let args: Vec<Arc<dyn HostBuffer>> = vec![$(HostBuffer::to_handle($arg)),+];
                    let ids: Vec<BufferId> = args.iter().map(|arg| arg.id()).collect();
                    let kernel = Arc::new(kernel);
                    let binder = move |memory: &DeviceMemory,
                                       key: &str|
                          -> Result<Box<BoundKernel<'static>>, Error> {
                        $(let $arg = bind_arg::<$ty>(memory, key, $idx, ids[$idx])?;)+
                        let kernel = Arc::clone(&kernel);
                        let bound: Box<BoundKernel<'static>> =
                            Box::new(move |ctx: &EmulatedContext<'_>| kernel(ctx, $(&$arg),+));
                        Ok(bound)
                    };
                    self.push_task(name, args, Box::new(binder))
                }
            )+
        }
    };
}

impl_task_methods! {
    /// Add a task that invokes `kernel` with one buffer argument
    task1 => (0: a: A);
    /// Add a task that invokes `kernel` with two buffer arguments
    task2 => (0: a: A, 1: b: B);
    task3 => (0: a: A, 1: b: B, 2: c: C);
    task4 => (0: a: A, 1: b: B, 2: c: C, 3: d: D);
}

/// A frozen task graph. Cloning is cheap (the steps are shared).
#[derive(Clone)]
pub struct ImmutableTaskGraph {
    name: String,
    steps: Arc<[Step]>,
}

impl ImmutableTaskGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_steps(&self) -> usize {
        self.steps.len()
    }

    pub(crate) fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|step| match step {
            Step::Task(task) => Some(task.name()),
            _ => None,
        })
    }
}

impl core::fmt::Debug for ImmutableTaskGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ImmutableTaskGraph")
            .field("name", &self.name)
            .field("n_steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::IntArray;
    use kernelgrid_nostd_internal::{ArrayAccess, KernelContext};

    fn copy_kernel(ctx: &EmulatedContext<'_>, src: &DeviceArray<i32>, dst: &DeviceArray<i32>) {
        dst.set(ctx.global_idx(), src.get(ctx.global_idx()));
    }

    #[test]
    fn builder_records_steps_in_order() {
        let src = IntArray::from_slice(&[1, 2, 3, 4]);
        let dst = IntArray::new(4);
        let mut graph = TaskGraph::new("s0");
        graph
            .transfer_to_device(DataTransferMode::EveryExecution, &[&src])
            .unwrap()
            .task2("t0", copy_kernel, &src, &dst)
            .unwrap()
            .require(TaskRequirement::OneDimensional)
            .unwrap()
            .transfer_to_host(DataTransferMode::EveryExecution, &[&dst])
            .unwrap();
        assert_eq!(graph.n_steps(), 3);

        let frozen = graph.snapshot().unwrap();
        assert_eq!(frozen.task_names().collect::<Vec<_>>(), vec!["t0"]);
        assert!(matches!(&frozen.steps()[1], Step::Task(task) if task.requires(TaskRequirement::OneDimensional)));
    }

    #[test]
    fn snapshotted_graph_rejects_changes() {
        let buf = IntArray::new(2);
        let mut graph = TaskGraph::new("s0");
        graph.task1("t0", |_, _: &DeviceArray<i32>| {}, &buf).unwrap();
        graph.snapshot().unwrap();
        let err = graph
            .transfer_to_host(DataTransferMode::EveryExecution, &[&buf])
            .err()
            .unwrap();
        assert!(err.is_graph_snapshotted());
        assert!(graph.snapshot().err().unwrap().is_lifecycle());
    }

    #[test]
    fn duplicate_tasks_and_orphan_requirements() {
        let buf = IntArray::new(2);
        let mut graph = TaskGraph::new("s0");
        assert!(graph.require(TaskRequirement::ExplicitGrid).err().unwrap().is_configuration());
        graph.task1("t0", |_, _: &DeviceArray<i32>| {}, &buf).unwrap();
        let err = graph.task1("t0", |_, _: &DeviceArray<i32>| {}, &buf).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn arguments_bind_to_their_own_allocation() {
        let buf = IntArray::from_slice(&[3, 4]);
        let mut memory = DeviceMemory::new();
        let err = bind_arg::<i32>(&memory, "s0.t0", 0, buf.id()).err().unwrap();
        assert!(err.is_configuration(), "{err}");

        memory.insert(buf.id(), buf.allocate());
        let array = bind_arg::<i32>(&memory, "s0.t0", 0, buf.id()).unwrap();
        assert_eq!(array.len(), 2);
    }
}
