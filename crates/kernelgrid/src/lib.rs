//! kernelgrid runs data-parallel kernels on an emulated SPMD device.
//!
//! Kernels are ordinary Rust closures or functions. They are invoked once per
//! work-item of a worker grid, with access to their work-item's ids,
//! group-shared local memory and a group barrier (through
//! [`KernelContext`]). Work is organized in the same way as on a GPU:
//! - a [`TaskGraph`] lists transfers and kernel launches
//! - a [`GridScheduler`] maps each task onto a [`WorkerGrid`]
//! - an [`ExecutionPlan`] validates and runs one or more frozen graphs
//!
//! ```
//! use kernelgrid::prelude::*;
//!
//! let input = IntArray::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
//! let output = IntArray::new(2);
//!
//! let mut graph = TaskGraph::new("s0");
//! graph.transfer_to_device(DataTransferMode::EveryExecution, &[&input])?;
//! reduction_task(&mut graph, "t0", ReduceOp::Add, ReductionStrategy::default(), &input, &output)?
//!     .transfer_to_host(DataTransferMode::EveryExecution, &[&output])?;
//!
//! let mut grid = WorkerGrid::new_1d(8);
//! grid.set_local_work(4, 1, 1);
//! let mut plan = ExecutionPlan::new(graph.snapshot()?);
//! plan.with_grid_scheduler(GridScheduler::with_grid("s0.t0", grid));
//! plan.execute()?;
//! assert_eq!(output.to_vec(), vec![10, 26]);
//! # Ok::<(), kernelgrid::Error>(())
//! ```
//!
//! The emulator runs every member of a work-group on its own thread, so
//! barriers behave like they do on a device. It doesn't aim to be fast.

mod barrier;
mod buffer;
mod config;
mod context;
mod device;
mod error;
mod executor;
mod graph;
mod plan;
mod reduce;
mod scheduler;

pub use buffer::{
    BufferId, ByteArray, DoubleArray, FloatArray, HalfFloatArray, HostBuffer, IntArray, LongArray,
    ShortArray, TypedBuffer,
};
pub use config::RuntimeConfig;
pub use context::EmulatedContext;
pub use device::{DeviceArray, MemoryRegion};
pub use error::{Error, ErrorCategory};
pub use executor::ExecutorKind;
pub use graph::{DataTransferMode, ImmutableTaskGraph, TaskGraph, TaskRequirement, TransferHint};
pub use plan::{ExecutionPlan, ExecutionResult, ProfilerResult, TaskProfile};
pub use reduce::{DeviceReduction, partial_reduce, reduce, reduction_task};
pub use scheduler::{GridScheduler, task_key};

pub use kernelgrid_nostd_internal::reductions;
pub use kernelgrid_nostd_internal::{
    ArrayAccess, BarrierPlacement, Element, ElementKind, GridError, KernelContext, LaunchGeometry,
    ReduceOp, ReductionStrategy, ThreadIds, WorkerGrid, sequential_fold, serial_partial_reduce,
};

/// Everything needed to build and run plans (including the traits that
/// kernels call methods through)
pub mod prelude {
    pub use crate::{
        ArrayAccess, BarrierPlacement, ByteArray, DataTransferMode, DeviceArray, DoubleArray,
        EmulatedContext, ExecutionPlan, ExecutorKind, FloatArray, GridScheduler, HalfFloatArray,
        ImmutableTaskGraph, IntArray, KernelContext, LongArray, ReduceOp, ReductionStrategy,
        RuntimeConfig, ShortArray, TaskGraph, TaskRequirement, TransferHint, TypedBuffer,
        WorkerGrid, reduction_task, task_key,
    };
}
