//! The parts of kernelgrid that don't need the standard library.
//!
//! Everything that a device backend might eventually have to compile lives
//! here: element kinds, reduction operators, worker-grid geometry, work-item
//! identity, the traits kernels are written against and the reduction
//! kernels themselves. The CPU emulator, the task graph and the execution
//! plan live in the `kernelgrid` crate.
//!
//! We don't currently intend for anything here to be used directly. The
//! public crate re-exports the pieces that make up its API.
#![cfg_attr(not(test), no_std)]

mod element;
mod grid;
mod ids;
mod kernel;
mod reduce_op;
mod reduce_utils;

pub mod reductions;

pub use element::{Element, ElementKind};
pub use grid::{GridError, LaunchGeometry, WorkerGrid};
pub use ids::{Coords, ThreadIds};
pub use kernel::{ArrayAccess, KernelContext};
pub use reduce_op::ReduceOp;
pub use reduce_utils::{sequential_fold, serial_partial_reduce};
pub use reductions::{BarrierPlacement, ReductionStrategy};
