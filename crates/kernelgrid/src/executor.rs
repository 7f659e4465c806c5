//! Backends that drive a kernel over every work-group of a launch
//!
//! Both backends emulate the members of a work-group the same way: each
//! member runs on its own scoped OS thread so that the members can block on
//! the group barrier independently of one another. A group with a single
//! member runs inline on the calling thread. The backends only differ in how
//! they schedule the groups themselves:
//! - [`SerialExecutor`] runs one group at a time, in a fixed order
//! - [`ParallelExecutor`] hands the groups to rayon
//!
//! Groups never synchronize with each other, so both backends must produce
//! identical results for any kernel that is free of data races.

use crate::context::{EmulatedContext, GroupShared};
use crate::device::KernelFault;
use crate::error::Error;
use kernelgrid_nostd_internal::{LaunchGeometry, ThreadIds};
use rayon::prelude::*;
use serde::Deserialize;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A kernel with every argument already bound to device memory
pub(crate) type BoundKernel<'k> = dyn Fn(&EmulatedContext<'_>) + Send + Sync + 'k;

/// Selects the executor backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Serial,
    Parallel,
}

impl ExecutorKind {
    pub fn name(self) -> &'static str {
        match self {
            ExecutorKind::Serial => "serial",
            ExecutorKind::Parallel => "parallel",
        }
    }
}

impl core::str::FromStr for ExecutorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(ExecutorKind::Serial),
            "parallel" => Ok(ExecutorKind::Parallel),
            other => Err(Error::config(format!(
                "unknown executor \"{other}\" (expected \"serial\" or \"parallel\")"
            ))),
        }
    }
}

/// Summarizes a completed launch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct LaunchStats {
    pub(crate) n_groups: usize,
    pub(crate) n_work_items: usize,
}

impl LaunchStats {
    fn of(geometry: &LaunchGeometry) -> Self {
        LaunchStats {
            n_groups: geometry.total_groups(),
            n_work_items: geometry.n_work_items(),
        }
    }
}

pub(crate) trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Invoke `kernel` once for every work-item described by `geometry`.
    ///
    /// `key` identifies the task in error messages and logs.
    fn launch(
        &self,
        key: &str,
        geometry: &LaunchGeometry,
        kernel: &BoundKernel<'_>,
    ) -> Result<LaunchStats, Error>;
}

pub(crate) struct SerialExecutor;

impl Executor for SerialExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Serial
    }

    fn launch(
        &self,
        key: &str,
        geometry: &LaunchGeometry,
        kernel: &BoundKernel<'_>,
    ) -> Result<LaunchStats, Error> {
        for group_id in geometry.groups() {
            run_group(key, geometry, group_id, kernel)?;
        }
        Ok(LaunchStats::of(geometry))
    }
}

pub(crate) struct ParallelExecutor {
    // when None, we use rayon's global pool
    pool: Option<rayon::ThreadPool>,
}

impl ParallelExecutor {
    pub(crate) fn new(max_concurrent_groups: Option<usize>) -> Result<Self, Error> {
        let pool = match max_concurrent_groups {
            None => None,
            Some(0) => return Err(Error::config("max_concurrent_groups must be positive")),
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("kernelgrid-group-{i}"))
                    .build()
                    .map_err(|e| Error::config(format!("failed to build the group pool: {e}")))?,
            ),
        };
        Ok(ParallelExecutor { pool })
    }
}

impl Executor for ParallelExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Parallel
    }

    fn launch(
        &self,
        key: &str,
        geometry: &LaunchGeometry,
        kernel: &BoundKernel<'_>,
    ) -> Result<LaunchStats, Error> {
        let groups: Vec<[usize; 3]> = geometry.groups().collect();
        let dispatch = || {
            groups
                .into_par_iter()
                .try_for_each(|group_id| run_group(key, geometry, group_id, kernel))
        };
        match &self.pool {
            Some(pool) => pool.install(dispatch)?,
            None => dispatch()?,
        }
        Ok(LaunchStats::of(geometry))
    }
}

/// Run every member of a single work-group to completion.
fn run_group(
    key: &str,
    geometry: &LaunchGeometry,
    group_id: [usize; 3],
    kernel: &BoundKernel<'_>,
) -> Result<(), Error> {
    tracing::trace!(key, ?group_id, "dispatching work-group");
    let n_members = geometry.group_size();
    let shared = GroupShared::new(group_id, n_members);
    let ids_of =
        |local_id| ThreadIds::new(group_id, local_id, geometry.local(), geometry.global());

    let fault = if n_members == 1 {
        run_member(&shared, ids_of([0, 0, 0]), kernel).err()
    } else {
        std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(n_members);
            let mut fault = None;
            for local_id in geometry.members() {
                let shared = &shared;
                let ids = ids_of(local_id);
                let spawned = std::thread::Builder::new()
                    .name(format!("{key}{local_id:?}"))
                    .spawn_scoped(s, move || run_member(shared, ids, kernel));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        // release the members that are already running
                        shared.barrier().abort();
                        fault = Some(KernelFault::ThreadSpawn(e.to_string()));
                        break;
                    }
                }
            }
            for handle in handles {
                let result = handle
                    .join()
                    .unwrap_or_else(|payload| Err(KernelFault::from_payload(payload)));
                if let Err(member_fault) = result {
                    fault = Some(root_cause(fault, member_fault));
                }
            }
            fault
        })
    };

    match fault {
        None => Ok(()),
        Some(fault) => Err(fault.into_error(key)),
    }
}

/// When a group aborts, most members just report that they were released.
/// We keep the fault of the member that actually caused the abort.
fn root_cause(current: Option<KernelFault>, candidate: KernelFault) -> KernelFault {
    match current {
        Some(KernelFault::GroupAborted) | None => candidate,
        Some(fault) => fault,
    }
}

fn run_member(
    shared: &GroupShared,
    ids: ThreadIds,
    kernel: &BoundKernel<'_>,
) -> Result<(), KernelFault> {
    let ctx = EmulatedContext::new(ids, shared);
    match catch_unwind(AssertUnwindSafe(|| kernel(&ctx))) {
        Ok(()) => shared.barrier().finish(),
        Err(payload) => {
            shared.barrier().abort();
            Err(KernelFault::from_payload(payload))
        }
    }
}
