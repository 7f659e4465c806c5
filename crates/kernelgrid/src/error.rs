// We follow the approach of wrapping a private ErrorKind inside of a public
// Error struct. This lets us add/restructure kinds without breaking anyone,
// while the predicates (`is_configuration`, ...) give callers a stable way
// to tell the broad categories apart.
//
// The categories map onto how a caller should react:
// - configuration: the plan could not run at all. Nothing was launched and
//   no host buffer was touched. Fix the setup (grid, scheduler, buffers).
// - index range: a kernel touched memory outside of a buffer or a local
//   array. This is fatal: the device state is unreliable afterwards, so the
//   plan is poisoned.
// - lifecycle: the plan or graph was used in a state that doesn't allow it
//   (closed plan, snapshotted graph, poisoned plan).
// - kernel fault: a kernel misbehaved in some other way (divergent barrier,
//   panic, inconsistent local allocations). This also poisons the plan.
//
// None of these are retried automatically.

use crate::buffer::BufferId;
use crate::device::MemoryRegion;
use kernelgrid_nostd_internal::GridError;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

/// The broad category that an [`Error`] falls into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    IndexRange,
    Lifecycle,
    KernelFault,
}

/// The underlying internal error type
#[derive(Clone, Debug, thiserror::Error)]
enum ErrorKind {
    #[error("invalid worker grid for \"{key}\": {source}")]
    Grid {
        key: String,
        #[source]
        source: GridError,
    },
    #[error(
        "task \"{key}\" requires an explicit worker grid, but the grid scheduler has no entry \
         for it"
    )]
    MissingGrid { key: String },
    #[error("task \"{key}\" has no grid scheduler entry and no arguments to infer a grid from")]
    NoDefaultGrid { key: String },
    #[error(
        "graph \"{graph}\" transfers buffer {buffer} to the host, but it was never transferred \
         to the device or used by a task"
    )]
    NeverTransferred { graph: String, buffer: BufferId },
    #[error("task \"{key}\" expects argument {arg} to hold {expected} elements (it holds {actual})")]
    PartitionMismatch {
        key: String,
        arg: usize,
        expected: usize,
        actual: usize,
    },
    #[error("task \"{key}\" requires a power-of-two work-group size (got {local:?})")]
    NonPowerOfTwoGroup { key: String, local: [usize; 3] },
    #[error("task \"{key}\" requires a 1D worker grid (got {dims} dimensions)")]
    NotOneDimensional { key: String, dims: usize },
    #[error("graph \"{graph}\" already holds a task named \"{task}\"")]
    DuplicateTask { graph: String, task: String },
    #[error("graph \"{graph}\" has no task to attach a requirement to")]
    RequirementWithoutTask { graph: String },
    #[error("the execution plan holds no steps")]
    EmptyPlan,
    #[error("invalid runtime configuration: {0}")]
    Config(String),
    #[error("task \"{key}\" accessed index {index} of {region}, which only holds {len} elements")]
    IndexRange {
        key: String,
        region: MemoryRegion,
        index: usize,
        len: usize,
    },
    #[error("the execution plan was closed")]
    PlanClosed,
    #[error("task graph \"{graph}\" was snapshotted and can no longer be modified")]
    GraphSnapshotted { graph: String },
    #[error(
        "the execution plan was poisoned by an earlier fault in \"{key}\"; call reset_device() \
         before executing it again"
    )]
    PlanPoisoned { key: String },
    #[error("divergent barrier in task \"{key}\": {detail}")]
    DivergentBarrier { key: String, detail: String },
    #[error("local array {slot} of task \"{key}\" isn't allocated consistently by the group: {detail}")]
    LocalMismatch {
        key: String,
        slot: usize,
        detail: String,
    },
    #[error("a work-item of task \"{key}\" panicked: {message}")]
    KernelPanic { key: String, message: String },
    #[error("failed to launch a work-item of task \"{key}\": {message}")]
    ThreadSpawn { key: String, message: String },
}

// define constructor methods for Error
impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Error { kind }
    }

    pub(crate) fn grid(key: &str, source: GridError) -> Self {
        Self::from_kind(ErrorKind::Grid {
            key: key.to_owned(),
            source,
        })
    }

    pub(crate) fn missing_grid(key: &str) -> Self {
        Self::from_kind(ErrorKind::MissingGrid {
            key: key.to_owned(),
        })
    }

    pub(crate) fn no_default_grid(key: &str) -> Self {
        Self::from_kind(ErrorKind::NoDefaultGrid {
            key: key.to_owned(),
        })
    }

    pub(crate) fn never_transferred(graph: &str, buffer: BufferId) -> Self {
        Self::from_kind(ErrorKind::NeverTransferred {
            graph: graph.to_owned(),
            buffer,
        })
    }

    pub(crate) fn partition_mismatch(key: &str, arg: usize, expected: usize, actual: usize) -> Self {
        Self::from_kind(ErrorKind::PartitionMismatch {
            key: key.to_owned(),
            arg,
            expected,
            actual,
        })
    }

    pub(crate) fn non_power_of_two_group(key: &str, local: [usize; 3]) -> Self {
        Self::from_kind(ErrorKind::NonPowerOfTwoGroup {
            key: key.to_owned(),
            local,
        })
    }

    pub(crate) fn not_one_dimensional(key: &str, dims: usize) -> Self {
        Self::from_kind(ErrorKind::NotOneDimensional {
            key: key.to_owned(),
            dims,
        })
    }

    pub(crate) fn duplicate_task(graph: &str, task: &str) -> Self {
        Self::from_kind(ErrorKind::DuplicateTask {
            graph: graph.to_owned(),
            task: task.to_owned(),
        })
    }

    pub(crate) fn requirement_without_task(graph: &str) -> Self {
        Self::from_kind(ErrorKind::RequirementWithoutTask {
            graph: graph.to_owned(),
        })
    }

    pub(crate) fn empty_plan() -> Self {
        Self::from_kind(ErrorKind::EmptyPlan)
    }

    pub(crate) fn config(what: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Config(what.into()))
    }

    pub(crate) fn index_range(key: &str, region: MemoryRegion, index: usize, len: usize) -> Self {
        Self::from_kind(ErrorKind::IndexRange {
            key: key.to_owned(),
            region,
            index,
            len,
        })
    }

    pub(crate) fn plan_closed() -> Self {
        Self::from_kind(ErrorKind::PlanClosed)
    }

    pub(crate) fn graph_snapshotted(graph: &str) -> Self {
        Self::from_kind(ErrorKind::GraphSnapshotted {
            graph: graph.to_owned(),
        })
    }

    pub(crate) fn plan_poisoned(key: &str) -> Self {
        Self::from_kind(ErrorKind::PlanPoisoned {
            key: key.to_owned(),
        })
    }

    pub(crate) fn divergent_barrier(key: &str, detail: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::DivergentBarrier {
            key: key.to_owned(),
            detail: detail.into(),
        })
    }

    pub(crate) fn local_mismatch(key: &str, slot: usize, detail: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::LocalMismatch {
            key: key.to_owned(),
            slot,
            detail: detail.into(),
        })
    }

    pub(crate) fn kernel_panic(key: &str, message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::KernelPanic {
            key: key.to_owned(),
            message: message.into(),
        })
    }

    pub(crate) fn thread_spawn(key: &str, message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::ThreadSpawn {
            key: key.to_owned(),
            message: message.into(),
        })
    }
}

// define the public queries
impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self.kind {
            ErrorKind::Grid { .. }
            | ErrorKind::MissingGrid { .. }
            | ErrorKind::NoDefaultGrid { .. }
            | ErrorKind::NeverTransferred { .. }
            | ErrorKind::PartitionMismatch { .. }
            | ErrorKind::NonPowerOfTwoGroup { .. }
            | ErrorKind::NotOneDimensional { .. }
            | ErrorKind::DuplicateTask { .. }
            | ErrorKind::RequirementWithoutTask { .. }
            | ErrorKind::EmptyPlan
            | ErrorKind::Config(_) => ErrorCategory::Configuration,
            ErrorKind::IndexRange { .. } => ErrorCategory::IndexRange,
            ErrorKind::PlanClosed
            | ErrorKind::GraphSnapshotted { .. }
            | ErrorKind::PlanPoisoned { .. } => ErrorCategory::Lifecycle,
            ErrorKind::DivergentBarrier { .. }
            | ErrorKind::LocalMismatch { .. }
            | ErrorKind::KernelPanic { .. }
            | ErrorKind::ThreadSpawn { .. } => ErrorCategory::KernelFault,
        }
    }

    /// the plan could not run (nothing was launched)
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// a kernel accessed memory out of range
    pub fn is_index_range(&self) -> bool {
        self.category() == ErrorCategory::IndexRange
    }

    pub fn is_lifecycle(&self) -> bool {
        self.category() == ErrorCategory::Lifecycle
    }

    pub fn is_kernel_fault(&self) -> bool {
        self.category() == ErrorCategory::KernelFault
    }

    /// `true` when the error left the plan poisoned
    pub fn poisons_plan(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::IndexRange | ErrorCategory::KernelFault
        )
    }

    pub fn is_divergent_barrier(&self) -> bool {
        matches!(self.kind, ErrorKind::DivergentBarrier { .. })
    }

    pub fn is_plan_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::PlanClosed)
    }

    pub fn is_plan_poisoned(&self) -> bool {
        matches!(self.kind, ErrorKind::PlanPoisoned { .. })
    }

    pub fn is_graph_snapshotted(&self) -> bool {
        matches!(self.kind, ErrorKind::GraphSnapshotted { .. })
    }

    pub fn is_missing_grid(&self) -> bool {
        matches!(self.kind, ErrorKind::MissingGrid { .. })
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.kind, f)
    }
}
