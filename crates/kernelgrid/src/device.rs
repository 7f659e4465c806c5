//! Emulated device memory
//!
//! Device memory is made of per-element atomic cells (see
//! [`Element::Cell`]), so that the threads emulating the work-items of a
//! launch can all read and write the same array through shared references.
//! Each access uses relaxed ordering. Ordering between work-items comes
//! from the group barrier, which (like the barrier of a real device) is the
//! only synchronization point a kernel gets.

use crate::buffer::BufferId;
use kernelgrid_nostd_internal::{ArrayAccess, Element, ElementKind};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies the memory that a [`DeviceArray`] refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// the device copy of a host buffer
    Global(BufferId),
    /// the `slot`-th local array of the group `group`
    Local { group: [usize; 3], slot: usize },
}

impl core::fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            MemoryRegion::Global(id) => write!(f, "buffer {id}"),
            MemoryRegion::Local { group, slot } => {
                write!(f, "local array {slot} of group {group:?}")
            }
        }
    }
}

/// The ways a single work-item can fail.
///
/// Inside of a kernel, a fault unwinds the work-item's thread (it is raised
/// with [`std::panic::resume_unwind`], which skips the panic hook). The
/// executor catches it and turns it into an [`Error`](crate::Error).
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum KernelFault {
    OutOfRange {
        region: MemoryRegion,
        index: usize,
        len: usize,
    },
    DivergentBarrier(String),
    /// another member of the group faulted; this member was released from
    /// the barrier without doing anything wrong itself
    GroupAborted,
    LocalMismatch {
        slot: usize,
        detail: String,
    },
    Panic(String),
    ThreadSpawn(String),
}

impl KernelFault {
    /// Recover the fault from the payload of a caught unwind
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<KernelFault>() {
            Ok(fault) => *fault,
            Err(payload) => {
                if let Some(msg) = payload.downcast_ref::<&'static str>() {
                    KernelFault::Panic((*msg).to_owned())
                } else if let Some(msg) = payload.downcast_ref::<String>() {
                    KernelFault::Panic(msg.clone())
                } else {
                    KernelFault::Panic("<non-string panic payload>".to_owned())
                }
            }
        }
    }

    pub(crate) fn raise(self) -> ! {
        std::panic::resume_unwind(Box::new(self))
    }

    pub(crate) fn into_error(self, key: &str) -> crate::Error {
        use crate::Error;
        match self {
            KernelFault::OutOfRange { region, index, len } => {
                Error::index_range(key, region, index, len)
            }
            KernelFault::DivergentBarrier(detail) => Error::divergent_barrier(key, detail),
            KernelFault::GroupAborted => {
                Error::divergent_barrier(key, "the group was aborted without a recorded cause")
            }
            KernelFault::LocalMismatch { slot, detail } => Error::local_mismatch(key, slot, detail),
            KernelFault::Panic(message) => Error::kernel_panic(key, message),
            KernelFault::ThreadSpawn(message) => Error::thread_spawn(key, message),
        }
    }
}

/// An array in emulated device memory.
///
/// This is a cheap handle: clones refer to the same cells. Kernels receive
/// task arguments as `&DeviceArray<T>` and access them through
/// [`ArrayAccess`]. Local arrays handed out by
/// [`KernelContext::allocate_local`](kernelgrid_nostd_internal::KernelContext::allocate_local)
/// are `DeviceArray`s too.
pub struct DeviceArray<T: Element> {
    cells: Arc<[T::Cell]>,
    region: MemoryRegion,
}

impl<T: Element> Clone for DeviceArray<T> {
    fn clone(&self) -> Self {
        DeviceArray {
            cells: Arc::clone(&self.cells),
            region: self.region,
        }
    }
}

impl<T: Element> core::fmt::Debug for DeviceArray<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("DeviceArray")
            .field("region", &self.region)
            .field("kind", &T::KIND)
            .field("len", &self.cells.len())
            .finish()
    }
}

impl<T: Element> DeviceArray<T> {
    pub(crate) fn from_values(id: BufferId, values: impl Iterator<Item = T>) -> Self {
        DeviceArray {
            cells: values.map(T::new_cell).collect(),
            region: MemoryRegion::Global(id),
        }
    }

    pub(crate) fn zeroed_global(id: BufferId, len: usize) -> Self {
        Self::zeroed(MemoryRegion::Global(id), len)
    }

    pub(crate) fn zeroed_local(group: [usize; 3], slot: usize, len: usize) -> Self {
        Self::zeroed(MemoryRegion::Local { group, slot }, len)
    }

    fn zeroed(region: MemoryRegion, len: usize) -> Self {
        DeviceArray {
            cells: (0..len).map(|_| T::new_cell(T::ZERO)).collect(),
            region,
        }
    }

    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.cells.iter().map(T::load).collect()
    }

    #[cfg(test)]
    pub(crate) fn write_values(&self, values: &[T]) {
        for (cell, value) in self.cells.iter().zip(values) {
            T::store(cell, *value);
        }
    }

    #[inline]
    fn cell(&self, index: usize) -> &T::Cell {
        match self.cells.get(index) {
            Some(cell) => cell,
            None => KernelFault::OutOfRange {
                region: self.region,
                index,
                len: self.cells.len(),
            }
            .raise(),
        }
    }
}

impl<T: Element> ArrayAccess<T> for DeviceArray<T> {
    #[inline]
    fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn get(&self, index: usize) -> T {
        T::load(self.cell(index))
    }

    #[inline]
    fn set(&self, index: usize, value: T) {
        T::store(self.cell(index), value)
    }

    #[inline]
    fn atomic_add(&self, index: usize, value: T) -> T {
        T::fetch_add(self.cell(index), value)
    }
}

/// A type-erased [`DeviceArray`]
#[doc(hidden)]
pub struct DeviceSlot {
    kind: ElementKind,
    len: usize,
    array: Box<dyn Any + Send + Sync>,
}

impl DeviceSlot {
    pub(crate) fn new<T: Element>(array: DeviceArray<T>) -> Self {
        DeviceSlot {
            kind: T::KIND,
            len: array.len(),
            array: Box::new(array),
        }
    }

    pub(crate) fn kind(&self) -> ElementKind {
        self.kind
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn byte_size(&self) -> usize {
        self.len * self.kind.size_in_bytes()
    }

    pub(crate) fn typed<T: Element>(&self) -> Option<&DeviceArray<T>> {
        self.array.downcast_ref::<DeviceArray<T>>()
    }
}

/// Tracks the device copies of every buffer that a plan has moved or
/// allocated.
#[derive(Default)]
pub(crate) struct DeviceMemory {
    slots: HashMap<BufferId, DeviceSlot>,
}

impl DeviceMemory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `slot` as the device copy of `id`, replacing any previous copy
    pub(crate) fn insert(&mut self, id: BufferId, slot: DeviceSlot) {
        self.slots.insert(id, slot);
    }

    pub(crate) fn get(&self, id: BufferId) -> Option<&DeviceSlot> {
        self.slots.get(&id)
    }

    pub(crate) fn contains(&self, id: BufferId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn total_bytes(&self) -> usize {
        self.slots.values().map(DeviceSlot::byte_size).sum()
    }
}
