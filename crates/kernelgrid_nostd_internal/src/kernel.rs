//! The interface that kernels are written against
//!
//! A kernel is an ordinary function that is invoked once per work-item. It
//! receives a type implementing [`KernelContext`] (which provides the identity
//! of the work-item, group-scoped local memory and the group barrier) plus the
//! buffers that were bound to the task.
//!
//! We keep these traits in this crate so that the kernels themselves stay
//! `no_std`. A device backend would provide its own implementations.

use crate::element::Element;
use crate::ids::ThreadIds;

/// Indexed access to memory that may be shared between work-items.
///
/// Every access must lie in `[0, len)`. Out-of-range accesses are fatal:
/// implementations must never clamp the index or ignore the write.
///
/// Every method takes `&self`. Shared memory is written concurrently by the
/// members of a group, so implementations rely on interior mutability.
pub trait ArrayAccess<T: Element> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> T;

    fn set(&self, index: usize, value: T);

    /// Add `value` to element `index` as a single indivisible operation and
    /// return the element's previous value.
    ///
    /// Unlike a `get` followed by a `set`, concurrent calls from different
    /// work-items (in any group) never lose an update.
    fn atomic_add(&self, index: usize, value: T) -> T;
}

/// Describes what a kernel can ask of the runtime.
///
/// # Barrier discipline
/// Every member of a work-group must call [`KernelContext::local_barrier`]
/// the same number of times. A barrier inside a branch that only some
/// members take is a bug in the kernel (on a device it deadlocks). Backends
/// are expected to detect it when they can.
///
/// # Local memory
/// The n-th call to [`KernelContext::allocate_local`] made by each member of
/// a group refers to the same group-shared array. Each member must therefore
/// request the same element kind and length, in the same order. Before the
/// first barrier, a member may only rely on the slots that it wrote itself.
pub trait KernelContext {
    type LocalArray<T: Element>: ArrayAccess<T>;

    fn ids(&self) -> &ThreadIds;

    /// Obtain a local array with room for `len` elements, shared by all
    /// members of the current group
    fn allocate_local<T: Element>(&self, len: usize) -> Self::LocalArray<T>;

    /// Block until every member of the current group reaches this barrier.
    ///
    /// This has no effect on members of other groups.
    fn local_barrier(&self);

    /// Atomically add `value` to `array[index]`, returning the previous value
    #[inline(always)]
    fn atomic_add<T: Element, A: ArrayAccess<T>>(&self, array: &A, index: usize, value: T) -> T {
        array.atomic_add(index, value)
    }

    #[inline(always)]
    fn global_idx(&self) -> usize {
        self.ids().global_id()[0]
    }

    #[inline(always)]
    fn global_idy(&self) -> usize {
        self.ids().global_id()[1]
    }

    #[inline(always)]
    fn global_idz(&self) -> usize {
        self.ids().global_id()[2]
    }

    #[inline(always)]
    fn local_idx(&self) -> usize {
        self.ids().local_id()[0]
    }

    #[inline(always)]
    fn local_idy(&self) -> usize {
        self.ids().local_id()[1]
    }

    #[inline(always)]
    fn local_idz(&self) -> usize {
        self.ids().local_id()[2]
    }

    #[inline(always)]
    fn group_idx(&self) -> usize {
        self.ids().group_id()[0]
    }

    #[inline(always)]
    fn group_idy(&self) -> usize {
        self.ids().group_id()[1]
    }

    #[inline(always)]
    fn group_idz(&self) -> usize {
        self.ids().group_id()[2]
    }

    #[inline(always)]
    fn local_group_size_x(&self) -> usize {
        self.ids().local_group_size()[0]
    }

    #[inline(always)]
    fn local_group_size_y(&self) -> usize {
        self.ids().local_group_size()[1]
    }

    #[inline(always)]
    fn local_group_size_z(&self) -> usize {
        self.ids().local_group_size()[2]
    }

    #[inline(always)]
    fn global_group_size_x(&self) -> usize {
        self.ids().global_group_size()[0]
    }

    #[inline(always)]
    fn global_group_size_y(&self) -> usize {
        self.ids().global_group_size()[1]
    }

    #[inline(always)]
    fn global_group_size_z(&self) -> usize {
        self.ids().global_group_size()[2]
    }
}
