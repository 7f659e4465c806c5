//! The [`KernelContext`] implementation used by the CPU emulator

use crate::barrier::GroupBarrier;
use crate::device::{DeviceArray, DeviceSlot, KernelFault};
use kernelgrid_nostd_internal::{Element, KernelContext, ThreadIds};
use std::cell::Cell;
use std::sync::Mutex;

/// State shared by every member of one work-group during a launch
pub(crate) struct GroupShared {
    group_id: [usize; 3],
    barrier: GroupBarrier,
    // the k-th entry is the k-th local array requested by the members
    locals: Mutex<Vec<DeviceSlot>>,
}

impl GroupShared {
    pub(crate) fn new(group_id: [usize; 3], n_members: usize) -> Self {
        GroupShared {
            group_id,
            barrier: GroupBarrier::new(n_members),
            locals: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn barrier(&self) -> &GroupBarrier {
        &self.barrier
    }

    fn local_array<T: Element>(&self, slot: usize, len: usize) -> Result<DeviceArray<T>, KernelFault> {
        let mut locals = self.locals.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = locals.get(slot) {
            if existing.len() != len || existing.kind() != T::KIND {
                return Err(KernelFault::LocalMismatch {
                    slot,
                    detail: format!(
                        "requested {len} {} elements, but another member requested {} {} elements",
                        T::KIND,
                        existing.len(),
                        existing.kind()
                    ),
                });
            }
            // kind matches, so the downcast can't fail
            existing.typed::<T>().cloned().ok_or_else(|| KernelFault::LocalMismatch {
                slot,
                detail: "element kind mismatch".to_owned(),
            })
        } else {
            // each member requests slots in increasing order, so slot can only
            // ever be the next unused index
            debug_assert_eq!(slot, locals.len());
            let array = DeviceArray::<T>::zeroed_local(self.group_id, slot, len);
            locals.push(DeviceSlot::new(array.clone()));
            Ok(array)
        }
    }
}

/// What a kernel sees when the CPU emulator runs it.
///
/// One context exists per work-item; it is never shared between threads.
pub struct EmulatedContext<'g> {
    ids: ThreadIds,
    shared: &'g GroupShared,
    barriers_reached: Cell<usize>,
    locals_requested: Cell<usize>,
}

impl<'g> EmulatedContext<'g> {
    pub(crate) fn new(ids: ThreadIds, shared: &'g GroupShared) -> Self {
        EmulatedContext {
            ids,
            shared,
            barriers_reached: Cell::new(0),
            locals_requested: Cell::new(0),
        }
    }
}

impl<'g> KernelContext for EmulatedContext<'g> {
    type LocalArray<T: Element> = DeviceArray<T>;

    fn ids(&self) -> &ThreadIds {
        &self.ids
    }

    fn allocate_local<T: Element>(&self, len: usize) -> DeviceArray<T> {
        let slot = self.locals_requested.get();
        self.locals_requested.set(slot + 1);
        match self.shared.local_array::<T>(slot, len) {
            Ok(array) => array,
            Err(fault) => fault.raise(),
        }
    }

    fn local_barrier(&self) {
        let count = self.barriers_reached.get() + 1;
        self.barriers_reached.set(count);
        if let Err(fault) = self.shared.barrier.wait(count) {
            fault.raise()
        }
    }
}
