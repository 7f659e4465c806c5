//! Group-level reduction kernels
//!
//! Each kernel here collapses the slice of `input` owned by a work-group into
//! a single value that gets written to `output[group_idx]`. Folding the
//! per-group partial results together is left to the host (see
//! [`crate::sequential_fold`]).
//!
//! All of these kernels use a strided halving loop:
//! - during the first step, the members in the lower half of the group
//!   combine their value with the value held by the member `stride` slots
//!   above them (`stride = n/2`)
//! - each subsequent step halves the stride, until a single value remains
//!
//! Consequently, the group size must be a power of two. These kernels don't
//! check this themselves (a kernel has no way to report an error); tasks that
//! launch them declare the requirement so that the launch is rejected
//! up-front. In a group whose size is not a power of two some values would
//! simply never be combined.
//!
//! # Barrier placement
//! Within a stride step, a member reads a slot that a different member may
//! have written during the previous step. A barrier must separate those 2
//! accesses. We support 2 placements of the barrier (see
//! [`BarrierPlacement`]). They are equally valid, but they are NOT
//! interchangeable partway through a loop: mixing them lets a member read a
//! slot before its neighbor finished writing it.

use crate::element::Element;
use crate::kernel::{ArrayAccess, KernelContext};
use crate::reduce_op::ReduceOp;

/// Where the barrier sits relative to the combine step of the halving loop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BarrierPlacement {
    /// synchronize at the top of every stride step, right before reading
    BeforeCombine,
    /// synchronize once after filling scratch memory and then again after
    /// every combine step
    AfterCombine,
}

/// The family of reduction kernels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReductionStrategy {
    /// copy each group's slice into local scratch memory and reduce there
    LocalMemory(BarrierPlacement),
    /// reduce in place within the input buffer (the input is overwritten)
    GlobalMemory,
}

impl Default for ReductionStrategy {
    fn default() -> Self {
        ReductionStrategy::LocalMemory(BarrierPlacement::BeforeCombine)
    }
}

/// Reduce each group's slice of `input` within local scratch memory.
///
/// `scratch_len` is the length of the local array; it must be at least the
/// group size (otherwise a member writes outside of the scratch array, which
/// is a fatal error).
pub fn reduce_local_memory<C, T, I, O>(
    ctx: &C,
    op: ReduceOp,
    placement: BarrierPlacement,
    scratch_len: usize,
    input: &I,
    output: &O,
) where
    C: KernelContext,
    T: Element,
    I: ArrayAccess<T>,
    O: ArrayAccess<T>,
{
    let global_idx = ctx.global_idx();
    let local_idx = ctx.local_idx();
    let group_size = ctx.local_group_size_x();
    let group_idx = ctx.group_idx();

    let scratch = ctx.allocate_local::<T>(scratch_len);
    scratch.set(local_idx, input.get(global_idx));

    match placement {
        BarrierPlacement::BeforeCombine => {
            let mut stride = group_size / 2;
            while stride > 0 {
                ctx.local_barrier();
                if local_idx < stride {
                    let combined = op.apply(scratch.get(local_idx), scratch.get(local_idx + stride));
                    scratch.set(local_idx, combined);
                }
                stride /= 2;
            }
        }
        BarrierPlacement::AfterCombine => {
            ctx.local_barrier();
            let mut stride = group_size / 2;
            while stride > 0 {
                if local_idx < stride {
                    let combined = op.apply(scratch.get(local_idx), scratch.get(local_idx + stride));
                    scratch.set(local_idx, combined);
                }
                ctx.local_barrier();
                stride /= 2;
            }
        }
    }

    // with BeforeCombine there's no trailing barrier. That's fine: slot 0 was
    // last written by member 0 itself
    if local_idx == 0 {
        output.set(group_idx, scratch.get(0));
    }
}

/// Reduce each group's slice of `input` in place.
///
/// This is only usable when the caller doesn't need `input` afterwards and
/// the slice owned by group `k` is `input[n*k..n*(k+1)]`.
pub fn reduce_global_memory<C, T, I, O>(ctx: &C, op: ReduceOp, input: &I, output: &O)
where
    C: KernelContext,
    T: Element,
    I: ArrayAccess<T>,
    O: ArrayAccess<T>,
{
    let local_idx = ctx.local_idx();
    let group_size = ctx.local_group_size_x();
    let group_idx = ctx.group_idx();
    let id = group_size * group_idx + local_idx;

    let mut stride = group_size / 2;
    while stride > 0 {
        ctx.local_barrier();
        if local_idx < stride {
            input.set(id, op.apply(input.get(id), input.get(id + stride)));
        }
        stride /= 2;
    }

    if local_idx == 0 {
        output.set(group_idx, input.get(id));
    }
}

/// Dispatch to the kernel described by `strategy`
///
/// For [`ReductionStrategy::LocalMemory`], the scratch array is sized to the
/// group size.
pub fn reduce_group<C, T, I, O>(
    ctx: &C,
    op: ReduceOp,
    strategy: ReductionStrategy,
    input: &I,
    output: &O,
) where
    C: KernelContext,
    T: Element,
    I: ArrayAccess<T>,
    O: ArrayAccess<T>,
{
    match strategy {
        ReductionStrategy::LocalMemory(placement) => {
            let scratch_len = ctx.local_group_size_x();
            reduce_local_memory(ctx, op, placement, scratch_len, input, output)
        }
        ReductionStrategy::GlobalMemory => reduce_global_memory(ctx, op, input, output),
    }
}
