// this defines some basic utilities used in reductions.
//
// `sequential_fold` is both the host-side final pass (it folds the
// per-group partial results) and the obvious reference implementation that
// everything else gets compared against.

use crate::element::Element;
use crate::reduce_op::ReduceOp;

/// Fold `values` from left to right, starting from the identity of `op`
///
/// An empty slice produces the identity.
pub fn sequential_fold<T: Element>(op: ReduceOp, values: &[T]) -> T {
    values
        .iter()
        .fold(op.identity::<T>(), |acc, &value| op.apply(acc, value))
}

/// Computes the per-group partial results on a single thread, visiting the
/// values in exactly the same order as the device kernels.
///
/// This means that the result is bitwise identical to that of the kernels in
/// [`crate::reductions`] (even for floating point values), which makes it a
/// handy oracle.
///
/// `values` is used as scratch space and is overwritten.
pub fn serial_partial_reduce<T: Element>(
    op: ReduceOp,
    values: &mut [T],
    group_size: usize,
    partials: &mut [T],
) -> Result<(), &'static str> {
    if group_size == 0 {
        return Err("group_size must be positive");
    } else if !group_size.is_power_of_two() {
        // `1` is considered a power of 2
        return Err("group_size must be a power of 2");
    } else if values.len() % group_size != 0 {
        return Err("values.len() must be a multiple of group_size");
    } else if values.len() / group_size != partials.len() {
        return Err("partials must hold 1 entry per group");
    }

    for (group, partial) in values.chunks_exact_mut(group_size).zip(partials.iter_mut()) {
        let mut stride = group_size / 2;
        while stride > 0 {
            for i in 0..stride {
                group[i] = op.apply(group[i], group[i + stride]);
            }
            stride /= 2;
        }
        *partial = group[0];
    }
    Ok(())
}
