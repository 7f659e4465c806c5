use kernelgrid::{
    BarrierPlacement, DeviceReduction, ReduceOp, ReductionStrategy, TypedBuffer, WorkerGrid,
    sequential_fold,
};
use proptest::prelude::*;

fn op_strategy() -> impl Strategy<Value = ReduceOp> {
    prop_oneof![Just(ReduceOp::Add), Just(ReduceOp::Min), Just(ReduceOp::Max)]
}

fn reduction_strategy() -> impl Strategy<Value = ReductionStrategy> {
    prop_oneof![
        Just(ReductionStrategy::LocalMemory(BarrierPlacement::BeforeCombine)),
        Just(ReductionStrategy::LocalMemory(BarrierPlacement::AfterCombine)),
        Just(ReductionStrategy::GlobalMemory),
    ]
}

/// (local size, values) where the number of values is a multiple of the
/// local size
fn partitioned_values() -> impl Strategy<Value = (usize, Vec<i32>)> {
    (0_u32..4, 1_usize..5).prop_flat_map(|(log2_local, n_groups)| {
        let local = 1_usize << log2_local;
        (
            Just(local),
            prop::collection::vec(any::<i32>(), local * n_groups),
        )
    })
}

proptest! {
    // every case spawns a thread per work-item, so keep the count modest
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn two_phase_matches_sequential_fold(
        (local_size, values) in partitioned_values(),
        op in op_strategy(),
        strategy in reduction_strategy(),
    ) {
        let input = TypedBuffer::from_slice(&values);
        let reduction = DeviceReduction::new(op, local_size).strategy(strategy);
        let partials = reduction.partials(&input).unwrap();
        prop_assert_eq!(partials.len(), values.len() / local_size);
        prop_assert_eq!(sequential_fold(op, &partials), sequential_fold(op, &values));
    }

    #[test]
    fn chosen_local_size_divides_global(global in 1_usize..5000, budget in 1_usize..1025) {
        let grid = WorkerGrid::new_1d(global).with_local_size_chosen(budget);
        let local = grid.local_work().unwrap()[0];
        prop_assert!(local.is_power_of_two());
        prop_assert!(local <= budget);
        prop_assert_eq!(global % local, 0);
        prop_assert!(grid.validate_with_limit(budget).is_ok());
    }
}
