use half::f16;
use kernelgrid::{
    BarrierPlacement, DeviceReduction, Element, ExecutorKind, ReduceOp, ReductionStrategy,
    RuntimeConfig, TypedBuffer, sequential_fold, serial_partial_reduce,
};

mod common;

const STRATEGIES: [ReductionStrategy; 3] = [
    ReductionStrategy::LocalMemory(BarrierPlacement::BeforeCombine),
    ReductionStrategy::LocalMemory(BarrierPlacement::AfterCombine),
    ReductionStrategy::GlobalMemory,
];

const EXECUTORS: [ExecutorKind; 2] = [ExecutorKind::Serial, ExecutorKind::Parallel];

fn reduction(op: ReduceOp, local_size: usize, strategy: ReductionStrategy, executor: ExecutorKind) -> DeviceReduction {
    let config = RuntimeConfig {
        executor,
        ..RuntimeConfig::default()
    };
    DeviceReduction::new(op, local_size)
        .strategy(strategy)
        .config(config)
}

/// compares the partial results of every kernel variant against the serial
/// implementation (which combines values in the same order, so even floats
/// must match exactly)
fn check_against_serial<T: Element>(values: &[T], local_size: usize) {
    let input = TypedBuffer::from_slice(values);
    let n_groups = values.len() / local_size;
    for op in ReduceOp::ALL {
        let mut scratch = values.to_vec();
        let mut expected = vec![op.identity::<T>(); n_groups];
        serial_partial_reduce(op, &mut scratch, local_size, &mut expected).unwrap();

        for strategy in STRATEGIES {
            for executor in EXECUTORS {
                let partials = reduction(op, local_size, strategy, executor)
                    .partials(&input)
                    .unwrap();
                assert_eq!(
                    partials, expected,
                    "op: {op}, strategy: {strategy:?}, executor: {executor:?}"
                );
            }
        }
    }
    // the kernels must never modify the host input
    assert_eq!(input.to_vec(), values);
}

#[test]
fn concrete_partials() {
    common::init_tracing();
    let input = TypedBuffer::<i32>::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let expected = [
        (ReduceOp::Add, vec![10, 26], 36),
        (ReduceOp::Min, vec![1, 5], 1),
        (ReduceOp::Max, vec![4, 8], 8),
    ];
    for (op, ref_partials, ref_total) in expected {
        for strategy in STRATEGIES {
            for executor in EXECUTORS {
                let reduction = reduction(op, 4, strategy, executor);
                assert_eq!(reduction.partials(&input).unwrap(), ref_partials);
                assert_eq!(reduction.reduce(&input).unwrap(), ref_total);
            }
        }
    }
}

#[test]
fn local_size_of_one_copies_the_input() {
    let values = [3_i64, -7, 12, 0, 5];
    let input = TypedBuffer::from_slice(&values);
    for op in ReduceOp::ALL {
        for strategy in STRATEGIES {
            let partials = reduction(op, 1, strategy, ExecutorKind::Serial)
                .partials(&input)
                .unwrap();
            assert_eq!(partials, values);
        }
    }
}

#[test]
fn integer_kinds() {
    let raw = common::random_ints(7, 64, -100, 100);
    let as_i8: Vec<i8> = raw.iter().map(|&v| v as i8).collect();
    let as_i16: Vec<i16> = raw.iter().map(|&v| (v * 300) as i16).collect();
    let as_i32: Vec<i32> = raw.iter().map(|&v| v as i32).collect();
    let as_i64: Vec<i64> = raw.iter().map(|&v| v * 1_000_000_007).collect();

    check_against_serial(&as_i8, 16);
    check_against_serial(&as_i16, 8);
    check_against_serial(&as_i32, 32);
    check_against_serial(&as_i64, 4);

    // integer addition wraps, so the 2-phase result always matches a
    // sequential fold exactly (even once the sum overflows)
    let input = TypedBuffer::from_slice(&as_i8);
    let total = reduction(ReduceOp::Add, 16, ReductionStrategy::default(), ExecutorKind::Serial)
        .reduce(&input)
        .unwrap();
    assert_eq!(total, sequential_fold(ReduceOp::Add, &as_i8));
}

#[test]
fn float_kinds() {
    // small integers are exactly representable in every float kind
    let raw = common::random_ints(11, 64, -8, 8);
    let as_f16: Vec<f16> = raw.iter().map(|&v| f16::from_f64(v as f64)).collect();
    let as_f32: Vec<f32> = raw.iter().map(|&v| v as f32).collect();
    check_against_serial(&as_f16, 8);
    check_against_serial(&as_f32, 16);

    let as_f64 = common::random_floats(13, 128);
    check_against_serial(&as_f64, 32);
}

#[test]
fn two_phase_sum_matches_sequential_fold() {
    let values = common::random_floats(17, 256);
    let input = TypedBuffer::from_slice(&values);
    let reference = sequential_fold(ReduceOp::Add, &values);
    for strategy in STRATEGIES {
        for executor in EXECUTORS {
            let total = reduction(ReduceOp::Add, 64, strategy, executor)
                .reduce(&input)
                .unwrap();
            assert!(
                common::isclose(total, reference, 1e-12, 1e-10),
                "{total} vs {reference}"
            );
        }
    }
    // min and max don't depend on the order at all
    for op in [ReduceOp::Min, ReduceOp::Max] {
        let total = reduction(op, 64, ReductionStrategy::default(), ExecutorKind::Parallel)
            .reduce(&input)
            .unwrap();
        assert_eq!(total, sequential_fold(op, &values));
    }
}

#[test]
fn rejected_local_sizes() {
    let input = TypedBuffer::<f32>::new(24);
    for local_size in [0, 5, 6, 48] {
        let err = reduction(ReduceOp::Add, local_size, ReductionStrategy::default(), ExecutorKind::Serial)
            .partials(&input)
            .unwrap_err();
        assert!(err.is_configuration(), "local size {local_size}: {err}");
    }
}

#[test]
fn local_size_above_configured_maximum() {
    let input = TypedBuffer::<i32>::new(64);
    let config = RuntimeConfig {
        max_work_group_size: 16,
        ..RuntimeConfig::default()
    };
    let err = DeviceReduction::new(ReduceOp::Add, 32)
        .config(config)
        .partials(&input)
        .unwrap_err();
    assert!(err.is_configuration());
}
