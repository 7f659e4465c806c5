// the reason this is named mod.rs has to do with how cargo treats files in
// the tests directory: every top-level file is compiled as its own crate,
// while a submodule is just shared code.
//
// not every test crate uses every helper
#![allow(dead_code)]

use rand::distr::{Distribution, Uniform};
use rand_xoshiro::Xoshiro256PlusPlus;
use rand_xoshiro::rand_core::SeedableRng;

// based on numpy!
// https://numpy.org/doc/stable/reference/generated/numpy.isclose.html
pub fn isclose(actual: f64, ref_val: f64, rtol: f64, atol: f64) -> bool {
    let actual_nan = actual.is_nan();
    let ref_nan = ref_val.is_nan();
    if actual_nan || ref_nan {
        actual_nan && ref_nan
    } else {
        (actual - ref_val).abs() <= (atol + rtol * ref_val.abs())
    }
}

/// Route tracing output through the test harness. Set `RUST_LOG` (e.g.
/// `RUST_LOG=kernelgrid=debug`) to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// integer-valued samples in `[low, high)`. We use integers (even for float
/// buffers) so that the results of a sum don't depend on the order of the
/// operations.
pub fn random_ints(seed: u64, len: usize, low: i64, high: i64) -> Vec<i64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let dist = Uniform::try_from(low..high).unwrap();
    (0..len).map(|_| dist.sample(&mut rng)).collect()
}

pub fn random_floats(seed: u64, len: usize) -> Vec<f64> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let dist = Uniform::try_from(-100.0..100.0).unwrap();
    (0..len).map(|_| dist.sample(&mut rng)).collect()
}
