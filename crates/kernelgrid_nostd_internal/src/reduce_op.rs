use crate::element::Element;

/// The associative (and commutative) operators that our reductions support
///
/// Because each operator is associative & commutative, a reduction can be
/// split into per-group partial results (computed in any order) that are
/// folded together afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Add,
    Min,
    Max,
}

impl ReduceOp {
    pub const ALL: [ReduceOp; 3] = [ReduceOp::Add, ReduceOp::Min, ReduceOp::Max];

    #[inline(always)]
    pub fn apply<T: Element>(self, a: T, b: T) -> T {
        match self {
            ReduceOp::Add => a.add(b),
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }

    /// the value that leaves every other value unchanged under this operator
    pub fn identity<T: Element>(self) -> T {
        match self {
            ReduceOp::Add => T::ZERO,
            ReduceOp::Min => T::HIGHEST,
            ReduceOp::Max => T::LOWEST,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Add => "add",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        }
    }
}

impl core::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities() {
        for op in ReduceOp::ALL {
            assert_eq!(op.apply(op.identity::<i32>(), -17), -17);
            assert_eq!(op.apply(op.identity::<f64>(), 2.5), 2.5);
        }
    }

    #[test]
    fn apply_matches_operator() {
        assert_eq!(ReduceOp::Add.apply(3_i64, 4), 7);
        assert_eq!(ReduceOp::Min.apply(3_i16, -4), -4);
        assert_eq!(ReduceOp::Max.apply(3.0_f32, -4.0), 3.0);
    }
}
