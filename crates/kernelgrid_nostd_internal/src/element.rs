//! Describes the primitive element kinds that can live in a buffer.
//!
//! The kernels in this crate are written generically over [`Element`]. We
//! deliberately keep the set of implementors closed: a backend (the CPU
//! emulator or a real device) needs to know the storage layout of every kind
//! it might be asked to move around.

use core::fmt::Debug;
use core::sync::atomic::{
    AtomicI8, AtomicI16, AtomicI32, AtomicI64, AtomicU16, AtomicU32, AtomicU64, Ordering,
};
use half::f16;

/// Identifies one of the supported primitive kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    Float32,
    Float64,
}

impl ElementKind {
    pub const fn size_in_bytes(self) -> usize {
        match self {
            ElementKind::Int8 => 1,
            ElementKind::Int16 | ElementKind::Float16 => 2,
            ElementKind::Int32 | ElementKind::Float32 => 4,
            ElementKind::Int64 | ElementKind::Float64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(
            self,
            ElementKind::Float16 | ElementKind::Float32 | ElementKind::Float64
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::Int8 => "int8",
            ElementKind::Int16 => "int16",
            ElementKind::Int32 => "int32",
            ElementKind::Int64 => "int64",
            ElementKind::Float16 => "float16",
            ElementKind::Float32 => "float32",
            ElementKind::Float64 => "float64",
        }
    }
}

impl core::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A primitive numeric type that can be stored in a buffer and reduced.
///
/// # Storage
/// Every element kind names a `Cell` type: an atomic of the same width that
/// holds the element's bit pattern. Memory shared by the members of a
/// work-group (or by every work-item of a launch) is made of these cells.
/// Accesses use relaxed ordering; the ordering between work-items is
/// established by barriers, exactly like on a real device.
///
/// # Arithmetic
/// - integer addition wraps. This keeps integer reductions associative, so
///   the result doesn't depend on how the work is split among groups.
/// - floating point `min`/`max` follow IEEE semantics (a NaN operand yields
///   the other operand)
pub trait Element:
    Copy + Debug + PartialEq + PartialOrd + Send + Sync + 'static + sealed::Sealed
{
    const KIND: ElementKind;
    const ZERO: Self;
    /// The identity of `max`
    const LOWEST: Self;
    /// The identity of `min`
    const HIGHEST: Self;

    type Cell: Send + Sync;

    fn add(self, other: Self) -> Self;
    fn min(self, other: Self) -> Self;
    fn max(self, other: Self) -> Self;

    fn new_cell(value: Self) -> Self::Cell;
    fn load(cell: &Self::Cell) -> Self;
    fn store(cell: &Self::Cell, value: Self);

    /// Atomically add `value` to the cell, returning the previous value.
    ///
    /// Integer kinds wrap. Float kinds retry a compare-exchange on the bit
    /// pattern until no other thread intervened.
    fn fetch_add(cell: &Self::Cell, value: Self) -> Self;
}

macro_rules! impl_integer_element {
    ($($ty:ty => $kind:ident, $cell:ty);+ $(;)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const KIND: ElementKind = ElementKind::$kind;
                const ZERO: Self = 0;
                const LOWEST: Self = <$ty>::MIN;
                const HIGHEST: Self = <$ty>::MAX;

                type Cell = $cell;

                #[inline(always)]
                fn add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }

                #[inline(always)]
                fn min(self, other: Self) -> Self {
                    Ord::min(self, other)
                }

                #[inline(always)]
                fn max(self, other: Self) -> Self {
                    Ord::max(self, other)
                }

                #[inline(always)]
                fn new_cell(value: Self) -> Self::Cell {
                    <$cell>::new(value)
                }

                #[inline(always)]
                fn load(cell: &Self::Cell) -> Self {
                    cell.load(Ordering::Relaxed)
                }

                #[inline(always)]
                fn store(cell: &Self::Cell, value: Self) {
                    cell.store(value, Ordering::Relaxed)
                }

                #[inline(always)]
                fn fetch_add(cell: &Self::Cell, value: Self) -> Self {
                    cell.fetch_add(value, Ordering::Relaxed)
                }
            }
        )+
    };
}

impl_integer_element! {
    i8 => Int8, AtomicI8;
    i16 => Int16, AtomicI16;
    i32 => Int32, AtomicI32;
    i64 => Int64, AtomicI64;
}

// floating point kinds store their bit pattern in an unsigned atomic
macro_rules! impl_float_element {
    ($($ty:ty => $kind:ident, $cell:ty, $zero:expr, $neg_inf:expr, $inf:expr);+ $(;)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Element for $ty {
                const KIND: ElementKind = ElementKind::$kind;
                const ZERO: Self = $zero;
                const LOWEST: Self = $neg_inf;
                const HIGHEST: Self = $inf;

                type Cell = $cell;

                #[inline(always)]
                fn add(self, other: Self) -> Self {
                    self + other
                }

                #[inline(always)]
                fn min(self, other: Self) -> Self {
                    <$ty>::min(self, other)
                }

                #[inline(always)]
                fn max(self, other: Self) -> Self {
                    <$ty>::max(self, other)
                }

                #[inline(always)]
                fn new_cell(value: Self) -> Self::Cell {
                    <$cell>::new(value.to_bits())
                }

                #[inline(always)]
                fn load(cell: &Self::Cell) -> Self {
                    <$ty>::from_bits(cell.load(Ordering::Relaxed))
                }

                #[inline(always)]
                fn store(cell: &Self::Cell, value: Self) {
                    cell.store(value.to_bits(), Ordering::Relaxed)
                }

                fn fetch_add(cell: &Self::Cell, value: Self) -> Self {
                    let update = |bits| Some((<$ty>::from_bits(bits) + value).to_bits());
                    match cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, update) {
                        Ok(previous) | Err(previous) => <$ty>::from_bits(previous),
                    }
                }
            }
        )+
    };
}

impl_float_element! {
    f16 => Float16, AtomicU16, f16::ZERO, f16::NEG_INFINITY, f16::INFINITY;
    f32 => Float32, AtomicU32, 0.0, f32::NEG_INFINITY, f32::INFINITY;
    f64 => Float64, AtomicU64, 0.0, f64::NEG_INFINITY, f64::INFINITY;
}
