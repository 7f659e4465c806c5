//! Host-side typed buffers
//!
//! A [`TypedBuffer`] is a handle to a fixed-length, flat array of a single
//! element kind. Cloning the handle doesn't copy the data: the task graph
//! keeps a clone, so changes made by the caller between executions are
//! visible to later transfers.
//!
//! # Note
//! This is the only module that touches ndarray. Keeping all references to
//! that package in a single file makes it easy to swap out later.

use crate::device::{DeviceArray, DeviceSlot};
use crate::error::Error;
use kernelgrid_nostd_internal::{Element, ElementKind};
use ndarray::{Array1, ArrayView1, ArrayViewMut1};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// Uniquely identifies a buffer for the lifetime of the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn for_tests(value: u64) -> Self {
        BufferId(value)
    }
}

impl core::fmt::Display for BufferId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A deferred copy from device memory into a host buffer.
///
/// Execution plans gather these and only apply them once every step of an
/// execution has succeeded, so that a failed execution never leaves host
/// buffers partially updated.
#[doc(hidden)]
pub struct StagedWrite(Box<dyn FnOnce() + Send>);

impl StagedWrite {
    pub(crate) fn commit(self) {
        (self.0)()
    }
}

/// The type-erased view of a [`TypedBuffer`] used by task graphs
pub trait HostBuffer: Send + Sync + core::fmt::Debug {
    fn id(&self) -> BufferId;

    fn kind(&self) -> ElementKind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn byte_size(&self) -> usize {
        self.len() * self.kind().size_in_bytes()
    }

    /// produce another handle to the same buffer
    fn to_handle(&self) -> Arc<dyn HostBuffer>;

    /// copy the current host contents into a fresh device allocation
    #[doc(hidden)]
    fn upload(&self) -> DeviceSlot;

    /// a zero-filled device allocation with the length of this buffer
    #[doc(hidden)]
    fn allocate(&self) -> DeviceSlot;

    #[doc(hidden)]
    fn stage_download(&self, slot: &DeviceSlot) -> Result<StagedWrite, Error>;
}

/// A flat, fixed-length array of `T` that lives on the host
#[derive(Clone)]
pub struct TypedBuffer<T: Element> {
    id: BufferId,
    data: Arc<RwLock<Array1<T>>>,
}

pub type ByteArray = TypedBuffer<i8>;
pub type ShortArray = TypedBuffer<i16>;
pub type IntArray = TypedBuffer<i32>;
pub type LongArray = TypedBuffer<i64>;
pub type HalfFloatArray = TypedBuffer<half::f16>;
pub type FloatArray = TypedBuffer<f32>;
pub type DoubleArray = TypedBuffer<f64>;

impl<T: Element> TypedBuffer<T> {
    /// Create a zero-filled buffer holding `len` elements
    pub fn new(len: usize) -> Self {
        Self::from_array(Array1::from_elem(len, T::ZERO))
    }

    pub fn from_vec(values: Vec<T>) -> Self {
        Self::from_array(Array1::from_vec(values))
    }

    pub fn from_slice(values: &[T]) -> Self {
        Self::from_vec(values.to_vec())
    }

    fn from_array(data: Array1<T>) -> Self {
        TypedBuffer {
            id: BufferId::next(),
            data: Arc::new(RwLock::new(data)),
        }
    }

    // the data is plain numbers, so a panic in another thread can't leave it
    // in a state that is any more invalid than what the caller wrote
    fn read(&self) -> RwLockReadGuard<'_, Array1<T>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Array1<T>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> usize {
        self.len() * T::KIND.size_in_bytes()
    }

    /// # Panics
    /// Panics if `index >= self.len()`
    pub fn get(&self, index: usize) -> T {
        match self.try_get(index) {
            Some(value) => value,
            None => panic!(
                "index {index} is out of range for a buffer of length {}",
                self.len()
            ),
        }
    }

    pub fn try_get(&self, index: usize) -> Option<T> {
        self.read().get(index).copied()
    }

    /// # Panics
    /// Panics if `index >= self.len()`
    pub fn set(&self, index: usize, value: T) {
        let mut data = self.write();
        let len = data.len();
        match data.get_mut(index) {
            Some(slot) => *slot = value,
            None => panic!("index {index} is out of range for a buffer of length {len}"),
        }
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.read().to_vec()
    }

    /// Overwrite every element with the contents of `values`
    ///
    /// # Panics
    /// Panics if `values.len() != self.len()`
    pub fn copy_from_slice(&self, values: &[T]) {
        let mut data = self.write();
        assert_eq!(
            data.len(),
            values.len(),
            "source slice length doesn't match the buffer length"
        );
        data.assign(&ArrayView1::from(values));
    }

    pub fn fill(&self, value: T) {
        self.write().fill(value);
    }

    /// zero-fill the buffer
    pub fn clear(&self) {
        self.fill(T::ZERO);
    }

    /// Call `f` with a read-only view of the contents
    pub fn with_view<R>(&self, f: impl FnOnce(ArrayView1<T>) -> R) -> R {
        f(self.read().view())
    }

    /// Call `f` with a mutable view of the contents
    pub fn with_view_mut<R>(&self, f: impl FnOnce(ArrayViewMut1<T>) -> R) -> R {
        f(self.write().view_mut())
    }
}

impl<T: Element> core::fmt::Debug for TypedBuffer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("id", &self.id)
            .field("kind", &T::KIND)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Element> HostBuffer for TypedBuffer<T> {
    fn id(&self) -> BufferId {
        self.id
    }

    fn kind(&self) -> ElementKind {
        T::KIND
    }

    fn len(&self) -> usize {
        TypedBuffer::len(self)
    }

    fn to_handle(&self) -> Arc<dyn HostBuffer> {
        Arc::new(self.clone())
    }

    fn upload(&self) -> DeviceSlot {
        let data = self.read();
        let array = DeviceArray::from_values(self.id, data.iter().copied());
        DeviceSlot::new(array)
    }

    fn allocate(&self) -> DeviceSlot {
        DeviceSlot::new(DeviceArray::<T>::zeroed_global(self.id, self.len()))
    }

    fn stage_download(&self, slot: &DeviceSlot) -> Result<StagedWrite, Error> {
        let array = slot.typed::<T>().ok_or_else(|| {
            Error::config(format!(
                "device copy of buffer {} holds {} elements, not {}",
                self.id,
                slot.kind(),
                T::KIND
            ))
        })?;
        let values = array.to_vec();
        let target = self.clone();
        Ok(StagedWrite(Box::new(move || {
            target.copy_from_slice(&values);
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_storage() {
        let a = IntArray::new(4);
        let b = a.clone();
        b.set(2, 7);
        assert_eq!(a.get(2), 7);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), IntArray::new(4).id());
    }

    #[test]
    fn bulk_roundtrip_and_clear() {
        let buf = DoubleArray::from_vec(vec![1.0, 2.0, 3.0]);
        assert_eq!(buf.byte_size(), 24);
        buf.copy_from_slice(&[4.0, 5.0, 6.0]);
        assert_eq!(buf.to_vec(), vec![4.0, 5.0, 6.0]);
        assert_eq!(buf.with_view(|view| view.sum()), 15.0);
        buf.clear();
        assert_eq!(buf.to_vec(), vec![0.0; 3]);
    }

    #[test]
    fn out_of_range_host_access() {
        let buf = ShortArray::new(3);
        assert_eq!(buf.try_get(3), None);
        let result = std::panic::catch_unwind(|| buf.get(3));
        assert!(result.is_err());
    }

    #[test]
    fn half_float_storage() {
        let buf = HalfFloatArray::from_slice(&[half::f16::from_f32(0.5); 4]);
        assert_eq!(buf.byte_size(), 8);
        assert_eq!(buf.get(3).to_f32(), 0.5);
    }

    #[test]
    fn staged_writes_apply_on_commit() {
        let buf = IntArray::from_slice(&[1, 2, 3]);
        let slot = buf.upload();
        slot.typed::<i32>().unwrap().write_values(&[7, 8, 9]);
        let staged = buf.stage_download(&slot).unwrap();
        assert_eq!(buf.to_vec(), vec![1, 2, 3]);
        staged.commit();
        assert_eq!(buf.to_vec(), vec![7, 8, 9]);
    }
}
