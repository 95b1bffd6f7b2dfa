use std::cell::UnsafeCell;
use std::ops::Deref;

/// A value that is logically immutable after construction but needs one
/// mutation during setup (e.g. wiring a back-reference once the rest of a
/// graph of `Arc`s exists). All reads are safe; the single `replace` is on
/// the caller to serialize against concurrent readers.
pub struct MutableOnce<T>(UnsafeCell<T>);

unsafe impl<T: Sync> Sync for MutableOnce<T> {}

impl<T> MutableOnce<T> {
    pub fn new(value: T) -> Self {
        MutableOnce(UnsafeCell::new(value))
    }

    /// # Safety
    /// The caller must ensure no other thread is reading through a
    /// `Deref` while this runs.
    pub unsafe fn replace(&self, value: T) {
        *self.0.get() = value;
    }
}

impl<T> Deref for MutableOnce<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.0.get() }
    }
}
