//! Where a wrapper keeps its native handle, and how it gives it back.

use std::cell::Cell;

use crate::backend::{Backend, RawHandle};

/// Access to the slot a wrapper stores its handle in.
///
/// `load` returns `None` both for a zeroed slot and for a slot that cannot be located at all;
/// neither case is an error.
pub trait HandleSlot {
    fn load(&mut self) -> Option<RawHandle>;

    /// Zero the slot and return what it held.
    fn take(&mut self) -> Option<RawHandle>;
}

/// The handle slot of a Rust wrapper. Once taken it stays empty.
#[derive(Debug, Default)]
pub struct HandleCell(Cell<Option<RawHandle>>);

impl HandleCell {
    pub fn new(handle: RawHandle) -> Self {
        HandleCell(Cell::new(Some(handle)))
    }

    pub fn get(&self) -> Option<RawHandle> {
        self.0.get()
    }

    pub fn is_released(&self) -> bool {
        self.0.get().is_none()
    }
}

impl HandleSlot for &HandleCell {
    fn load(&mut self) -> Option<RawHandle> {
        self.get()
    }

    fn take(&mut self) -> Option<RawHandle> {
        self.0.take()
    }
}

/// Free whatever `slot` holds. The slot is zeroed before the native free, so a second call
/// (however it is triggered) finds nothing to do. Returns whether a handle was freed.
///
/// # Safety
///
/// A handle in `slot` must have been allocated by `backend` and must not be referenced
/// anywhere else.
pub unsafe fn release_slot<S: HandleSlot>(backend: &dyn Backend, slot: &mut S) -> bool {
    match slot.take() {
        Some(handle) => {
            tracing::debug!(backend = backend.name(), handle = ?handle, "releasing native handle");
            unsafe { backend.destroy(handle) };
            true
        }
        None => false,
    }
}
