use libc::c_int;
use std::ptr;

use crate::cstring_array::CStringArray;

/// A PROJ thread context, owned by exactly one linked handle.
pub(crate) struct ThreadContext(ptr::NonNull<proj_sys::PJ_CONTEXT>);

impl ThreadContext {
    /// `None` if PROJ could not allocate a context.
    pub fn new(search_paths: &CStringArray) -> Option<Self> {
        let ctx = ptr::NonNull::new(unsafe { proj_sys::proj_context_create() }).map(ThreadContext)?;
        if !search_paths.is_empty() {
            // Safety: the array outlives the call, and PROJ copies the paths.
            unsafe {
                proj_sys::proj_context_set_search_paths(
                    ctx.as_ptr(),
                    search_paths.count(),
                    search_paths.as_ptr(),
                )
            };
        }
        Some(ctx)
    }

    pub fn as_ptr(&self) -> *mut proj_sys::PJ_CONTEXT {
        self.0.as_ptr()
    }

    pub fn errno(&self) -> c_int {
        unsafe { proj_sys::proj_context_errno(self.as_ptr()) }
    }

    pub fn errno_string(&self, code: c_int) -> String {
        unsafe { crate::_string(proj_sys::proj_context_errno_string(self.as_ptr(), code)) }
            .unwrap_or_else(|| format!("PROJ error {code}"))
    }

    /// The error recorded on this context, or `None` when nothing is pending.
    pub fn last_error(&self) -> Option<String> {
        match self.errno() {
            0 => None,
            code => Some(self.errno_string(code)),
        }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        // Safety: a `ThreadContext` is never cloned, so this is the only destroy for the pointer.
        unsafe { proj_sys::proj_context_destroy(self.as_ptr()) };
    }
}
