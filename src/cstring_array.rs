use libc::{c_char, c_int};
use std::ffi::{CString, NulError};
use std::path::Path;
use std::ptr;

/// An owned, null-terminated array of C strings, such as the `const char* const*` search path
/// lists both ABIs accept.
///
/// Strings are converted when added, and the pointer array is kept in step with them.
#[derive(Debug)]
pub(crate) struct CStringArray {
    cstrings: Vec<CString>,
    /// Always ends with a null pointer.
    ptrs: Vec<*const c_char>,
}

// The raw pointers only ever point into `cstrings`, which is owned and never mutated in place.
unsafe impl Send for CStringArray {}
unsafe impl Sync for CStringArray {}

impl CStringArray {
    pub fn new() -> Self {
        Self {
            cstrings: Vec::new(),
            ptrs: vec![ptr::null()],
        }
    }

    /// Build from filesystem paths. Non-UTF-8 paths are converted lossily.
    pub fn from_paths<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
    ) -> Result<Self, NulError> {
        let mut array = Self::new();
        for path in paths {
            array.push(path.as_ref().to_string_lossy())?;
        }
        Ok(array)
    }

    /// Returns an error if the string contains an interior nul byte.
    pub fn push(&mut self, s: impl Into<String>) -> Result<(), NulError> {
        let cstring = CString::new(s.into())?;
        self.ptrs.insert(self.ptrs.len() - 1, cstring.as_ptr());
        self.cstrings.push(cstring);
        debug_assert_eq!(self.ptrs.len(), self.cstrings.len() + 1);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cstrings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cstrings.is_empty()
    }

    /// Count in the form the C APIs take it.
    pub fn count(&self) -> c_int {
        c_int::try_from(self.len()).unwrap_or(c_int::MAX)
    }

    /// Pointer to the null-terminated array, or null when empty.
    pub fn as_ptr(&self) -> *const *const c_char {
        debug_assert_eq!(self.ptrs.last(), Some(&ptr::null()));
        if self.cstrings.is_empty() {
            ptr::null()
        } else {
            self.ptrs.as_ptr()
        }
    }
}

impl Default for CStringArray {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CStringArray {
    fn clone(&self) -> Self {
        let mut array = Self::new();
        for cstring in &self.cstrings {
            array.ptrs.insert(array.ptrs.len() - 1, ptr::null());
            array.cstrings.push(cstring.clone());
        }
        for (slot, cstring) in array.ptrs.iter_mut().zip(&array.cstrings) {
            *slot = cstring.as_ptr();
        }
        array
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_empty() {
        let arr = CStringArray::new();
        assert!(arr.as_ptr().is_null());
        assert_eq!(arr.count(), 0);
    }

    #[test]
    fn test_from_paths() {
        let arr = CStringArray::from_paths(["/usr/share/proj", "/opt/proj/data"]).unwrap();
        assert_eq!(arr.count(), 2);
        let ptr = arr.as_ptr();
        unsafe {
            assert_eq!(CStr::from_ptr(*ptr).to_str().unwrap(), "/usr/share/proj");
            assert_eq!(CStr::from_ptr(*ptr.add(1)).to_str().unwrap(), "/opt/proj/data");
            assert!((*ptr.add(2)).is_null());
        }
    }

    #[test]
    fn test_clone_points_at_own_strings() {
        let arr = CStringArray::from_paths(["/a"]).unwrap();
        let copy = arr.clone();
        drop(arr);
        unsafe {
            assert_eq!(CStr::from_ptr(*copy.as_ptr()).to_str().unwrap(), "/a");
        }
    }

    #[test]
    fn test_nul_error() {
        let mut arr = CStringArray::new();
        assert!(arr.push("invalid\0path").is_err());
        assert!(arr.is_empty());
    }
}
