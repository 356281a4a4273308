#![doc(html_logo_url = "https://raw.githubusercontent.com/georust/meta/master/logo/logo.png")]
//! `proj-bridge` owns [PROJ](https://proj.org) coordinate reference systems on behalf of
//! wrapper objects, and transforms interleaved coordinate buffers between them.
//!
//! Every native CRS is an opaque handle kept in a single slot of its wrapper: a private
//! cell for the Rust [`Pj`], or a `long ptr` field for the JVM class `org.georust.proj.PJ`
//! when the `jni` feature is enabled. A handle is freed exactly once: the slot is zeroed
//! before the native free, so releasing twice is harmless.
//!
//! # Backends
//!
//! Two native ABIs are supported behind the [`Backend`] trait:
//!
//! 1. [`LinkedBackend`](backend::linked::LinkedBackend) uses the `proj.h` API of the PROJ
//!    library this crate is linked against (feature `linked`, enabled by default);
//! 2. [`LegacyBackend`](backend::legacy::LegacyBackend) loads a PROJ 4.x to 7.x library
//!    at runtime and drives its `proj_api.h` symbols.
//!
//! Use a [`Config`] to select one:
//!
//! - `Config::new().backend()` gives the linked backend;
//! - `Config::new().library("/usr/lib/libproj.so.15").backend()` loads a legacy library;
//! - `Config::from_env()` reads `PROJ_BRIDGE_LIBRARY` and `PROJ_BRIDGE_SEARCH_PATHS`.
//!
//! # Angular units
//!
//! Geographic coordinates are passed in and returned as **degrees**, longitude first.
//! Geocentric and projected coordinates are in the units of the CRS.
//!
//! # Requirements
//!
//! The `linked` feature requires `libproj` to be found by `proj-sys`. Its
//! `bundled_proj` feature is forwarded as `bundled_proj`:
//!
//! `proj-bridge = { version = "0.1", features = ["bundled_proj"] }`
//!
//! The `jni` feature builds the JVM exports into the `cdylib`.
//!
//! # Example
//!
//! ```
//! use approx::assert_relative_eq;
//! use proj_bridge::{Config, CrsType, Pj};
//!
//! let backend = Config::new().backend().unwrap();
//! let utm = Pj::new(backend.clone(), "+proj=utm +zone=33 +ellps=WGS84 +units=m").unwrap();
//! let wgs84 = utm.geographic().unwrap();
//! assert_eq!(wgs84.crs_type(), Some(CrsType::Geographic));
//!
//! // one (lon, lat) pair, in degrees
//! let mut coordinates = [15.0, 52.0];
//! wgs84.transform(&utm, 2, &mut coordinates, 0, 1).unwrap();
//! assert_relative_eq!(coordinates[0], 500_000.0, epsilon = 1e-3);
//! ```

use libc::c_char;
use std::ffi::CStr;

pub mod backend;
mod config;
#[cfg(feature = "linked")]
mod context;
mod crs_type;
mod cstring_array;
mod dynlib;
#[cfg(feature = "geo-types")]
mod geo_types;
mod handle;
#[cfg(feature = "jni")]
mod jni;
mod params;
mod pj;
mod pool;
mod transform;

pub use crate::backend::{Backend, BackendError, Spheroid};
pub use crate::config::Config;
pub use crate::crs_type::{CrsType, UnknownCrsType};
pub use crate::dynlib::{DynamicLibrary, DynamicLibraryError};
#[cfg(feature = "geo-types")]
pub use crate::geo_types::{Transform, TransformDefinitionsError};
pub use crate::handle::{HandleCell, HandleSlot, release_slot};
pub use crate::params::ProjParams;
pub use crate::pj::{Pj, PjCreateError, PjRef};
pub use crate::pool::PjPool;
pub use crate::transform::{MAX_DIMENSION, MIN_DIMENSION, PreparedTransform, Span, TransformError, validate};

/// Copy a C string owned by the library. `None` for a null pointer; invalid UTF-8 is
/// replaced.
///
/// # Safety
/// `raw_ptr` must be null or point to a nul-terminated string.
pub(crate) unsafe fn _string(raw_ptr: *const c_char) -> Option<String> {
    if raw_ptr.is_null() {
        return None;
    }
    let c_str = unsafe { CStr::from_ptr(raw_ptr) };
    Some(c_str.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    #[test]
    fn test_string_from_null() {
        assert_eq!(unsafe { _string(ptr::null()) }, None);
    }

    #[test]
    fn test_string_lossy() {
        let owned = CString::new(vec![b'm', 0xff, b'x']).unwrap();
        assert_eq!(unsafe { _string(owned.as_ptr()) }.as_deref(), Some("m\u{fffd}x"));
    }
}
