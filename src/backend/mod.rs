//! Native ABI variants behind a single interface.
//!
//! A [`Backend`] owns nothing but library-wide state; every per-CRS resource lives behind a
//! [`RawHandle`] that the backend allocates in [`Backend::create`] and frees in
//! [`Backend::destroy`]. Ownership of handles is tracked by the caller (see
//! [`crate::handle`]).

use libc::c_int;
use std::ffi::{CStr, NulError, c_void};
use std::ptr::NonNull;
use thiserror::Error;

use crate::dynlib::DynamicLibraryError;

pub mod legacy;
#[cfg(feature = "linked")]
pub mod linked;
#[cfg(test)]
pub(crate) mod mock;

/// Opaque pointer to a backend-owned native CRS.
pub type RawHandle = NonNull<c_void>;

/// Ellipsoid shape as reported by the library.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spheroid {
    pub semi_major_axis: f64,
    pub eccentricity_squared: f64,
}

impl Spheroid {
    pub fn semi_minor_axis(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity_squared).sqrt()
    }
}

/// Interleaved coordinate tuples borrowed for the duration of one transform.
pub struct Tuples<'a> {
    data: &'a mut [f64],
    dimension: usize,
}

impl<'a> Tuples<'a> {
    /// `data.len()` must be a multiple of `dimension`, and `dimension` at least 2.
    pub fn new(data: &'a mut [f64], dimension: usize) -> Self {
        debug_assert!(dimension >= 2);
        debug_assert_eq!(data.len() % dimension, 0);
        Tuples { data, dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of tuples.
    pub fn count(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn as_slice(&self) -> &[f64] {
        self.data
    }

    pub fn as_mut_ptr(&mut self) -> *mut f64 {
        self.data.as_mut_ptr()
    }

    /// Apply `f` to the first `ordinates` components of every tuple, leaving the rest alone.
    pub fn map_leading(&mut self, ordinates: usize, f: impl Fn(f64) -> f64) {
        let n = ordinates.min(self.dimension);
        if n == 0 {
            return;
        }
        for tuple in self.data.chunks_exact_mut(self.dimension) {
            for value in &mut tuple[..n] {
                *value = f(*value);
            }
        }
    }
}

/// A prepared source-to-target operation.
///
/// `apply` runs inside the critical section of a transform: it must not block, must not
/// allocate through a managed runtime and must not call back into one.
pub trait Operation {
    /// On entry the source's leading angular ordinates (see
    /// [`CrsType::angular_ordinates`](crate::CrsType::angular_ordinates)) have been multiplied by
    /// π/180; on return the target's must be in that same form. Returns the native status,
    /// zero on success.
    fn apply(&mut self, tuples: &mut Tuples<'_>) -> c_int;
}

/// One native ABI variant of the projection library.
///
/// Every method taking a [`RawHandle`] is `unsafe`: the handle must have been returned by
/// this same backend (from [`create`](Backend::create) or
/// [`geographic`](Backend::geographic)) and not yet passed to [`destroy`](Backend::destroy),
/// and it must not be used from two threads at once.
pub trait Backend: Send + Sync {
    /// Short identifier used in log output.
    fn name(&self) -> &'static str;

    /// Release/version string of the loaded library.
    fn library_release(&self) -> Option<String>;

    /// Allocate a CRS from a textual definition. The error carries the library's message.
    fn create(&self, definition: &CStr) -> Result<RawHandle, String>;

    /// # Safety
    /// See the trait documentation.
    unsafe fn geographic(&self, handle: RawHandle) -> Result<RawHandle, String>;

    /// # Safety
    /// See the trait documentation.
    unsafe fn definition(&self, handle: RawHandle) -> Option<String>;

    /// # Safety
    /// See the trait documentation.
    unsafe fn description(&self, handle: RawHandle) -> Option<String>;

    /// # Safety
    /// See the trait documentation.
    unsafe fn is_geographic(&self, handle: RawHandle) -> bool;

    /// # Safety
    /// See the trait documentation.
    unsafe fn is_geocentric(&self, handle: RawHandle) -> bool;

    /// # Safety
    /// See the trait documentation.
    unsafe fn spheroid(&self, handle: RawHandle) -> Option<Spheroid>;

    /// One lower-case direction character per axis (`e`, `w`, `n`, `s`, `u`, `d`).
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn axis_directions(&self, handle: RawHandle) -> Option<String>;

    /// Longitude of the prime meridian relative to Greenwich, in radians.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn prime_meridian(&self, handle: RawHandle) -> Option<f64>;

    /// # Safety
    /// See the trait documentation.
    unsafe fn linear_unit_to_metre(&self, handle: RawHandle, vertical: bool) -> Option<f64>;

    /// Build the native operation between two handles. Runs outside the critical section.
    ///
    /// # Safety
    /// See the trait documentation; both handles must stay alive until the returned
    /// operation is dropped.
    unsafe fn prepare<'a>(
        &'a self,
        source: RawHandle,
        target: RawHandle,
    ) -> Result<Box<dyn Operation + 'a>, c_int>;

    /// Text for a status code, as reported on `handle`'s context.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn error_message(&self, handle: RawHandle, code: c_int) -> String;

    /// The error currently recorded on the handle's context, if any.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn last_error(&self, handle: RawHandle) -> Option<String>;

    /// Free the handle. It must not be used afterwards.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn destroy(&self, handle: RawHandle);
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Library(#[from] DynamicLibraryError),
    #[error("No native backend is available: {0}")]
    Unavailable(&'static str),
    #[error("A search path contains a nul byte: {0}")]
    SearchPathNulError(#[from] NulError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_semi_minor_axis() {
        let wgs84 = Spheroid {
            semi_major_axis: 6_378_137.0,
            eccentricity_squared: 0.006_694_379_990_141_317,
        };
        assert_relative_eq!(wgs84.semi_minor_axis(), 6_356_752.314_245_179, epsilon = 1e-6);
        let sphere = Spheroid {
            semi_major_axis: 6_371_000.0,
            eccentricity_squared: 0.0,
        };
        assert_eq!(sphere.semi_minor_axis(), 6_371_000.0);
    }

    #[test]
    fn test_map_leading_skips_trailing_ordinates() {
        let mut data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let mut tuples = Tuples::new(&mut data, 4);
        assert_eq!(tuples.count(), 2);
        tuples.map_leading(3, |v| v * 10.0);
        assert_eq!(tuples.as_slice(), &[10.0, 20.0, 30.0, 4.0, 50.0, 60.0, 70.0, 8.0]);
    }

    #[test]
    fn test_map_leading_clamps_to_dimension() {
        let mut data = [1.0, 2.0, 3.0, 4.0];
        let mut tuples = Tuples::new(&mut data, 2);
        tuples.map_leading(3, |v| -v);
        assert_eq!(tuples.as_slice(), &[-1.0, -2.0, -3.0, -4.0]);
        tuples.map_leading(0, |_| f64::NAN);
        assert_eq!(tuples.as_slice(), &[-1.0, -2.0, -3.0, -4.0]);
    }
}
