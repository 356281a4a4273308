use std::sync::Arc;
use std::{ffi, fmt, ptr};
use thiserror::Error;

use crate::backend::{Backend, RawHandle, Spheroid};
use crate::crs_type::CrsType;
use crate::handle::{HandleCell, HandleSlot, release_slot};
use crate::transform::{self, Span, TransformError};

/// Prefix some callers put in front of a proj-string definition.
const PROJ4_PREFIX: &str = "Proj4:";

#[derive(Error, Debug)]
pub enum PjCreateError {
    #[error("A nul byte was found in the PROJ string definition: {0}")]
    ArgumentNulError(#[from] ffi::NulError),
    #[error("The underlying PROJ call failed: {0}")]
    ProjError(String),
    #[error("The coordinate system has already been released")]
    Released,
}

/// Strip a leading `Proj4:` (in any case) and surrounding whitespace.
fn strip_proj4_prefix(definition: &str) -> &str {
    let definition = definition.trim();
    match definition.get(..PROJ4_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(PROJ4_PREFIX) => {
            definition[PROJ4_PREFIX.len()..].trim_start()
        }
        _ => definition,
    }
}

/// A borrowed, live native CRS.
///
/// Every query is a pure read. Where the library cannot answer, a sentinel is returned:
/// `None` for strings, NaN for numbers.
#[derive(Clone, Copy)]
pub struct PjRef<'a> {
    backend: &'a dyn Backend,
    handle: RawHandle,
}

impl<'a> PjRef<'a> {
    /// # Safety
    ///
    /// `handle` must be a live handle of `backend` for `'a`, not used from another thread
    /// during that time.
    pub unsafe fn new(backend: &'a dyn Backend, handle: RawHandle) -> Self {
        PjRef { backend, handle }
    }

    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    /// The definition as the library writes it back out.
    pub fn definition(&self) -> Option<String> {
        unsafe { self.backend.definition(self.handle) }
    }

    /// A human-readable name or description.
    pub fn name(&self) -> Option<String> {
        unsafe { self.backend.description(self.handle) }
    }

    /// Geographic is checked first, then geocentric.
    pub fn crs_type(&self) -> CrsType {
        let (geographic, geocentric) = unsafe {
            (
                self.backend.is_geographic(self.handle),
                self.backend.is_geocentric(self.handle),
            )
        };
        CrsType::classify(geographic, geocentric)
    }

    pub fn spheroid(&self) -> Option<Spheroid> {
        unsafe { self.backend.spheroid(self.handle) }
    }

    pub fn semi_major_axis(&self) -> f64 {
        self.spheroid().map_or(f64::NAN, |s| s.semi_major_axis)
    }

    pub fn semi_minor_axis(&self) -> f64 {
        self.spheroid().map_or(f64::NAN, |s| s.semi_minor_axis())
    }

    pub fn eccentricity_squared(&self) -> f64 {
        self.spheroid().map_or(f64::NAN, |s| s.eccentricity_squared)
    }

    /// One character per axis, for example `"enu"`.
    pub fn axis_directions(&self) -> Option<String> {
        unsafe { self.backend.axis_directions(self.handle) }
    }

    /// Longitude of the prime meridian east of Greenwich, in degrees.
    pub fn prime_meridian(&self) -> f64 {
        unsafe { self.backend.prime_meridian(self.handle) }.map_or(f64::NAN, f64::to_degrees)
    }

    /// Factor converting the horizontal (or vertical) linear unit to metres.
    pub fn linear_unit_to_metre(&self, vertical: bool) -> f64 {
        unsafe { self.backend.linear_unit_to_metre(self.handle, vertical) }.unwrap_or(f64::NAN)
    }

    /// The error last recorded on this CRS's context.
    pub fn last_error(&self) -> Option<String> {
        unsafe { self.backend.last_error(self.handle) }
    }

    /// Allocate the geographic CRS this one is based on. The caller owns the result.
    pub fn geographic(&self) -> Result<RawHandle, PjCreateError> {
        unsafe { self.backend.geographic(self.handle) }.map_err(PjCreateError::ProjError)
    }
}

impl fmt::Debug for PjRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PjRef")
            .field("backend", &self.backend.name())
            .field("handle", &self.handle)
            .finish()
    }
}

/// An owned native coordinate reference system.
///
/// The handle lives in a private cell that only [`release`](Pj::release) and `Drop` empty.
/// Once released, every query returns its sentinel and transforms are no-ops.
///
/// A `Pj` may be moved to another thread but not shared between threads, because the
/// library's per-CRS context is single-threaded.
pub struct Pj {
    handle: HandleCell,
    backend: Arc<dyn Backend>,
}

// The handle is owned exclusively, and `HandleCell` keeps `Pj` from being `Sync`.
unsafe impl Send for Pj {}

impl Pj {
    /// Allocate a CRS from a textual definition, such as a proj-string or `EPSG:4326`.
    ///
    /// # Examples
    ///
    /// ```
    /// use proj_bridge::{Config, Pj};
    ///
    /// let backend = Config::new().backend().unwrap();
    /// let pj = Pj::new(backend, "Proj4: +proj=longlat +ellps=WGS84").unwrap();
    /// assert_eq!(pj.semi_major_axis(), 6_378_137.0);
    /// ```
    pub fn new(backend: Arc<dyn Backend>, definition: &str) -> Result<Pj, PjCreateError> {
        let definition = strip_proj4_prefix(definition);
        let c_definition = ffi::CString::new(definition)?;
        match backend.create(&c_definition) {
            Ok(handle) => {
                tracing::debug!(backend = backend.name(), definition, "allocated native CRS");
                Ok(unsafe { Pj::from_raw(backend, handle) })
            }
            Err(message) => {
                tracing::warn!(backend = backend.name(), definition, %message, "unable to allocate native CRS");
                Err(PjCreateError::ProjError(message))
            }
        }
    }

    /// Take ownership of a handle.
    ///
    /// # Safety
    ///
    /// `handle` must be a live handle of `backend` that nothing else will free.
    pub unsafe fn from_raw(backend: Arc<dyn Backend>, handle: RawHandle) -> Pj {
        Pj {
            handle: HandleCell::new(handle),
            backend,
        }
    }

    /// Give up ownership of the handle without freeing it. `None` if already released.
    pub fn into_raw(self) -> Option<RawHandle> {
        // the emptied cell makes the drop of `self` a no-op
        (&self.handle).take()
    }

    /// The geographic CRS this one is based on, as a new wrapper on the same backend.
    pub fn geographic(&self) -> Result<Pj, PjCreateError> {
        let view = self.view().ok_or(PjCreateError::Released)?;
        let handle = view.geographic().inspect_err(|e| {
            tracing::warn!(backend = self.backend.name(), error = %e, "unable to derive geographic CRS");
        })?;
        tracing::debug!(backend = self.backend.name(), "derived geographic CRS");
        Ok(unsafe { Pj::from_raw(self.backend.clone(), handle) })
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// A borrowed view of the live handle, or `None` once released.
    pub fn view(&self) -> Option<PjRef<'_>> {
        self.handle
            .get()
            .map(|handle| unsafe { PjRef::new(&*self.backend, handle) })
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Free the native CRS now. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        unsafe { release_slot(&*self.backend, &mut &self.handle) }
    }

    pub fn definition(&self) -> Option<String> {
        self.view()?.definition()
    }

    pub fn name(&self) -> Option<String> {
        self.view()?.name()
    }

    pub fn crs_type(&self) -> Option<CrsType> {
        self.view().map(|v| v.crs_type())
    }

    pub fn semi_major_axis(&self) -> f64 {
        self.view().map_or(f64::NAN, |v| v.semi_major_axis())
    }

    pub fn semi_minor_axis(&self) -> f64 {
        self.view().map_or(f64::NAN, |v| v.semi_minor_axis())
    }

    pub fn eccentricity_squared(&self) -> f64 {
        self.view().map_or(f64::NAN, |v| v.eccentricity_squared())
    }

    pub fn axis_directions(&self) -> Option<String> {
        self.view()?.axis_directions()
    }

    /// Prime meridian longitude in degrees east of Greenwich.
    pub fn prime_meridian(&self) -> f64 {
        self.view().map_or(f64::NAN, |v| v.prime_meridian())
    }

    pub fn linear_unit_to_metre(&self, vertical: bool) -> f64 {
        self.view().map_or(f64::NAN, |v| v.linear_unit_to_metre(vertical))
    }

    pub fn last_error(&self) -> Option<String> {
        self.view()?.last_error()
    }

    /// Transform `num_pts` tuples of `dimension` values each, starting at `offset`, from
    /// this CRS to `target`, in place.
    ///
    /// Geographic ordinates are in degrees. Dimensions past the third are left alone. If
    /// either CRS has been released nothing happens.
    pub fn transform(
        &self,
        target: &Pj,
        dimension: usize,
        coordinates: &mut [f64],
        offset: usize,
        num_pts: usize,
    ) -> Result<(), TransformError> {
        let as_i64 = |v: usize| i64::try_from(v).unwrap_or(i64::MAX);
        let span = transform::validate(
            true,
            Some(coordinates.len()),
            as_i64(dimension),
            as_i64(offset),
            as_i64(num_pts),
        )?;
        self.transform_span(target, coordinates, span)
    }

    /// Transform every complete tuple of `dimension` values in `coordinates`.
    pub fn transform_all(
        &self,
        target: &Pj,
        dimension: usize,
        coordinates: &mut [f64],
    ) -> Result<(), TransformError> {
        let num_pts = coordinates.len() / dimension.max(1);
        self.transform(target, dimension, coordinates, 0, num_pts)
    }

    fn transform_span(
        &self,
        target: &Pj,
        coordinates: &mut [f64],
        span: Span,
    ) -> Result<(), TransformError> {
        let (Some(source), Some(destination)) = (self.handle.get(), target.handle.get()) else {
            return Ok(());
        };
        if !ptr::addr_eq(Arc::as_ptr(&self.backend), Arc::as_ptr(&target.backend)) {
            return Err(TransformError::MismatchedBackends);
        }
        unsafe {
            transform::transform_in_place(
                &*self.backend,
                Some(source),
                Some(destination),
                coordinates,
                span,
            )
        }
    }
}

impl Drop for Pj {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Pj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pj")
            .field("backend", &self.backend.name())
            .field("definition", &self.definition())
            .finish()
    }
}
