//! The `proj.h` ABI, linked at build time through `proj-sys`.
//!
//! Everything is read through accessor functions. Each handle owns its own PJ_CONTEXT so
//! that its last error is its own.

use libc::{c_char, c_int};
use std::borrow::Cow;
use std::ffi::{CStr, CString, c_void};
use std::{mem, ptr};

use proj_sys::PJ;

use super::{Backend, Operation, RawHandle, Spheroid, Tuples};
use crate::context::ThreadContext;
use crate::cstring_array::CStringArray;
use crate::crs_type::CrsType;

/// A PJ object that is destroyed on drop.
struct PjObject(ptr::NonNull<PJ>);

impl PjObject {
    fn new(pj: *mut PJ) -> Option<Self> {
        ptr::NonNull::new(pj).map(PjObject)
    }

    fn as_ptr(&self) -> *mut PJ {
        self.0.as_ptr()
    }
}

impl Drop for PjObject {
    fn drop(&mut self) {
        unsafe { proj_sys::proj_destroy(self.as_ptr()) };
    }
}

/// What a linked [`RawHandle`] points to.
struct LinkedCrs {
    // declared first: the PJ must go before its context
    pj: PjObject,
    ctx: ThreadContext,
}

impl LinkedCrs {
    fn ctx(&self) -> *mut proj_sys::PJ_CONTEXT {
        self.ctx.as_ptr()
    }

    /// Run `f` on this CRS, or on the source CRS if this is a bound CRS (as PROJ builds for
    /// definitions with `+towgs84` or `+nadgrids`).
    fn with_crs<R>(&self, f: impl FnOnce(*mut PJ) -> R) -> R {
        let ty = unsafe { proj_sys::proj_get_type(self.pj.as_ptr()) };
        let source = if ty == proj_sys::PJ_TYPE_PJ_TYPE_BOUND_CRS {
            PjObject::new(unsafe { proj_sys::proj_get_source_crs(self.ctx(), self.pj.as_ptr()) })
        } else {
            None
        };
        f(source.as_ref().map_or(self.pj.as_ptr(), PjObject::as_ptr))
    }

    fn is_geographic(&self) -> bool {
        let ty = self.with_crs(|pj| unsafe { proj_sys::proj_get_type(pj) });
        ty == proj_sys::PJ_TYPE_PJ_TYPE_GEOGRAPHIC_2D_CRS
            || ty == proj_sys::PJ_TYPE_PJ_TYPE_GEOGRAPHIC_3D_CRS
            || ty == proj_sys::PJ_TYPE_PJ_TYPE_GEOGRAPHIC_CRS
    }

    fn is_geocentric(&self) -> bool {
        let ty = self.with_crs(|pj| unsafe { proj_sys::proj_get_type(pj) });
        ty == proj_sys::PJ_TYPE_PJ_TYPE_GEOCENTRIC_CRS
    }

    fn crs_type(&self) -> CrsType {
        CrsType::classify(self.is_geographic(), self.is_geocentric())
    }

    fn axes(&self) -> Option<Vec<Axis>> {
        let ctx = self.ctx();
        self.with_crs(|pj| {
            let cs = PjObject::new(unsafe { proj_sys::proj_crs_get_coordinate_system(ctx, pj) })?;
            let count = unsafe { proj_sys::proj_cs_get_axis_count(ctx, cs.as_ptr()) };
            if count < 0 {
                return None;
            }
            (0..count).map(|index| Axis::read(ctx, &cs, index)).collect()
        })
    }

    /// The errno of this context, or a generic failure if PROJ did not set one.
    fn failure_code(&self) -> c_int {
        match self.ctx.errno() {
            0 => proj_sys::PROJ_ERR_OTHER as c_int,
            code => code,
        }
    }

    fn into_handle(self) -> RawHandle {
        ptr::NonNull::from(Box::leak(Box::new(self))).cast::<c_void>()
    }
}

struct Axis {
    direction: char,
    unit_conv_factor: f64,
}

impl Axis {
    fn read(ctx: *mut proj_sys::PJ_CONTEXT, cs: &PjObject, index: c_int) -> Option<Axis> {
        let mut direction: *const c_char = ptr::null();
        let mut unit_conv_factor = 0.0;
        let ok = unsafe {
            proj_sys::proj_cs_get_axis_info(
                ctx,
                cs.as_ptr(),
                index,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut direction,
                &mut unit_conv_factor,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return None;
        }
        let direction = unsafe { crate::_string(direction) }?;
        Some(Axis {
            direction: direction_char(&direction),
            unit_conv_factor,
        })
    }
}

/// Map a PROJ axis direction name to the single character used by `+axis`.
fn direction_char(direction: &str) -> char {
    match direction.to_ascii_lowercase().as_str() {
        "east" | "geocentricx" => 'e',
        "west" => 'w',
        "north" | "geocentricy" => 'n',
        "south" => 's',
        "up" | "geocentricz" => 'u',
        "down" => 'd',
        _ => '?',
    }
}

/// Proj-string definitions create coordinate operations unless told otherwise.
fn promote_to_crs(definition: &CStr) -> Cow<'_, CStr> {
    match definition.to_str() {
        Ok(text) if text.contains("+proj=") && !text.contains("+type=crs") => {
            CString::new(format!("{} +type=crs", text.trim_end()))
                .map_or(Cow::Borrowed(definition), Cow::Owned)
        }
        _ => Cow::Borrowed(definition),
    }
}

/// Backend over the PROJ library this crate was linked against.
#[derive(Debug, Default, Clone)]
pub struct LinkedBackend {
    search_paths: CStringArray,
}

impl LinkedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_search_paths(search_paths: CStringArray) -> Self {
        LinkedBackend { search_paths }
    }

    fn context(&self) -> Result<ThreadContext, String> {
        ThreadContext::new(&self.search_paths).ok_or_else(|| "Unable to allocate a PROJ context".to_string())
    }

    /// # Safety
    /// `handle` must be a live handle from this backend.
    unsafe fn crs<'a>(handle: RawHandle) -> &'a LinkedCrs {
        unsafe { handle.cast::<LinkedCrs>().as_ref() }
    }

    /// A longitude/latitude CRS on the datum of a geocentric CRS.
    fn geographic_from_geocentric(ctx: &ThreadContext, geocentric: &PjObject) -> Option<PjObject> {
        let ctx = ctx.as_ptr();
        let datum = PjObject::new(unsafe { proj_sys::proj_crs_get_datum_forced(ctx, geocentric.as_ptr()) })?;
        let cs = PjObject::new(unsafe {
            proj_sys::proj_create_ellipsoidal_2D_cs(
                ctx,
                proj_sys::PJ_ELLIPSOIDAL_CS_2D_TYPE_PJ_ELLPS2D_LONGITUDE_LATITUDE,
                ptr::null(),
                0.0,
            )
        })?;
        let name = unsafe { proj_sys::proj_get_name(geocentric.as_ptr()) };
        PjObject::new(unsafe {
            proj_sys::proj_create_geographic_crs_from_datum(ctx, name, datum.as_ptr(), cs.as_ptr())
        })
    }
}

impl Backend for LinkedBackend {
    fn name(&self) -> &'static str {
        "linked"
    }

    fn library_release(&self) -> Option<String> {
        unsafe { crate::_string(proj_sys::proj_info().release) }
    }

    fn create(&self, definition: &CStr) -> Result<RawHandle, String> {
        let definition = promote_to_crs(definition);
        let ctx = self.context()?;
        match PjObject::new(unsafe { proj_sys::proj_create(ctx.as_ptr(), definition.as_ptr()) }) {
            Some(pj) => Ok(LinkedCrs { pj, ctx }.into_handle()),
            None => Err(ctx
                .last_error()
                .unwrap_or_else(|| "Invalid PROJ definition".to_string())),
        }
    }

    unsafe fn geographic(&self, handle: RawHandle) -> Result<RawHandle, String> {
        let crs = unsafe { Self::crs(handle) };
        let ctx = self.context()?;
        let geodetic = crs.with_crs(|pj| PjObject::new(unsafe { proj_sys::proj_crs_get_geodetic_crs(ctx.as_ptr(), pj) }));
        let Some(geodetic) = geodetic else {
            return Err(ctx
                .last_error()
                .unwrap_or_else(|| "CRS has no geodetic base".to_string()));
        };
        let ty = unsafe { proj_sys::proj_get_type(geodetic.as_ptr()) };
        let pj = if ty == proj_sys::PJ_TYPE_PJ_TYPE_GEOCENTRIC_CRS {
            Self::geographic_from_geocentric(&ctx, &geodetic).ok_or_else(|| {
                ctx.last_error()
                    .unwrap_or_else(|| "Unable to build a geographic CRS".to_string())
            })?
        } else {
            geodetic
        };
        Ok(LinkedCrs { pj, ctx }.into_handle())
    }

    unsafe fn definition(&self, handle: RawHandle) -> Option<String> {
        let crs = unsafe { Self::crs(handle) };
        unsafe {
            crate::_string(proj_sys::proj_as_proj_string(
                crs.ctx(),
                crs.pj.as_ptr(),
                proj_sys::PJ_PROJ_STRING_TYPE_PJ_PROJ_4,
                ptr::null(),
            ))
        }
    }

    unsafe fn description(&self, handle: RawHandle) -> Option<String> {
        let crs = unsafe { Self::crs(handle) };
        unsafe { crate::_string(proj_sys::proj_get_name(crs.pj.as_ptr())) }
    }

    unsafe fn is_geographic(&self, handle: RawHandle) -> bool {
        unsafe { Self::crs(handle) }.is_geographic()
    }

    unsafe fn is_geocentric(&self, handle: RawHandle) -> bool {
        unsafe { Self::crs(handle) }.is_geocentric()
    }

    unsafe fn spheroid(&self, handle: RawHandle) -> Option<Spheroid> {
        let crs = unsafe { Self::crs(handle) };
        let ctx = crs.ctx();
        crs.with_crs(|pj| {
            let ellipsoid = PjObject::new(unsafe { proj_sys::proj_get_ellipsoid(ctx, pj) })?;
            let (mut a, mut b, mut b_computed, mut inv_flattening) = (0.0, 0.0, 0, 0.0);
            let ok = unsafe {
                proj_sys::proj_ellipsoid_get_parameters(
                    ctx,
                    ellipsoid.as_ptr(),
                    &mut a,
                    &mut b,
                    &mut b_computed,
                    &mut inv_flattening,
                )
            };
            (ok != 0 && a > 0.0).then(|| Spheroid {
                semi_major_axis: a,
                eccentricity_squared: 1.0 - (b / a) * (b / a),
            })
        })
    }

    unsafe fn axis_directions(&self, handle: RawHandle) -> Option<String> {
        let axes = unsafe { Self::crs(handle) }.axes()?;
        Some(axes.iter().map(|axis| axis.direction).collect())
    }

    unsafe fn prime_meridian(&self, handle: RawHandle) -> Option<f64> {
        let crs = unsafe { Self::crs(handle) };
        let ctx = crs.ctx();
        crs.with_crs(|pj| {
            let pm = PjObject::new(unsafe { proj_sys::proj_get_prime_meridian(ctx, pj) })?;
            let (mut longitude, mut unit_conv_factor) = (0.0, 0.0);
            let ok = unsafe {
                proj_sys::proj_prime_meridian_get_parameters(
                    ctx,
                    pm.as_ptr(),
                    &mut longitude,
                    &mut unit_conv_factor,
                    ptr::null_mut(),
                )
            };
            (ok != 0).then_some(longitude * unit_conv_factor)
        })
    }

    unsafe fn linear_unit_to_metre(&self, handle: RawHandle, vertical: bool) -> Option<f64> {
        let crs = unsafe { Self::crs(handle) };
        let axes = crs.axes()?;
        let index = if vertical && axes.len() >= 3 { 2 } else { 0 };
        if index < 2 && crs.is_geographic() {
            // horizontal axes are angular; like the struct ABI, report no linear scaling
            return Some(1.0);
        }
        axes.get(index).map(|axis| axis.unit_conv_factor)
    }

    unsafe fn prepare<'a>(
        &'a self,
        source: RawHandle,
        target: RawHandle,
    ) -> Result<Box<dyn Operation + 'a>, c_int> {
        let (source, target) = unsafe { (Self::crs(source), Self::crs(target)) };
        let ctx = source.ctx();
        let operation = PjObject::new(unsafe {
            proj_sys::proj_create_crs_to_crs_from_pj(
                ctx,
                source.pj.as_ptr(),
                target.pj.as_ptr(),
                ptr::null_mut(),
                ptr::null(),
            )
        })
        .ok_or_else(|| source.failure_code())?;
        let normalized = PjObject::new(unsafe {
            proj_sys::proj_normalize_for_visualization(ctx, operation.as_ptr())
        })
        .ok_or_else(|| source.failure_code())?;
        Ok(Box::new(LinkedOperation {
            operation: normalized,
            source: source.crs_type(),
            target: target.crs_type(),
        }))
    }

    unsafe fn error_message(&self, handle: RawHandle, code: c_int) -> String {
        unsafe { Self::crs(handle) }.ctx.errno_string(code)
    }

    unsafe fn last_error(&self, handle: RawHandle) -> Option<String> {
        unsafe { Self::crs(handle) }.ctx.last_error()
    }

    unsafe fn destroy(&self, handle: RawHandle) {
        drop(unsafe { Box::from_raw(handle.cast::<LinkedCrs>().as_ptr()) });
    }
}

/// A normalized (longitude first, degrees) crs-to-crs operation.
struct LinkedOperation {
    operation: PjObject,
    source: CrsType,
    target: CrsType,
}

impl Operation for LinkedOperation {
    fn apply(&mut self, tuples: &mut Tuples<'_>) -> c_int {
        // The normalized operation takes degrees and metres.
        tuples.map_leading(self.source.angular_ordinates(), f64::to_degrees);
        let count = tuples.count();
        let status = if count == 0 {
            0
        } else {
            let dimension = tuples.dimension();
            let stride = dimension * mem::size_of::<f64>();
            let base = tuples.as_mut_ptr();
            let op = self.operation.as_ptr();
            // Safety: x, y and (for three or more dimensions) z start inside the first tuple
            // and advance by one tuple per coordinate, never past the end of the slice.
            unsafe {
                let (z, nz) = if dimension >= 3 {
                    (base.add(2), count)
                } else {
                    (ptr::null_mut(), 0)
                };
                proj_sys::proj_errno_reset(op);
                proj_sys::proj_trans_generic(
                    op,
                    proj_sys::PJ_DIRECTION_PJ_FWD,
                    base,
                    stride,
                    count,
                    base.add(1),
                    stride,
                    count,
                    z,
                    stride,
                    nz,
                    ptr::null_mut(),
                    0,
                    0,
                );
                proj_sys::proj_errno(op)
            }
        };
        tuples.map_leading(self.target.angular_ordinates(), f64::to_radians);
        status
    }
}
