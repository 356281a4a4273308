//! The `proj_api.h` ABI of PROJ 4 to 7, loaded at run time.
//!
//! This ABI keeps axis order, prime meridian, units and description in fields of its
//! internal struct, whose layout changed between releases. Those values are read back from
//! the expanded definition (`pj_get_def`) and the projection list (`pj_get_list_ref`)
//! instead.

use libc::{c_char, c_int, c_long, c_void};
use std::ffi::CStr;
use std::path::Path;
use std::ptr;

use super::{Backend, BackendError, Operation, RawHandle, Spheroid, Tuples};
use crate::crs_type::CrsType;
use crate::cstring_array::CStringArray;
use crate::dynlib::DynamicLibrary;
use crate::params::ProjParams;

type ProjPj = *mut c_void;
type ProjCtx = *mut c_void;

/// One entry of the library's projection list, terminated by a null `id`.
#[repr(C)]
pub(crate) struct PjListEntry {
    pub id: *const c_char,
    pub proj: *const c_void,
    pub descr: *const *const c_char,
}

macro_rules! resolve_all {
    ($library:expr, $($name:ident),+ $(,)?) => {
        LegacyApi {
            $($name: unsafe { $library.resolve(stringify!($name))? },)+
        }
    };
}

/// Entry points resolved from the library. Only valid while the library stays loaded.
struct LegacyApi {
    pj_get_release: unsafe extern "C" fn() -> *const c_char,
    pj_ctx_alloc: unsafe extern "C" fn() -> ProjCtx,
    pj_ctx_free: unsafe extern "C" fn(ProjCtx),
    pj_ctx_get_errno: unsafe extern "C" fn(ProjCtx) -> c_int,
    pj_init_plus_ctx: unsafe extern "C" fn(ProjCtx, *const c_char) -> ProjPj,
    pj_latlong_from_proj: unsafe extern "C" fn(ProjPj) -> ProjPj,
    pj_get_def: unsafe extern "C" fn(ProjPj, c_int) -> *mut c_char,
    pj_dalloc: unsafe extern "C" fn(*mut c_void),
    pj_is_latlong: unsafe extern "C" fn(ProjPj) -> c_int,
    pj_is_geocent: unsafe extern "C" fn(ProjPj) -> c_int,
    pj_get_spheroid_defn: unsafe extern "C" fn(ProjPj, *mut f64, *mut f64),
    pj_transform: unsafe extern "C" fn(
        ProjPj,
        ProjPj,
        c_long,
        c_int,
        *mut f64,
        *mut f64,
        *mut f64,
    ) -> c_int,
    pj_strerrno: unsafe extern "C" fn(c_int) -> *mut c_char,
    pj_free: unsafe extern "C" fn(ProjPj),
    pj_set_searchpath: unsafe extern "C" fn(c_int, *const *const c_char),
    pj_get_list_ref: unsafe extern "C" fn() -> *const PjListEntry,
}

impl LegacyApi {
    /// # Safety
    /// `library` must be a PROJ build exporting the `proj_api.h` functions.
    unsafe fn load(library: &DynamicLibrary) -> Result<Self, BackendError> {
        Ok(resolve_all!(
            library,
            pj_get_release,
            pj_ctx_alloc,
            pj_ctx_free,
            pj_ctx_get_errno,
            pj_init_plus_ctx,
            pj_latlong_from_proj,
            pj_get_def,
            pj_dalloc,
            pj_is_latlong,
            pj_is_geocent,
            pj_get_spheroid_defn,
            pj_transform,
            pj_strerrno,
            pj_free,
            pj_set_searchpath,
            pj_get_list_ref,
        ))
    }

    fn strerrno(&self, code: c_int) -> String {
        unsafe { crate::_string((self.pj_strerrno)(code)) }
            .unwrap_or_else(|| format!("PROJ error {code}"))
    }

    /// Expanded definition of `pj`, copied out of the library's allocation.
    fn get_def(&self, pj: ProjPj) -> Option<String> {
        let raw = unsafe { (self.pj_get_def)(pj, 0) };
        if raw.is_null() {
            return None;
        }
        let definition = unsafe { crate::_string(raw) };
        unsafe { (self.pj_dalloc)(raw.cast()) };
        definition.map(|def| def.trim().to_string())
    }

    /// Initialise `definition` on a fresh context, so every handle has a context of its own.
    fn init(&self, definition: &CStr) -> Result<LegacyCrs, String> {
        let ctx = unsafe { (self.pj_ctx_alloc)() };
        if ctx.is_null() {
            return Err("Unable to allocate a PROJ context".to_string());
        }
        let pj = unsafe { (self.pj_init_plus_ctx)(ctx, definition.as_ptr()) };
        if pj.is_null() {
            let message = match unsafe { (self.pj_ctx_get_errno)(ctx) } {
                0 => "Invalid PROJ definition".to_string(),
                code => self.strerrno(code),
            };
            unsafe { (self.pj_ctx_free)(ctx) };
            return Err(message);
        }
        let definition = self.get_def(pj).unwrap_or_default();
        Ok(LegacyCrs { pj, ctx, definition })
    }

    fn crs_type(&self, crs: &LegacyCrs) -> CrsType {
        let (geographic, geocentric) =
            unsafe { ((self.pj_is_latlong)(crs.pj) != 0, (self.pj_is_geocent)(crs.pj) != 0) };
        CrsType::classify(geographic, geocentric)
    }

    fn last_error(&self, crs: &LegacyCrs) -> Option<String> {
        match unsafe { (self.pj_ctx_get_errno)(crs.ctx) } {
            0 => None,
            code => Some(self.strerrno(code)),
        }
    }

    fn operation(&self, source: &LegacyCrs, target: &LegacyCrs) -> LegacyOperation<'_> {
        LegacyOperation {
            api: self,
            source: source.pj,
            target: target.pj,
            source_type: self.crs_type(source),
            target_type: self.crs_type(target),
        }
    }

    /// Free the CRS and then its context.
    ///
    /// # Safety
    /// `handle` must come from [`LegacyCrs::into_handle`] and not have been destroyed yet.
    unsafe fn destroy(&self, handle: RawHandle) {
        let crs = unsafe { Box::from_raw(handle.cast::<LegacyCrs>().as_ptr()) };
        unsafe {
            (self.pj_free)(crs.pj);
            (self.pj_ctx_free)(crs.ctx);
        }
    }
}

/// What a legacy [`RawHandle`] points to.
struct LegacyCrs {
    pj: ProjPj,
    ctx: ProjCtx,
    /// Expanded definition, read once at creation.
    definition: String,
}

impl LegacyCrs {
    fn params(&self) -> ProjParams<'_> {
        ProjParams::parse(&self.definition)
    }

    fn into_handle(self) -> RawHandle {
        ptr::NonNull::from(Box::leak(Box::new(self))).cast::<c_void>()
    }
}

/// First line of the description of projection `id` in a null-terminated projection list.
///
/// # Safety
/// `list` must be null or point to a list terminated by an entry with a null `id`.
pub(crate) unsafe fn find_description(list: *const PjListEntry, id: &str) -> Option<String> {
    if list.is_null() {
        return None;
    }
    let mut entry = list;
    loop {
        let current = unsafe { &*entry };
        if current.id.is_null() {
            return None;
        }
        if unsafe { CStr::from_ptr(current.id) }.to_bytes() == id.as_bytes() {
            if current.descr.is_null() {
                return None;
            }
            let text = unsafe { crate::_string(*current.descr) }?;
            return text.lines().next().map(|line| line.trim().to_string());
        }
        entry = unsafe { entry.add(1) };
    }
}

/// Backend over a `proj_api.h` library loaded from disk.
pub struct LegacyBackend {
    api: LegacyApi,
    // dropped last: the function pointers above point into it
    library: DynamicLibrary,
}

impl LegacyBackend {
    /// Load the library at `path` and resolve every entry point this backend uses.
    ///
    /// # Safety
    ///
    /// `path` must name a PROJ build that exports the `proj_api.h` functions with their
    /// documented signatures.
    pub(crate) unsafe fn open(path: impl AsRef<Path>, search_paths: &CStringArray) -> Result<Self, BackendError> {
        let library = unsafe { DynamicLibrary::open(path)? };
        let api = unsafe { LegacyApi::load(&library)? };
        if !search_paths.is_empty() {
            // the library copies the paths
            unsafe { (api.pj_set_searchpath)(search_paths.count(), search_paths.as_ptr()) };
        }
        tracing::debug!(path = %library.path().display(), "loaded legacy PROJ library");
        Ok(LegacyBackend { api, library })
    }

    pub fn path(&self) -> &Path {
        self.library.path()
    }

    /// # Safety
    /// `handle` must be a live handle from this backend.
    unsafe fn crs<'a>(handle: RawHandle) -> &'a LegacyCrs {
        unsafe { handle.cast::<LegacyCrs>().as_ref() }
    }
}

impl Backend for LegacyBackend {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn library_release(&self) -> Option<String> {
        unsafe { crate::_string((self.api.pj_get_release)()) }
    }

    fn create(&self, definition: &CStr) -> Result<RawHandle, String> {
        self.api.init(definition).map(LegacyCrs::into_handle)
    }

    unsafe fn geographic(&self, handle: RawHandle) -> Result<RawHandle, String> {
        let crs = unsafe { Self::crs(handle) };
        // The library derives on the source's context; re-create the result on its own.
        let derived = unsafe { (self.api.pj_latlong_from_proj)(crs.pj) };
        if derived.is_null() {
            return Err(self.api.strerrno(unsafe { (self.api.pj_ctx_get_errno)(crs.ctx) }));
        }
        let definition = self.api.get_def(derived);
        unsafe { (self.api.pj_free)(derived) };
        let definition = definition
            .and_then(|def| std::ffi::CString::new(def).ok())
            .ok_or_else(|| "Unable to read the geographic definition".to_string())?;
        self.create(&definition)
    }

    unsafe fn definition(&self, handle: RawHandle) -> Option<String> {
        let crs = unsafe { Self::crs(handle) };
        (!crs.definition.is_empty()).then(|| crs.definition.clone())
    }

    unsafe fn description(&self, handle: RawHandle) -> Option<String> {
        let crs = unsafe { Self::crs(handle) };
        let id = crs.params().projection()?.to_string();
        unsafe { find_description((self.api.pj_get_list_ref)(), &id) }
    }

    unsafe fn is_geographic(&self, handle: RawHandle) -> bool {
        unsafe { (self.api.pj_is_latlong)(Self::crs(handle).pj) != 0 }
    }

    unsafe fn is_geocentric(&self, handle: RawHandle) -> bool {
        unsafe { (self.api.pj_is_geocent)(Self::crs(handle).pj) != 0 }
    }

    unsafe fn spheroid(&self, handle: RawHandle) -> Option<Spheroid> {
        let crs = unsafe { Self::crs(handle) };
        let (mut a, mut es) = (0.0, 0.0);
        unsafe { (self.api.pj_get_spheroid_defn)(crs.pj, &mut a, &mut es) };
        (a > 0.0).then_some(Spheroid {
            semi_major_axis: a,
            eccentricity_squared: es,
        })
    }

    unsafe fn axis_directions(&self, handle: RawHandle) -> Option<String> {
        let crs = unsafe { Self::crs(handle) };
        Some(crs.params().axis().to_string())
    }

    unsafe fn prime_meridian(&self, handle: RawHandle) -> Option<f64> {
        let crs = unsafe { Self::crs(handle) };
        crs.params().prime_meridian_degrees().map(f64::to_radians)
    }

    unsafe fn linear_unit_to_metre(&self, handle: RawHandle, vertical: bool) -> Option<f64> {
        let crs = unsafe { Self::crs(handle) };
        crs.params().linear_unit_to_metre(vertical)
    }

    unsafe fn prepare<'a>(
        &'a self,
        source: RawHandle,
        target: RawHandle,
    ) -> Result<Box<dyn Operation + 'a>, c_int> {
        let (source, target) = unsafe { (Self::crs(source), Self::crs(target)) };
        Ok(Box::new(self.api.operation(source, target)))
    }

    unsafe fn error_message(&self, _handle: RawHandle, code: c_int) -> String {
        self.api.strerrno(code)
    }

    unsafe fn last_error(&self, handle: RawHandle) -> Option<String> {
        self.api.last_error(unsafe { Self::crs(handle) })
    }

    unsafe fn destroy(&self, handle: RawHandle) {
        unsafe { self.api.destroy(handle) }
    }
}

/// `pj_transform` between two handles.
struct LegacyOperation<'a> {
    api: &'a LegacyApi,
    source: ProjPj,
    target: ProjPj,
    source_type: CrsType,
    target_type: CrsType,
}

impl Operation for LegacyOperation<'_> {
    fn apply(&mut self, tuples: &mut Tuples<'_>) -> c_int {
        // pj_transform takes radians for geographic systems but metres for geocentric ones
        if self.source_type == CrsType::Geocentric {
            tuples.map_leading(3, f64::to_degrees);
        }
        let dimension = tuples.dimension();
        let status = match (c_long::try_from(tuples.count()), c_int::try_from(dimension)) {
            (Ok(0), _) => 0,
            (Ok(count), Ok(offset)) => {
                let base = tuples.as_mut_ptr();
                // Safety: x, y and z start inside the first tuple and step by `offset` values.
                unsafe {
                    let z = if dimension >= 3 {
                        base.add(2)
                    } else {
                        ptr::null_mut()
                    };
                    (self.api.pj_transform)(
                        self.source,
                        self.target,
                        count,
                        offset,
                        base,
                        base.add(1),
                        z,
                    )
                }
            }
            _ => libc::ERANGE,
        };
        if self.target_type == CrsType::Geocentric {
            tuples.map_leading(3, f64::to_radians);
        }
        status
    }
}
