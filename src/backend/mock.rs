//! An instrumented in-memory backend for tests.
//!
//! Geographic and projected systems are related by a plain equirectangular mapping
//! (`x = a·λ`, `y = a·φ`), which is enough to exercise the marshaling around a transform.
//!
//! Special projection ids: `bogus` fails to allocate, `unprepared` fails to build an
//! operation, `fail` makes every transform report status -14.

use libc::c_int;
use std::cell::Cell;
use std::ffi::{CStr, c_void};
use std::ptr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{Backend, Operation, RawHandle, Spheroid, Tuples};
use crate::crs_type::CrsType;
use crate::params::ProjParams;

pub(crate) const TRANSFORM_FAILURE: c_int = -14;
const PREPARE_FAILURE: c_int = -5;
const MIXED_GEOCENTRIC: c_int = -45;

struct MockCrs {
    definition: String,
    projection: String,
    crs_type: CrsType,
    spheroid: Spheroid,
    errno: Cell<c_int>,
}

#[derive(Default)]
pub(crate) struct MockBackend {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    applied: AtomicUsize,
    last_input: Mutex<Vec<f64>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.destroyed()
    }

    /// How many times a native transform ran.
    pub fn applied(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Tuples as the most recent native transform received them.
    pub fn last_input(&self) -> Vec<f64> {
        self.last_input.lock().map(|v| v.clone()).unwrap_or_default()
    }

    unsafe fn crs<'a>(handle: RawHandle) -> &'a MockCrs {
        unsafe { handle.cast::<MockCrs>().as_ref() }
    }

    fn spheroid_of(params: &ProjParams<'_>) -> Spheroid {
        let a = params.get("a").and_then(|a| a.parse().ok());
        let es = params.get("es").and_then(|es| es.parse().ok());
        match (params.get("ellps"), a, es) {
            (_, Some(a), Some(es)) => Spheroid {
                semi_major_axis: a,
                eccentricity_squared: es,
            },
            (Some("sphere"), _, _) => Spheroid {
                semi_major_axis: 6_370_997.0,
                eccentricity_squared: 0.0,
            },
            _ => Spheroid {
                semi_major_axis: 6_378_137.0,
                eccentricity_squared: 0.006_694_379_990_141_317,
            },
        }
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn library_release(&self) -> Option<String> {
        Some("Rel. mock".to_string())
    }

    fn create(&self, definition: &CStr) -> Result<RawHandle, String> {
        let definition = definition.to_str().map_err(|e| e.to_string())?;
        let params = ProjParams::parse(definition);
        let projection = params.projection().ok_or("projection not named")?;
        let crs_type = match projection {
            "bogus" => return Err("unknown projection id".to_string()),
            "longlat" | "latlong" | "lonlat" | "latlon" => CrsType::Geographic,
            "geocent" => CrsType::Geocentric,
            _ => CrsType::Projected,
        };
        let crs = MockCrs {
            definition: definition.trim().to_string(),
            projection: projection.to_string(),
            crs_type,
            spheroid: Self::spheroid_of(&params),
            errno: Cell::new(0),
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ptr::NonNull::from(Box::leak(Box::new(crs))).cast::<c_void>())
    }

    unsafe fn geographic(&self, handle: RawHandle) -> Result<RawHandle, String> {
        let spheroid = unsafe { Self::crs(handle) }.spheroid;
        let definition = format!(
            "+proj=longlat +a={} +es={}",
            spheroid.semi_major_axis, spheroid.eccentricity_squared
        );
        let definition = std::ffi::CString::new(definition).map_err(|e| e.to_string())?;
        self.create(&definition)
    }

    unsafe fn definition(&self, handle: RawHandle) -> Option<String> {
        Some(unsafe { Self::crs(handle) }.definition.clone())
    }

    unsafe fn description(&self, handle: RawHandle) -> Option<String> {
        Some(format!("mock {}", unsafe { Self::crs(handle) }.projection))
    }

    unsafe fn is_geographic(&self, handle: RawHandle) -> bool {
        unsafe { Self::crs(handle) }.crs_type == CrsType::Geographic
    }

    unsafe fn is_geocentric(&self, handle: RawHandle) -> bool {
        unsafe { Self::crs(handle) }.crs_type == CrsType::Geocentric
    }

    unsafe fn spheroid(&self, handle: RawHandle) -> Option<Spheroid> {
        Some(unsafe { Self::crs(handle) }.spheroid)
    }

    unsafe fn axis_directions(&self, handle: RawHandle) -> Option<String> {
        let crs = unsafe { Self::crs(handle) };
        Some(ProjParams::parse(&crs.definition).axis().to_string())
    }

    unsafe fn prime_meridian(&self, handle: RawHandle) -> Option<f64> {
        let crs = unsafe { Self::crs(handle) };
        ProjParams::parse(&crs.definition)
            .prime_meridian_degrees()
            .map(f64::to_radians)
    }

    unsafe fn linear_unit_to_metre(&self, handle: RawHandle, vertical: bool) -> Option<f64> {
        let crs = unsafe { Self::crs(handle) };
        ProjParams::parse(&crs.definition).linear_unit_to_metre(vertical)
    }

    unsafe fn prepare<'a>(
        &'a self,
        source: RawHandle,
        target: RawHandle,
    ) -> Result<Box<dyn Operation + 'a>, c_int> {
        let (source, target) = unsafe { (Self::crs(source), Self::crs(target)) };
        if source.projection == "unprepared" || target.projection == "unprepared" {
            source.errno.set(PREPARE_FAILURE);
            return Err(PREPARE_FAILURE);
        }
        Ok(Box::new(MockOperation {
            backend: self,
            source,
            target,
        }))
    }

    unsafe fn error_message(&self, _handle: RawHandle, code: c_int) -> String {
        format!("mock error {code}")
    }

    unsafe fn last_error(&self, handle: RawHandle) -> Option<String> {
        match unsafe { Self::crs(handle) }.errno.get() {
            0 => None,
            code => Some(format!("mock error {code}")),
        }
    }

    unsafe fn destroy(&self, handle: RawHandle) {
        drop(unsafe { Box::from_raw(handle.cast::<MockCrs>().as_ptr()) });
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockOperation<'a> {
    backend: &'a MockBackend,
    source: &'a MockCrs,
    target: &'a MockCrs,
}

impl Operation for MockOperation<'_> {
    fn apply(&mut self, tuples: &mut Tuples<'_>) -> c_int {
        self.backend.applied.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.backend.last_input.lock() {
            *last = tuples.as_slice().to_vec();
        }
        if self.source.projection == "fail" || self.target.projection == "fail" {
            self.source.errno.set(TRANSFORM_FAILURE);
            return TRANSFORM_FAILURE;
        }
        let a = self.source.spheroid.semi_major_axis;
        match (self.source.crs_type, self.target.crs_type) {
            (s, t) if s == t => {}
            (CrsType::Geographic, CrsType::Projected) => tuples.map_leading(2, |v| v * a),
            (CrsType::Projected, CrsType::Geographic) => tuples.map_leading(2, |v| v / a),
            _ => {
                self.source.errno.set(MIXED_GEOCENTRIC);
                return MIXED_GEOCENTRIC;
            }
        }
        0
    }
}
