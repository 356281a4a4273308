//! In-place transformation of interleaved coordinate tuples.
//!
//! A transform runs in three phases:
//!
//! 1. [`validate`] checks the arguments without touching the buffer;
//! 2. [`PreparedTransform::new`] classifies both systems and builds the native operation;
//! 3. [`PreparedTransform::run`] is the critical section. It converts the source's angular
//!    ordinates to radians, calls the native transform, and converts the target's back to
//!    degrees. Nothing in it blocks, logs or calls back into a managed runtime. The status
//!    it returns is turned into an error by [`PreparedTransform::finish`] once direct
//!    access to the buffer has been given up.

use libc::c_int;
use std::ops::Range;
use thiserror::Error;

use crate::backend::{Backend, Operation, RawHandle, Tuples};
use crate::crs_type::CrsType;

pub const MIN_DIMENSION: i64 = 2;
pub const MAX_DIMENSION: i64 = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("Illegal dimension: {0} (must be between 2 and 100)")]
    IllegalArgument(i64),
    #[error("{num_pts} points of dimension {dimension} from offset {offset} do not fit in {len} values")]
    OutOfBounds {
        offset: i64,
        dimension: i64,
        num_pts: i64,
        len: usize,
    },
    #[error("The coordinate systems were created by different backends")]
    MismatchedBackends,
    #[error("The underlying PROJ call failed: {0}")]
    Failed(String),
}

/// Where the tuples of a validated transform sit in their buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub dimension: usize,
    pub num_pts: usize,
}

impl Span {
    /// Every tuple of `dimension` values starting at offset zero.
    pub fn whole(len: usize, dimension: usize) -> Span {
        Span {
            offset: 0,
            dimension,
            num_pts: len / dimension.max(1),
        }
    }

    /// The indices covered, `offset .. offset + dimension * num_pts`.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.dimension * self.num_pts
    }
}

/// Check transform arguments before any native memory is touched.
///
/// `buffer_len` is `None` when the caller has no buffer at all. Checks run in a fixed order:
/// missing arguments, then the dimension, then the bounds (computed without overflow).
pub fn validate(
    target_present: bool,
    buffer_len: Option<usize>,
    dimension: i64,
    offset: i64,
    num_pts: i64,
) -> Result<Span, TransformError> {
    if !target_present {
        return Err(TransformError::MissingArgument("target"));
    }
    let len = buffer_len.ok_or(TransformError::MissingArgument("coordinates"))?;
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&dimension) {
        return Err(TransformError::IllegalArgument(dimension));
    }
    let out_of_bounds = || TransformError::OutOfBounds {
        offset,
        dimension,
        num_pts,
        len,
    };
    if offset < 0 || num_pts < 0 {
        return Err(out_of_bounds());
    }
    let end = dimension
        .checked_mul(num_pts)
        .and_then(|values| values.checked_add(offset))
        .ok_or_else(out_of_bounds)?;
    if u64::try_from(end).map_or(true, |end| end > len as u64) {
        return Err(out_of_bounds());
    }
    // every value is now at most `len`, so the conversions cannot fail
    let to_usize = |v: i64| usize::try_from(v).map_err(|_| out_of_bounds());
    Ok(Span {
        offset: to_usize(offset)?,
        dimension: to_usize(dimension)?,
        num_pts: to_usize(num_pts)?,
    })
}

/// A native operation between two live handles, ready to run.
pub struct PreparedTransform<'a> {
    backend: &'a dyn Backend,
    source: RawHandle,
    source_type: CrsType,
    target_type: CrsType,
    operation: Box<dyn Operation + 'a>,
}

impl<'a> PreparedTransform<'a> {
    /// # Safety
    ///
    /// `source` and `target` must be live handles of `backend` and stay alive for `'a`.
    pub unsafe fn new(
        backend: &'a dyn Backend,
        source: RawHandle,
        target: RawHandle,
    ) -> Result<Self, TransformError> {
        let classify = |handle| unsafe {
            CrsType::classify(backend.is_geographic(handle), backend.is_geocentric(handle))
        };
        let source_type = classify(source);
        let target_type = classify(target);
        let operation = unsafe { backend.prepare(source, target) }.map_err(|code| {
            let message = unsafe { backend.error_message(source, code) };
            tracing::warn!(backend = backend.name(), code, %message, "unable to prepare transform");
            TransformError::Failed(message)
        })?;
        Ok(PreparedTransform {
            backend,
            source,
            source_type,
            target_type,
            operation,
        })
    }

    /// Transform the tuples of `coordinates` covered by `span` and return the native status.
    ///
    /// This is the critical section.
    pub fn run(&mut self, coordinates: &mut [f64], span: Span) -> Result<c_int, TransformError> {
        let len = coordinates.len();
        let data = coordinates
            .get_mut(span.range())
            .ok_or(TransformError::OutOfBounds {
                offset: span.offset as i64,
                dimension: span.dimension as i64,
                num_pts: span.num_pts as i64,
                len,
            })?;
        let mut tuples = Tuples::new(data, span.dimension);
        tuples.map_leading(self.source_type.angular_ordinates(), f64::to_radians);
        let status = self.operation.apply(&mut tuples);
        tuples.map_leading(self.target_type.angular_ordinates(), f64::to_degrees);
        Ok(status)
    }

    /// Turn a status from [`run`](Self::run) into a result. Call after leaving the critical
    /// section.
    pub fn finish(&self, status: c_int) -> Result<(), TransformError> {
        if status == 0 {
            return Ok(());
        }
        let message = unsafe { self.backend.error_message(self.source, status) };
        tracing::warn!(backend = self.backend.name(), status, %message, "transform failed");
        Err(TransformError::Failed(message))
    }
}

/// Validate-free core of a transform over a buffer the caller already owns.
///
/// A missing handle on either side makes this a no-op.
///
/// # Safety
///
/// Present handles must be live handles of `backend`.
pub(crate) unsafe fn transform_in_place(
    backend: &dyn Backend,
    source: Option<RawHandle>,
    target: Option<RawHandle>,
    coordinates: &mut [f64],
    span: Span,
) -> Result<(), TransformError> {
    let (Some(source), Some(target)) = (source, target) else {
        return Ok(());
    };
    let mut prepared = unsafe { PreparedTransform::new(backend, source, target)? };
    let status = prepared.run(coordinates, span)?;
    prepared.finish(status)
}
