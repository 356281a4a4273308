use geo_types::{Coord, CoordFloat, LineString, Point};
use num_traits::{NumCast, ToPrimitive};
use std::sync::Arc;
use thiserror::Error;

use crate::backend::Backend;
use crate::pj::{Pj, PjCreateError};
use crate::transform::TransformError;

#[derive(Error, Debug)]
pub enum TransformDefinitionsError {
    #[error(transparent)]
    Create(#[from] PjCreateError),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Transform a geometry between two coordinate reference systems.
///
/// Geographic coordinates are longitude (`x`) and latitude (`y`) in degrees.
pub trait Transform<T: CoordFloat> {
    type Output;

    /// Transform a geometry by mutating it in place.
    ///
    /// # Examples
    ///
    /// ```
    /// use approx::assert_relative_eq;
    /// use geo_types::point;
    /// use proj_bridge::{Config, Pj, Transform};
    ///
    /// let backend = Config::new().backend().unwrap();
    /// let utm = Pj::new(backend, "+proj=utm +zone=33 +ellps=WGS84").unwrap();
    /// let wgs84 = utm.geographic().unwrap();
    ///
    /// let mut point = point!(x: 15.0, y: 52.0);
    /// point.transform(&wgs84, &utm).unwrap();
    /// assert_relative_eq!(point.x(), 500_000.0, epsilon = 1e-3);
    /// ```
    fn transform(&mut self, source: &Pj, target: &Pj) -> Result<(), TransformError>;

    /// Immutable flavor of [`Transform::transform`], which allocates a new geometry.
    fn transformed(&self, source: &Pj, target: &Pj) -> Result<Self::Output, TransformError>;

    /// Allocate both systems from their definitions on `backend`, then transform in place.
    fn transform_definitions(
        &mut self,
        backend: &Arc<dyn Backend>,
        source: &str,
        target: &str,
    ) -> Result<(), TransformDefinitionsError> {
        let source = Pj::new(backend.clone(), source)?;
        let target = Pj::new(backend.clone(), target)?;
        Ok(self.transform(&source, &target)?)
    }
}

fn transform_coords<T: CoordFloat>(
    coords: &mut [Coord<T>],
    source: &Pj,
    target: &Pj,
) -> Result<(), TransformError> {
    let mut buffer: Vec<f64> = coords
        .iter()
        .flat_map(|c| [ToPrimitive::to_f64(&c.x), ToPrimitive::to_f64(&c.y)])
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    source.transform_all(target, 2, &mut buffer)?;
    let from_f64 = |v: f64| <T as NumCast>::from(v).unwrap_or_else(T::nan);
    for (coord, xy) in coords.iter_mut().zip(buffer.chunks_exact(2)) {
        coord.x = from_f64(xy[0]);
        coord.y = from_f64(xy[1]);
    }
    Ok(())
}

impl<T: CoordFloat> Transform<T> for Coord<T> {
    type Output = Self;

    fn transform(&mut self, source: &Pj, target: &Pj) -> Result<(), TransformError> {
        transform_coords(std::slice::from_mut(self), source, target)
    }

    fn transformed(&self, source: &Pj, target: &Pj) -> Result<Self::Output, TransformError> {
        let mut output = *self;
        output.transform(source, target)?;
        Ok(output)
    }
}

impl<T: CoordFloat> Transform<T> for Point<T> {
    type Output = Self;

    fn transform(&mut self, source: &Pj, target: &Pj) -> Result<(), TransformError> {
        self.0.transform(source, target)
    }

    fn transformed(&self, source: &Pj, target: &Pj) -> Result<Self::Output, TransformError> {
        let mut output = *self;
        output.transform(source, target)?;
        Ok(output)
    }
}

impl<T: CoordFloat> Transform<T> for LineString<T> {
    type Output = Self;

    fn transform(&mut self, source: &Pj, target: &Pj) -> Result<(), TransformError> {
        transform_coords(&mut self.0, source, target)
    }

    fn transformed(&self, source: &Pj, target: &Pj) -> Result<Self::Output, TransformError> {
        let mut output = self.clone();
        output.transform(source, target)?;
        Ok(output)
    }
}

impl<T: CoordFloat> Transform<T> for [Coord<T>] {
    type Output = Vec<Coord<T>>;

    fn transform(&mut self, source: &Pj, target: &Pj) -> Result<(), TransformError> {
        transform_coords(self, source, target)
    }

    fn transformed(&self, source: &Pj, target: &Pj) -> Result<Self::Output, TransformError> {
        let mut output = self.to_vec();
        transform_coords(&mut output, source, target)?;
        Ok(output)
    }
}
