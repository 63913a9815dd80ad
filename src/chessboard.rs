use nalgebra::{Point2, Point3};
use tracing::trace;

use crate::{
    error::{Result, TrackerError},
    frame::Frame,
    vision::{CornerFinder, RefineCriteria},
};

/// Checkerboard size in inner corners (squares minus one per direction).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CheckerboardGeometry {
    wide: u32,
    high: u32,
}

impl CheckerboardGeometry {
    pub fn new(wide: u32, high: u32) -> Result<Self> {
        let fits = |n: u32| n > 0 && i32::try_from(n).is_ok();
        if !fits(wide) || !fits(high) {
            return Err(TrackerError::InvalidGeometry { wide, high });
        }
        Ok(Self { wide, high })
    }

    pub fn inner_corners_wide(&self) -> u32 {
        self.wide
    }

    pub fn inner_corners_high(&self) -> u32 {
        self.high
    }

    pub fn corner_count(&self) -> usize {
        self.wide as usize * self.high as usize
    }

    /// Pattern size as the corner finder wants it: (points per row, rows).
    /// Both fit in `i32`, `new` checks that.
    pub fn pattern_size(&self) -> (i32, i32) {
        (self.high as i32, self.wide as i32)
    }

    /// Board points in board units, z = 0. Rows run along `wide`, each row
    /// holds `high` points, which is the order the corner finder reports.
    pub fn object_points(&self) -> Vec<Point3<f32>> {
        let mut points = Vec::with_capacity(self.corner_count());
        for c in 0..self.wide {
            for r in 0..self.high {
                points.push(Point3::new(r as f32, c as f32, 0.0));
            }
        }
        points
    }
}

impl Default for CheckerboardGeometry {
    fn default() -> Self {
        Self { wide: 8, high: 5 }
    }
}

/// Refined image locations of every inner corner of one board view.
#[derive(Clone, Debug, PartialEq)]
pub struct CornerObservation {
    pub corners: Vec<Point2<f32>>,
}

pub struct CornerExtractor<'a, F: ?Sized> {
    finder: &'a F,
    geometry: CheckerboardGeometry,
    criteria: RefineCriteria,
}

impl<'a, F: CornerFinder + ?Sized> CornerExtractor<'a, F> {
    pub fn new(finder: &'a F, geometry: CheckerboardGeometry) -> Self {
        Self {
            finder,
            geometry,
            criteria: RefineCriteria::default(),
        }
    }

    pub fn geometry(&self) -> CheckerboardGeometry {
        self.geometry
    }

    /// Returns `Ok(None)` if the board is not visible. That is an expected
    /// outcome, not an error.
    pub fn extract(&self, frame: &Frame) -> Result<Option<CornerObservation>> {
        let gray = self.finder.to_gray(frame)?;
        let Some(mut corners) = self.finder.find_corners(&gray, self.geometry)? else {
            return Ok(None);
        };
        if corners.len() != self.geometry.corner_count() {
            trace!(
                found = corners.len(),
                expected = self.geometry.corner_count(),
                "partial board rejected"
            );
            return Ok(None);
        }
        self.finder
            .refine_corners(&gray, &mut corners, &self.criteria)?;
        Ok(Some(CornerObservation { corners }))
    }

    pub fn draw(&self, image: &mut Frame, observation: &CornerObservation) -> Result<()> {
        self.finder
            .draw_corners(image, self.geometry, &observation.corners)
    }
}
