//! Seams to the external vision library.
//!
//! Everything numerical (corner finding, sub-pixel refinement, the
//! calibration solver, marker detection and pose solving) is consumed through
//! these traits. [`crate::cv`] implements them on top of OpenCV; tests use
//! small stand-ins.

use nalgebra::{Point2, Point3, Vector3};

use crate::{
    calibration::CalibrationResult,
    chessboard::CheckerboardGeometry,
    config::Intrinsics,
    error::Result,
    frame::Frame,
};

/// Iterative refinement budget for sub-pixel corner search.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RefineCriteria {
    pub max_iterations: i32,
    pub epsilon: f64,
    /// Half side length of the search window, in pixels.
    pub window: (i32, i32),
}

impl Default for RefineCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            epsilon: 0.001,
            window: (11, 11),
        }
    }
}

pub trait CornerFinder {
    /// Single-channel copy of `image` for the corner search.
    fn to_gray(&self, image: &Frame) -> Result<Frame> {
        Ok(image.to_gray())
    }

    /// Returns `None` when the pattern is not in the image.
    fn find_corners(
        &self,
        gray: &Frame,
        geometry: CheckerboardGeometry,
    ) -> Result<Option<Vec<Point2<f32>>>>;

    fn refine_corners(
        &self,
        gray: &Frame,
        corners: &mut [Point2<f32>],
        criteria: &RefineCriteria,
    ) -> Result<()>;

    fn draw_corners(
        &self,
        image: &mut Frame,
        geometry: CheckerboardGeometry,
        corners: &[Point2<f32>],
    ) -> Result<()>;
}

pub trait CalibrationSolver {
    fn calibrate(
        &self,
        object_points: &[Vec<Point3<f32>>],
        image_points: &[Vec<Point2<f32>>],
        image_size: (u32, u32),
    ) -> Result<CalibrationResult>;
}

/// Marker id and its corners, top-left first, clockwise.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectedMarker {
    pub id: i32,
    pub corners: [Point2<f32>; 4],
}

pub trait MarkerDetector {
    fn detect_markers(&self, image: &Frame) -> Result<Vec<DetectedMarker>>;

    fn draw_markers(&self, image: &mut Frame, markers: &[DetectedMarker]) -> Result<()>;
}

/// Rotation (Rodrigues vector) and translation of a target in camera space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pose {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

pub trait PoseSolver {
    fn solve_pose(
        &self,
        object_points: &[Point3<f32>; 4],
        image_points: &[Point2<f32>; 4],
        intrinsics: &Intrinsics,
    ) -> Result<Pose>;

    /// Draws the pose axes plus the X/Y/Z readout under the marker.
    fn draw_pose(
        &self,
        image: &mut Frame,
        intrinsics: &Intrinsics,
        marker: &DetectedMarker,
        pose: &Pose,
        axis_length: f32,
    ) -> Result<()>;
}

/// Everything a calibration run needs from the vision library.
pub trait CalibrationBackend: CornerFinder + CalibrationSolver {}

impl<T: CornerFinder + CalibrationSolver> CalibrationBackend for T {}

/// Everything the tracking loop needs from the vision library.
pub trait TrackingBackend: MarkerDetector + PoseSolver {}

impl<T: MarkerDetector + PoseSolver> TrackingBackend for T {}
