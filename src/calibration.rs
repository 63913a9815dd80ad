use nalgebra::{Matrix3, Point2, Point3, Vector3};
use tracing::{debug, warn};

use crate::{
    chessboard::{CheckerboardGeometry, CornerExtractor},
    config::Intrinsics,
    error::{Result, TrackerError},
    frame::Frame,
    vision::CalibrationBackend,
};

/// Output of one calibration solve.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationResult {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: [f64; 5],
    /// One Rodrigues vector per contributing image, in input order.
    pub rotations: Vec<Vector3<f64>>,
    pub translations: Vec<Vector3<f64>>,
    pub rms_error: f64,
    pub image_size: (u32, u32),
}

impl CalibrationResult {
    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics {
            camera_matrix: self.camera_matrix,
            distortion: self.distortion,
        }
    }
}

/// An annotated copy of an input frame in which the board was found.
#[derive(Clone, Debug)]
pub struct ProcessedImage {
    /// Position of the source frame in the sequence fed to the aggregator.
    pub input_index: usize,
    pub image: Frame,
}

#[derive(Debug)]
pub struct Aggregation {
    pub result: CalibrationResult,
    pub processed: Vec<ProcessedImage>,
    pub supplied: usize,
}

impl Aggregation {
    pub fn success_count(&self) -> usize {
        self.processed.len()
    }
}

/// Collects corner observations frame by frame and runs the solver once.
pub struct CalibrationAggregator<'a, B: ?Sized> {
    backend: &'a B,
    extractor: CornerExtractor<'a, B>,
    board_points: Vec<Point3<f32>>,
    object_points: Vec<Vec<Point3<f32>>>,
    image_points: Vec<Vec<Point2<f32>>>,
    processed: Vec<ProcessedImage>,
    image_size: Option<(u32, u32)>,
    supplied: usize,
}

impl<'a, B: CalibrationBackend + ?Sized> CalibrationAggregator<'a, B> {
    pub fn new(backend: &'a B, geometry: CheckerboardGeometry) -> Self {
        Self {
            backend,
            extractor: CornerExtractor::new(backend, geometry),
            board_points: geometry.object_points(),
            object_points: Vec::new(),
            image_points: Vec::new(),
            processed: Vec::new(),
            image_size: None,
            supplied: 0,
        }
    }

    /// Returns whether the frame contributed to the calibration.
    pub fn add_frame(&mut self, frame: &Frame) -> Result<bool> {
        let index = self.supplied;
        self.supplied += 1;

        let Some(observation) = self.extractor.extract(frame)? else {
            debug!(index, "checkerboard not found");
            return Ok(false);
        };

        let mut annotated = frame.clone();
        self.extractor.draw(&mut annotated, &observation)?;

        self.image_size.get_or_insert(frame.size());
        self.object_points.push(self.board_points.clone());
        self.image_points.push(observation.corners);
        self.processed.push(ProcessedImage {
            input_index: index,
            image: annotated,
        });
        debug!(index, "checkerboard found");
        Ok(true)
    }

    pub fn success_count(&self) -> usize {
        self.processed.len()
    }

    pub fn finish(self) -> Result<Aggregation> {
        let Some(image_size) = self.image_size else {
            return Err(TrackerError::NoUsableImages {
                supplied: self.supplied,
            });
        };
        let successes = self.processed.len();
        if successes * 2 < self.supplied {
            warn!(
                successes,
                supplied = self.supplied,
                "fewer than half of the images show the checkerboard; the calibration may be inaccurate"
            );
        }

        let result = self
            .backend
            .calibrate(&self.object_points, &self.image_points, image_size)?;
        debug!(rms = result.rms_error, "calibration solved");
        Ok(Aggregation {
            result,
            processed: self.processed,
            supplied: self.supplied,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Stand-in vision backend: a frame "shows the board" when its first byte
    //! is non-zero.

    use std::cell::Cell;

    use super::*;
    use crate::vision::{CalibrationSolver, CornerFinder, RefineCriteria};

    #[derive(Default)]
    pub struct StubBackend {
        pub solves: Cell<usize>,
    }

    impl CornerFinder for StubBackend {
        fn find_corners(
            &self,
            gray: &Frame,
            geometry: CheckerboardGeometry,
        ) -> Result<Option<Vec<Point2<f32>>>> {
            if gray.data().first().copied().unwrap_or(0) == 0 {
                return Ok(None);
            }
            let corners = geometry
                .object_points()
                .iter()
                .map(|p| Point2::new(10.0 + 20.0 * p.x, 10.0 + 20.0 * p.y))
                .collect();
            Ok(Some(corners))
        }

        fn refine_corners(
            &self,
            _gray: &Frame,
            _corners: &mut [Point2<f32>],
            _criteria: &RefineCriteria,
        ) -> Result<()> {
            Ok(())
        }

        fn draw_corners(
            &self,
            image: &mut Frame,
            _geometry: CheckerboardGeometry,
            _corners: &[Point2<f32>],
        ) -> Result<()> {
            if let Some(last) = image.data_mut().last_mut() {
                *last = 255;
            }
            Ok(())
        }
    }

    impl CalibrationSolver for StubBackend {
        fn calibrate(
            &self,
            object_points: &[Vec<Point3<f32>>],
            image_points: &[Vec<Point2<f32>>],
            image_size: (u32, u32),
        ) -> Result<CalibrationResult> {
            assert_eq!(object_points.len(), image_points.len());
            self.solves.set(self.solves.get() + 1);
            let (w, h) = image_size;
            let n = image_points.len();
            Ok(CalibrationResult {
                camera_matrix: Matrix3::new(
                    800.0,
                    0.0,
                    f64::from(w) / 2.0,
                    0.0,
                    810.0,
                    f64::from(h) / 2.0,
                    0.0,
                    0.0,
                    1.0,
                ),
                distortion: [0.01, -0.02, 0.0, 0.0, 0.003],
                rotations: vec![Vector3::zeros(); n],
                translations: vec![Vector3::new(0.0, 0.0, 1.0); n],
                rms_error: 0.25,
                image_size,
            })
        }
    }
}
