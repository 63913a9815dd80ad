use nalgebra::{Matrix3, Point2, Point3, Vector3};
use opencv::{
    calib3d::{
        calibrate_camera, draw_chessboard_corners, draw_frame_axes, find_chessboard_corners,
        solve_pnp, CALIB_CB_ADAPTIVE_THRESH, CALIB_CB_FAST_CHECK, CALIB_CB_NORMALIZE_IMAGE,
        SOLVEPNP_IPPE_SQUARE,
    },
    core::{
        Mat, Point, Point2f, Point3f, Scalar, Size, TermCriteria, TermCriteria_COUNT,
        TermCriteria_EPS, TermCriteria_MAX_ITER, Vector,
    },
    imgproc::{corner_sub_pix, cvt_color, put_text, COLOR_BGR2GRAY, FONT_HERSHEY_SIMPLEX, LINE_AA},
    objdetect::{
        draw_detected_markers, generate_image_marker, get_predefined_dictionary_i32,
        ArucoDetector, DetectorParameters, Dictionary, RefineParameters,
    },
    prelude::*,
};
use tracing::{debug, trace};

use super::{frame_to_bgr_mat, frame_to_mat, mat_to_frame, nalg_to_mat};
use crate::{
    calibration::CalibrationResult,
    chessboard::CheckerboardGeometry,
    config::Intrinsics,
    dictionary::ArucoDictionary,
    error::{Result, TrackerError},
    frame::{Frame, PixelFormat},
    vision::{
        CalibrationSolver, CornerFinder, DetectedMarker, MarkerDetector, Pose, PoseSolver,
        RefineCriteria,
    },
};

const TEXT_SCALE: f64 = 1.0;
const TEXT_LINE_HEIGHT: f32 = 30.0;
const TEXT_THICKNESS: i32 = 2;
const AXIS_THICKNESS: i32 = 2;

/// All vision collaborators backed by OpenCV.
pub struct OpenCvBackend {
    dictionary: ArucoDictionary,
    aruco: Dictionary,
    detector: ArucoDetector,
}

impl OpenCvBackend {
    pub fn new(dictionary: ArucoDictionary) -> Result<Self> {
        let aruco = get_predefined_dictionary_i32(dictionary.id())?;
        let detector = ArucoDetector::new(
            &aruco,
            &DetectorParameters::default()?,
            RefineParameters::new(10., 3., true)?,
        )?;
        debug!(%dictionary, "aruco detector ready");
        Ok(Self {
            dictionary,
            aruco,
            detector,
        })
    }

    pub fn dictionary(&self) -> ArucoDictionary {
        self.dictionary
    }

    /// Marker bitmap with a one-cell border, one pixel per cell, black = 0.
    pub fn marker_cells(&self, id: i32) -> Result<Frame> {
        let cells = self.dictionary.marker_bits() as i32 + 2;
        let mut image = Mat::default();
        generate_image_marker(&self.aruco, id, cells, &mut image, 1)?;
        mat_to_frame(&image)
    }
}

fn to_cv_points(points: &[Point2<f32>]) -> Vector<Point2f> {
    points.iter().map(|p| Point2f::new(p.x, p.y)).collect()
}

fn to_cv_points3(points: &[Point3<f32>]) -> Vector<Point3f> {
    points.iter().map(|p| Point3f::new(p.x, p.y, p.z)).collect()
}

fn size_of(geometry: CheckerboardGeometry) -> Size {
    let (points_per_row, rows) = geometry.pattern_size();
    Size::new(points_per_row, rows)
}

fn vec3(mat: &Mat) -> Result<Vector3<f64>> {
    Ok(Vector3::new(
        *mat.at::<f64>(0)?,
        *mat.at::<f64>(1)?,
        *mat.at::<f64>(2)?,
    ))
}

/// Runs `draw` on a BGR copy of `image` and stores the result back.
fn draw_on(image: &mut Frame, draw: impl FnOnce(&mut Mat) -> Result<()>) -> Result<()> {
    let mut mat = frame_to_bgr_mat(image)?;
    draw(&mut mat)?;
    *image = mat_to_frame(&mat)?;
    Ok(())
}

impl CornerFinder for OpenCvBackend {
    fn to_gray(&self, image: &Frame) -> Result<Frame> {
        if image.format() == PixelFormat::Gray8 {
            return Ok(image.clone());
        }
        let mut gray = Mat::default();
        cvt_color(&frame_to_mat(image)?, &mut gray, COLOR_BGR2GRAY, 0)?;
        mat_to_frame(&gray)
    }

    fn find_corners(
        &self,
        gray: &Frame,
        geometry: CheckerboardGeometry,
    ) -> Result<Option<Vec<Point2<f32>>>> {
        let image = frame_to_mat(gray)?;
        let mut corners = Vector::<Point2f>::new();
        let found = find_chessboard_corners(
            &image,
            size_of(geometry),
            &mut corners,
            CALIB_CB_ADAPTIVE_THRESH | CALIB_CB_FAST_CHECK | CALIB_CB_NORMALIZE_IMAGE,
        )?;
        trace!(found, corners = corners.len(), "find_chessboard_corners");
        if !found {
            return Ok(None);
        }
        Ok(Some(corners.iter().map(|p| Point2::new(p.x, p.y)).collect()))
    }

    fn refine_corners(
        &self,
        gray: &Frame,
        corners: &mut [Point2<f32>],
        criteria: &RefineCriteria,
    ) -> Result<()> {
        let image = frame_to_mat(gray)?;
        let mut cv_corners = to_cv_points(corners);
        let term = TermCriteria {
            typ: TermCriteria_EPS + TermCriteria_MAX_ITER,
            max_count: criteria.max_iterations,
            epsilon: criteria.epsilon,
        };
        let (w, h) = criteria.window;
        corner_sub_pix(&image, &mut cv_corners, Size::new(w, h), Size::new(-1, -1), term)?;
        for (dst, src) in corners.iter_mut().zip(cv_corners.iter()) {
            *dst = Point2::new(src.x, src.y);
        }
        Ok(())
    }

    fn draw_corners(
        &self,
        image: &mut Frame,
        geometry: CheckerboardGeometry,
        corners: &[Point2<f32>],
    ) -> Result<()> {
        let cv_corners = to_cv_points(corners);
        draw_on(image, |mat| {
            draw_chessboard_corners(mat, size_of(geometry), &cv_corners, true)?;
            Ok(())
        })
    }
}

impl CalibrationSolver for OpenCvBackend {
    fn calibrate(
        &self,
        object_points: &[Vec<Point3<f32>>],
        image_points: &[Vec<Point2<f32>>],
        image_size: (u32, u32),
    ) -> Result<CalibrationResult> {
        let object: Vector<Vector<Point3f>> =
            object_points.iter().map(|v| to_cv_points3(v)).collect();
        let image: Vector<Vector<Point2f>> = image_points.iter().map(|v| to_cv_points(v)).collect();
        let mut camera_matrix = Mat::default();
        let mut dist_coeffs = Mat::default();
        let mut rvecs = Vector::<Mat>::new();
        let mut tvecs = Vector::<Mat>::new();
        let criteria = TermCriteria {
            typ: TermCriteria_EPS + TermCriteria_COUNT,
            max_count: 30,
            epsilon: f64::EPSILON,
        };
        let (w, h) = image_size;
        let rms_error = calibrate_camera(
            &object,
            &image,
            Size::new(w as i32, h as i32),
            &mut camera_matrix,
            &mut dist_coeffs,
            &mut rvecs,
            &mut tvecs,
            0,
            criteria,
        )?;
        debug!(rms_error, views = object.len(), "calibrate_camera");

        let mut m = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                m[(r, c)] = *camera_matrix.at_2d::<f64>(r as i32, c as i32)?;
            }
        }
        let mut distortion = [0.0; 5];
        let available = dist_coeffs.total().min(5);
        for (i, d) in distortion.iter_mut().enumerate().take(available) {
            *d = *dist_coeffs.at::<f64>(i as i32)?;
        }

        Ok(CalibrationResult {
            camera_matrix: m,
            distortion,
            rotations: rvecs.iter().map(|v| vec3(&v)).collect::<Result<_>>()?,
            translations: tvecs.iter().map(|v| vec3(&v)).collect::<Result<_>>()?,
            rms_error,
            image_size,
        })
    }
}

impl MarkerDetector for OpenCvBackend {
    fn detect_markers(&self, image: &Frame) -> Result<Vec<DetectedMarker>> {
        let mat = frame_to_mat(image)?;
        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        let mut rejected = Vector::<Vector<Point2f>>::new();
        self.detector
            .detect_markers(&mat, &mut corners, &mut ids, &mut rejected)?;

        let mut markers = Vec::with_capacity(ids.len());
        for (id, quad) in ids.iter().zip(corners.iter()) {
            if quad.len() != 4 {
                return Err(TrackerError::Vision(format!(
                    "marker {id} has {} corners",
                    quad.len()
                )));
            }
            let mut pts = [Point2::origin(); 4];
            for (dst, src) in pts.iter_mut().zip(quad.iter()) {
                *dst = Point2::new(src.x, src.y);
            }
            markers.push(DetectedMarker { id, corners: pts });
        }
        Ok(markers)
    }

    fn draw_markers(&self, image: &mut Frame, markers: &[DetectedMarker]) -> Result<()> {
        let corners: Vector<Vector<Point2f>> =
            markers.iter().map(|m| to_cv_points(&m.corners)).collect();
        let ids: Vector<i32> = markers.iter().map(|m| m.id).collect();
        draw_on(image, |mat| {
            draw_detected_markers(mat, &corners, &ids, Scalar::new(0., 255., 0., 0.))?;
            Ok(())
        })
    }
}

impl PoseSolver for OpenCvBackend {
    fn solve_pose(
        &self,
        object_points: &[Point3<f32>; 4],
        image_points: &[Point2<f32>; 4],
        intrinsics: &Intrinsics,
    ) -> Result<Pose> {
        let camera_matrix = nalg_to_mat(&intrinsics.camera_matrix)?;
        let dist_coeffs = Vector::<f64>::from_slice(&intrinsics.distortion);
        let mut rvec = Mat::default();
        let mut tvec = Mat::default();
        let solved = solve_pnp(
            &to_cv_points3(object_points),
            &to_cv_points(image_points),
            &camera_matrix,
            &dist_coeffs,
            &mut rvec,
            &mut tvec,
            false,
            SOLVEPNP_IPPE_SQUARE,
        )?;
        if !solved {
            return Err(TrackerError::Vision("solve_pnp found no solution".into()));
        }
        Ok(Pose {
            rotation: vec3(&rvec)?,
            translation: vec3(&tvec)?,
        })
    }

    fn draw_pose(
        &self,
        image: &mut Frame,
        intrinsics: &Intrinsics,
        marker: &DetectedMarker,
        pose: &Pose,
        axis_length: f32,
    ) -> Result<()> {
        let camera_matrix = nalg_to_mat(&intrinsics.camera_matrix)?;
        let dist_coeffs = Vector::<f64>::from_slice(&intrinsics.distortion);
        let rvec = Vector::<f64>::from_slice(pose.rotation.as_slice());
        let tvec = Vector::<f64>::from_slice(pose.translation.as_slice());
        // text starts under the bottom-left corner
        let anchor = marker.corners[3];
        let lines = [
            (format!("X: {:.6}", pose.translation.x), Scalar::new(0., 0., 255., 0.)),
            (format!("Y: {:.6}", pose.translation.y), Scalar::new(0., 255., 0., 0.)),
            (format!("Z: {:.6}", pose.translation.z), Scalar::new(255., 0., 0., 0.)),
        ];

        draw_on(image, |mat| {
            draw_frame_axes(
                mat,
                &camera_matrix,
                &dist_coeffs,
                &rvec,
                &tvec,
                axis_length,
                AXIS_THICKNESS,
            )?;
            let mut y = anchor.y;
            for (text, color) in &lines {
                y += TEXT_SCALE as f32 * TEXT_LINE_HEIGHT;
                put_text(
                    mat,
                    text,
                    Point::new(anchor.x as i32, y as i32),
                    FONT_HERSHEY_SIMPLEX,
                    TEXT_SCALE,
                    *color,
                    TEXT_THICKNESS,
                    LINE_AA,
                    false,
                )?;
            }
            Ok(())
        })
    }
}
