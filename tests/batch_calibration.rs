//! Batch calibration end to end, with a stand-in vision backend that "sees"
//! the board in any image whose top-left pixel is not black.

use std::{cell::Cell, fs};

use nalgebra::{Matrix3, Point2, Point3, Vector3};
use tag_tracker::{
    config::{self, IntrinsicsOverrides, Source},
    store,
    vision::{CalibrationSolver, CornerFinder, RefineCriteria},
    CalibrationResult, CalibrationSession, CheckerboardGeometry, Frame, PixelFormat, Result,
};

#[derive(Default)]
struct SyntheticBackend {
    views: Cell<usize>,
}

impl CornerFinder for SyntheticBackend {
    fn find_corners(
        &self,
        gray: &Frame,
        geometry: CheckerboardGeometry,
    ) -> Result<Option<Vec<Point2<f32>>>> {
        if gray.data()[0] == 0 {
            return Ok(None);
        }
        Ok(Some(
            geometry
                .object_points()
                .iter()
                .map(|p| Point2::new(40.0 + 25.0 * p.y, 30.0 + 25.0 * p.x))
                .collect(),
        ))
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
        _image: &mut Frame,
        _geometry: CheckerboardGeometry,
        _corners: &[Point2<f32>],
    ) -> Result<()> {
        Ok(())
    }
}

impl CalibrationSolver for SyntheticBackend {
    fn calibrate(
        &self,
        object_points: &[Vec<Point3<f32>>],
        image_points: &[Vec<Point2<f32>>],
        image_size: (u32, u32),
    ) -> Result<CalibrationResult> {
        self.views.set(image_points.len());
        // focal length from the corner spacing of the first view
        let spacing = f64::from(image_points[0][1].y - image_points[0][0].y)
            / f64::from(object_points[0][1].x - object_points[0][0].x);
        let (w, h) = image_size;
        let n = image_points.len();
        Ok(CalibrationResult {
            camera_matrix: Matrix3::new(
                spacing * 10.0,
                0.0,
                f64::from(w) / 2.0,
                0.0,
                spacing * 10.0,
                f64::from(h) / 2.0,
                0.0,
                0.0,
                1.0,
            ),
            distortion: [0.0; 5],
            rotations: vec![Vector3::zeros(); n],
            translations: vec![Vector3::new(0.0, 0.0, 0.5); n],
            rms_error: 0.1,
            image_size,
        })
    }
}

#[test]
fn eight_of_ten_images_contribute() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..10 {
        let value = if i == 3 || i == 7 { 0 } else { 180 };
        Frame::filled(320, 240, PixelFormat::Rgb8, value)
            .save(&dir.path().join(format!("img{i:02}.png")))
            .unwrap();
    }
    let pattern = format!("{}/*.png", dir.path().display());
    let geometry = CheckerboardGeometry::new(8, 5).unwrap();
    let backend = SyntheticBackend::default();

    let session = CalibrationSession::calibrate_with_images(&pattern, geometry, &backend).unwrap();

    assert_eq!(session.success_count(), 8);
    assert_eq!(session.input_images().len(), 10);
    assert_eq!(backend.views.get(), 8);
    let result = session.result();
    assert_eq!(result.rotations.len(), 8);
    assert_eq!(result.translations.len(), 8);
    assert_eq!(result.image_size, (320, 240));
    assert!(result.camera_matrix[(0, 0)] > 0.0);
    assert!(result.camera_matrix[(1, 1)] > 0.0);
    let skipped: Vec<_> = session
        .processed_image_paths()
        .iter()
        .filter_map(|p| p.file_name()?.to_str())
        .collect();
    assert!(!skipped.contains(&"img03.png"));
    assert!(!skipped.contains(&"img07.png"));
}

#[test]
fn calibration_result_feeds_the_resolver() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..3 {
        Frame::filled(64, 48, PixelFormat::Gray8, 255)
            .save(&dir.path().join(format!("{i}.png")))
            .unwrap();
    }
    let backend = SyntheticBackend::default();
    let session = CalibrationSession::calibrate_with_images(
        &format!("{}/*.png", dir.path().display()),
        CheckerboardGeometry::default(),
        &backend,
    )
    .unwrap();
    let calibrated = session.result().intrinsics();
    let file = dir.path().join("calibration.txt");
    store::save(&file, &calibrated.camera_matrix, &calibrated.distortion).unwrap();

    let resolved = config::resolve_intrinsics(&IntrinsicsOverrides::default(), &file);

    assert_eq!(resolved.intrinsics, calibrated);
    assert_eq!(resolved.camera_matrix_source, Source::File);
    assert_eq!(resolved.distortion_source, Source::File);
    assert_eq!(fs::read_to_string(&file).unwrap().lines().count(), 2);
}

#[test]
fn no_usable_image_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    Frame::filled(16, 16, PixelFormat::Gray8, 0)
        .save(&dir.path().join("blank.png"))
        .unwrap();
    let backend = SyntheticBackend::default();

    let err = CalibrationSession::calibrate_with_images(
        &format!("{}/*.png", dir.path().display()),
        CheckerboardGeometry::default(),
        &backend,
    )
    .unwrap_err();

    assert!(matches!(
        err,
        tag_tracker::TrackerError::NoUsableImages { supplied: 1 }
    ));
    assert_eq!(backend.views.get(), 0);
}
