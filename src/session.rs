//! One calibration run: collect images, solve, optionally write the images
//! back out.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    calibration::{CalibrationAggregator, CalibrationResult, ProcessedImage},
    capture::{collect_frames, spawn_capture, Operator},
    chessboard::CheckerboardGeometry,
    error::{Result, TrackerError},
    frame::Frame,
    source::{expand_pattern, FrameSource},
    vision::CalibrationBackend,
};

pub const PROCESSED_IMAGE_PREFIX: &str = "processed_";
pub const PROCESSED_IMAGE_SUBFOLDER: &str = "processed";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    /// Files matched by a glob pattern.
    Batch,
    /// Frames picked by an operator from a live stream.
    Interactive,
    /// Frames handed over by the caller.
    Frames,
}

#[derive(Debug)]
pub struct CalibrationSession {
    mode: CaptureMode,
    input_images: Vec<Frame>,
    input_image_paths: Vec<PathBuf>,
    processed_images: Vec<ProcessedImage>,
    processed_image_paths: Vec<PathBuf>,
    result: CalibrationResult,
}

impl CalibrationSession {
    /// Calibrates from every file matching `pattern`. Files that fail to
    /// decode are skipped.
    pub fn calibrate_with_images<B>(
        pattern: &str,
        geometry: CheckerboardGeometry,
        backend: &B,
    ) -> Result<Self>
    where
        B: CalibrationBackend + ?Sized,
    {
        let mut input_images = Vec::new();
        let mut input_image_paths = Vec::new();
        for path in expand_pattern(pattern)? {
            match Frame::open(&path) {
                Ok(frame) => {
                    input_images.push(frame);
                    input_image_paths.push(path);
                }
                Err(err) => warn!("skipping {}: {err}", path.display()),
            }
        }
        info!(pattern, images = input_images.len(), "loaded calibration images");

        let (processed_images, result) = solve(&input_images, geometry, backend)?;
        let processed_image_paths = processed_images
            .iter()
            .map(|p| input_image_paths[p.input_index].clone())
            .collect();

        Ok(Self {
            mode: CaptureMode::Batch,
            input_images,
            input_image_paths,
            processed_images,
            processed_image_paths,
            result,
        })
    }

    pub fn calibrate_frames<B>(
        frames: Vec<Frame>,
        geometry: CheckerboardGeometry,
        backend: &B,
    ) -> Result<Self>
    where
        B: CalibrationBackend + ?Sized,
    {
        Self::from_frames(CaptureMode::Frames, frames, geometry, backend)
    }

    /// Lets `operator` pick frames from `source` while a background thread
    /// keeps reading it. The source is handed back once capture is over so
    /// the same device can be used for tracking.
    pub fn calibrate_interactively<S, O, B>(
        source: S,
        operator: &mut O,
        geometry: CheckerboardGeometry,
        backend: &B,
    ) -> Result<(Self, S)>
    where
        S: FrameSource + 'static,
        O: Operator + ?Sized,
        B: CalibrationBackend + ?Sized,
    {
        let task = spawn_capture(source);
        let collected = collect_frames(&task, operator);
        // join before looking at the outcome so the thread never outlives us
        let source = task.join()?;
        let frames = collected?;
        info!(captured = frames.len(), "interactive capture finished");

        let session = Self::from_frames(CaptureMode::Interactive, frames, geometry, backend)?;
        Ok((session, source))
    }

    fn from_frames<B>(
        mode: CaptureMode,
        frames: Vec<Frame>,
        geometry: CheckerboardGeometry,
        backend: &B,
    ) -> Result<Self>
    where
        B: CalibrationBackend + ?Sized,
    {
        let (processed_images, result) = solve(&frames, geometry, backend)?;
        Ok(Self {
            mode,
            input_images: frames,
            input_image_paths: Vec::new(),
            processed_images,
            processed_image_paths: Vec::new(),
            result,
        })
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn result(&self) -> &CalibrationResult {
        &self.result
    }

    pub fn success_count(&self) -> usize {
        self.processed_images.len()
    }

    pub fn input_images(&self) -> &[Frame] {
        &self.input_images
    }

    pub fn input_image_paths(&self) -> &[PathBuf] {
        &self.input_image_paths
    }

    pub fn processed_images(&self) -> &[ProcessedImage] {
        &self.processed_images
    }

    pub fn processed_image_paths(&self) -> &[PathBuf] {
        &self.processed_image_paths
    }

    /// Writes the session's images next to `destination_pattern`, e.g.
    /// `./calibration/*.jpg`. Annotated images go to a `processed`
    /// subfolder. Files read in batch mode are not copied.
    pub fn persist_images(&mut self, destination_pattern: &str) -> Result<()> {
        let (folder, extension) = split_destination(destination_pattern);
        let processed_folder = folder.join(PROCESSED_IMAGE_SUBFOLDER);
        create_dir(&processed_folder)?;

        if self.mode != CaptureMode::Batch {
            let mut written = Vec::with_capacity(self.input_images.len());
            for (i, image) in self.input_images.iter().enumerate() {
                let path = folder.join(format!("{i}{extension}"));
                image.save(&path)?;
                written.push(path);
            }
            self.input_image_paths = written;
        }

        let mut written = Vec::with_capacity(self.processed_images.len());
        let mut taken = HashSet::new();
        for (i, processed) in self.processed_images.iter().enumerate() {
            let name = match self.mode {
                CaptureMode::Batch => self.input_image_paths[processed.input_index]
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("{i}{extension}")),
                _ => format!("{i}{extension}"),
            };
            // same file name from two folders
            let name = if taken.insert(name.clone()) {
                name
            } else {
                let numbered = format!("{i}_{name}");
                taken.insert(numbered.clone());
                numbered
            };
            let path = processed_folder.join(format!("{PROCESSED_IMAGE_PREFIX}{name}"));
            processed.image.save(&path)?;
            written.push(path);
        }
        self.processed_image_paths = written;

        info!(
            inputs = self.input_image_paths.len(),
            processed = self.processed_image_paths.len(),
            "calibration images saved to {}",
            folder.display()
        );
        Ok(())
    }
}

fn solve<B>(
    frames: &[Frame],
    geometry: CheckerboardGeometry,
    backend: &B,
) -> Result<(Vec<ProcessedImage>, CalibrationResult)>
where
    B: CalibrationBackend + ?Sized,
{
    let mut aggregator = CalibrationAggregator::new(backend, geometry);
    for frame in frames {
        aggregator.add_frame(frame)?;
    }
    let aggregation = aggregator.finish()?;
    info!(
        used = aggregation.success_count(),
        supplied = aggregation.supplied,
        rms = aggregation.result.rms_error,
        "calibration finished"
    );
    Ok((aggregation.processed, aggregation.result))
}

/// `./calibration/*.jpg` -> (`./calibration`, `.jpg`).
fn split_destination(pattern: &str) -> (PathBuf, String) {
    let path = Path::new(pattern);
    let folder = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let extension = match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => ".png".to_owned(),
    };
    (folder, extension)
}

fn create_dir(path: &Path) -> Result<()> {
    debug!("creating {}", path.display());
    fs::create_dir_all(path).map_err(|source| TrackerError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use nalgebra::{Point2, Point3};

    use super::*;
    use crate::{
        calibration::testing::StubBackend,
        capture::{
            testing::{stamp, CountingSource, ScriptedOperator},
            DEFAULT_CALIBRATION_IMAGE_COUNT,
        },
        frame::PixelFormat,
        vision::{CalibrationSolver, CornerFinder, RefineCriteria},
    };

    fn board_frame(with_board: bool) -> Frame {
        Frame::filled(6, 4, PixelFormat::Rgb8, if with_board { 200 } else { 0 })
    }

    #[test]
    fn nine_defaults_then_decline() {
        let backend = StubBackend::default();
        let mut operator = ScriptedOperator {
            decline_after: usize::MAX,
            defaults: Vec::new(),
        };
        let source = CountingSource::endless();

        let (session, source) = CalibrationSession::calibrate_interactively(
            source,
            &mut operator,
            CheckerboardGeometry::default(),
            &backend,
        )
        .unwrap();

        assert_eq!(session.input_images().len(), DEFAULT_CALIBRATION_IMAGE_COUNT);
        assert_eq!(operator.defaults.len(), DEFAULT_CALIBRATION_IMAGE_COUNT + 1);
        assert!(!operator.defaults[DEFAULT_CALIBRATION_IMAGE_COUNT]);
        let stamps: Vec<u32> = session.input_images().iter().map(stamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(session.mode(), CaptureMode::Interactive);
        assert!(!source.released);
        assert_eq!(backend.solves.get(), 1);
    }

    /// Counts reads that happen while `solving` is raised.
    struct WatchedSource {
        inner: CountingSource,
        solving: Arc<AtomicBool>,
        reads_while_solving: Arc<AtomicUsize>,
    }

    impl FrameSource for WatchedSource {
        fn read(&mut self) -> Result<Option<Frame>> {
            if self.solving.load(Ordering::SeqCst) {
                self.reads_while_solving.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.read()
        }

        fn describe(&self) -> &str {
            "watched"
        }
    }

    /// Raises `solving` for a while around the solve.
    struct SlowSolver {
        inner: StubBackend,
        solving: Arc<AtomicBool>,
    }

    impl CornerFinder for SlowSolver {
        fn find_corners(
            &self,
            gray: &Frame,
            geometry: CheckerboardGeometry,
        ) -> Result<Option<Vec<Point2<f32>>>> {
            self.inner.find_corners(gray, geometry)
        }

        fn refine_corners(
            &self,
            gray: &Frame,
            corners: &mut [Point2<f32>],
            criteria: &RefineCriteria,
        ) -> Result<()> {
            self.inner.refine_corners(gray, corners, criteria)
        }

        fn draw_corners(
            &self,
            image: &mut Frame,
            geometry: CheckerboardGeometry,
            corners: &[Point2<f32>],
        ) -> Result<()> {
            self.inner.draw_corners(image, geometry, corners)
        }
    }

    impl CalibrationSolver for SlowSolver {
        fn calibrate(
            &self,
            object_points: &[Vec<Point3<f32>>],
            image_points: &[Vec<Point2<f32>>],
            image_size: (u32, u32),
        ) -> Result<CalibrationResult> {
            self.solving.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            let result = self.inner.calibrate(object_points, image_points, image_size);
            self.solving.store(false, Ordering::SeqCst);
            result
        }
    }

    #[test]
    fn capture_thread_is_stopped_before_solving() {
        let solving = Arc::new(AtomicBool::new(false));
        let reads_while_solving = Arc::new(AtomicUsize::new(0));
        let source = WatchedSource {
            inner: CountingSource::endless(),
            solving: solving.clone(),
            reads_while_solving: reads_while_solving.clone(),
        };
        let backend = SlowSolver {
            inner: StubBackend::default(),
            solving,
        };
        let mut operator = ScriptedOperator {
            decline_after: 3,
            defaults: Vec::new(),
        };

        let (session, source) = CalibrationSession::calibrate_interactively(
            source,
            &mut operator,
            CheckerboardGeometry::default(),
            &backend,
        )
        .unwrap();
        let reads_before = source.inner.next;
        thread::sleep(Duration::from_millis(20));

        assert_eq!(session.success_count(), 3);
        assert_eq!(backend.inner.solves.get(), 1);
        assert_eq!(reads_while_solving.load(Ordering::SeqCst), 0);
        assert_eq!(source.inner.next, reads_before);
    }

    #[test]
    fn interactive_persistence_layout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StubBackend::default();
        let frames = vec![board_frame(true), board_frame(false), board_frame(true)];
        let mut session =
            CalibrationSession::calibrate_frames(frames, CheckerboardGeometry::default(), &backend)
                .unwrap();
        assert_eq!(session.success_count(), 2);

        let destination = format!("{}/out/*.png", dir.path().display());
        session.persist_images(&destination).unwrap();

        let out = dir.path().join("out");
        for name in ["0.png", "1.png", "2.png"] {
            assert!(out.join(name).is_file(), "{name}");
        }
        for name in ["processed_0.png", "processed_1.png"] {
            assert!(out.join("processed").join(name).is_file(), "{name}");
        }
        assert!(!out.join("processed/processed_2.png").exists());
        assert_eq!(session.input_image_paths().len(), 3);
        assert_eq!(session.processed_image_paths()[1], out.join("processed/processed_1.png"));
    }

    #[test]
    fn batch_keeps_original_names() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir(&input).unwrap();
        board_frame(true).save(&input.join("a.png")).unwrap();
        board_frame(false).save(&input.join("b.png")).unwrap();
        board_frame(true).save(&input.join("c.png")).unwrap();
        fs::write(input.join("d.png"), b"not an image").unwrap();
        let pattern = format!("{}/*.png", input.display());
        let backend = StubBackend::default();

        let mut session =
            CalibrationSession::calibrate_with_images(&pattern, CheckerboardGeometry::default(), &backend)
                .unwrap();
        assert_eq!(session.input_image_paths().len(), 3);
        assert_eq!(
            session.processed_image_paths(),
            [input.join("a.png"), input.join("c.png")]
        );

        session.persist_images(&pattern).unwrap();
        let processed = input.join("processed");
        assert!(processed.join("processed_a.png").is_file());
        assert!(processed.join("processed_c.png").is_file());
        assert!(!input.join("0.png").exists());
        assert_eq!(session.input_image_paths()[0], input.join("a.png"));
    }

    #[test]
    fn batch_names_from_different_folders_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        for folder in ["a", "b"] {
            fs::create_dir(dir.path().join(folder)).unwrap();
            board_frame(true)
                .save(&dir.path().join(folder).join("img.png"))
                .unwrap();
        }
        let backend = StubBackend::default();
        let mut session = CalibrationSession::calibrate_with_images(
            &format!("{}/*/img.png", dir.path().display()),
            CheckerboardGeometry::default(),
            &backend,
        )
        .unwrap();
        assert_eq!(session.success_count(), 2);

        session
            .persist_images(&format!("{}/out/*.png", dir.path().display()))
            .unwrap();

        let processed = dir.path().join("out/processed");
        assert_eq!(
            session.processed_image_paths(),
            [
                processed.join("processed_img.png"),
                processed.join("processed_1_img.png")
            ]
        );
        assert_eq!(fs::read_dir(&processed).unwrap().count(), 2);
    }

    #[test]
    fn persistence_failure_keeps_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let backend = StubBackend::default();
        let mut session = CalibrationSession::calibrate_frames(
            vec![board_frame(true)],
            CheckerboardGeometry::default(),
            &backend,
        )
        .unwrap();
        let before = session.result().clone();

        let err = session
            .persist_images(&format!("{}/*.png", blocker.display()))
            .unwrap_err();
        assert!(matches!(err, TrackerError::CreateDir { .. }));
        assert_eq!(session.result(), &before);
    }

    #[test]
    fn destination_split() {
        assert_eq!(
            split_destination("./calibration/*.jpg"),
            (PathBuf::from("./calibration"), ".jpg".to_owned())
        );
        assert_eq!(split_destination("*.png"), (PathBuf::from("."), ".png".to_owned()));
    }
}
