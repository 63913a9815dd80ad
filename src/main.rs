use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::{bail, Context};
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use nalgebra::Matrix3;
use tag_tracker::{
    capture::{LineOperator, Operator},
    config::{self, IntrinsicsOverrides, DEFAULT_CALIBRATION_FILE},
    cv::{OpenCvBackend, PreviewWindow, VideoSource, WindowOperator},
    logging, store,
    tracker::{JsonLinesSink, PoseLog},
    ArucoDictionary, CalibrationSession, CheckerboardGeometry, FrameSource, ImageSequence,
    MarkerTracker, StopReason,
};
use tracing::{debug, info, warn};

const DEFAULT_CALIBRATION_IMAGES: &str = "./calibration/*.jpg";

/// Detects ArUco markers in a video stream and reports their pose.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Display additional information, repeat for more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Video stream source: a device index, device path or stream URI. A
    /// pattern containing `*` reads matching image files instead.
    #[arg(short, long, default_value = "0")]
    source: String,

    /// Width of the image display windows.
    #[arg(long = "ww", default_value_t = 1920)]
    window_width: i32,

    /// Height of the image display windows.
    #[arg(long = "wh", default_value_t = 1080)]
    window_height: i32,

    /// ArUco dictionary to expect, by id or name.
    #[arg(short, long, default_value = "10")]
    dict: ArucoDictionary,

    /// Side length of the markers in meters.
    #[arg(short, long, default_value_t = 0.1)]
    length: f32,

    /// Camera matrix, 9 comma-separated values row by row. Set explicitly,
    /// the calibration file is not consulted for it.
    #[arg(long = "cm", value_delimiter = ',', num_args = 1.., allow_negative_numbers = true)]
    camera_matrix: Option<Vec<f64>>,

    /// Distortion coefficients k1,k2,p1,p2,k3. Set explicitly, the
    /// calibration file is not consulted for them.
    #[arg(long = "dc", value_delimiter = ',', num_args = 1.., allow_negative_numbers = true)]
    distortion: Option<Vec<f64>>,

    /// File to read calibration values from. Given explicitly, a calibration
    /// performed in this run is written to it.
    #[arg(short = 'c', long, num_args = 0..=1, default_missing_value = DEFAULT_CALIBRATION_FILE)]
    calibration_file: Option<PathBuf>,

    /// Glob pattern of checkerboard images to calibrate from. With --ic this
    /// is where the captured images are saved instead.
    #[arg(short = 'i', long, num_args = 0..=1, default_missing_value = DEFAULT_CALIBRATION_IMAGES)]
    calibration_images: Option<String>,

    /// Inner corners of the checkerboard horizontally (columns - 1).
    #[arg(short = 'W', long, default_value_t = 8)]
    width: u32,

    /// Inner corners of the checkerboard vertically (rows - 1).
    #[arg(short = 'H', long, default_value_t = 5)]
    height: u32,

    /// Calibrate interactively from the video source before tracking.
    #[arg(long = "ic")]
    interactive: bool,

    /// With --ic, confirm captures on the terminal instead of with keys in
    /// the preview window.
    #[arg(long, requires = "interactive")]
    prompt: bool,

    /// Print one JSON object per detected marker on stdout.
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn fixed<const N: usize>(values: Option<Vec<f64>>, what: &str) -> anyhow::Result<Option<[f64; N]>> {
    let Some(values) = values else {
        return Ok(None);
    };
    match <[f64; N]>::try_from(values) {
        Ok(array) => Ok(Some(array)),
        Err(values) => bail!("Expected {N} values for {what}, but got {}.", values.len()),
    }
}

fn open_source(uri: &str) -> anyhow::Result<Box<dyn FrameSource>> {
    if uri.contains('*') {
        let images = ImageSequence::open(uri)?;
        if images.paths().is_empty() {
            bail!("No image files match {uri}");
        }
        return Ok(Box::new(images));
    }
    Ok(Box::new(VideoSource::open(uri)?))
}

fn run() -> anyhow::Result<()> {
    let dict_help = format!(
        "ArUco dictionary to expect, by id or name. These are the possible options:\n{}",
        ArucoDictionary::catalogue()
    );
    let matches = Cli::command()
        .mut_arg("dict", |arg| arg.long_help(dict_help))
        .get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    logging::init(cli.verbose);

    let overrides = IntrinsicsOverrides {
        camera_matrix: fixed::<9>(cli.camera_matrix, "camera matrix")?
            .map(|m| Matrix3::from_row_slice(&m)),
        distortion: fixed::<5>(cli.distortion, "distortion coefficients")?,
    };
    let save_calibration = cli.calibration_file.is_some();
    let calibration_file = cli
        .calibration_file
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_FILE));
    let mut resolved = config::resolve_intrinsics(&overrides, &calibration_file);

    let geometry = CheckerboardGeometry::new(cli.width, cli.height)?;
    let window_size = (cli.window_width, cli.window_height);
    let backend = OpenCvBackend::new(cli.dict)?;
    info!(dictionary = %cli.dict, length = cli.length, "tracking setup");

    let mut source = open_source(&cli.source)
        .with_context(|| format!("Could not open video source at {}", cli.source))?;

    let session = if cli.interactive {
        let mut operator: Box<dyn Operator> = if cli.prompt {
            Box::new(LineOperator::stdio())
        } else {
            Box::new(WindowOperator::new("Calibration Preview", window_size)?)
        };
        let (session, returned) =
            CalibrationSession::calibrate_interactively(source, &mut operator, geometry, &backend)?;
        drop(operator);
        source = returned;
        Some(session)
    } else if let Some(pattern) = &cli.calibration_images {
        Some(CalibrationSession::calibrate_with_images(pattern, geometry, &backend)?)
    } else {
        None
    };

    if let Some(mut session) = session {
        eprintln!(
            "Calibrated from {} of {} images (RMS error {:.4}).",
            session.success_count(),
            session.input_images().len(),
            session.result().rms_error
        );
        let calibrated = session.result().intrinsics();
        resolved.replace_with_calibration(calibrated);

        if save_calibration {
            store::save(&calibration_file, &calibrated.camera_matrix, &calibrated.distortion)
                .with_context(|| format!("Could not write {}", calibration_file.display()))?;
            info!("calibration saved to {}", calibration_file.display());
        }
        if cli.interactive {
            if let Some(destination) = &cli.calibration_images {
                session.persist_images(destination)?;
            }
        }
    }

    debug!(
        camera_matrix = %store::format_list(&resolved.intrinsics.camera_matrix_row_major()),
        source = %resolved.camera_matrix_source,
        "final camera matrix"
    );
    debug!(
        distortion = %store::format_list(&resolved.intrinsics.distortion),
        source = %resolved.distortion_source,
        "final distortion coefficients"
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let window = PreviewWindow::new("Marker Detect", window_size, cancel.clone())?;
    let json = cli.json.then(|| JsonLinesSink::new(std::io::stdout()));
    let mut sink = (window, (PoseLog, json));

    let mut tracker = MarkerTracker::new(&backend, resolved.intrinsics, cli.length);
    match tracker.run(&mut source, &mut sink, &cancel)? {
        StopReason::Cancelled => info!("stopped by user"),
        StopReason::EndOfStream => warn!("could not read frame from {}, stopping", cli.source),
    }
    info!(frames = tracker.frames_processed(), "tracking finished");
    Ok(())
}
