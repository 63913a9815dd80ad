use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tag_tracker::{
    cv::{imshow_multi, OpenCvBackend},
    logging, store, ArucoDictionary, CalibrationSession, CheckerboardGeometry,
};
use tracing::info;

/// Calibrates a camera from a folder of checkerboard images.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Display additional information, repeat for more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Inner corners of the checkerboard horizontally (columns - 1).
    #[arg(short = 'W', long, default_value_t = 8)]
    width: u32,

    /// Inner corners of the checkerboard vertically (rows - 1).
    #[arg(short = 'H', long, default_value_t = 5)]
    height: u32,

    /// Glob pattern of the calibration images.
    #[arg(short, long, default_value = "../calibration/*.jpg")]
    images: String,

    /// Write the result to this calibration file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Save the annotated images to a `processed` folder next to the inputs.
    #[arg(long)]
    save_images: bool,

    /// Browse the annotated images in a window before exiting.
    #[arg(long)]
    show: bool,

    /// Width of the image display window.
    #[arg(long = "ww", default_value_t = 960)]
    window_width: i32,

    /// Height of the image display window.
    #[arg(long = "wh", default_value_t = 540)]
    window_height: i32,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    info!(
        width = cli.width,
        height = cli.height,
        images = %cli.images,
        "calibration setup"
    );

    let geometry = CheckerboardGeometry::new(cli.width, cli.height)?;
    // the dictionary is irrelevant for calibration
    let backend = OpenCvBackend::new(ArucoDictionary::default())?;
    let mut session = CalibrationSession::calibrate_with_images(&cli.images, geometry, &backend)
        .with_context(|| format!("Calibration from {} failed", cli.images))?;
    let result = session.result();

    println!(
        "Used {} of {} images, RMS error {:.4}",
        session.success_count(),
        session.input_images().len(),
        result.rms_error
    );
    println!(
        "cameraMatrix : {}",
        store::format_list(&result.intrinsics().camera_matrix_row_major())
    );
    println!("distCoeffs : {}", store::format_list(&result.distortion));
    if cli.verbose > 0 {
        for (path, (r, t)) in session
            .processed_image_paths()
            .iter()
            .zip(result.rotations.iter().zip(&result.translations))
        {
            println!(
                "{}: rotation {} translation {}",
                path.display(),
                store::format_list(r.as_slice()),
                store::format_list(t.as_slice())
            );
        }
    }

    if let Some(output) = &cli.output {
        store::save(output, &result.camera_matrix, &result.distortion)
            .with_context(|| format!("Could not write {}", output.display()))?;
        info!("calibration saved to {}", output.display());
    }

    if cli.save_images {
        session.persist_images(&cli.images)?;
    }

    if cli.show {
        let annotated: Vec<_> = session
            .processed_images()
            .iter()
            .map(|p| p.image.clone())
            .collect();
        imshow_multi(
            &annotated,
            "Detected checkerboards",
            (cli.window_width, cli.window_height),
        )?;
    }
    Ok(())
}
