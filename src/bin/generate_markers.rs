use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use tag_tracker::{cv::OpenCvBackend, generate, logging, ArucoDictionary};
use tracing::info;

/// Writes printable ArUco markers as SVG and PNG.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Display additional information.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// IDs encoded in the markers, one file pair per id.
    #[arg(short, long = "id", value_delimiter = ',', num_args = 1.., default_value = "0")]
    ids: Vec<i32>,

    /// ArUco dictionary to use, by id or name.
    #[arg(short, long, default_value = "10")]
    dict: ArucoDictionary,

    /// Size of the generated image in pixels per side.
    #[arg(short, long, default_value_t = 200)]
    resolution: u32,

    /// File name prefix.
    #[arg(short, long, default_value = "marker")]
    prefix: String,

    /// Output folder for the generated markers.
    #[arg(short, long, default_value = "./output/")]
    output: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let dict_help = format!(
        "ArUco dictionary to use, by id or name. These are the possible options:\n{}",
        ArucoDictionary::catalogue()
    );
    let matches = Cli::command()
        .mut_arg("dict", |arg| arg.long_help(dict_help))
        .get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    logging::init(cli.verbose);

    info!(
        ids = ?cli.ids,
        dictionary = %cli.dict,
        cells = cli.dict.marker_bits() + 2,
        resolution = cli.resolution,
        prefix = %cli.prefix,
        output = %cli.output.display(),
        "generating markers"
    );

    generate::ensure_dir(&cli.output)?;
    let backend = OpenCvBackend::new(cli.dict)?;
    for &id in &cli.ids {
        let cells = backend.marker_cells(id)?;
        generate::write_marker(&cli.output, &cli.prefix, id, &cells, cli.resolution)?;
    }
    Ok(())
}
