use std::path::PathBuf;

use clap::{ArgAction, Parser};
use tag_tracker::{generate, logging};
use tracing::info;

/// Writes a printable checkerboard as SVG.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Display additional information.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Number of squares horizontally.
    #[arg(short = 'W', long, default_value_t = 6)]
    width: u32,

    /// Number of squares vertically.
    #[arg(short = 'H', long, default_value_t = 9)]
    height: u32,

    /// Pixels per square. 400 for a 6x9 board is about 300 dpi on A4.
    #[arg(short = 'r', long, default_value_t = 400)]
    pps: u32,

    /// File name prefix.
    #[arg(short, long, default_value = "checkerboard")]
    prefix: String,

    /// Output folder.
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
    let cli = Cli::parse();
    logging::init(cli.verbose);
    info!(
        width = cli.width,
        height = cli.height,
        pps = cli.pps,
        prefix = %cli.prefix,
        output = %cli.output.display(),
        "generating checkerboard"
    );

    generate::ensure_dir(&cli.output)?;
    let path = cli.output.join(format!("{}.svg", cli.prefix));
    generate::write_svg(&path, &generate::checkerboard_svg(cli.width, cli.height, cli.pps))?;
    println!("{}", path.display());
    Ok(())
}
