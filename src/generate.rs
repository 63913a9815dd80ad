//! Printable calibration targets: checkerboards and ArUco markers as SVG and
//! PNG.

use std::{fmt::Write as _, fs, path::Path};

use image::imageops::{self, FilterType};
use tracing::debug;

use crate::{
    error::{Result, TrackerError},
    frame::{Frame, PixelFormat},
};

const SVG_OPEN: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\"";

fn push_rect(svg: &mut String, x: f64, y: f64, size: f64) {
    let _ = write!(
        svg,
        "<rect x=\"{x}\" y=\"{y}\" width=\"{size}\" height=\"{size}\" fill=\"black\"/>"
    );
}

/// Board of `squares_wide` x `squares_high` squares, black where
/// `row + col` is even, so the top-left square is black.
pub fn checkerboard_svg(squares_wide: u32, squares_high: u32, pixels_per_square: u32) -> String {
    let width = squares_wide * pixels_per_square;
    let height = squares_high * pixels_per_square;
    let mut svg = format!("{SVG_OPEN} width=\"{width}\" height=\"{height}\">");
    let size = f64::from(pixels_per_square);
    for c in 0..squares_wide {
        for r in 0..squares_high {
            if (r + c) % 2 == 0 {
                push_rect(&mut svg, size * f64::from(c), size * f64::from(r), size);
            }
        }
    }
    svg.push_str("</svg>");
    svg
}

/// One cell per pixel of `cells`, a square gray marker bitmap including its
/// border; zero pixels are black.
pub fn marker_svg(cells: &Frame, resolution: u32) -> String {
    let n = cells.width();
    let scale = f64::from(resolution) / f64::from(n.max(1));
    let mut svg = format!("{SVG_OPEN} width=\"{resolution}\" height=\"{resolution}\">");
    for i in 0..n {
        for j in 0..cells.height() {
            if cells.data()[(j * n + i) as usize] == 0 {
                push_rect(&mut svg, scale * f64::from(i), scale * f64::from(j), scale);
            }
        }
    }
    svg.push_str("</svg>");
    svg
}

/// Marker bitmap scaled to `resolution` pixels per side, nearest neighbour.
pub fn marker_png(cells: &Frame, resolution: u32) -> Frame {
    let gray = cells.to_dynamic_image().to_luma8();
    let scaled = imageops::resize(&gray, resolution, resolution, FilterType::Nearest);
    let (width, height) = scaled.dimensions();
    Frame::new(scaled.into_raw(), width, height, PixelFormat::Gray8)
        .unwrap_or_else(|_| Frame::filled(resolution, resolution, PixelFormat::Gray8, 255))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| TrackerError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_svg(path: &Path, svg: &str) -> Result<()> {
    debug!("writing {}", path.display());
    fs::write(path, svg)?;
    Ok(())
}

/// Writes `{prefix}{id}.svg` and `{prefix}{id}.png` into `folder`.
pub fn write_marker(folder: &Path, prefix: &str, id: i32, cells: &Frame, resolution: u32) -> Result<()> {
    write_svg(
        &folder.join(format!("{prefix}{id}.svg")),
        &marker_svg(cells, resolution),
    )?;
    let png = folder.join(format!("{prefix}{id}.png"));
    debug!("writing {}", png.display());
    marker_png(cells, resolution).save(&png)
}
