//! Chooses the camera intrinsics used for tracking.
//!
//! Each field is resolved on its own: an explicit command-line value wins,
//! then the calibration file, then the built-in defaults. A calibration run
//! in the same invocation replaces both fields.

use std::{fmt, path::Path};

use nalgebra::Matrix3;
use tracing::{debug, info, warn};

use crate::store::{self, StoreError};

pub const DEFAULT_CALIBRATION_FILE: &str = "calibration.txt";

pub const DEFAULT_CAMERA_MATRIX: [f64; 9] = [
    3529.184800454334,
    0.0,
    2040.965768074567,
    0.0,
    3514.936017987171,
    1126.105514215219,
    0.0,
    0.0,
    1.0,
];

pub const DEFAULT_DISTORTION: [f64; 5] = [
    0.1111941981103543,
    -1.233444736852835,
    0.0004572563505563506,
    0.0004007139313956278,
    5.054536061947804,
];

/// Camera matrix and the five Brown-Conrady coefficients (k1, k2, p1, p2, k3).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Intrinsics {
    pub camera_matrix: Matrix3<f64>,
    pub distortion: [f64; 5],
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self {
            camera_matrix: Matrix3::from_row_slice(&DEFAULT_CAMERA_MATRIX),
            distortion: DEFAULT_DISTORTION,
        }
    }
}

impl Intrinsics {
    pub fn camera_matrix_row_major(&self) -> [f64; 9] {
        let mut out = [0.0; 9];
        for (dst, src) in out.iter_mut().zip(self.camera_matrix.transpose().iter()) {
            *dst = *src;
        }
        out
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Override,
    File,
    Default,
    Calibration,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Override => write!(f, "command line"),
            Source::File => write!(f, "calibration file"),
            Source::Default => write!(f, "built-in default"),
            Source::Calibration => write!(f, "calibration run"),
        }
    }
}

/// Values given explicitly on the command line.
#[derive(Clone, Debug, Default)]
pub struct IntrinsicsOverrides {
    pub camera_matrix: Option<Matrix3<f64>>,
    pub distortion: Option<[f64; 5]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedIntrinsics {
    pub intrinsics: Intrinsics,
    pub camera_matrix_source: Source,
    pub distortion_source: Source,
}

impl ResolvedIntrinsics {
    /// A fresh calibration always replaces both fields.
    pub fn replace_with_calibration(&mut self, calibrated: Intrinsics) {
        self.intrinsics = calibrated;
        self.camera_matrix_source = Source::Calibration;
        self.distortion_source = Source::Calibration;
    }
}

/// Highest-priority value that is present.
pub fn resolve<T>(explicit: Option<T>, file: Option<T>, default: T) -> (T, Source) {
    match (explicit, file) {
        (Some(value), _) => (value, Source::Override),
        (None, Some(value)) => (value, Source::File),
        (None, None) => (default, Source::Default),
    }
}

pub fn resolve_intrinsics(
    overrides: &IntrinsicsOverrides,
    calibration_file: &Path,
) -> ResolvedIntrinsics {
    let needs_file = overrides.camera_matrix.is_none() || overrides.distortion.is_none();
    let from_file = if needs_file {
        read_calibration_file(calibration_file)
    } else {
        None
    };
    let defaults = Intrinsics::default();

    let (camera_matrix, camera_matrix_source) = resolve(
        overrides.camera_matrix,
        from_file.map(|i| i.camera_matrix),
        defaults.camera_matrix,
    );
    let (distortion, distortion_source) = resolve(
        overrides.distortion,
        from_file.map(|i| i.distortion),
        defaults.distortion,
    );
    debug!(%camera_matrix_source, %distortion_source, "intrinsics resolved");

    ResolvedIntrinsics {
        intrinsics: Intrinsics {
            camera_matrix,
            distortion,
        },
        camera_matrix_source,
        distortion_source,
    }
}

/// A file that is missing or malformed counts as absent for both fields.
fn read_calibration_file(path: &Path) -> Option<Intrinsics> {
    match store::load(path) {
        Ok(intrinsics) => {
            debug!(
                camera_matrix = %store::format_list(&intrinsics.camera_matrix_row_major()),
                distortion = %store::format_list(&intrinsics.distortion),
                "read calibration file {}",
                path.display()
            );
            Some(intrinsics)
        }
        Err(StoreError::Missing(_)) => {
            info!(
                "no calibration file at {}, using defaults for values not set explicitly",
                path.display()
            );
            None
        }
        Err(err) => {
            warn!(
                "ignoring calibration file {}: {err}. Using defaults for values not set explicitly",
                path.display()
            );
            None
        }
    }
}
