use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("could not open video source {uri:?}")]
    SourceOpen { uri: String },
    #[error("could not read frame from {uri:?}: {reason}")]
    SourceRead { uri: String, reason: String },
    #[error("checkerboard needs at least one inner corner in each direction, got {wide}x{high}")]
    InvalidGeometry { wide: u32, high: u32 },
    #[error("none of the {supplied} calibration images contained the checkerboard pattern")]
    NoUsableImages { supplied: usize },
    #[error("invalid image pattern {pattern:?}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("failed to create directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read image {}", path.display())]
    ImageRead {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write image {}", path.display())]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("capture task panicked")]
    CaptureJoin,
    #[error("operator prompt failed")]
    Prompt(#[source] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("vision backend: {0}")]
    Vision(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for TrackerError {
    fn from(err: opencv::Error) -> Self {
        TrackerError::Vision(err.to_string())
    }
}
