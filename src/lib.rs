//! Camera calibration from checkerboard images and ArUco marker pose
//! tracking.

pub mod calibration;
pub mod capture;
pub mod chessboard;
pub mod config;
#[cfg(feature = "opencv")]
pub mod cv;
pub mod dictionary;
pub mod error;
pub mod frame;
pub mod generate;
pub mod logging;
pub mod session;
pub mod source;
pub mod store;
pub mod tracker;
pub mod vision;

pub use calibration::{CalibrationAggregator, CalibrationResult};
pub use chessboard::{CheckerboardGeometry, CornerExtractor};
pub use config::{Intrinsics, ResolvedIntrinsics};
pub use dictionary::ArucoDictionary;
pub use error::{Result, TrackerError};
pub use frame::{Frame, PixelFormat};
pub use session::CalibrationSession;
pub use source::{FrameSource, ImageSequence};
pub use tracker::{MarkerTracker, StopReason, TrackedFrame};
