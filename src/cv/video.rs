use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::{debug, info};

use super::mat_to_frame;
use crate::{
    error::{Result, TrackerError},
    frame::Frame,
    source::FrameSource,
};

/// Camera or stream opened through OpenCV's `VideoCapture`.
pub struct VideoSource {
    uri: String,
    capture: VideoCapture,
    scratch: Mat,
    released: bool,
}

/// `0`, `/dev/video2` and the like name a local device.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    uri.strip_prefix("/dev/video")
        .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .and_then(|rest| rest.parse().ok())
}

impl VideoSource {
    pub fn open(uri: &str) -> Result<Self> {
        let capture = match parse_device_index(uri) {
            Some(index) => VideoCapture::new(index, videoio::CAP_ANY),
            None => VideoCapture::from_file(uri, videoio::CAP_ANY),
        }
        .map_err(|err| {
            debug!("VideoCapture for {uri}: {err}");
            TrackerError::SourceOpen {
                uri: uri.to_owned(),
            }
        })?;
        if !capture.is_opened()? {
            return Err(TrackerError::SourceOpen {
                uri: uri.to_owned(),
            });
        }
        info!("opened video source {uri}");
        Ok(Self {
            uri: uri.to_owned(),
            capture,
            scratch: Mat::default(),
            released: false,
        })
    }
}

impl FrameSource for VideoSource {
    fn read(&mut self) -> Result<Option<Frame>> {
        if self.released {
            return Ok(None);
        }
        let grabbed = self
            .capture
            .read(&mut self.scratch)
            .map_err(|err| TrackerError::SourceRead {
                uri: self.uri.clone(),
                reason: err.to_string(),
            })?;
        if !grabbed || self.scratch.empty() {
            debug!(uri = %self.uri, "no more frames");
            return Ok(None);
        }
        mat_to_frame(&self.scratch).map(Some)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(err) = self.capture.release() {
                debug!("releasing {}: {err}", self.uri);
            }
        }
    }

    fn describe(&self) -> &str {
        &self.uri
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_indices() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video3"), Some(3));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("rtsp://cam/stream"), None);
    }
}
