use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    error::{Result, TrackerError},
    frame::Frame,
};

/// Anything frames can be pulled from, one at a time.
pub trait FrameSource: Send {
    /// `Ok(None)` means the source is exhausted.
    fn read(&mut self) -> Result<Option<Frame>>;

    /// Frees the underlying device. Reading after this yields `Ok(None)`.
    fn release(&mut self) {}

    /// Source string for diagnostics.
    fn describe(&self) -> &str;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Option<Frame>> {
        (**self).read()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn describe(&self) -> &str {
        (**self).describe()
    }
}

/// Expands a glob pattern into matching files, sorted.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|source| TrackerError::Pattern {
        pattern: pattern.to_owned(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(err) => warn!("skipping unreadable path {}: {err}", err.path().display()),
        }
    }
    files.sort();
    debug!(pattern, matched = files.len(), "expanded image pattern");
    Ok(files)
}

/// Image files matched by a glob pattern, decoded lazily in sorted order.
pub struct ImageSequence {
    pattern: String,
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    pub fn open(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: pattern.to_owned(),
            paths: expand_pattern(pattern)?,
            next: 0,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Path of the frame most recently returned by [`FrameSource::read`].
    pub fn current_path(&self) -> Option<&Path> {
        self.next
            .checked_sub(1)
            .and_then(|i| self.paths.get(i))
            .map(PathBuf::as_path)
    }
}

impl FrameSource for ImageSequence {
    fn read(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        Frame::open(path).map(Some)
    }

    fn release(&mut self) {
        self.next = self.paths.len();
    }

    fn describe(&self) -> &str {
        &self.pattern
    }
}
