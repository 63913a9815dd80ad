//! Per-frame marker detection and pose estimation.
//!
//! Every frame is handled on its own; nothing is carried from one frame to
//! the next apart from the running frame index.

use std::{
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
};

use nalgebra::{Point2, Point3, Vector3};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::{
    config::Intrinsics,
    error::Result,
    frame::Frame,
    source::FrameSource,
    vision::{DetectedMarker, TrackingBackend},
};

/// Axis length drawn over each marker, relative to the marker side.
pub const AXIS_SCALE: f32 = 0.7;

#[derive(Clone, Debug, PartialEq)]
pub struct MarkerPose {
    pub id: i32,
    pub corners: [Point2<f32>; 4],
    /// Rodrigues vector.
    pub rotation: Vector3<f64>,
    /// Marker centre in camera space, in the unit of the marker length.
    pub translation: Vector3<f64>,
}

#[derive(Clone, Debug)]
pub struct TrackedFrame {
    pub index: u64,
    pub annotated: Frame,
    pub poses: Vec<MarkerPose>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    EndOfStream,
}

/// Corners of a square marker of side `length` centred on the origin:
/// top-left, top-right, bottom-right, bottom-left.
pub fn marker_template(length: f32) -> [Point3<f32>; 4] {
    let h = length / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

pub struct MarkerTracker<'a, V: ?Sized> {
    vision: &'a V,
    intrinsics: Intrinsics,
    marker_length: f32,
    template: [Point3<f32>; 4],
    frames: u64,
}

impl<'a, V: TrackingBackend + ?Sized> MarkerTracker<'a, V> {
    pub fn new(vision: &'a V, intrinsics: Intrinsics, marker_length: f32) -> Self {
        Self {
            vision,
            intrinsics,
            marker_length,
            template: marker_template(marker_length),
            frames: 0,
        }
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn process_frame(&mut self, frame: Frame) -> Result<TrackedFrame> {
        let index = self.frames;
        self.frames += 1;

        let markers = self.vision.detect_markers(&frame)?;
        let mut annotated = frame;
        if markers.is_empty() {
            trace!(index, "no markers");
            return Ok(TrackedFrame {
                index,
                annotated,
                poses: Vec::new(),
            });
        }
        self.vision.draw_markers(&mut annotated, &markers)?;

        let mut poses = Vec::with_capacity(markers.len());
        for marker in &markers {
            let pose = match self
                .vision
                .solve_pose(&self.template, &marker.corners, &self.intrinsics)
            {
                Ok(pose) => pose,
                Err(err) => {
                    warn!(index, id = marker.id, "pose solve failed: {err}");
                    continue;
                }
            };
            self.vision.draw_pose(
                &mut annotated,
                &self.intrinsics,
                marker,
                &pose,
                self.marker_length * AXIS_SCALE,
            )?;
            poses.push(MarkerPose {
                id: marker.id,
                corners: marker.corners,
                rotation: pose.rotation,
                translation: pose.translation,
            });
        }
        debug!(index, detected = markers.len(), solved = poses.len(), "frame tracked");

        Ok(TrackedFrame {
            index,
            annotated,
            poses,
        })
    }

    /// Tracks until `cancel` is raised or the source runs dry. The source is
    /// released on every exit path.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K, cancel: &AtomicBool) -> Result<StopReason>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let outcome = self.track(source, sink, cancel);
        source.release();
        match &outcome {
            Ok(reason) => info!(?reason, frames = self.frames, "tracking stopped"),
            Err(err) => warn!(frames = self.frames, "tracking aborted: {err}"),
        }
        outcome
    }

    fn track<S, K>(&mut self, source: &mut S, sink: &mut K, cancel: &AtomicBool) -> Result<StopReason>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Ok(StopReason::Cancelled);
            }
            let Some(frame) = source.read()? else {
                return Ok(StopReason::EndOfStream);
            };
            let tracked = self.process_frame(frame)?;
            sink.consume(&tracked)?;
        }
    }
}

/// Receives every tracked frame in order.
pub trait FrameSink {
    fn consume(&mut self, frame: &TrackedFrame) -> Result<()>;
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
    fn consume(&mut self, frame: &TrackedFrame) -> Result<()> {
        (**self).consume(frame)
    }
}

impl<A: FrameSink, B: FrameSink> FrameSink for (A, B) {
    fn consume(&mut self, frame: &TrackedFrame) -> Result<()> {
        self.0.consume(frame)?;
        self.1.consume(frame)
    }
}

impl<S: FrameSink> FrameSink for Option<S> {
    fn consume(&mut self, frame: &TrackedFrame) -> Result<()> {
        match self {
            Some(sink) => sink.consume(frame),
            None => Ok(()),
        }
    }
}

/// Logs each pose; corners only at trace level.
#[derive(Default)]
pub struct PoseLog;

impl FrameSink for PoseLog {
    fn consume(&mut self, frame: &TrackedFrame) -> Result<()> {
        for pose in &frame.poses {
            let t = pose.translation;
            info!(
                frame = frame.index,
                id = pose.id,
                "X: {:.3} Y: {:.3} Z: {:.3}",
                t.x,
                t.y,
                t.z
            );
            trace!(frame = frame.index, id = pose.id, corners = ?pose.corners);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PoseRecord {
    frame: u64,
    id: i32,
    corners: [[f32; 2]; 4],
    rotation: [f64; 3],
    translation: [f64; 3],
}

impl PoseRecord {
    fn new(frame: u64, pose: &MarkerPose) -> Self {
        Self {
            frame,
            id: pose.id,
            corners: pose.corners.map(|c| [c.x, c.y]),
            rotation: [pose.rotation.x, pose.rotation.y, pose.rotation.z],
            translation: [pose.translation.x, pose.translation.y, pose.translation.z],
        }
    }
}

/// One JSON object per pose per line.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameSink for JsonLinesSink<W> {
    fn consume(&mut self, frame: &TrackedFrame) -> Result<()> {
        for pose in &frame.poses {
            let line = serde_json::to_string(&PoseRecord::new(frame.index, pose))
                .map_err(std::io::Error::from)?;
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()?;
        Ok(())
    }
}
