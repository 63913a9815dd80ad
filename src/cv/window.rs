use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use opencv::{
    core::Mat,
    highgui::{
        destroy_window, get_window_property, imshow, named_window, poll_key, resize_window,
        set_window_title, wait_key, WINDOW_NORMAL, WND_PROP_VISIBLE,
    },
};
use tracing::{debug, info, warn};

use super::frame_to_mat;
use crate::{
    capture::{key_answer, LiveFeed, Operator, DEFAULT_CALIBRATION_IMAGE_COUNT},
    error::Result,
    frame::Frame,
    tracker::{FrameSink, TrackedFrame},
};

fn open_window(name: &str, size: (i32, i32)) -> Result<()> {
    named_window(name, WINDOW_NORMAL)?;
    // some backends ignore the resize until the window has been pumped once
    wait_key(100)?;
    resize_window(name, size.0, size.1)?;
    Ok(())
}

/// Shows every tracked frame. Any key press raises `cancel`.
pub struct PreviewWindow {
    name: String,
    cancel: Arc<AtomicBool>,
}

impl PreviewWindow {
    pub fn new(name: &str, size: (i32, i32), cancel: Arc<AtomicBool>) -> Result<Self> {
        open_window(name, size)?;
        Ok(Self {
            name: name.to_owned(),
            cancel,
        })
    }
}

impl FrameSink for PreviewWindow {
    fn consume(&mut self, frame: &TrackedFrame) -> Result<()> {
        imshow(&self.name, &frame_to_mat(&frame.annotated)?)?;
        if poll_key()? >= 0 {
            debug!("key pressed, stopping");
            self.cancel.store(true, Ordering::Relaxed);
        }
        Ok(())
    }
}

impl Drop for PreviewWindow {
    fn drop(&mut self) {
        let _ = destroy_window(&self.name);
    }
}

/// Live preview of the capture stream, answered with keys in the window:
/// P or I captures, Enter captures until enough images are taken and
/// finishes after that, Q or Esc finishes.
pub struct WindowOperator {
    name: String,
}

impl WindowOperator {
    pub fn new(name: &str, size: (i32, i32)) -> Result<Self> {
        open_window(name, size)?;
        eprintln!("Press P, I or Enter in the preview window to take a picture, Q or Esc to finish.");
        eprintln!(
            "Enter finishes once {DEFAULT_CALIBRATION_IMAGE_COUNT} pictures are taken, P keeps taking pictures."
        );
        Ok(Self {
            name: name.to_owned(),
        })
    }
}

impl Operator for WindowOperator {
    fn confirm_capture(
        &mut self,
        _captured: usize,
        default: bool,
        feed: &mut LiveFeed<'_>,
    ) -> Result<bool> {
        loop {
            if let Some(frame) = feed.poll() {
                imshow(&self.name, &frame_to_mat(frame)?)?;
            } else if feed.ended() {
                warn!("capture stream ended");
                return Ok(false);
            }
            if let Some(answer) = key_answer(wait_key(1)?, default) {
                return Ok(answer);
            }
        }
    }

    fn show_capture(&mut self, index: usize, _frame: &Frame) -> Result<()> {
        set_window_title(
            &self.name,
            &format!("{} ({} taken)", self.name, index + 1),
        )?;
        info!(taken = index + 1, "picture taken");
        Ok(())
    }
}

impl Drop for WindowOperator {
    fn drop(&mut self) {
        let _ = destroy_window(&self.name);
    }
}

/// Browse `images` in one window: h/l, comma/period or the arrow keys step,
/// q or Esc closes.
pub fn imshow_multi(images: &[Frame], title: &str, size: (i32, i32)) -> Result<()> {
    const NAME: &str = "imshow_multi";
    if images.is_empty() {
        return Ok(());
    }
    let mats = images.iter().map(frame_to_mat).collect::<Result<Vec<Mat>>>()?;

    open_window(NAME, size)?;
    let mut i = 0;
    imshow(NAME, &mats[i])?;
    set_window_title(NAME, &format!("{title} (Image {} of {})", i + 1, mats.len()))?;
    loop {
        let c = wait_key(100)?;
        if c == i32::from(b'q') || c == 0x1b || get_window_property(NAME, WND_PROP_VISIBLE)? == 0. {
            break;
        }

        if c == 81 || c == i32::from(b'h') || c == i32::from(b',') {
            i = (i + mats.len() - 1) % mats.len();
        } else if c == 83 || c == i32::from(b'l') || c == i32::from(b'.') {
            i = (i + 1) % mats.len();
        } else {
            continue;
        }
        imshow(NAME, &mats[i])?;
        set_window_title(NAME, &format!("{title} (Image {} of {})", i + 1, mats.len()))?;
    }
    destroy_window(NAME)?;
    Ok(())
}
