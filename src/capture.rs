//! Background frame capture for interactive calibration, and the operator
//! prompt that decides which frames are kept.

use std::{
    io::{BufRead, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, trace, warn};

use crate::{
    error::{Result, TrackerError},
    frame::Frame,
    source::FrameSource,
};

/// Captures taken before the prompt's default flips from yes to no.
pub const DEFAULT_CALIBRATION_IMAGE_COUNT: usize = 9;

/// Handle to the capture thread. Frames land in a single slot that always
/// holds the newest one.
pub struct CaptureTask<S> {
    latest: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<S>,
}

pub fn spawn_capture<S: FrameSource + 'static>(source: S) -> CaptureTask<S> {
    let (tx, rx) = bounded(1);
    let evict = rx.clone();
    let stop = Arc::new(AtomicBool::new(false));

    let handle = {
        let stop = stop.clone();
        thread::spawn(move || capture_thread(source, tx, evict, stop))
    };

    CaptureTask {
        latest: rx,
        stop,
        handle,
    }
}

fn capture_thread<S: FrameSource>(
    mut source: S,
    tx: Sender<Frame>,
    evict: Receiver<Frame>,
    stop: Arc<AtomicBool>,
) -> S {
    let mut produced = 0usize;
    while !stop.load(Ordering::Relaxed) {
        let frame = match source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(produced, "capture source exhausted");
                break;
            }
            Err(err) => {
                warn!("capture from {} failed: {err}", source.describe());
                break;
            }
        };
        produced += 1;

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                // drop the stale frame, then the slot is ours
                let _ = evict.try_recv();
                let _ = tx.try_send(frame);
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
        trace!(produced, "frame published");
    }
    source
}

impl<S> CaptureTask<S> {
    /// View of the stream for an operator deciding what to capture.
    pub fn feed(&self) -> LiveFeed<'_> {
        LiveFeed::new(&self.latest)
    }

    /// Stops the capture thread and hands the source back.
    pub fn join(self) -> Result<S> {
        self.stop.store(true, Ordering::Relaxed);
        drop(self.latest);
        self.handle.join().map_err(|_| TrackerError::CaptureJoin)
    }
}

/// The capture stream as seen from the foreground. A capture takes the frame
/// last handed out by [`LiveFeed::poll`], so what gets kept is what was on
/// screen.
pub struct LiveFeed<'a> {
    slot: &'a Receiver<Frame>,
    shown: Option<Frame>,
    ended: bool,
}

impl<'a> LiveFeed<'a> {
    pub(crate) fn new(slot: &'a Receiver<Frame>) -> Self {
        Self {
            slot,
            shown: None,
            ended: false,
        }
    }

    /// The newest frame, if one arrived since the last call. Never blocks.
    pub fn poll(&mut self) -> Option<&Frame> {
        match self.slot.try_recv() {
            Ok(frame) => {
                self.shown = Some(frame);
                self.shown.as_ref()
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.ended = true;
                None
            }
        }
    }

    /// The capture thread has stopped and no frame is left in the slot.
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Frame to keep: the one last polled, otherwise the next to arrive.
    /// `None` once the stream is over.
    fn take(&mut self) -> Option<Frame> {
        self.shown.take().or_else(|| self.slot.recv().ok())
    }
}

/// Whoever decides which frames become calibration images.
pub trait Operator {
    /// `captured` images were taken so far; `default` is the answer a plain
    /// confirmation stands for. `feed` shows the live stream meanwhile.
    fn confirm_capture(
        &mut self,
        captured: usize,
        default: bool,
        feed: &mut LiveFeed<'_>,
    ) -> Result<bool>;

    /// Called with every frame that was kept.
    fn show_capture(&mut self, _index: usize, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

impl<O: Operator + ?Sized> Operator for Box<O> {
    fn confirm_capture(
        &mut self,
        captured: usize,
        default: bool,
        feed: &mut LiveFeed<'_>,
    ) -> Result<bool> {
        (**self).confirm_capture(captured, default, feed)
    }

    fn show_capture(&mut self, index: usize, frame: &Frame) -> Result<()> {
        (**self).show_capture(index, frame)
    }
}

/// Answer for a key pressed in a preview window: P or I captures, Q or Esc
/// finishes, Enter takes `default`. `None` for any other key.
pub fn key_answer(key: i32, default: bool) -> Option<bool> {
    if key < 0 {
        return None;
    }
    match (key & 0xff) as u8 {
        b'p' | b'P' | b'i' | b'I' => Some(true),
        b'q' | b'Q' | 0x1b => Some(false),
        b'\n' | b'\r' => Some(default),
        _ => None,
    }
}

/// Line-based yes/no prompt without a preview, normally on stdin/stderr.
pub struct LineOperator<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LineOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl LineOperator<std::io::StdinLock<'static>, std::io::Stderr> {
    /// Prompts on stderr so stdout stays free for pose output.
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> Operator for LineOperator<R, W> {
    fn confirm_capture(
        &mut self,
        captured: usize,
        default: bool,
        _feed: &mut LiveFeed<'_>,
    ) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        write!(
            self.output,
            "Capture calibration image {}? {hint} ",
            captured + 1
        )
        .map_err(TrackerError::Prompt)?;
        self.output.flush().map_err(TrackerError::Prompt)?;

        loop {
            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .map_err(TrackerError::Prompt)?;
            if read == 0 {
                return Ok(default);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" | "q" => return Ok(false),
                other => {
                    write!(self.output, "{other:?}: answer y or n ").map_err(TrackerError::Prompt)?;
                    self.output.flush().map_err(TrackerError::Prompt)?;
                }
            }
        }
    }
}

/// Runs the capture prompt until the operator declines or the stream ends.
pub fn collect_frames<S, O>(task: &CaptureTask<S>, operator: &mut O) -> Result<Vec<Frame>>
where
    O: Operator + ?Sized,
{
    let mut feed = task.feed();
    let mut frames = Vec::new();
    loop {
        let default = frames.len() < DEFAULT_CALIBRATION_IMAGE_COUNT;
        if !operator.confirm_capture(frames.len(), default, &mut feed)? {
            debug!(captured = frames.len(), "operator finished capturing");
            break;
        }
        let Some(frame) = feed.take() else {
            warn!(captured = frames.len(), "stream ended during capture");
            break;
        };
        operator.show_capture(frames.len(), &frame)?;
        frames.push(frame);
    }
    Ok(frames)
}


#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{testing::*, *};

    fn answers(input: &str, captured: usize, default: bool) -> bool {
        let (_tx, rx) = bounded(1);
        let mut out = Vec::new();
        let mut operator = LineOperator::new(Cursor::new(input.to_owned()), &mut out);
        operator
            .confirm_capture(captured, default, &mut LiveFeed::new(&rx))
            .unwrap()
    }

    #[test]
    fn empty_reply_takes_the_default() {
        assert!(answers("\n", 0, true));
        assert!(!answers("\n", 9, false));
        assert!(answers("", 3, true));
    }

    #[test]
    fn explicit_replies_override_the_default() {
        assert!(answers("y\n", 12, false));
        assert!(!answers("No\n", 0, true));
        assert!(!answers("maybe\nq\n", 0, true));
    }

    #[test]
    fn prompt_shows_default() {
        let (_tx, rx) = bounded(1);
        let mut out = Vec::new();
        LineOperator::new(Cursor::new("\n"), &mut out)
            .confirm_capture(9, false, &mut LiveFeed::new(&rx))
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Capture calibration image 10? [y/N] "
        );
    }

    #[test]
    fn terminal_prompt_stays_off_stdout() {
        let operator: LineOperator<_, std::io::Stderr> = LineOperator::stdio();
        drop(operator);
    }

    #[test]
    fn preview_keys() {
        for key in [b'p', b'P', b'i', b'I'] {
            assert_eq!(key_answer(i32::from(key), false), Some(true));
        }
        for key in [b'q', b'Q', 0x1b] {
            assert_eq!(key_answer(i32::from(key), true), Some(false));
        }
        assert_eq!(key_answer(13, true), Some(true));
        assert_eq!(key_answer(10, false), Some(false));
        assert_eq!(key_answer(-1, true), None);
        assert_eq!(key_answer(i32::from(b'x'), true), None);
    }

    #[test]
    fn capture_keeps_the_frame_on_screen() {
        let task = spawn_capture(CountingSource::endless());
        let mut operator = WatchingOperator {
            frames_seen: 3,
            captures: 4,
            on_screen: Vec::new(),
        };

        let frames = collect_frames(&task, &mut operator).unwrap();
        task.join().unwrap();

        let stamps: Vec<u32> = frames.iter().map(stamp).collect();
        assert_eq!(stamps, operator.on_screen);
        assert_eq!(stamps.len(), 4);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn feed_reports_the_end_of_the_stream() {
        let task = spawn_capture(CountingSource::limited(2));
        let mut feed = task.feed();
        let mut seen = Vec::new();
        while !feed.ended() {
            if let Some(frame) = feed.poll() {
                seen.push(stamp(frame));
            }
        }
        drop(feed);
        task.join().unwrap();

        assert!(!seen.is_empty());
        assert_eq!(seen.last(), Some(&1));
    }

    #[test]
    fn captures_are_newer_than_the_last() {
        let task = spawn_capture(CountingSource::endless());
        let mut operator = ScriptedOperator {
            decline_after: 5,
            defaults: Vec::new(),
        };

        let frames = collect_frames(&task, &mut operator).unwrap();
        let source = task.join().unwrap();

        assert_eq!(frames.len(), 5);
        let stamps: Vec<u32> = frames.iter().map(stamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert!(source.next >= 5);
    }

    #[test]
    fn exhausted_source_ends_the_prompt_loop() {
        let task = spawn_capture(CountingSource::limited(1));
        let mut operator = ScriptedOperator {
            decline_after: usize::MAX,
            defaults: Vec::new(),
        };

        let frames = collect_frames(&task, &mut operator).unwrap();
        task.join().unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(operator.defaults, [true, true]);
    }
}
