//! Synthesizes a fixed-cadence video from independently captured stills.
//!
//! There is no direct "compose image sequence into video" primitive on the
//! host platform, only continuous stream recording. The generalization here:
//! every still is decoded fully up front (decode latency must not perturb
//! frame timing), then drawn onto a [`RecordingSurface`] at strictly
//! increasing offsets `delay × index` from a reference start, with
//! finalization scheduled strictly after the last frame's display interval so
//! the final frame is not truncated. The surface and the clock are both
//! interfaces so the underlying recording mechanism can be swapped without
//! touching sampling or bootstrap logic.

use std::time::{Duration, Instant};

use anyhow::Context as _;
use image::RgbaImage;

use crate::{
    error::{PlotrecError, PlotrecResult},
    host::Screenshot,
    settings::{CancelToken, RenderSettings},
};

/// A single encoded media object: the frame sequence played back at even
/// spacing over the declared duration. Transient; owned by the in-flight
/// render cycle and discarded after handoff to the download collaborator.
#[derive(Clone, Debug)]
pub struct VideoArtifact {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_count: u32,
    pub duration_secs: f64,
}

/// Monotonic time source for scheduling draws. Offsets are measured from an
/// arbitrary epoch; the assembler anchors each run at `elapsed()` on entry.
pub trait Clock {
    fn elapsed(&self) -> Duration;
    /// Block until `elapsed() >= deadline`. Returns immediately for deadlines
    /// already in the past.
    fn sleep_until(&self, deadline: Duration);
}

/// Wall-clock [`Clock`] anchored at construction.
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.elapsed();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// A capturable drawing surface with an attached recorder.
///
/// `paced()` says whether draws must actually be spaced in real time: a live
/// stream recorder needs wall-clock pacing, while a container encoder that is
/// told the cadence up front (the ffmpeg surface) does not.
pub trait RecordingSurface: Send {
    fn draw(&mut self, frame: &RgbaImage) -> PlotrecResult<()>;

    /// Stop the recorder and return the finalized encoded bytes. Must be
    /// called strictly after the last scheduled draw.
    fn finalize(self: Box<Self>) -> PlotrecResult<Vec<u8>>;

    fn paced(&self) -> bool {
        true
    }
}

/// In-memory surface for tests and headless use: draws are logged in order
/// and "encoding" is a raw concatenation of the frames.
pub struct MemorySurface {
    frames: std::sync::Arc<std::sync::Mutex<Vec<RgbaImage>>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self {
            frames: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Shared handle onto the drawn frames, usable after the surface has been
    /// consumed by [`assemble_video`].
    pub fn frame_log(&self) -> std::sync::Arc<std::sync::Mutex<Vec<RgbaImage>>> {
        std::sync::Arc::clone(&self.frames)
    }
}

impl Default for MemorySurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSurface for MemorySurface {
    fn draw(&mut self, frame: &RgbaImage) -> PlotrecResult<()> {
        self.frames
            .lock()
            .expect("memory surface lock poisoned")
            .push(frame.clone());
        Ok(())
    }

    fn finalize(self: Box<Self>) -> PlotrecResult<Vec<u8>> {
        let frames = self.frames.lock().expect("memory surface lock poisoned");
        let mut data = Vec::new();
        for f in frames.iter() {
            data.extend_from_slice(f.as_raw());
        }
        Ok(data)
    }

    fn paced(&self) -> bool {
        false
    }
}

/// Assemble the ordered frame sequence into a single video artifact.
///
/// Any decode failure aborts the whole assembly; no partial video is
/// produced. Recorder errors are fatal and non-retryable.
#[tracing::instrument(skip_all, fields(frames = frames.len(), width, height))]
pub fn assemble_video(
    frames: &[Screenshot],
    width: u32,
    height: u32,
    settings: &RenderSettings,
    mut surface: Box<dyn RecordingSurface>,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> PlotrecResult<VideoArtifact> {
    settings.validate()?;
    if frames.is_empty() {
        return Err(PlotrecError::validation(
            "video assembly requires at least one frame",
        ));
    }
    if frames.len() != settings.frame_count as usize {
        return Err(PlotrecError::validation(format!(
            "frame sequence length {} does not match configured frame count {}",
            frames.len(),
            settings.frame_count
        )));
    }

    // Decode everything before the recorder starts.
    let mut decoded = Vec::with_capacity(frames.len());
    for (i, shot) in frames.iter().enumerate() {
        cancel.check("frame decode")?;
        let img = image::load_from_memory(&shot.png)
            .with_context(|| format!("decode still image for frame {i}"))
            .map_err(|e| PlotrecError::assembly(format!("{e:#}")))?
            .to_rgba8();
        if img.dimensions() != (width, height) {
            return Err(PlotrecError::assembly(format!(
                "frame {i} decoded to {}x{}, expected {width}x{height}",
                img.width(),
                img.height()
            )));
        }
        decoded.push(img);
    }

    let delay = settings.frame_delay();
    let paced = surface.paced();
    let start = clock.elapsed();

    for (i, img) in decoded.iter().enumerate() {
        cancel.check("frame draw")?;
        if paced {
            clock.sleep_until(start + delay * i as u32);
        }
        surface.draw(img)?;
    }

    // The last frame is displayed for one full interval before the recorder
    // stops.
    if paced {
        clock.sleep_until(start + delay * decoded.len() as u32);
    }
    cancel.check("recorder finalization")?;
    let data = surface.finalize()?;

    Ok(VideoArtifact {
        data,
        width,
        height,
        frame_count: frames.len() as u32,
        duration_secs: settings.duration_secs,
    })
}
