//! MP4 recording surface backed by the system `ffmpeg` binary.
//!
//! Raw RGBA frames are piped to `ffmpeg` over stdin with the cadence declared
//! up front (`-r frame_count/duration`), so the surface is unpaced: timing is
//! written into the container rather than reproduced in wall time. The MP4 is
//! staged in a temp file (the container needs seekable output) and read back
//! on finalize.

use std::{
    io::{Read as _, Write as _},
    path::PathBuf,
    process::{Child, ChildStdin, Command, Stdio},
    time::{Duration, Instant},
};

use anyhow::Context as _;
use image::RgbaImage;

use crate::{
    assemble::RecordingSurface,
    error::{PlotrecError, PlotrecResult},
    settings::{RenderSettings, Timeouts},
};

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub struct FfmpegSurface {
    width: u32,
    height: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    out_path: TempFileGuard,
    finalize_timeout: Duration,
}

impl FfmpegSurface {
    /// Spawn `ffmpeg` recording a `width`x`height` rawvideo stream into a
    /// temp MP4. Encoder unavailability is fatal and non-retryable; there is
    /// no fallback encoding path.
    pub fn open(
        width: u32,
        height: u32,
        settings: &RenderSettings,
        timeouts: &Timeouts,
    ) -> PlotrecResult<Self> {
        settings.validate()?;
        if width == 0 || height == 0 {
            return Err(PlotrecError::validation(
                "recording width/height must be non-zero",
            ));
        }
        if !width.is_multiple_of(2) || !height.is_multiple_of(2) {
            // We target yuv420p output for maximum compatibility.
            return Err(PlotrecError::validation(
                "recording width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        if !is_ffmpeg_on_path() {
            return Err(PlotrecError::assembly(
                "ffmpeg is required for MP4 recording, but was not found on PATH",
            ));
        }

        let out_path = TempFileGuard(Some(std::env::temp_dir().join(format!(
            "plotrec_record_{}_{}.mp4",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ))));

        let rate = f64::from(settings.frame_count) / settings.duration_secs;

        // System `ffmpeg` rather than native FFmpeg bindings, to avoid dev
        // header/lib requirements.
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{width}x{height}"),
            "-r",
            &format_rate(rate),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ])
        .arg(out_path.path());

        let mut child = cmd.spawn().map_err(|e| {
            PlotrecError::assembly(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlotrecError::assembly("failed to open ffmpeg stdin (unexpected)"))?;

        Ok(Self {
            width,
            height,
            child,
            stdin: Some(stdin),
            out_path,
            finalize_timeout: timeouts.finalize,
        })
    }
}

impl RecordingSurface for FfmpegSurface {
    fn draw(&mut self, frame: &RgbaImage) -> PlotrecResult<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(PlotrecError::assembly(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(PlotrecError::assembly("ffmpeg recorder already finalized"));
        };
        stdin.write_all(frame.as_raw()).map_err(|e| {
            PlotrecError::assembly(format!("failed to write frame to ffmpeg stdin: {e}"))
        })
    }

    fn finalize(mut self: Box<Self>) -> PlotrecResult<Vec<u8>> {
        drop(self.stdin.take());

        let deadline = Instant::now() + self.finalize_timeout;
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = self.child.kill();
                        let _ = self.child.wait();
                        return Err(PlotrecError::timeout(format!(
                            "ffmpeg did not finalize within {:?}",
                            self.finalize_timeout
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(PlotrecError::assembly(format!(
                        "failed to wait for ffmpeg: {e}"
                    )));
                }
            }
        };

        let mut stderr = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        if !status.success() {
            return Err(PlotrecError::assembly(format!(
                "ffmpeg exited with status {status}: {}",
                stderr.trim()
            )));
        }

        let data = std::fs::read(self.out_path.path())
            .with_context(|| "read finalized mp4 from temp file")
            .map_err(PlotrecError::Other)?;
        Ok(data)
    }

    fn paced(&self) -> bool {
        false
    }
}

fn format_rate(rate: f64) -> String {
    if (rate - rate.round()).abs() < 1e-9 {
        format!("{}", rate.round() as u64)
    } else {
        format!("{rate:.4}")
    }
}

struct TempFileGuard(Option<PathBuf>);

impl TempFileGuard {
    fn path(&self) -> &PathBuf {
        self.0.as_ref().expect("temp path taken before drop")
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}
