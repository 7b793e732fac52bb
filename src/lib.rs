//! plotrec drives a hosted graphing-calculator session to record a video of
//! an animated, time-parameterized plot.
//!
//! # Pipeline overview
//!
//! 1. **Bootstrap**: ensure the viewport corner bindings, time parameter, and
//!    animate trigger exist (idempotently) and bring their observations live.
//! 2. **Sample**: sweep the time parameter across its declared range, one
//!    still capture per sample, with UI chrome hidden and restored.
//! 3. **Assemble**: decode the stills and record them onto a
//!    [`RecordingSurface`] at a uniform per-frame cadence.
//! 4. **Deliver**: hand the finished artifact to a [`DownloadSink`].
//!
//! The host application is an opaque capability behind [`CalculatorHost`];
//! [`host::scripted::ScriptedHost`] is a deterministic in-memory stand-in.

#![forbid(unsafe_code)]

pub mod assemble;
pub mod bootstrap;
pub mod director;
pub mod download;
pub mod error;
pub mod host;
pub mod observe;
pub mod record_ffmpeg;
pub mod sampler;
pub mod session;
pub mod settings;
pub mod viewport;

pub use assemble::{
    Clock, MemorySurface, RecordingSurface, VideoArtifact, WallClock, assemble_video,
};
pub use bootstrap::bootstrap;
pub use director::{CycleOutcome, Director, SurfaceFactory, render_cycle};
pub use download::{DownloadSink, FileSink, MemorySink};
pub use error::{PlotrecError, PlotrecResult};
pub use host::{
    CalculatorHost, CaptureRequest, DisplaySettings, ExpressionDef, FolderDef, ObserverHandle,
    Screenshot, SessionState, SliderBounds,
};
pub use observe::{LiveValue, ValueStream, await_capture, eval_once, normalize_helper_expr};
pub use record_ffmpeg::{FfmpegSurface, is_ffmpeg_on_path};
pub use sampler::{capture_frames, sample_times};
pub use session::{BindingIds, Session};
pub use settings::{CancelToken, RenderSettings, Timeouts};
pub use viewport::Viewport;
