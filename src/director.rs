//! The top-level render cycle and its trigger loop.
//!
//! A cycle moves `Idle → Sampling (chrome hidden) → Assembling (chrome
//! restored) → Idle`, entered whenever the animate trigger's observed value
//! is non-zero (level-triggered). Cycles are single-flight: triggers that
//! arrive while one is in flight are drained and dropped once it completes,
//! rather than racing on the shared host state.

use std::time::Duration;

use crate::{
    assemble::{Clock, RecordingSurface, VideoArtifact, assemble_video},
    download::DownloadSink,
    error::{PlotrecError, PlotrecResult},
    host::CaptureRequest,
    observe::ValueStream,
    sampler::capture_frames,
    session::Session,
    settings::{CancelToken, RenderSettings, Timeouts},
};

/// Fresh recording surface for each cycle, sized once the viewport is known.
pub type SurfaceFactory =
    Box<dyn FnMut(u32, u32) -> PlotrecResult<Box<dyn RecordingSurface>> + Send>;

/// Run one complete render cycle: resolve the viewport, capture the frame
/// sequence, assemble the video. All failures surface here; no retry
/// anywhere, and no partial artifact on failure.
#[tracing::instrument(skip_all)]
pub fn render_cycle(
    session: &Session,
    settings: &RenderSettings,
    timeouts: &Timeouts,
    make_surface: &mut SurfaceFactory,
    clock: &dyn Clock,
    cancel: &CancelToken,
) -> PlotrecResult<VideoArtifact> {
    settings.validate()?;

    let viewport = session.viewport()?;
    let (width, height) = viewport.pixel_size(settings.resolution)?;
    tracing::debug!(?viewport, width, height, "render cycle started");

    let request = CaptureRequest {
        width,
        height,
        viewport,
    };
    let frames = capture_frames(session, settings, &request, timeouts, cancel)?;

    let surface = make_surface(width, height)?;
    assemble_video(&frames, width, height, settings, surface, clock, cancel)
}

/// Outcome of one pass over the trigger stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No trigger value arrived within the wait window.
    Idle,
    /// A trigger value arrived but was zero.
    Skipped,
    /// A cycle ran to completion and the artifact was delivered.
    Completed,
}

/// Owns the bootstrapped session and drives render cycles off the animate
/// trigger.
pub struct Director {
    session: Session,
    settings: RenderSettings,
    timeouts: Timeouts,
    cancel: CancelToken,
    trigger: ValueStream,
    make_surface: SurfaceFactory,
    clock: Box<dyn Clock + Send>,
    sink: Box<dyn DownloadSink>,
    filename: String,
}

impl Director {
    pub fn new(
        session: Session,
        settings: RenderSettings,
        timeouts: Timeouts,
        make_surface: SurfaceFactory,
        clock: Box<dyn Clock + Send>,
        sink: Box<dyn DownloadSink>,
        filename: impl Into<String>,
    ) -> PlotrecResult<Self> {
        settings.validate()?;
        let trigger = ValueStream::subscribe(session.host(), &session.ids.trigger)?;
        Ok(Self {
            session,
            settings,
            timeouts,
            cancel: CancelToken::new(),
            trigger,
            make_surface,
            clock,
            sink,
            filename: filename.into(),
        })
    }

    /// Token that aborts the in-flight cycle and stops [`Director::run`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait up to `wait` for the next trigger value and, if it is non-zero,
    /// run one render cycle and deliver the artifact.
    pub fn process_next_trigger(&mut self, wait: Duration) -> PlotrecResult<CycleOutcome> {
        let value = match self.trigger.recv_timeout(wait, &self.cancel) {
            Ok(v) => v,
            Err(PlotrecError::Timeout(_)) => return Ok(CycleOutcome::Idle),
            Err(e) => return Err(e),
        };
        if value == 0.0 {
            return Ok(CycleOutcome::Skipped);
        }

        let artifact = render_cycle(
            &self.session,
            &self.settings,
            &self.timeouts,
            &mut self.make_surface,
            self.clock.as_ref(),
            &self.cancel,
        )?;
        self.sink.deliver(&artifact, &self.filename)?;

        // Single-flight: anything that fired while we were recording is
        // stale.
        let dropped = self.trigger.drain();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped triggers observed while a cycle was in flight");
        }
        Ok(CycleOutcome::Completed)
    }

    /// Process triggers until the cancel token fires.
    pub fn run(&mut self) -> PlotrecResult<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match self.process_next_trigger(Duration::from_millis(250)) {
                Ok(_) => {}
                Err(PlotrecError::Cancelled(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        assemble::{MemorySurface, WallClock},
        bootstrap::bootstrap,
        download::shared_memory_sink,
        host::scripted::ScriptedHost,
        session::BindingIds,
    };

    const WAIT: Duration = Duration::from_millis(100);

    fn quick_timeouts() -> Timeouts {
        Timeouts {
            eval: Duration::from_millis(200),
            capture: Duration::from_millis(200),
            finalize: Duration::from_millis(200),
        }
    }

    fn director_for(host: Arc<ScriptedHost>) -> (Director, Arc<std::sync::Mutex<crate::download::MemorySink>>) {
        let session = bootstrap(
            host,
            BindingIds::default(),
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap();
        let settings = RenderSettings {
            duration_secs: 1.0,
            frame_count: 4,
            resolution: 2.0,
        };
        let (sink, handle) = shared_memory_sink();
        let director = Director::new(
            session,
            settings,
            quick_timeouts(),
            Box::new(|_, _| Ok(Box::new(MemorySurface::new()) as Box<dyn RecordingSurface>)),
            Box::new(WallClock::new()),
            Box::new(sink),
            "plot.mp4",
        )
        .unwrap();
        (director, handle)
    }

    #[test]
    fn idle_when_no_trigger_fires() {
        let host = Arc::new(ScriptedHost::new());
        let (mut director, sink) = director_for(host.clone());
        // Subscribing delivers the trigger's initial value (zero).
        assert_eq!(
            director.process_next_trigger(WAIT).unwrap(),
            CycleOutcome::Skipped
        );
        assert_eq!(
            director.process_next_trigger(WAIT).unwrap(),
            CycleOutcome::Idle
        );
        assert!(sink.lock().unwrap().delivered().is_empty());
    }

    #[test]
    fn nonzero_trigger_runs_a_cycle_and_delivers() {
        let host = Arc::new(ScriptedHost::new());
        let (mut director, sink) = director_for(host.clone());
        director.process_next_trigger(WAIT).unwrap();

        host.set_scalar("record", 1.0).unwrap();
        assert_eq!(
            director.process_next_trigger(WAIT).unwrap(),
            CycleOutcome::Completed
        );

        let sink = sink.lock().unwrap();
        let (name, artifact) = &sink.delivered()[0];
        assert_eq!(name, "plot.mp4");
        assert_eq!(artifact.frame_count, 4);
        assert_eq!(artifact.duration_secs, 1.0);
    }

    #[test]
    fn overlapping_triggers_are_dropped() {
        let host = Arc::new(ScriptedHost::new());
        let (mut director, sink) = director_for(host.clone());
        director.process_next_trigger(WAIT).unwrap();

        // Several toggles queue up before the director gets to run.
        host.set_scalar("record", 1.0).unwrap();
        host.set_scalar("record", 2.0).unwrap();
        host.set_scalar("record", 3.0).unwrap();

        assert_eq!(
            director.process_next_trigger(WAIT).unwrap(),
            CycleOutcome::Completed
        );
        assert_eq!(
            director.process_next_trigger(WAIT).unwrap(),
            CycleOutcome::Idle
        );
        assert_eq!(sink.lock().unwrap().delivered().len(), 1);
    }

    #[test]
    fn cancellation_stops_the_cycle() {
        let host = Arc::new(ScriptedHost::new());
        let (mut director, sink) = director_for(host.clone());
        director.process_next_trigger(WAIT).unwrap();

        director.cancel_token().cancel();
        host.set_scalar("record", 1.0).unwrap();
        let err = director.process_next_trigger(WAIT).unwrap_err();
        assert!(matches!(err, PlotrecError::Cancelled(_)));
        assert!(sink.lock().unwrap().delivered().is_empty());
    }
}
