use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::error::{PlotrecError, PlotrecResult};

/// Per-run render configuration, fixed at process start.
///
/// `duration_secs` controls the total playback length of the output,
/// `frame_count` the sample density across the time parameter's range, and
/// `resolution` the samples-per-viewport-unit scale factor for rasterization
/// (output pixels = viewport span × resolution, floored).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RenderSettings {
    pub duration_secs: f64,
    pub frame_count: u32,
    pub resolution: f64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            duration_secs: 5.0,
            frame_count: 200,
            resolution: 10.0,
        }
    }
}

impl RenderSettings {
    pub fn validate(&self) -> PlotrecResult<()> {
        if !(self.duration_secs.is_finite() && self.duration_secs > 0.0) {
            return Err(PlotrecError::validation(
                "render duration must be a positive, finite number of seconds",
            ));
        }
        if self.frame_count == 0 {
            return Err(PlotrecError::validation("render frame count must be >= 1"));
        }
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(PlotrecError::validation(
                "render resolution must be a positive, finite samples-per-unit factor",
            ));
        }
        Ok(())
    }

    /// Uniform per-frame display time: `duration / frame_count`.
    pub fn frame_delay(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs / f64::from(self.frame_count))
    }
}

/// Deadlines applied at each suspension point in the pipeline. A stalled host
/// response or recorder becomes an explicit [`PlotrecError::Timeout`] instead
/// of hanging the render cycle.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    /// Waiting for a helper expression to produce its first value.
    pub eval: Duration,
    /// Waiting for the host to deliver a still image.
    pub capture: Duration,
    /// Waiting for the recorder to finalize its output.
    pub finalize: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            eval: Duration::from_secs(10),
            capture: Duration::from_secs(30),
            finalize: Duration::from_secs(60),
        }
    }
}

/// Shared cancellation flag checked at every suspension point.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if the token has been cancelled; `what` names the operation
    /// being abandoned.
    pub fn check(&self, what: &str) -> PlotrecResult<()> {
        if self.is_cancelled() {
            return Err(PlotrecError::cancelled(format!(
                "{what} aborted by cancellation"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_catches_bad_values() {
        assert!(
            RenderSettings {
                duration_secs: 0.0,
                ..RenderSettings::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            RenderSettings {
                frame_count: 0,
                ..RenderSettings::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            RenderSettings {
                resolution: f64::NAN,
                ..RenderSettings::default()
            }
            .validate()
            .is_err()
        );
        assert!(RenderSettings::default().validate().is_ok());
    }

    #[test]
    fn frame_delay_is_duration_over_frame_count() {
        let s = RenderSettings {
            duration_secs: 5.0,
            frame_count: 200,
            resolution: 10.0,
        };
        assert_eq!(s.frame_delay(), Duration::from_millis(25));
    }

    #[test]
    fn cancel_token_trips_check() {
        let token = CancelToken::new();
        assert!(token.check("test").is_ok());
        token.cancel();
        assert!(matches!(
            token.check("test"),
            Err(PlotrecError::Cancelled(_))
        ));
    }
}
