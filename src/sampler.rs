//! The frame capture loop: sweep the time parameter across its declared
//! range, one still per sample, with UI chrome hidden for the duration and
//! restored unconditionally afterwards.

use crate::{
    error::{PlotrecError, PlotrecResult},
    host::{CalculatorHost, CaptureRequest, DisplaySettings, Screenshot},
    observe::{await_capture, eval_once},
    session::Session,
    settings::{CancelToken, RenderSettings, Timeouts},
};

/// Relative tolerance when confirming the committed time value.
const COMMIT_EPSILON: f64 = 1e-9;

/// Evenly spaced sample times over the inclusive range `[min, max]`:
/// `time_i = min + i/(n-1) * (max - min)`. A single sample lands exactly on
/// `min` (no division by zero).
pub fn sample_times(min: f64, max: f64, n: u32) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![min],
        _ => (0..n)
            .map(|i| min + f64::from(i) / f64::from(n - 1) * (max - min))
            .collect(),
    }
}

/// Pre-capture snapshot of UI chrome visibility.
#[derive(Clone, Debug, PartialEq)]
struct ChromeSnapshot {
    display: DisplaySettings,
    marker_folder_hidden: Option<bool>,
}

/// Scoped chrome acquisition: hides grid/axis lines and the marker folder on
/// construction, restores the snapshot on [`ChromeGuard::restore`]. Dropping
/// the guard without restoring (an error unwound past it) restores on a
/// best-effort basis and logs failures.
struct ChromeGuard<'a> {
    host: &'a dyn CalculatorHost,
    folder_id: &'a str,
    snapshot: ChromeSnapshot,
    restored: bool,
}

impl<'a> ChromeGuard<'a> {
    fn hide(host: &'a dyn CalculatorHost, folder_id: &'a str) -> PlotrecResult<Self> {
        let snapshot = ChromeSnapshot {
            display: host.display_settings()?,
            marker_folder_hidden: host.folder(folder_id)?.map(|f| f.hidden),
        };

        host.set_display_settings(&DisplaySettings {
            show_grid: false,
            show_axes: false,
        })?;
        if let Some(mut folder) = host.folder(folder_id)? {
            folder.hidden = true;
            host.set_folder(&folder)?;
        }

        Ok(Self {
            host,
            folder_id,
            snapshot,
            restored: false,
        })
    }

    fn restore(mut self) -> PlotrecResult<()> {
        self.restored = true;
        self.restore_inner()
    }

    fn restore_inner(&self) -> PlotrecResult<()> {
        self.host.set_display_settings(&self.snapshot.display)?;
        if let Some(hidden) = self.snapshot.marker_folder_hidden
            && let Some(mut folder) = self.host.folder(self.folder_id)?
        {
            folder.hidden = hidden;
            self.host.set_folder(&folder)?;
        }
        Ok(())
    }
}

impl Drop for ChromeGuard<'_> {
    fn drop(&mut self) {
        if !self.restored
            && let Err(e) = self.restore_inner()
        {
            tracing::warn!(error = %e, "failed to restore UI chrome after capture");
        }
    }
}

/// Produce the ordered frame sequence for one render cycle.
///
/// The time parameter's declared min/max are symbolic expressions and are
/// resolved freshly each run. Captures are strictly sequential: each sample's
/// assignment is confirmed committed (by observing the binding back) before
/// its still is requested, and the still must arrive before the next
/// mutation, because the host renders from live mutable state.
#[tracing::instrument(skip_all, fields(frames = settings.frame_count))]
pub fn capture_frames(
    session: &Session,
    settings: &RenderSettings,
    request: &CaptureRequest,
    timeouts: &Timeouts,
    cancel: &CancelToken,
) -> PlotrecResult<Vec<Screenshot>> {
    settings.validate()?;

    let guard = ChromeGuard::hide(session.host(), &session.ids.folder)?;
    let result = capture_frames_locked(session, settings, request, timeouts, cancel);
    match result {
        Ok(frames) => {
            guard.restore()?;
            Ok(frames)
        }
        Err(e) => {
            // The original error wins; a restore failure is logged by the
            // guard's drop.
            drop(guard);
            Err(e)
        }
    }
}

fn capture_frames_locked(
    session: &Session,
    settings: &RenderSettings,
    request: &CaptureRequest,
    timeouts: &Timeouts,
    cancel: &CancelToken,
) -> PlotrecResult<Vec<Screenshot>> {
    let host = session.host();
    let time_id = &session.ids.time;

    let def = host.expression(time_id)?.ok_or_else(|| {
        PlotrecError::evaluation(format!("time binding '{time_id}' does not exist"))
    })?;
    let bounds = def.slider_bounds.ok_or_else(|| {
        PlotrecError::evaluation(format!("time binding '{time_id}' declares no range"))
    })?;

    let t_min = eval_once(host, &bounds.min, timeouts.eval, cancel)?;
    let t_max = eval_once(host, &bounds.max, timeouts.eval, cancel)?;

    let times = sample_times(t_min, t_max, settings.frame_count);
    let mut frames = Vec::with_capacity(times.len());

    for (i, &t) in times.iter().enumerate() {
        cancel.check("frame capture")?;

        assign_time(host, time_id, t)?;
        let committed = eval_once(host, time_id, timeouts.eval, cancel)?;
        if !approx_eq(committed, t) {
            return Err(PlotrecError::capture(format!(
                "time binding '{time_id}' read back {committed} for sample {i}, expected {t}"
            )));
        }

        let shot = await_capture(host, request, timeouts.capture, cancel).map_err(|e| match e {
            PlotrecError::Capture(msg) => {
                PlotrecError::capture(format!("sample {i} of {}: {msg}", times.len()))
            }
            other => other,
        })?;
        frames.push(shot);
    }

    Ok(frames)
}

fn assign_time(host: &dyn CalculatorHost, time_id: &str, t: f64) -> PlotrecResult<()> {
    let mut def = host.expression(time_id)?.ok_or_else(|| {
        PlotrecError::evaluation(format!("time binding '{time_id}' disappeared mid-cycle"))
    })?;
    def.expr = format!("{time_id}={t}");
    def.value = Some(t);
    host.set_expression(&def)
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= COMMIT_EPSILON * a.abs().max(b.abs()).max(1.0)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{bootstrap::bootstrap, host::scripted::ScriptedHost, session::BindingIds};

    fn quick_timeouts() -> Timeouts {
        Timeouts {
            eval: Duration::from_millis(200),
            capture: Duration::from_millis(200),
            finalize: Duration::from_millis(200),
        }
    }

    fn small_settings(frame_count: u32) -> RenderSettings {
        RenderSettings {
            duration_secs: 1.0,
            frame_count,
            resolution: 4.0,
        }
    }

    fn request_for(session: &Session, settings: &RenderSettings) -> CaptureRequest {
        let viewport = session.viewport().unwrap();
        let (width, height) = viewport.pixel_size(settings.resolution).unwrap();
        CaptureRequest {
            width,
            height,
            viewport,
        }
    }

    #[test]
    fn sample_times_hit_endpoints_exactly() {
        let times = sample_times(-2.0, 6.0, 5);
        assert_eq!(times.len(), 5);
        assert_eq!(times[0], -2.0);
        assert_eq!(times[4], 6.0);
    }

    #[test]
    fn sample_times_four_over_unit_range() {
        assert_eq!(
            sample_times(0.0, 1.0, 4),
            vec![0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]
        );
    }

    #[test]
    fn single_sample_lands_on_min() {
        assert_eq!(sample_times(3.5, 9.0, 1), vec![3.5]);
        assert!(sample_times(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn captures_one_frame_per_sample_in_order() {
        let host = Arc::new(ScriptedHost::new());
        let session = bootstrap(
            host.clone(),
            BindingIds::default(),
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap();

        let settings = small_settings(6);
        let request = request_for(&session, &settings);
        let frames = capture_frames(
            &session,
            &settings,
            &request,
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(frames.len(), 6);
        for f in &frames {
            assert_eq!((f.width, f.height), (request.width, request.height));
        }
        // Different sample times produce different pixels.
        assert_ne!(frames[0].png, frames[2].png);
    }

    #[test]
    fn chrome_is_restored_after_success() {
        let host = Arc::new(ScriptedHost::new());
        let session = bootstrap(
            host.clone(),
            BindingIds::default(),
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap();

        for (grid, axes, folder_hidden) in [
            (true, true, false),
            (true, false, true),
            (false, true, false),
            (false, false, true),
        ] {
            host.set_display_settings(&DisplaySettings {
                show_grid: grid,
                show_axes: axes,
            })
            .unwrap();
            let mut folder = host.folder(&session.ids.folder).unwrap().unwrap();
            folder.hidden = folder_hidden;
            host.set_folder(&folder).unwrap();

            let settings = small_settings(2);
            let request = request_for(&session, &settings);
            capture_frames(
                &session,
                &settings,
                &request,
                &quick_timeouts(),
                &CancelToken::new(),
            )
            .unwrap();

            let display = host.display_settings().unwrap();
            assert_eq!((display.show_grid, display.show_axes), (grid, axes));
            let folder = host.folder(&session.ids.folder).unwrap().unwrap();
            assert_eq!(folder.hidden, folder_hidden);
        }
    }

    #[test]
    fn chrome_is_restored_after_capture_failure() {
        let host = Arc::new(ScriptedHost::new());
        let session = bootstrap(
            host.clone(),
            BindingIds::default(),
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap();

        host.fail_captures_after(2);
        let settings = small_settings(5);
        let request = request_for(&session, &settings);
        let err = capture_frames(
            &session,
            &settings,
            &request,
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PlotrecError::Capture(_)));

        let display = host.display_settings().unwrap();
        assert_eq!(display, DisplaySettings::default());
        let folder = host.folder(&session.ids.folder).unwrap().unwrap();
        assert!(!folder.hidden);
    }

    #[test]
    fn hidden_chrome_changes_captured_pixels() {
        let host = Arc::new(ScriptedHost::new());
        let session = bootstrap(
            host.clone(),
            BindingIds::default(),
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap();

        let settings = small_settings(1);
        let request = request_for(&session, &settings);
        let clean = capture_frames(
            &session,
            &settings,
            &request,
            &quick_timeouts(),
            &CancelToken::new(),
        )
        .unwrap();

        // A direct host capture with chrome visible must differ from the
        // sampler's chrome-hidden frame.
        let direct = crate::observe::await_capture(
            host.as_ref(),
            &request,
            Duration::from_millis(200),
            &CancelToken::new(),
        )
        .unwrap();
        assert_ne!(clean[0].png, direct.png);
    }
}
