//! A deterministic in-memory calculator host.
//!
//! `ScriptedHost` stands in for the real hosted application in tests and the
//! demo CLI: bindings live in a map, helper expressions are evaluated by a
//! small arithmetic grammar, and captures are rendered synthetically with the
//! `image` crate. Chrome flags are honored in pixels (grid/axis lines and
//! corner markers only appear when visible), so chrome snapshot/restore is
//! observable in captured output.
//!
//! It also reproduces the host quirk that a bare numeric literal expression
//! never triggers computation through the helper-evaluation path; observers
//! of such expressions simply never fire.

use std::{
    collections::BTreeMap,
    f64::consts::PI,
    io::Cursor,
    sync::{Arc, Mutex, MutexGuard},
};

use image::{Rgba, RgbaImage};

use crate::{
    error::{PlotrecError, PlotrecResult},
    host::{
        CalculatorHost, CaptureCallback, CaptureRequest, DisplaySettings, ExpressionDef,
        FolderDef, ObserverHandle, Screenshot, SessionState, ValueCallback,
    },
};

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const GRID: Rgba<u8> = Rgba([220, 220, 220, 255]);
const AXIS: Rgba<u8> = Rgba([40, 40, 40, 255]);
const MARKER: Rgba<u8> = Rgba([30, 90, 220, 255]);
const DOT: Rgba<u8> = Rgba([210, 40, 40, 255]);

struct Observer {
    expr: String,
    callback: ValueCallback,
    last: Option<f64>,
}

struct Inner {
    expressions: BTreeMap<String, ExpressionDef>,
    folders: BTreeMap<String, FolderDef>,
    display: DisplaySettings,
    observers: BTreeMap<u64, Observer>,
    next_observer: u64,
    time_id: String,
    marker_pairs: Vec<(String, String)>,
    captures_before_failure: Option<u32>,
}

impl Inner {
    /// Re-evaluate every observed expression and fire callbacks whose value
    /// changed. Bare literals never compute (host quirk).
    fn notify_observers(&mut self) {
        for obs in self.observers.values_mut() {
            if is_bare_literal(&obs.expr) {
                continue;
            }
            let Some(v) = eval_expr(&self.expressions, &obs.expr) else {
                continue;
            };
            if obs.last != Some(v) {
                obs.last = Some(v);
                (obs.callback)(v);
            }
        }
    }
}

/// In-memory [`CalculatorHost`] with synthetic rendering.
#[derive(Clone)]
pub struct ScriptedHost {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                expressions: BTreeMap::new(),
                folders: BTreeMap::new(),
                display: DisplaySettings::default(),
                observers: BTreeMap::new(),
                next_observer: 0,
                time_id: "t0".to_string(),
                marker_pairs: vec![
                    ("x1".to_string(), "y1".to_string()),
                    ("x2".to_string(), "y2".to_string()),
                ],
                captures_before_failure: None,
            })),
        }
    }

    /// Which binding the synthetic plot reads as its time parameter.
    pub fn set_time_id(&self, id: &str) {
        self.lock().time_id = id.to_string();
    }

    /// Create or update a plain scalar binding.
    pub fn set_scalar(&self, id: &str, value: f64) -> PlotrecResult<()> {
        let mut def = self
            .lock()
            .expressions
            .get(id)
            .cloned()
            .unwrap_or_else(|| ExpressionDef {
                id: id.to_string(),
                ..ExpressionDef::default()
            });
        def.expr = format!("{id}={value}");
        def.value = Some(value);
        self.set_expression(&def)
    }

    /// Make every capture after the first `n` fail, for failure-path tests.
    pub fn fail_captures_after(&self, n: u32) {
        self.lock().captures_before_failure = Some(n);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("scripted host state lock poisoned")
    }
}

impl CalculatorHost for ScriptedHost {
    fn expression(&self, id: &str) -> PlotrecResult<Option<ExpressionDef>> {
        Ok(self.lock().expressions.get(id).cloned())
    }

    fn set_expression(&self, def: &ExpressionDef) -> PlotrecResult<()> {
        if def.id.trim().is_empty() {
            return Err(PlotrecError::validation("binding id must be non-empty"));
        }
        let mut inner = self.lock();
        inner.expressions.insert(def.id.clone(), def.clone());
        inner.notify_observers();
        Ok(())
    }

    fn folder(&self, id: &str) -> PlotrecResult<Option<FolderDef>> {
        Ok(self.lock().folders.get(id).cloned())
    }

    fn set_folder(&self, def: &FolderDef) -> PlotrecResult<()> {
        self.lock().folders.insert(def.id.clone(), def.clone());
        Ok(())
    }

    fn session_state(&self) -> PlotrecResult<SessionState> {
        let inner = self.lock();
        Ok(SessionState {
            folders: inner.folders.values().cloned().collect(),
            expressions: inner.expressions.values().cloned().collect(),
        })
    }

    fn set_session_state(&self, state: &SessionState) -> PlotrecResult<()> {
        let mut inner = self.lock();
        inner.folders = state
            .folders
            .iter()
            .map(|f| (f.id.clone(), f.clone()))
            .collect();
        inner.expressions = state
            .expressions
            .iter()
            .map(|e| (e.id.clone(), e.clone()))
            .collect();
        inner.notify_observers();
        Ok(())
    }

    fn observe(&self, expr: &str, callback: ValueCallback) -> PlotrecResult<ObserverHandle> {
        let mut inner = self.lock();
        let id = inner.next_observer;
        inner.next_observer += 1;

        let mut obs = Observer {
            expr: expr.to_string(),
            callback,
            last: None,
        };
        if !is_bare_literal(expr)
            && let Some(v) = eval_expr(&inner.expressions, expr)
        {
            obs.last = Some(v);
            (obs.callback)(v);
        }
        inner.observers.insert(id, obs);

        let weak = Arc::downgrade(&self.inner);
        Ok(ObserverHandle::new(move || {
            if let Some(inner) = weak.upgrade()
                && let Ok(mut guard) = inner.lock()
            {
                guard.observers.remove(&id);
            }
        }))
    }

    fn capture(&self, request: &CaptureRequest, done: CaptureCallback) -> PlotrecResult<()> {
        let result = {
            let mut inner = self.lock();
            match inner.captures_before_failure {
                Some(0) => Err(PlotrecError::capture(
                    "scripted host refused the still (induced failure)",
                )),
                budget => {
                    if let Some(n) = budget {
                        inner.captures_before_failure = Some(n - 1);
                    }
                    render_still(&inner, request)
                }
            }
        };
        done(result);
        Ok(())
    }

    fn display_settings(&self) -> PlotrecResult<DisplaySettings> {
        Ok(self.lock().display)
    }

    fn set_display_settings(&self, settings: &DisplaySettings) -> PlotrecResult<()> {
        self.lock().display = *settings;
        Ok(())
    }
}

fn is_bare_literal(expr: &str) -> bool {
    expr.trim().parse::<f64>().is_ok()
}

/// Evaluate a helper expression against current binding values.
///
/// Grammar: numbers, binding identifiers, `pi`, unary minus, `+ - * /`,
/// parentheses. Returns `None` for malformed expressions or unknown
/// identifiers, which simply never notify (matching the real host, where a
/// malformed helper computes nothing).
fn eval_expr(env: &BTreeMap<String, ExpressionDef>, expr: &str) -> Option<f64> {
    let mut p = Parser {
        src: expr.as_bytes(),
        pos: 0,
        env,
    };
    let v = p.expr()?;
    p.skip_ws();
    if p.pos == p.src.len() { Some(v) } else { None }
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    env: &'a BTreeMap<String, ExpressionDef>,
}

impl Parser<'_> {
    fn expr(&mut self) -> Option<f64> {
        let mut v = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    v += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    v -= self.term()?;
                }
                _ => return Some(v),
            }
        }
    }

    fn term(&mut self) -> Option<f64> {
        let mut v = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    v *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    v /= self.factor()?;
                }
                _ => return Some(v),
            }
        }
    }

    fn factor(&mut self) -> Option<f64> {
        self.skip_ws();
        match self.peek()? {
            b'-' => {
                self.pos += 1;
                Some(-self.factor()?)
            }
            b'(' => {
                self.pos += 1;
                let v = self.expr()?;
                self.skip_ws();
                if self.peek() != Some(b')') {
                    return None;
                }
                self.pos += 1;
                Some(v)
            }
            b'0'..=b'9' | b'.' => self.number(),
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.ident(),
            _ => None,
        }
    }

    fn number(&mut self) -> Option<f64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9' | b'.')) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    fn ident(&mut self) -> Option<f64> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')
        ) {
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.src[start..self.pos]).ok()?;
        if name == "pi" {
            return Some(PI);
        }
        self.env.get(name)?.value
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek() == Some(b' ') {
            self.pos += 1;
        }
    }
}

fn render_still(inner: &Inner, request: &CaptureRequest) -> PlotrecResult<Screenshot> {
    let (w, h) = (request.width, request.height);
    if w == 0 || h == 0 {
        return Err(PlotrecError::capture("capture dimensions must be non-zero"));
    }
    let vp = request.viewport;
    if !(vp.span_x() > 0.0 && vp.span_y() > 0.0) {
        return Err(PlotrecError::capture("capture viewport has no area"));
    }

    let mut img = RgbaImage::from_pixel(w, h, BACKGROUND);

    let px = |x: f64| ((x - vp.left) / vp.span_x() * f64::from(w)).round() as i64;
    let py = |y: f64| ((vp.top - y) / vp.span_y() * f64::from(h)).round() as i64;

    if inner.display.show_grid {
        let mut gx = vp.left.ceil();
        while gx <= vp.right {
            draw_vline(&mut img, px(gx), GRID);
            gx += 1.0;
        }
        let mut gy = vp.bottom.ceil();
        while gy <= vp.top {
            draw_hline(&mut img, py(gy), GRID);
            gy += 1.0;
        }
    }

    if inner.display.show_axes {
        draw_vline(&mut img, px(0.0), AXIS);
        draw_hline(&mut img, py(0.0), AXIS);
    }

    // Corner markers, suppressed when their folder is hidden.
    for (xid, yid) in &inner.marker_pairs {
        let (Some(xd), Some(yd)) = (inner.expressions.get(xid), inner.expressions.get(yid))
        else {
            continue;
        };
        let (Some(x), Some(y)) = (xd.value, yd.value) else {
            continue;
        };
        let visible = match &xd.folder_id {
            Some(fid) => inner.folders.get(fid).is_none_or(|f| !f.hidden),
            None => true,
        };
        if visible {
            draw_disk(&mut img, px(x), py(y), 3, MARKER);
        }
    }

    // The animated content: a dot tracing a circle as the time binding sweeps
    // its range.
    let t = inner
        .expressions
        .get(&inner.time_id)
        .and_then(|d| d.value)
        .unwrap_or(0.0);
    let (cx, cy) = ((vp.left + vp.right) / 2.0, (vp.bottom + vp.top) / 2.0);
    let r = 0.4 * vp.span_x().min(vp.span_y());
    let (dx, dy) = (
        cx + r * (2.0 * PI * t).cos(),
        cy + r * (2.0 * PI * t).sin(),
    );
    let dot_radius = (i64::from(w) / 48).max(2);
    draw_disk(&mut img, px(dx), py(dy), dot_radius, DOT);

    let mut png = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| PlotrecError::capture(format!("encode scripted still: {e}")))?;

    Ok(Screenshot {
        png,
        width: w,
        height: h,
    })
}

fn draw_vline(img: &mut RgbaImage, x: i64, color: Rgba<u8>) {
    if x < 0 || x >= i64::from(img.width()) {
        return;
    }
    for y in 0..img.height() {
        img.put_pixel(x as u32, y, color);
    }
}

fn draw_hline(img: &mut RgbaImage, y: i64, color: Rgba<u8>) {
    if y < 0 || y >= i64::from(img.height()) {
        return;
    }
    for x in 0..img.width() {
        img.put_pixel(x, y as u32, color);
    }
}

fn draw_disk(img: &mut RgbaImage, cx: i64, cy: i64, radius: i64, color: Rgba<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && y >= 0 && x < i64::from(img.width()) && y < i64::from(img.height()) {
                img.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::Viewport;

    fn env_with(entries: &[(&str, f64)]) -> BTreeMap<String, ExpressionDef> {
        entries
            .iter()
            .map(|(id, v)| {
                (
                    id.to_string(),
                    ExpressionDef {
                        id: id.to_string(),
                        value: Some(*v),
                        ..ExpressionDef::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn expression_grammar_evaluates() {
        let env = env_with(&[("a", 3.0), ("b", 0.5)]);
        assert_eq!(eval_expr(&env, "1+2*3"), Some(7.0));
        assert_eq!(eval_expr(&env, "(1+2)*3"), Some(9.0));
        assert_eq!(eval_expr(&env, "a/b"), Some(6.0));
        assert_eq!(eval_expr(&env, "-a + 4"), Some(1.0));
        assert_eq!(eval_expr(&env, "2*pi"), Some(2.0 * PI));
        assert_eq!(eval_expr(&env, "missing"), None);
        assert_eq!(eval_expr(&env, "1 +"), None);
        assert_eq!(eval_expr(&env, "(1"), None);
    }

    #[test]
    fn bare_literal_never_notifies_but_perturbed_does() {
        let host = ScriptedHost::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _h1 = host
            .observe("5", Box::new(move |v| sink.lock().unwrap().push(v)))
            .unwrap();
        let sink = Arc::clone(&seen);
        let _h2 = host
            .observe("(5)+0", Box::new(move |v| sink.lock().unwrap().push(v)))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![5.0]);
    }

    #[test]
    fn observer_fires_only_on_value_change() {
        let host = ScriptedHost::new();
        host.set_scalar("k", 1.0).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _h = host
            .observe("(k)+0", Box::new(move |v| sink.lock().unwrap().push(v)))
            .unwrap();

        host.set_scalar("k", 1.0).unwrap();
        host.set_scalar("k", 2.0).unwrap();
        host.set_scalar("unrelated", 9.0).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn unsubscribed_observer_stops_firing() {
        let host = ScriptedHost::new();
        host.set_scalar("k", 1.0).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let h = host
            .observe("(k)+0", Box::new(move |v| sink.lock().unwrap().push(v)))
            .unwrap();
        h.unsubscribe();
        host.set_scalar("k", 2.0).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }

    #[test]
    fn capture_renders_decodable_stills_at_requested_dims() {
        let host = ScriptedHost::new();
        host.set_scalar("t0", 0.25).unwrap();
        let request = CaptureRequest {
            width: 64,
            height: 48,
            viewport: Viewport::resolve(-2.0, 2.0, -1.5, 1.5),
        };
        let shot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&shot);
        host.capture(
            &request,
            Box::new(move |r| *sink.lock().unwrap() = Some(r)),
        )
        .unwrap();

        let shot = shot.lock().unwrap().take().unwrap().unwrap();
        let img = image::load_from_memory(&shot.png).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (64, 48));
    }

    #[test]
    fn chrome_flags_change_captured_pixels() {
        let host = ScriptedHost::new();
        let request = CaptureRequest {
            width: 64,
            height: 64,
            viewport: Viewport::resolve(-2.0, 2.0, -2.0, 2.0),
        };

        let grab = |host: &ScriptedHost| {
            let shot = Arc::new(Mutex::new(None));
            let sink = Arc::clone(&shot);
            host.capture(
                &request,
                Box::new(move |r| *sink.lock().unwrap() = Some(r)),
            )
            .unwrap();
            let got = shot.lock().unwrap().take().unwrap().unwrap();
            got.png
        };

        let with_chrome = grab(&host);
        host.set_display_settings(&DisplaySettings {
            show_grid: false,
            show_axes: false,
        })
        .unwrap();
        let without_chrome = grab(&host);
        assert_ne!(with_chrome, without_chrome);
    }

    #[test]
    fn induced_capture_failure_counts_down() {
        let host = ScriptedHost::new();
        host.fail_captures_after(1);
        let request = CaptureRequest {
            width: 8,
            height: 8,
            viewport: Viewport::resolve(-1.0, 1.0, -1.0, 1.0),
        };
        let results = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let sink = Arc::clone(&results);
            host.capture(
                &request,
                Box::new(move |r| sink.lock().unwrap().push(r.is_ok())),
            )
            .unwrap();
        }
        assert_eq!(*results.lock().unwrap(), vec![true, false]);
    }
}
