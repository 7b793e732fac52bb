use crate::error::{PlotrecError, PlotrecResult};

/// The rectangular mathematical region rendered on screen.
///
/// Invariant: `left <= right` and `bottom <= top`. [`Viewport::resolve`]
/// normalizes raw corner values so the invariant holds regardless of which
/// corner point was dragged further in which direction.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    pub left: f64,
    pub right: f64,
    pub bottom: f64,
    pub top: f64,
}

impl Viewport {
    /// Derive normalized bounds from the two corner points `(x1, y1)` and
    /// `(x2, y2)`. Pure; invariant under swapping x1↔x2 or y1↔y2.
    pub fn resolve(x1: f64, x2: f64, y1: f64, y2: f64) -> Self {
        Self {
            left: x1.min(x2),
            right: x1.max(x2),
            bottom: y1.min(y2),
            top: y1.max(y2),
        }
    }

    pub fn span_x(&self) -> f64 {
        self.right - self.left
    }

    pub fn span_y(&self) -> f64 {
        self.top - self.bottom
    }

    /// Output pixel dimensions at `resolution` samples per viewport unit,
    /// floored to integers. Degenerate viewports (zero span at the given
    /// resolution) are rejected.
    pub fn pixel_size(&self, resolution: f64) -> PlotrecResult<(u32, u32)> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(PlotrecError::validation(
                "resolution must be a positive, finite samples-per-unit factor",
            ));
        }
        let w = (self.span_x() * resolution).floor();
        let h = (self.span_y() * resolution).floor();
        if !(w.is_finite() && h.is_finite()) || w < 1.0 || h < 1.0 {
            return Err(PlotrecError::validation(format!(
                "viewport {:?} at resolution {resolution} yields no pixels",
                self
            )));
        }
        Ok((w as u32, h as u32))
    }
}
