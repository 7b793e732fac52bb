use std::sync::Arc;

use crate::{
    error::{PlotrecError, PlotrecResult},
    host::CalculatorHost,
    observe::LiveValue,
    viewport::Viewport,
};

/// Stable identifiers of the bindings the pipeline manages.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BindingIds {
    pub x1: String,
    pub x2: String,
    pub y1: String,
    pub y2: String,
    /// The animation time parameter (a slider with symbolic bounds).
    pub time: String,
    /// The animate trigger; any non-zero observed value starts a render cycle.
    pub trigger: String,
    /// UI folder grouping all managed bindings.
    pub folder: String,
}

impl Default for BindingIds {
    fn default() -> Self {
        Self {
            x1: "x1".to_string(),
            x2: "x2".to_string(),
            y1: "y1".to_string(),
            y2: "y2".to_string(),
            time: "t0".to_string(),
            trigger: "record".to_string(),
            folder: "plotrec".to_string(),
        }
    }
}

pub(crate) struct CornerValues {
    pub x1: LiveValue,
    pub x2: LiveValue,
    pub y1: LiveValue,
    pub y2: LiveValue,
}

/// Live handles into a bootstrapped calculator session.
///
/// Constructed exactly once by [`crate::bootstrap::bootstrap`] and threaded
/// explicitly into every component for the life of the process; the corner
/// subscriptions stay live so the viewport can be resolved at any time.
pub struct Session {
    host: Arc<dyn CalculatorHost>,
    pub ids: BindingIds,
    corners: CornerValues,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(host: Arc<dyn CalculatorHost>, ids: BindingIds, corners: CornerValues) -> Self {
        Self { host, ids, corners }
    }

    pub fn host(&self) -> &dyn CalculatorHost {
        self.host.as_ref()
    }

    /// Resolve the current viewport from the cached corner values.
    pub fn viewport(&self) -> PlotrecResult<Viewport> {
        let corner = |live: &LiveValue, id: &str| {
            live.get().ok_or_else(|| {
                PlotrecError::evaluation(format!(
                    "corner binding '{id}' has not produced a value"
                ))
            })
        };
        Ok(Viewport::resolve(
            corner(&self.corners.x1, &self.ids.x1)?,
            corner(&self.corners.x2, &self.ids.x2)?,
            corner(&self.corners.y1, &self.ids.y1)?,
            corner(&self.corners.y2, &self.ids.y2)?,
        ))
    }
}
