use crate::{error::PlotrecResult, viewport::Viewport};

pub mod scripted;

/// Callback invoked with each computed value of an observed expression.
pub type ValueCallback = Box<dyn FnMut(f64) + Send>;

/// Callback invoked exactly once with the outcome of a capture request.
pub type CaptureCallback = Box<dyn FnOnce(PlotrecResult<Screenshot>) + Send>;

/// Declared inclusive range of a slider binding. The endpoints are symbolic
/// expressions, not literals; they must be evaluated through the host, never
/// read as static configuration.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SliderBounds {
    pub min: String,
    pub max: String,
}

/// A named symbolic binding within the host session, addressable by a stable
/// identifier.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ExpressionDef {
    pub id: String,
    /// Defining expression as the host's scripting surface understands it.
    pub expr: String,
    /// Current numeric value, when the binding is a computed scalar.
    pub value: Option<f64>,
    pub slider_bounds: Option<SliderBounds>,
    pub hidden: bool,
    pub folder_id: Option<String>,
}

/// A collapsible UI folder grouping bindings in the host's expression list.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FolderDef {
    pub id: String,
    pub title: String,
    pub collapsed: bool,
    pub hidden: bool,
}

/// Full session state, used once at bootstrap to assign folder membership to
/// all managed bindings atomically.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SessionState {
    pub folders: Vec<FolderDef>,
    pub expressions: Vec<ExpressionDef>,
}

/// Global display chrome flags (grid and axis lines).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DisplaySettings {
    pub show_grid: bool,
    pub show_axes: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            show_grid: true,
            show_axes: true,
        }
    }
}

/// A request for a rendered still of the current session state.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub viewport: Viewport,
}

/// An encoded still image produced by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Active observation of a computed value. Dropping the handle unsubscribes.
pub struct ObserverHandle {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl ObserverHandle {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Explicitly end the observation. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Capabilities the pipeline consumes from the hosted calculator application.
///
/// Value observation is push-based: the host computes asynchronously and
/// signals through the subscription callback at an arbitrary later point.
/// Captures are likewise asynchronous; the `done` callback receives the
/// encoded still once the host has rendered it. All synchronous-looking reads
/// over these capabilities live in [`crate::observe`].
pub trait CalculatorHost: Send + Sync {
    /// Look up a binding by its stable identifier.
    fn expression(&self, id: &str) -> PlotrecResult<Option<ExpressionDef>>;

    /// Create or update a binding.
    fn set_expression(&self, def: &ExpressionDef) -> PlotrecResult<()>;

    /// Look up a UI folder by identifier.
    fn folder(&self, id: &str) -> PlotrecResult<Option<FolderDef>>;

    /// Create or update a UI folder.
    fn set_folder(&self, def: &FolderDef) -> PlotrecResult<()>;

    /// Bulk read of the full session state.
    fn session_state(&self) -> PlotrecResult<SessionState>;

    /// Bulk replace of the full session state.
    fn set_session_state(&self, state: &SessionState) -> PlotrecResult<()>;

    /// Create a helper binding from a symbolic expression and subscribe to its
    /// computed numeric value.
    fn observe(&self, expr: &str, callback: ValueCallback) -> PlotrecResult<ObserverHandle>;

    /// Request a rendered still at the given pixel dimensions and viewport.
    fn capture(&self, request: &CaptureRequest, done: CaptureCallback) -> PlotrecResult<()>;

    fn display_settings(&self) -> PlotrecResult<DisplaySettings>;

    fn set_display_settings(&self, settings: &DisplaySettings) -> PlotrecResult<()>;
}
