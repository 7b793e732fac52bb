pub type PlotrecResult<T> = Result<T, PlotrecError>;

/// Top-level error taxonomy used across the capture pipeline.
#[derive(thiserror::Error, Debug)]
pub enum PlotrecError {
    /// Invalid user-provided settings or arguments.
    #[error("validation error: {0}")]
    Validation(String),

    /// A symbolic expression never computed, or computed to an unusable value.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// The host failed to produce a still image for a sample.
    #[error("capture error: {0}")]
    Capture(String),

    /// Image decode or recorder/encoder failure while assembling the video.
    #[error("assembly error: {0}")]
    Assembly(String),

    /// A pre-existing session binding has the expected identifier but an
    /// incompatible shape. Surfaced as a configuration error rather than
    /// silently rewriting session state.
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// A suspension point exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A cancellation token was observed at a suspension point.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlotrecError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::Assembly(msg.into())
    }

    pub fn bootstrap(msg: impl Into<String>) -> Self {
        Self::Bootstrap(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
}
