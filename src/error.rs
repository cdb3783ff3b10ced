//! Error types
//!
//! Only initialization and I/O paths can fail. Steady-state simulation never
//! returns errors: bad settings are clamped and unmatched input is a no-op.

/// Result alias carrying [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Shared layout could not be sized
    #[error("note capacity {requested} outside supported range 1..={max}")]
    LayoutCapacity { requested: usize, max: usize },

    /// A background thread could not be started
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Command sent after `dispose()`
    #[error("runtime already disposed")]
    Disposed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Short context tag used when the error travels as an `ERROR` event
    pub fn context(&self) -> &'static str {
        match self {
            EngineError::LayoutCapacity { .. } => "shared-layout",
            EngineError::Spawn { name, .. } => name,
            EngineError::Disposed => "runtime",
            EngineError::Io(_) => "io",
            EngineError::Json(_) => "json",
        }
    }
}
