// Error types for the music crate.
//
// One enum covers every failure the pipeline can surface. The propagation
// policy lives with the callers, not here: parse failures are recovered per
// file by `corpus.rs`, while predictor and configuration failures abort the
// single generation request that hit them (`generate.rs`, `compose.rs`).

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration, rejected before any predictor call.
    #[error("config: {0}")]
    Config(String),

    /// A score file could not be parsed.
    #[error("parse: {0}")]
    Parse(String),

    /// The predictor failed or returned distributions of the wrong shape.
    #[error("predictor: {0}")]
    Predictor(String),

    /// MIDI writing failed.
    #[error("midi: {0}")]
    Midi(String),

    /// The external audio renderer failed.
    #[error("render: {0}")]
    Render(String),

    /// Catalog lookup or record validation failed.
    #[error("catalog: {0}")]
    Catalog(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<midly::Error> for Error {
    fn from(error: midly::Error) -> Self {
        Error::Parse(error.to_string())
    }
}
