//! Error types for pmorotation

/// Result type alias for rotation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the catalog and schedule helpers
///
/// The resolvers themselves never fail: degenerate input always maps to a
/// well-defined (possibly idle) state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Hour outside of 0..=23
    #[error("Invalid hour of day: {0}")]
    InvalidHour(u32),

    /// Date string that is not `YYYY-MM-DD`
    #[error("Invalid calendar date: {0}")]
    InvalidDate(String),

    /// A track id that the catalog does not know
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// A track id already present in the catalog
    #[error("Duplicate track id: {0}")]
    DuplicateTrack(String),

    /// JSON (de)serialization of the station document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
