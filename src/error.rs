use std::fmt::Display;

use crate::tiles::TileCoordinate;

/// A download request that cannot be planned. Fatal: the run never starts.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidRequest {
    pub reason: String,
}

impl InvalidRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl Display for InvalidRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid download request: {}", self.reason)
    }
}

impl std::error::Error for InvalidRequest {}

/// A single tile that could not be fetched or written. Recoverable: it is
/// recorded and the column moves on to the next row.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFetchFailure {
    pub tile: TileCoordinate,
    pub url: String,
    pub reason: String,
}

impl Display for TileFetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to fetch tile {} from {}: {}", self.tile, self.url, self.reason)
    }
}

impl std::error::Error for TileFetchFailure {}
