use map_merge_core::{GridError, TransformError};
use map_merge_features::EstimateError;

/// Errors reported by the merging pipeline and the grid composer.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("no grids to merge")]
    NoGrids,
    #[error("expected {expected} transforms (one per grid), got {got}")]
    TransformCountMismatch { expected: usize, got: usize },
    #[error("no transforms available; estimate or set them first")]
    NoTransformsAvailable,
    #[error("transform estimation failed earlier; nothing to compose")]
    EstimationFailed,
    #[error("transform {index} is invalid: {source}")]
    InvalidTransform {
        index: usize,
        #[source]
        source: TransformError,
    },
    #[error("transform {index} is singular or not finite")]
    SingularTransform { index: usize },
    #[error("grid {index} has resolution {got}, expected {expected}")]
    ResolutionMismatch { index: usize, expected: f32, got: f32 },
    #[error("grid {index} is malformed: {source}")]
    InvalidGrid {
        index: usize,
        #[source]
        source: GridError,
    },
    #[error("merged canvas {width}x{height} exceeds the limit of {max_cells} cells")]
    CanvasTooLarge {
        width: u64,
        height: u64,
        max_cells: u64,
    },
    #[error(transparent)]
    Estimation(#[from] EstimateError),
}
