//! Core types and utilities for occupancy grid merging.
//!
//! This crate is intentionally small and purely geometric. It knows about
//! occupancy grids, grayscale images and 2D homogeneous transforms, and how to
//! convert those transforms to and from the translation + quaternion pose form
//! used at the system boundary. It does *not* know about feature detection.

mod grid;
mod homography;
mod image;
mod logger;
mod transform;

pub use grid::{is_known, GridError, MapMetaData, OccupancyGrid, Pose, FREE, OCCUPIED, UNKNOWN};
pub use homography::{estimate_similarity, Homography};
pub use image::{GrayImage, GrayImageView};
pub use transform::{to_external, to_internal, ExternalTransform, TransformError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV};
