//! Merge occupancy grid maps whose relative poses are unknown.
//!
//! The [`MergingPipeline`] renders every grid as a grayscale image, registers
//! the images with feature matching, and warps all grids into the frame of the
//! first one:
//!
//! ```no_run
//! use map_merge::{MergingPipeline, OccupancyGrid};
//! use std::sync::Arc;
//!
//! # fn load(_: &str) -> OccupancyGrid { OccupancyGrid::filled(1, 1, 0.05, -1) }
//! let mut pipeline = MergingPipeline::default();
//! pipeline.feed([Arc::new(load("a")), Arc::new(load("b"))]);
//! if pipeline.estimate_transform() {
//!     let merged = pipeline.compose_grids();
//!     println!("merged: {:?}", merged.map(|g| (g.info.width, g.info.height)));
//!     for t in pipeline.transforms() {
//!         println!("{:?}", t.translation);
//!     }
//! }
//! ```
//!
//! ## API map
//! - `map_merge::core`: grids, images, transforms and the pose converter.
//! - `map_merge::features`: the feature finder, matcher and estimator seams
//!   with their bundled implementations.
//! - [`rasterize`], [`compose_grids`]: the pipeline stages as free functions.
//! - `map_merge::io`: parameter JSON files and, with feature `image`, PGM maps.

pub use map_merge_core as core;
pub use map_merge_features as features;

pub use map_merge_core::{
    init_from_env, init_with_level, to_external, to_internal, ExternalTransform, Homography,
    MapMetaData, OccupancyGrid, Pose,
};

#[cfg(feature = "tracing")]
pub use map_merge_core::init_tracing;

mod compose;
mod error;
pub mod io;
mod pipeline;
mod rasterize;

pub use compose::{compose_grids, ComposeParams, FusionRule};
pub use error::MergeError;
pub use io::MapIoError;
pub use pipeline::{MergeParams, MergingPipeline, PipelineState};
pub use rasterize::{cell_intensity, rasterize, UNKNOWN_INTENSITY};

#[cfg(feature = "image")]
pub use io::{load_map_pgm, save_map_pgm};
