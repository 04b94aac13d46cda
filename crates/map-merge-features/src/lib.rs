//! Feature-based registration of grid images.
//!
//! Three collaborators, each behind a trait so callers can swap them:
//!
//! - [`FeaturesFinder`]: keypoints and binary descriptors per image
//!   ([`OrbFeaturesFinder`], OpenCV ORB),
//! - [`FeaturesMatcher`]: descriptor matching plus a robust per-pair fit
//!   ([`BestOf2NearestRangeMatcher`], OpenCV brute-force Hamming matching),
//! - [`Estimator`]: one global transform per image from the pairwise results
//!   ([`SpanningTreeEstimator`]).
//!
//! Transforms are 3x3 matrices acting on pixel coordinates. The estimator's
//! output maps each image into the pixel frame of image 0.

mod estimator;
mod matcher;
mod orb;
mod params;
mod ransac;
mod types;

use map_merge_core::{GrayImageView, Homography};

pub use estimator::{EstimateError, SpanningTreeEstimator};
pub use matcher::BestOf2NearestRangeMatcher;
pub use orb::OrbFeaturesFinder;
pub use params::{EstimatorParams, MatcherParams, OrbParams, RansacParams};
pub use ransac::{fit_similarity, RansacFit};
pub use types::{
    match_confidence, Descriptor, FeatureMatch, ImageFeatures, KeyPoint, PairwiseMatches,
};

/// Extracts features from one grayscale image.
pub trait FeaturesFinder: Sync {
    fn find(&self, image: &GrayImageView<'_>) -> ImageFeatures;
}

/// Matches features between images and fits pairwise transforms.
pub trait FeaturesMatcher: Sync {
    /// Pairwise results; `transform` maps `src` pixels onto `dst` pixels.
    fn match_features(&self, features: &[ImageFeatures]) -> Vec<PairwiseMatches>;
}

/// Turns pairwise matches into one transform per image.
pub trait Estimator: Sync {
    /// On success returns exactly `features.len()` transforms, the first one
    /// being the identity.
    fn estimate(
        &self,
        features: &[ImageFeatures],
        matches: &[PairwiseMatches],
    ) -> Result<Vec<Homography>, EstimateError>;
}
