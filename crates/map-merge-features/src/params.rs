use serde::{Deserialize, Serialize};

/// Arguments of the OpenCV ORB detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbParams {
    /// Maximum number of keypoints kept per image, strongest first.
    pub max_features: usize,
    /// Pyramid decimation ratio between levels.
    pub scale_factor: f32,
    pub n_levels: i32,
    /// Pixels this close to the image edge never carry a keypoint.
    pub edge_threshold: i32,
    /// Side of the patch the oriented BRIEF descriptor is computed on.
    pub patch_size: i32,
    /// FAST intensity threshold.
    pub fast_threshold: i32,
    /// Rank corners by Harris response instead of FAST score.
    pub harris_score: bool,
}

impl Default for OrbParams {
    fn default() -> Self {
        Self {
            max_features: 1500,
            scale_factor: 1.3,
            n_levels: 5,
            edge_threshold: 31,
            patch_size: 31,
            fast_threshold: 20,
            harris_score: true,
        }
    }
}

/// Robust model fitting on putative matches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    pub max_iterations: usize,
    /// Reprojection distance (pixels) under which a match is an inlier.
    pub inlier_threshold: f64,
    /// Target probability of drawing one all-inlier sample; drives early exit.
    pub confidence: f64,
    /// Base seed; each image pair derives its own stream from it.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            inlier_threshold: 3.0,
            confidence: 0.995,
            seed: 0x5eed,
        }
    }
}

/// Pairwise matcher configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherParams {
    /// A match is accepted when `best < (1 - match_conf) * second_best`.
    pub match_conf: f32,
    /// Hamming distance above which a match is rejected outright.
    pub max_distance: u32,
    /// Each image is matched against the next `range_width` images only.
    pub range_width: usize,
    /// Keep only matches that are mutual best matches.
    pub cross_check: bool,
    /// Fit similarity transforms instead of rigid ones.
    pub estimate_scale: bool,
    /// Pairs with fewer matches (or inliers) than this get no transform.
    pub min_matches: usize,
    pub ransac: RansacParams,
}

impl Default for MatcherParams {
    fn default() -> Self {
        Self {
            match_conf: 0.3,
            max_distance: 80,
            range_width: 5,
            cross_check: true,
            estimate_scale: false,
            min_matches: 6,
            ransac: RansacParams::default(),
        }
    }
}

/// Global transform estimation from the pairwise match graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorParams {
    /// Minimal pair confidence for an edge to enter the match graph.
    pub confidence: f64,
    /// Minimal inlier count for an edge to enter the match graph.
    pub min_inliers: usize,
    /// Jointly refine all transforms over every accepted pair.
    pub refine: bool,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            confidence: 1.0,
            min_inliers: 6,
            refine: true,
        }
    }
}
