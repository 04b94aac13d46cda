use map_merge_core::Homography;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Detected interest point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    /// Pixel position; pixels are grid cells, so this is also a cell coordinate.
    pub position: Point2<f32>,
    /// Orientation in degrees, as reported by the detector.
    pub angle: f32,
    /// Corner strength used for ranking.
    pub response: f32,
    /// Pyramid level the keypoint was detected on.
    pub octave: i32,
}

/// 256-bit ORB descriptor, one row of the descriptor matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub [u8; Descriptor::BYTES]);

impl Descriptor {
    pub const BYTES: usize = 32;

    /// Copy one descriptor row; `None` unless it is exactly [`Descriptor::BYTES`] long.
    pub fn from_row(row: &[u8]) -> Option<Self> {
        row.try_into().ok().map(Self)
    }

    /// Hamming distance.
    #[inline]
    pub fn distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints and descriptors found in one image; `keypoints[i]` owns `descriptors[i]`.
#[derive(Clone, Debug, Default)]
pub struct ImageFeatures {
    pub width: usize,
    pub height: usize,
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
}

impl ImageFeatures {
    #[inline]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    #[inline]
    pub fn point(&self, idx: usize) -> Option<Point2<f64>> {
        self.keypoints
            .get(idx)
            .map(|k| Point2::new(k.position.x as f64, k.position.y as f64))
    }
}

/// Descriptor match between a query feature and a train feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// Matches between image `src` (query side) and image `dst` (train side).
#[derive(Clone, Debug)]
pub struct PairwiseMatches {
    pub src: usize,
    pub dst: usize,
    pub matches: Vec<FeatureMatch>,
    /// Inlier flag per entry of `matches`.
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
    /// Maps `src` pixel coordinates onto `dst` pixel coordinates.
    pub transform: Option<Homography>,
    /// `num_inliers / (8 + 0.3 * matches.len())`.
    pub confidence: f64,
}

impl PairwiseMatches {
    pub fn unmatched(src: usize, dst: usize) -> Self {
        Self {
            src,
            dst,
            matches: Vec::new(),
            inliers: Vec::new(),
            num_inliers: 0,
            transform: None,
            confidence: 0.0,
        }
    }

    /// Inlier point pairs `(p_src, p_dst)` looked up in `features`.
    pub fn inlier_points(&self, features: &[ImageFeatures]) -> Vec<(Point2<f64>, Point2<f64>)> {
        let (Some(a), Some(b)) = (features.get(self.src), features.get(self.dst)) else {
            return Vec::new();
        };
        self.matches
            .iter()
            .zip(&self.inliers)
            .filter(|(_, &inlier)| inlier)
            .filter_map(|(m, _)| Some((a.point(m.query)?, b.point(m.train)?)))
            .collect()
    }
}

/// Pair confidence as used for match-graph pruning.
#[inline]
pub fn match_confidence(num_inliers: usize, num_matches: usize) -> f64 {
    num_inliers as f64 / (8.0 + 0.3 * num_matches as f64)
}
