//! Pairwise descriptor matching with the two-nearest-neighbour ratio test.
//!
//! Images are only matched against their next `range_width` neighbours in
//! input order. Each matched pair gets a robust rigid (or similarity) fit and
//! a confidence score that the estimator uses to prune the match graph.

use crate::ransac::fit_similarity;
use crate::{
    match_confidence, Descriptor, FeatureMatch, FeaturesMatcher, ImageFeatures, MatcherParams,
    PairwiseMatches,
};
use nalgebra::Point2;
use opencv::core::{DMatch, Mat, Vector, NORM_HAMMING};
use opencv::features2d::BFMatcher;
use opencv::prelude::*;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, Default)]
pub struct BestOf2NearestRangeMatcher {
    params: MatcherParams,
}

impl BestOf2NearestRangeMatcher {
    pub fn new(params: MatcherParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &MatcherParams {
        &self.params
    }

    /// Image pairs `(i, j)`, `i < j <= i + range_width`.
    pub fn candidate_pairs(&self, num_images: usize) -> Vec<(usize, usize)> {
        let width = self.params.range_width.max(1);
        (0..num_images)
            .flat_map(|i| ((i + 1)..num_images.min(i + 1 + width)).map(move |j| (i, j)))
            .collect()
    }

    /// Match image `src` against image `dst` and fit the pair transform.
    pub fn match_pair(
        &self,
        src: usize,
        dst: usize,
        a: &ImageFeatures,
        b: &ImageFeatures,
    ) -> PairwiseMatches {
        let p = &self.params;
        let matches = match mutual_matches(&a.descriptors, &b.descriptors, p) {
            Ok(matches) => matches,
            Err(err) => {
                log::warn!("pair ({src}, {dst}): descriptor matching failed: {err}");
                Vec::new()
            }
        };
        if matches.len() < p.min_matches.max(2) {
            log::debug!("pair ({src}, {dst}): {} matches, skipped", matches.len());
            return PairwiseMatches {
                inliers: vec![false; matches.len()],
                matches,
                ..PairwiseMatches::unmatched(src, dst)
            };
        }

        let (src_pts, dst_pts): (Vec<Point2<f64>>, Vec<Point2<f64>>) = matches
            .iter()
            .filter_map(|m| Some((a.point(m.query)?, b.point(m.train)?)))
            .unzip();

        let seed = p.ransac.seed ^ (((src as u64) << 32) | dst as u64);
        let Some(fit) = fit_similarity(&src_pts, &dst_pts, p.estimate_scale, &p.ransac, seed)
        else {
            return PairwiseMatches {
                inliers: vec![false; matches.len()],
                matches,
                ..PairwiseMatches::unmatched(src, dst)
            };
        };

        let confidence = match_confidence(fit.num_inliers, matches.len());
        log::debug!(
            "pair ({src}, {dst}): {} matches, {} inliers, confidence {:.3}",
            matches.len(),
            fit.num_inliers,
            confidence
        );
        let transform = (fit.num_inliers >= p.min_matches).then_some(fit.transform);

        PairwiseMatches {
            src,
            dst,
            matches,
            inliers: fit.inliers,
            num_inliers: fit.num_inliers,
            transform,
            confidence,
        }
    }
}

impl FeaturesMatcher for BestOf2NearestRangeMatcher {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(images = features.len()))
    )]
    fn match_features(&self, features: &[ImageFeatures]) -> Vec<PairwiseMatches> {
        let pairs = self.candidate_pairs(features.len());

        #[cfg(feature = "rayon")]
        let iter = pairs.par_iter();
        #[cfg(not(feature = "rayon"))]
        let iter = pairs.iter();

        iter.map(|&(i, j)| self.match_pair(i, j, &features[i], &features[j]))
            .collect()
    }
}

/// Ratio-test matches of every query descriptor, optionally cross-checked.
fn mutual_matches(
    query: &[Descriptor],
    train: &[Descriptor],
    params: &MatcherParams,
) -> opencv::Result<Vec<FeatureMatch>> {
    if query.is_empty() || train.is_empty() {
        return Ok(Vec::new());
    }
    let query = descriptors_to_mat(query)?;
    let train = descriptors_to_mat(train)?;
    let matcher = BFMatcher::new(NORM_HAMMING, false)?;

    let forward = best_of_two(&matcher, &query, &train, params)?;
    let backward = if params.cross_check {
        Some(best_of_two(&matcher, &train, &query, params)?)
    } else {
        None
    };

    Ok(forward
        .iter()
        .enumerate()
        .filter_map(|(q, m)| {
            let (t, distance) = (*m)?;
            if let Some(backward) = &backward {
                if backward.get(t).copied().flatten().map(|(back, _)| back) != Some(q) {
                    return None;
                }
            }
            Some(FeatureMatch {
                query: q,
                train: t,
                distance,
            })
        })
        .collect())
}

/// For each query row, the nearest train row when it passes both the
/// absolute distance limit and the ratio test against the runner-up.
fn best_of_two(
    matcher: &BFMatcher,
    query: &Mat,
    train: &Mat,
    params: &MatcherParams,
) -> opencv::Result<Vec<Option<(usize, u32)>>> {
    let mut knn = Vector::<Vector<DMatch>>::new();
    matcher.knn_train_match(query, train, &mut knn, 2, &Mat::default(), false)?;

    let ratio = 1.0 - params.match_conf;
    let mut best = vec![None; query.rows().max(0) as usize];
    for candidates in knn.iter() {
        let Ok(first) = candidates.get(0) else {
            continue;
        };
        if first.distance > params.max_distance as f32 {
            continue;
        }
        if let Ok(second) = candidates.get(1) {
            if first.distance >= ratio * second.distance {
                continue;
            }
        }
        if let Some(slot) = best.get_mut(first.query_idx as usize) {
            *slot = Some((first.train_idx as usize, first.distance.round() as u32));
        }
    }
    Ok(best)
}

/// One `CV_8U` row of [`Descriptor::BYTES`] per descriptor.
fn descriptors_to_mat(descriptors: &[Descriptor]) -> opencv::Result<Mat> {
    let bytes: Vec<u8> = descriptors.iter().flat_map(|d| d.0).collect();
    let flat = Mat::from_slice(&bytes)?.try_clone()?;
    let mat = flat.reshape(1, descriptors.len() as i32)?.try_clone()?;
    Ok(mat)
}
