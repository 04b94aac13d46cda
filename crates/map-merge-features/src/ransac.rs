//! RANSAC over two-point similarity hypotheses.

use crate::RansacParams;
use map_merge_core::{estimate_similarity, Homography};
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Outcome of a robust fit.
#[derive(Clone, Debug)]
pub struct RansacFit {
    /// Model refitted on the consensus set.
    pub transform: Homography,
    pub inliers: Vec<bool>,
    pub num_inliers: usize,
}

/// Robustly fit `dst ≈ T src`, rigid or with uniform scale.
///
/// Returns `None` with fewer than two correspondences or when no sample gives
/// a non-degenerate model.
pub fn fit_similarity(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    with_scale: bool,
    params: &RansacParams,
    seed: u64,
) -> Option<RansacFit> {
    let n = src.len();
    if n < 2 || dst.len() != n {
        return None;
    }

    let threshold2 = params.inlier_threshold * params.inlier_threshold;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<(usize, Homography)> = None;
    let mut budget = params.max_iterations.max(1);
    let mut iter = 0;

    while iter < budget {
        iter += 1;
        let i = rng.random_range(0..n);
        let mut j = rng.random_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        let Some(model) = estimate_similarity(&[src[i], src[j]], &[dst[i], dst[j]], with_scale)
        else {
            continue;
        };

        let count = count_inliers(&model, src, dst, threshold2);
        if best.as_ref().is_none_or(|(c, _)| count > *c) {
            best = Some((count, model));
            budget = budget.min(adaptive_budget(count, n, params.confidence));
        }
    }

    let (count, model) = best?;
    log::trace!("ransac: {count}/{n} inliers after {iter} iterations");

    let mut inliers = inlier_mask(&model, src, dst, threshold2);
    let mut transform = model;
    let mut num_inliers = count;

    let (s_in, d_in): (Vec<_>, Vec<_>) = src
        .iter()
        .zip(dst)
        .zip(&inliers)
        .filter(|(_, &keep)| keep)
        .map(|((s, d), _)| (*s, *d))
        .unzip();
    if let Some(refit) = estimate_similarity(&s_in, &d_in, with_scale) {
        let refit_mask = inlier_mask(&refit, src, dst, threshold2);
        let refit_count = refit_mask.iter().filter(|&&b| b).count();
        if refit_count >= num_inliers {
            transform = refit;
            inliers = refit_mask;
            num_inliers = refit_count;
        }
    }

    Some(RansacFit {
        transform,
        inliers,
        num_inliers,
    })
}

/// Iterations needed to draw one all-inlier pair with probability `confidence`.
fn adaptive_budget(inliers: usize, total: usize, confidence: f64) -> usize {
    let w = inliers as f64 / total as f64;
    let p_fail = 1.0 - w * w;
    if p_fail <= 1e-12 {
        return 0;
    }
    if p_fail >= 1.0 {
        return usize::MAX;
    }
    let k = (1.0 - confidence.clamp(0.0, 1.0 - 1e-12)).ln() / p_fail.ln();
    if k.is_finite() {
        k.ceil().max(0.0) as usize
    } else {
        usize::MAX
    }
}

#[inline]
fn residual2(model: &Homography, s: Point2<f64>, d: Point2<f64>) -> f64 {
    (model.apply(s) - d).norm_squared()
}

fn count_inliers(model: &Homography, src: &[Point2<f64>], dst: &[Point2<f64>], t2: f64) -> usize {
    src.iter()
        .zip(dst)
        .filter(|(s, d)| residual2(model, **s, **d) < t2)
        .count()
}

fn inlier_mask(model: &Homography, src: &[Point2<f64>], dst: &[Point2<f64>], t2: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| residual2(model, *s, *d) < t2)
        .collect()
}
