//! Global transform estimation from pairwise matches.
//!
//! Accepted pairs form a weighted match graph. A maximum spanning tree (by
//! inlier count) is grown with Kruskal's algorithm and transforms are chained
//! outwards from image 0, which defines the global frame. Optionally, all
//! transforms are then refined jointly by linear least squares over the inlier
//! correspondences of every accepted pair.

use crate::{Estimator, EstimatorParams, ImageFeatures, PairwiseMatches};
use map_merge_core::Homography;
use nalgebra::{DMatrix, DVector, Matrix3};
use std::collections::VecDeque;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Why global estimation failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimateError {
    #[error("no image pair is matched confidently enough (best pair has {best_inliers} inliers)")]
    InsufficientOverlap { best_inliers: usize },
    #[error("images {unreached:?} are not connected to image 0 in the match graph")]
    Disconnected { unreached: Vec<usize> },
    #[error("pairwise transform {src} -> {dst} is singular")]
    SingularTransform { src: usize, dst: usize },
    #[error("transform estimation did not converge: {0}")]
    NotConverged(String),
}

#[derive(Clone, Debug, Default)]
pub struct SpanningTreeEstimator {
    params: EstimatorParams,
}

impl SpanningTreeEstimator {
    pub fn new(params: EstimatorParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &EstimatorParams {
        &self.params
    }

    /// Pairs that enter the match graph, strongest first.
    fn accepted<'a>(&self, n: usize, matches: &'a [PairwiseMatches]) -> Vec<&'a PairwiseMatches> {
        let mut edges: Vec<&PairwiseMatches> = matches
            .iter()
            .filter(|m| {
                m.transform.is_some()
                    && m.src < n
                    && m.dst < n
                    && m.src != m.dst
                    && m.num_inliers >= self.params.min_inliers
                    && m.confidence >= self.params.confidence
            })
            .collect();
        edges.sort_by(|a, b| {
            b.num_inliers
                .cmp(&a.num_inliers)
                .then(a.src.cmp(&b.src))
                .then(a.dst.cmp(&b.dst))
        });
        edges
    }
}

impl Estimator for SpanningTreeEstimator {
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip_all,
            fields(images = features.len(), pairs = matches.len())
        )
    )]
    fn estimate(
        &self,
        features: &[ImageFeatures],
        matches: &[PairwiseMatches],
    ) -> Result<Vec<Homography>, EstimateError> {
        let n = features.len();
        match n {
            0 => return Ok(Vec::new()),
            1 => return Ok(vec![Homography::identity()]),
            _ => {}
        }

        let edges = self.accepted(n, matches);
        if edges.is_empty() {
            let best_inliers = matches.iter().map(|m| m.num_inliers).max().unwrap_or(0);
            return Err(EstimateError::InsufficientOverlap { best_inliers });
        }

        let tree = maximum_spanning_tree(n, &edges);
        log::debug!(
            "match graph: {} accepted pairs, {} tree edges",
            edges.len(),
            tree.len()
        );

        let transforms = chain_from_root(n, &tree)?;

        if self.params.refine {
            let rigid = edges.iter().all(|e| {
                e.transform
                    .is_some_and(|t| (t.scale() - 1.0).abs() < 1e-6)
            });
            match refine_jointly(&transforms, features, &edges, rigid) {
                Some(refined) => return Ok(refined),
                None => log::debug!("joint refinement failed, keeping spanning tree solution"),
            }
        }
        Ok(transforms)
    }
}

/// Kruskal over edges already sorted by decreasing weight.
fn maximum_spanning_tree<'a>(n: usize, edges: &[&'a PairwiseMatches]) -> Vec<&'a PairwiseMatches> {
    let mut parent: Vec<usize> = (0..n).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let mut tree = Vec::with_capacity(n.saturating_sub(1));
    for &e in edges {
        let (ra, rb) = (find(&mut parent, e.src), find(&mut parent, e.dst));
        if ra != rb {
            parent[ra] = rb;
            tree.push(e);
        }
    }
    tree
}

/// Breadth-first propagation of tree transforms from image 0.
///
/// With `H` mapping image `src` onto image `dst`: `T[src] = T[dst] H` and
/// `T[dst] = T[src] H⁻¹`.
fn chain_from_root(n: usize, tree: &[&PairwiseMatches]) -> Result<Vec<Homography>, EstimateError> {
    let mut adjacency: Vec<Vec<&PairwiseMatches>> = vec![Vec::new(); n];
    for &e in tree {
        adjacency[e.src].push(e);
        adjacency[e.dst].push(e);
    }

    let mut transforms: Vec<Option<Homography>> = vec![None; n];
    transforms[0] = Some(Homography::identity());
    let mut queue = VecDeque::from([0usize]);

    while let Some(k) = queue.pop_front() {
        let Some(tk) = transforms[k] else {
            continue;
        };
        for e in &adjacency[k] {
            let Some(h) = e.transform else {
                continue;
            };
            let (next, t) = if e.src == k {
                let inv = h.inverse().ok_or(EstimateError::SingularTransform {
                    src: e.src,
                    dst: e.dst,
                })?;
                (e.dst, tk.compose(&inv))
            } else {
                (e.src, tk.compose(&h))
            };
            if transforms[next].is_none() {
                transforms[next] = Some(t.normalized().unwrap_or(t));
                queue.push_back(next);
            }
        }
    }

    let unreached: Vec<usize> = (0..n).filter(|&i| transforms[i].is_none()).collect();
    if !unreached.is_empty() {
        return Err(EstimateError::Disconnected { unreached });
    }
    Ok(transforms.into_iter().flatten().collect())
}

/// Solve for `(a, b, tx, ty)` of every image but the first by minimising
/// `Σ |T_src p - T_dst q|²` over all inlier correspondences, where
/// `T = [[a, -b, tx], [b, a, ty]]`. Image 0 stays at identity.
fn refine_jointly(
    initial: &[Homography],
    features: &[ImageFeatures],
    edges: &[&PairwiseMatches],
    rigid: bool,
) -> Option<Vec<Homography>> {
    let n = initial.len();
    let dim = 4 * (n - 1);
    let mut normal = DMatrix::<f64>::zeros(dim, dim);
    let mut rhs = DVector::<f64>::zeros(dim);
    let mut rows = 0usize;

    // coefficient rows of the x and y residual for one observed point
    let coeffs = |px: f64, py: f64| ([px, -py, 1.0, 0.0], [py, px, 0.0, 1.0]);

    for e in edges {
        for (p, q) in e.inlier_points(features) {
            for axis in 0..2 {
                let mut row: Vec<(usize, f64)> = Vec::with_capacity(8);
                let mut constant = 0.0;
                for (image, point, sign) in [(e.src, p, 1.0), (e.dst, q, -1.0)] {
                    let (cx, cy) = coeffs(point.x, point.y);
                    let c = if axis == 0 { cx } else { cy };
                    if image == 0 {
                        constant += sign * if axis == 0 { point.x } else { point.y };
                    } else {
                        let base = 4 * (image - 1);
                        row.extend(c.iter().enumerate().map(|(k, v)| (base + k, sign * v)));
                    }
                }
                for &(r, vr) in &row {
                    rhs[r] -= vr * constant;
                    for &(c, vc) in &row {
                        normal[(r, c)] += vr * vc;
                    }
                }
                rows += 1;
            }
        }
    }

    if rows < dim {
        return None;
    }

    let solution = normal.cholesky()?.solve(&rhs);
    let mut out = Vec::with_capacity(n);
    out.push(Homography::identity());
    for k in 1..n {
        let base = 4 * (k - 1);
        let (mut a, mut b) = (solution[base], solution[base + 1]);
        let (tx, ty) = (solution[base + 2], solution[base + 3]);
        let scale = a.hypot(b);
        if !scale.is_finite() || scale < 1e-9 || !tx.is_finite() || !ty.is_finite() {
            return None;
        }
        if rigid {
            a /= scale;
            b /= scale;
        }
        out.push(Homography::new(Matrix3::new(
            a, -b, tx, //
            b, a, ty, //
            0.0, 0.0, 1.0,
        )));
    }
    Some(out)
}
