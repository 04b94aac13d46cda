//! Warp aligned grids onto one canvas and fuse overlapping cells.
//!
//! Transforms act on cell-index coordinates: cell `(x, y)` is centred at
//! `(x, y)` and covers `[x - 0.5, x + 0.5] x [y - 0.5, y + 0.5]`. Transform `i`
//! maps grid `i` into the cell frame of grid 0.
//!
//! The canvas is the snapped bounding box of all warped grid footprints. Every
//! canvas cell is pulled back through the inverse transform of each grid and
//! sampled at the nearest source cell, then fused with what earlier grids
//! left there.

use crate::MergeError;
use map_merge_core::{is_known, Homography, MapMetaData, OccupancyGrid, Pose, UNKNOWN};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

const SNAP_EPS: f64 = 1e-9;

/// How a canvas cell already holding `existing` absorbs a value from another grid.
///
/// Known values always beat unknown ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionRule {
    /// The more occupied value wins. Independent of input order.
    #[default]
    MaxOccupancy,
    /// The first grid (in input order) with a known value wins.
    FirstKnown,
}

impl FusionRule {
    /// Fuse `incoming` (from grid `source`) into `existing`.
    ///
    /// Grids are fused in increasing `source` order.
    #[inline]
    pub fn fuse(self, existing: i8, incoming: i8, _source: usize) -> i8 {
        match (is_known(existing), is_known(incoming)) {
            (_, false) => existing,
            (false, true) => incoming,
            (true, true) => match self {
                FusionRule::MaxOccupancy => existing.max(incoming),
                FusionRule::FirstKnown => existing,
            },
        }
    }
}

/// Composer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposeParams {
    pub fusion: FusionRule,
    /// Upper bound on `width * height` of the merged grid.
    pub max_canvas_cells: u64,
    /// Relative tolerance when checking that all grids share one resolution.
    pub resolution_tolerance: f64,
}

impl Default for ComposeParams {
    fn default() -> Self {
        Self {
            fusion: FusionRule::MaxOccupancy,
            max_canvas_cells: 1 << 28,
            resolution_tolerance: 1e-6,
        }
    }
}

/// Integer canvas window `[x0, x1) x [y0, y1)` in the grid 0 cell frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CellBox {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl CellBox {
    fn union(self, other: CellBox) -> CellBox {
        CellBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    fn width(&self) -> u64 {
        (self.x1 - self.x0).max(0) as u64
    }

    fn height(&self) -> u64 {
        (self.y1 - self.y0).max(0) as u64
    }
}

/// One source grid ready for pulling samples.
struct Warp<'a> {
    index: usize,
    grid: &'a OccupancyGrid,
    inverse: Homography,
    /// Footprint in the grid 0 cell frame.
    bounds: CellBox,
}

impl Warp<'_> {
    #[inline]
    fn sample(&self, gx: i64, gy: i64) -> Option<i8> {
        let b = &self.bounds;
        if gx < b.x0 || gx >= b.x1 || gy < b.y0 || gy >= b.y1 {
            return None;
        }
        let p = self.inverse.apply(Point2::new(gx as f64, gy as f64));
        let sx = (p.x + 0.5).floor();
        let sy = (p.y + 0.5).floor();
        if !(sx >= 0.0 && sy >= 0.0) {
            return None;
        }
        self.grid.get(sx as usize, sy as usize)
    }
}

/// Footprint of a `width x height` grid warped by `transform`.
fn footprint(transform: &Homography, width: usize, height: usize) -> Option<CellBox> {
    let (w, h) = (width as f64, height as f64);
    let corners = [(-0.5, -0.5), (w - 0.5, -0.5), (-0.5, h - 0.5), (w - 0.5, h - 0.5)];
    let (mut lo_x, mut lo_y) = (f64::INFINITY, f64::INFINITY);
    let (mut hi_x, mut hi_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (x, y) in corners {
        let p = transform.apply(Point2::new(x, y));
        if !(p.x.is_finite() && p.y.is_finite()) {
            return None;
        }
        lo_x = lo_x.min(p.x);
        lo_y = lo_y.min(p.y);
        hi_x = hi_x.max(p.x);
        hi_y = hi_y.max(p.y);
    }
    // back to cell indices, snapping away float noise at cell edges
    let to_lo = |v: f64| (v + 0.5 + SNAP_EPS).floor() as i64;
    let to_hi = |v: f64| (v + 0.5 - SNAP_EPS).ceil() as i64;
    Some(CellBox {
        x0: to_lo(lo_x),
        y0: to_lo(lo_y),
        x1: to_hi(hi_x),
        y1: to_hi(hi_y),
    })
}

fn check_inputs(
    grids: &[&OccupancyGrid],
    transforms: &[Homography],
    params: &ComposeParams,
) -> Result<(), MergeError> {
    if grids.len() != transforms.len() {
        return Err(MergeError::TransformCountMismatch {
            expected: grids.len(),
            got: transforms.len(),
        });
    }
    for (index, grid) in grids.iter().enumerate() {
        grid.validate()
            .map_err(|source| MergeError::InvalidGrid { index, source })?;
    }
    let reference = grids[0].resolution();
    for (index, grid) in grids.iter().enumerate().skip(1) {
        let r = grid.resolution();
        let diff = (r as f64 - reference as f64).abs();
        if diff > params.resolution_tolerance * reference as f64 {
            return Err(MergeError::ResolutionMismatch {
                index,
                expected: reference,
                got: r,
            });
        }
    }
    Ok(())
}

/// Merge `grids`, warping grid `i` by `transforms[i]`.
///
/// A single grid is returned unchanged. The result inherits the resolution of
/// grid 0 and an origin placed so that it stays in grid 0's world frame.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(grids = grids.len()))
)]
pub fn compose_grids(
    grids: &[&OccupancyGrid],
    transforms: &[Homography],
    params: &ComposeParams,
) -> Result<OccupancyGrid, MergeError> {
    if grids.is_empty() {
        return Err(MergeError::NoGrids);
    }
    check_inputs(grids, transforms, params)?;
    if grids.len() == 1 {
        return Ok(grids[0].clone());
    }

    let mut warps = Vec::with_capacity(grids.len());
    let mut canvas: Option<CellBox> = None;
    for (index, (grid, transform)) in grids.iter().copied().zip(transforms).enumerate() {
        if grid.is_empty() {
            continue;
        }
        let singular = MergeError::SingularTransform { index };
        let inverse = transform.inverse().ok_or(singular.clone())?;
        let bounds = footprint(transform, grid.width(), grid.height()).ok_or(singular)?;
        canvas = Some(canvas.map_or(bounds, |c| c.union(bounds)));
        warps.push(Warp {
            index,
            grid,
            inverse,
            bounds,
        });
    }

    let reference = grids[0];
    let resolution = reference.resolution();
    let Some(canvas) = canvas else {
        log::debug!("all grids are empty");
        return Ok(empty_like(reference));
    };

    let (width, height) = (canvas.width(), canvas.height());
    if width.saturating_mul(height) > params.max_canvas_cells
        || width > u32::MAX as u64
        || height > u32::MAX as u64
    {
        log::warn!("refusing to allocate a {width}x{height} merged grid");
        return Err(MergeError::CanvasTooLarge {
            width,
            height,
            max_cells: params.max_canvas_cells,
        });
    }

    if width == 0 || height == 0 {
        return Ok(empty_like(reference));
    }

    let w = width as usize;
    let mut data = vec![UNKNOWN; w * height as usize];
    let fusion = params.fusion;
    let fill_row = |(row, cells): (usize, &mut [i8])| {
        let gy = canvas.y0 + row as i64;
        for (col, cell) in cells.iter_mut().enumerate() {
            let gx = canvas.x0 + col as i64;
            for warp in &warps {
                if let Some(v) = warp.sample(gx, gy) {
                    *cell = fusion.fuse(*cell, v, warp.index);
                }
            }
        }
    };

    #[cfg(feature = "rayon")]
    data.par_chunks_mut(w).enumerate().for_each(fill_row);
    #[cfg(not(feature = "rayon"))]
    data.chunks_mut(w).enumerate().for_each(fill_row);

    let offset = Point3::new(
        canvas.x0 as f64 * resolution as f64,
        canvas.y0 as f64 * resolution as f64,
        0.0,
    );
    let origin = Pose {
        position: reference.info.origin.transform_point(&offset),
        orientation: reference.info.origin.orientation,
    };

    let merged = OccupancyGrid {
        info: MapMetaData {
            resolution,
            width: width as u32,
            height: height as u32,
            origin,
        },
        data,
    };
    log::info!(
        "merged {} grids into {}x{} cells ({} known)",
        grids.len(),
        width,
        height,
        merged.known_cells()
    );
    Ok(merged)
}

fn empty_like(reference: &OccupancyGrid) -> OccupancyGrid {
    OccupancyGrid {
        info: MapMetaData {
            width: 0,
            height: 0,
            ..reference.info
        },
        data: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use map_merge_core::{FREE, OCCUPIED};
    use std::f64::consts::FRAC_PI_2;

    fn grid(width: u32, height: u32, f: impl Fn(usize, usize) -> i8) -> OccupancyGrid {
        let mut g = OccupancyGrid::filled(width, height, 0.05, UNKNOWN);
        for y in 0..height as usize {
            for x in 0..width as usize {
                g.set(x, y, f(x, y));
            }
        }
        g
    }

    #[test]
    fn fusion_rules() {
        let max = FusionRule::MaxOccupancy;
        let first = FusionRule::FirstKnown;
        assert_eq!(max.fuse(UNKNOWN, FREE, 1), FREE);
        assert_eq!(max.fuse(FREE, UNKNOWN, 1), FREE);
        assert_eq!(max.fuse(FREE, OCCUPIED, 1), OCCUPIED);
        assert_eq!(max.fuse(OCCUPIED, FREE, 1), OCCUPIED);
        assert_eq!(first.fuse(FREE, OCCUPIED, 1), FREE);
        assert_eq!(first.fuse(UNKNOWN, OCCUPIED, 1), OCCUPIED);
    }

    #[test]
    fn single_grid_is_copied_verbatim() {
        let mut g = grid(7, 5, |x, y| ((x * 13 + y * 7) % 101) as i8);
        g.info.origin = Pose::from_xy_yaw(1.5, -2.0, 0.3);
        let merged =
            compose_grids(&[&g], &[Homography::rigid(1.0, 50.0, 3.0)], &ComposeParams::default())
                .expect("compose");
        assert_eq!(merged, g);
    }

    #[test]
    fn empty_input_and_count_mismatch_fail() {
        let g = grid(2, 2, |_, _| FREE);
        assert_eq!(
            compose_grids(&[], &[], &ComposeParams::default()),
            Err(MergeError::NoGrids)
        );
        assert_eq!(
            compose_grids(&[&g, &g], &[Homography::identity()], &ComposeParams::default()),
            Err(MergeError::TransformCountMismatch {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn translated_grids_grow_the_canvas() {
        let a = grid(4, 3, |_, _| FREE);
        let b = grid(4, 3, |_, _| OCCUPIED);
        let transforms = [Homography::identity(), Homography::rigid(0.0, 2.0, -1.0)];
        let merged = compose_grids(&[&a, &b], &transforms, &ComposeParams::default())
            .expect("compose");

        assert_eq!((merged.width(), merged.height()), (6, 4));
        assert_eq!(merged.data.len(), 24);
        // canvas starts one row above grid 0
        assert_relative_eq!(merged.info.origin.position.y, -0.05, epsilon = 1e-9);
        assert_eq!(merged.get(0, 0), Some(UNKNOWN));
        assert_eq!(merged.get(0, 1), Some(FREE));
        assert_eq!(merged.get(2, 1), Some(OCCUPIED));
        assert_eq!(merged.get(5, 0), Some(OCCUPIED));
        assert_eq!(merged.get(5, 3), Some(UNKNOWN));
    }

    #[test]
    fn fusion_rule_decides_overlaps() {
        let a = grid(3, 3, |_, _| FREE);
        let b = grid(3, 3, |_, _| OCCUPIED);
        let transforms = [Homography::identity(), Homography::identity()];

        let max = compose_grids(&[&a, &b], &transforms, &ComposeParams::default())
            .expect("compose");
        assert!(max.data.iter().all(|&v| v == OCCUPIED));

        let params = ComposeParams {
            fusion: FusionRule::FirstKnown,
            ..ComposeParams::default()
        };
        let first = compose_grids(&[&a, &b], &transforms, &params).expect("compose");
        assert!(first.data.iter().all(|&v| v == FREE));
    }

    #[test]
    fn quarter_turn_keeps_every_cell() {
        let a = grid(1, 1, |_, _| FREE);
        let b = grid(4, 2, |x, y| (x * 10 + y) as i8);
        // rotate b by 90 degrees about its cell (0, 0), then shift far right
        let transforms = [Homography::identity(), Homography::rigid(FRAC_PI_2, 10.0, 0.0)];
        let merged = compose_grids(&[&a, &b], &transforms, &ComposeParams::default())
            .expect("compose");

        // b occupies x in [9, 10], y in [0, 3]
        assert_eq!((merged.width(), merged.height()), (11, 4));
        for y in 0..2 {
            for x in 0..4 {
                let (cx, cy) = (10 - y, x);
                assert_eq!(merged.get(cx, cy), Some((x * 10 + y) as i8));
            }
        }
    }

    #[test]
    fn origin_follows_reference_orientation() {
        let mut a = grid(2, 2, |_, _| FREE);
        a.info.origin = Pose::from_xy_yaw(1.0, 1.0, FRAC_PI_2);
        let b = grid(2, 2, |_, _| FREE);
        let transforms = [Homography::identity(), Homography::rigid(0.0, -4.0, 0.0)];
        let merged = compose_grids(&[&a, &b], &transforms, &ComposeParams::default())
            .expect("compose");
        // four cells to the left of grid 0 in its own frame is four cells down in the world
        assert_relative_eq!(merged.info.origin.position.x, 1.0, epsilon = 1e-9);
        assert_relative_eq!(merged.info.origin.position.y, 1.0 - 4.0 * 0.05, epsilon = 1e-6);
        assert_relative_eq!(merged.info.origin.yaw(), FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn rejects_singular_transforms_and_mixed_resolution() {
        let a = grid(2, 2, |_, _| FREE);
        let b = grid(2, 2, |_, _| FREE);
        let singular = Homography::from_array([[0.0; 3]; 3]);
        let transforms = [Homography::identity(), singular];
        assert_eq!(
            compose_grids(&[&a, &b], &transforms, &ComposeParams::default()),
            Err(MergeError::SingularTransform { index: 1 })
        );

        let mut fine = grid(2, 2, |_, _| FREE);
        fine.info.resolution = 0.1;
        assert!(matches!(
            compose_grids(&[&a, &fine], &[Homography::identity(); 2], &ComposeParams::default()),
            Err(MergeError::ResolutionMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn canvas_guard_refuses_huge_outputs() {
        let a = grid(2, 2, |_, _| FREE);
        let params = ComposeParams {
            max_canvas_cells: 100,
            ..ComposeParams::default()
        };
        let far = Homography::rigid(0.0, 500.0, 500.0);
        assert!(matches!(
            compose_grids(&[&a, &a], &[Homography::identity(), far], &params),
            Err(MergeError::CanvasTooLarge { .. })
        ));
    }

    #[test]
    fn malformed_grids_are_rejected() {
        let a = grid(2, 2, |_, _| FREE);
        let mut broken = grid(2, 2, |_, _| FREE);
        broken.data.pop();
        assert!(matches!(
            compose_grids(&[&a, &broken], &[Homography::identity(); 2], &ComposeParams::default()),
            Err(MergeError::InvalidGrid { index: 1, .. })
        ));
    }
}
