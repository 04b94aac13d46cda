use map_merge::core::{FREE, OCCUPIED, UNKNOWN};
use map_merge::{
    ExternalTransform, FusionRule, MergeParams, MergingPipeline, OccupancyGrid, PipelineState,
    Pose,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

const RES: f32 = 0.05;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Free floor plan scattered with rectangular obstacles.
fn base_map(width: u32, height: u32, seed: u64) -> OccupancyGrid {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut grid = OccupancyGrid::filled(width, height, RES, FREE);
    let (w, h) = (width as usize, height as usize);
    for _ in 0..(w * h / 164) {
        let bw = rng.random_range(2..7);
        let bh = rng.random_range(2..7);
        let x0 = rng.random_range(0..w - bw);
        let y0 = rng.random_range(0..h - bh);
        for y in y0..y0 + bh {
            for x in x0..x0 + bw {
                grid.set(x, y, OCCUPIED);
            }
        }
    }
    grid
}

fn crop(base: &OccupancyGrid, x0: usize, y0: usize, w: u32, h: u32) -> OccupancyGrid {
    let mut out = OccupancyGrid::filled(w, h, base.resolution(), UNKNOWN);
    for y in 0..h as usize {
        for x in 0..w as usize {
            if let Some(v) = base.get(x + x0, y + y0) {
                out.set(x, y, v);
            }
        }
    }
    out
}

/// Quarter turn: output cell `(x, y)` holds input cell `(y, h - 1 - x)`.
fn quarter_turn(grid: &OccupancyGrid) -> OccupancyGrid {
    let (w, h) = (grid.width(), grid.height());
    let mut out = OccupancyGrid::filled(h as u32, w as u32, grid.resolution(), UNKNOWN);
    for y in 0..w {
        for x in 0..h {
            if let Some(v) = grid.get(y, h - 1 - x) {
                out.set(x, y, v);
            }
        }
    }
    out
}

#[test]
fn zero_grids() {
    init_logging();
    let mut pipeline = MergingPipeline::default();
    pipeline.feed(Vec::<Arc<OccupancyGrid>>::new());
    assert!(pipeline.estimate_transform());
    assert!(pipeline.compose_grids().is_none());
    assert!(pipeline.transforms().is_empty());
}

#[test]
fn one_grid_merges_losslessly() {
    init_logging();
    let mut grid = crop(&base_map(200, 200, 3), 10, 20, 150, 120);
    grid.info.origin = Pose::from_xy_yaw(-7.5, 3.25, 0.4);
    let grid = Arc::new(grid);

    let mut pipeline = MergingPipeline::default();
    pipeline.feed([grid.clone()]);
    assert!(pipeline.estimate_transform());
    let merged = pipeline.compose_grids().expect("merged grid");

    assert_eq!(merged.info.width, grid.info.width);
    assert_eq!(merged.info.height, grid.info.height);
    assert_eq!(merged.info.resolution, grid.info.resolution);
    assert_eq!(merged.info.origin, grid.info.origin);
    assert_eq!(merged.data, grid.data);

    let transforms = pipeline.transforms();
    assert_eq!(transforms, vec![ExternalTransform::identity()]);
}

#[test]
fn two_overlapping_grids() {
    init_logging();
    let base = base_map(256, 256, 42);
    let a = Arc::new(crop(&base, 0, 0, 192, 192));
    let mut b = crop(&base, 48, 32, 192, 192);
    // the second map lives in an unrelated world frame
    b.info.origin = Pose::from_xy_yaw(100.0, -40.0, 1.0);
    let b = Arc::new(b);

    let mut pipeline = MergingPipeline::default();
    pipeline.feed([a.clone(), b]);
    assert!(pipeline.estimate_transform());
    assert_eq!(pipeline.state(), PipelineState::EstimateSucceeded);

    let transforms = pipeline.transforms();
    assert_eq!(transforms.len(), 2);
    assert_eq!(transforms[0], ExternalTransform::identity());
    let t = transforms[1].translation;
    assert!((t.x - 48.0).abs() < 0.5, "x = {}", t.x);
    assert!((t.y - 32.0).abs() < 0.5, "y = {}", t.y);
    assert!(t.z == 0.0);

    let merged = pipeline.compose_grids().expect("merged grid");
    assert_eq!(pipeline.state(), PipelineState::Composed);
    assert_eq!(
        merged.info.width as usize * merged.info.height as usize,
        merged.data.len()
    );
    assert!(merged.width().abs_diff(240) <= 1, "width {}", merged.width());
    assert!(merged.height().abs_diff(224) <= 1, "height {}", merged.height());

    // merged cells agree with the map both crops were cut from
    let ox = (merged.info.origin.position.x / RES as f64).round() as i64;
    let oy = (merged.info.origin.position.y / RES as f64).round() as i64;
    let (mut known, mut agree) = (0usize, 0usize);
    for y in 0..merged.height() {
        for x in 0..merged.width() {
            let Some(v) = merged.get(x, y).filter(|&v| v != UNKNOWN) else {
                continue;
            };
            known += 1;
            let (bx, by) = (x as i64 + ox, y as i64 + oy);
            if bx >= 0 && by >= 0 && base.get(bx as usize, by as usize) == Some(v) {
                agree += 1;
            }
        }
    }
    let union = 2 * 192 * 192 - 144 * 160;
    assert!(known as f64 >= 0.99 * union as f64, "known {known}");
    assert!(agree as f64 >= 0.99 * known as f64, "{agree}/{known} agree");
}

#[test]
fn rotated_grid_is_registered() {
    init_logging();
    let base = base_map(256, 256, 7);
    let a = Arc::new(crop(&base, 0, 0, 192, 192));
    let b = Arc::new(quarter_turn(&crop(&base, 48, 32, 192, 192)));

    let mut pipeline = MergingPipeline::default();
    pipeline.feed([a, b]);
    assert!(pipeline.estimate_transform());

    // b(x, y) shows base(48 + y, 32 + 191 - x)
    let t = pipeline.internal_transforms()[1];
    for (x, y) in [(20.0, 30.0), (150.0, 40.0), (90.0, 170.0)] {
        let p = t.apply(nalgebra::Point2::new(x, y));
        assert!((p.x - (48.0 + y)).abs() < 1.0, "{p:?}");
        assert!((p.y - (223.0 - x)).abs() < 1.0, "{p:?}");
    }

    let yaw = {
        let q = pipeline.transforms()[1].rotation;
        2.0 * q.k.atan2(q.w)
    };
    assert!((yaw + std::f64::consts::FRAC_PI_2).abs() < 0.02, "yaw {yaw}");
    assert!(pipeline.compose_grids().is_some());
}

#[test]
fn grid_without_structure_fails_estimation() {
    init_logging();
    let base = base_map(200, 200, 11);
    let a = Arc::new(crop(&base, 0, 0, 160, 160));
    let blank = Arc::new(OccupancyGrid::filled(160, 160, RES, UNKNOWN));

    let mut pipeline = MergingPipeline::default();
    pipeline.feed([a, blank]);
    assert!(!pipeline.estimate_transform());
    assert_eq!(pipeline.state(), PipelineState::EstimateFailed);
    assert!(pipeline.transforms().is_empty());
    assert!(pipeline.compose_grids().is_none());
}

#[test]
fn refeeding_resets_transforms() {
    init_logging();
    let base = base_map(256, 256, 42);
    let a = Arc::new(crop(&base, 0, 0, 192, 192));
    let b = Arc::new(crop(&base, 48, 32, 192, 192));

    let mut pipeline = MergingPipeline::default();
    pipeline.feed([a.clone(), b]);
    assert!(pipeline.estimate_transform());
    assert_eq!(pipeline.transforms().len(), 2);

    pipeline.feed([a]);
    assert!(pipeline.transforms().is_empty());
    assert!(pipeline.compose_grids().is_none());
    assert!(pipeline.estimate_transform());
    assert_eq!(pipeline.transforms().len(), 1);
}

#[test]
fn estimation_overwrites_previous_transforms() {
    init_logging();
    let base = base_map(256, 256, 42);
    let a = Arc::new(crop(&base, 0, 0, 192, 192));
    let b = Arc::new(crop(&base, 48, 32, 192, 192));

    let mut pipeline = MergingPipeline::default();
    pipeline.feed([a, b]);
    pipeline
        .set_transforms(&[
            ExternalTransform::planar(-7.0, 3.0, 0.4),
            ExternalTransform::planar(15.0, -9.0, 1.1),
        ])
        .expect("set");

    assert!(pipeline.estimate_transform());
    let first = pipeline.transforms();
    assert_eq!(first[0], ExternalTransform::identity());
    let t = first[1].translation;
    assert!((t.x - 48.0).abs() < 0.5, "x = {}", t.x);
    assert!((t.y - 32.0).abs() < 0.5, "y = {}", t.y);

    // same input, same answer
    assert!(pipeline.estimate_transform());
    assert_eq!(pipeline.transforms(), first);
    assert_eq!(pipeline.state(), PipelineState::EstimateSucceeded);
}

#[test]
fn first_known_fusion_prefers_earlier_grids() {
    init_logging();
    let a = Arc::new(OccupancyGrid::filled(10, 10, RES, FREE));
    let b = Arc::new(OccupancyGrid::filled(10, 10, RES, OCCUPIED));
    let mut params = MergeParams::default();
    params.compose.fusion = FusionRule::FirstKnown;

    let mut pipeline = MergingPipeline::new(params);
    pipeline.feed([a, b]);
    pipeline
        .set_transforms(&[
            ExternalTransform::identity(),
            ExternalTransform::planar(5.0, 0.0, 0.0),
        ])
        .expect("set");
    let merged = pipeline.compose_grids().expect("merged");
    assert_eq!((merged.width(), merged.height()), (15, 10));
    assert_eq!(merged.get(7, 3), Some(FREE));
    assert_eq!(merged.get(12, 3), Some(OCCUPIED));
}
