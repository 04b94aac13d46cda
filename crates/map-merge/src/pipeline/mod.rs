//! Stateful merging pipeline: feed grids, estimate transforms, compose.
//!
//! ```text
//! Empty --feed--> Fed --estimate--> EstimateSucceeded --compose--> Composed
//!                      \--------> EstimateFailed
//! ```
//!
//! `feed` always returns to `Fed` and drops any transforms. Setting
//! transforms explicitly bypasses estimation.

mod params;

pub use params::MergeParams;

use crate::{compose_grids, rasterize, MergeError};
use map_merge_core::{to_external, to_internal, ExternalTransform, Homography, OccupancyGrid};
use map_merge_features::{
    BestOf2NearestRangeMatcher, Estimator, FeaturesFinder, FeaturesMatcher, ImageFeatures,
    OrbFeaturesFinder, SpanningTreeEstimator,
};
use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Where the pipeline is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Empty,
    Fed,
    EstimateSucceeded,
    EstimateFailed,
    Composed,
}

/// Merges a set of occupancy grids into one.
///
/// Grids are shared read-only. Transform `i` maps grid `i`'s cell coordinates
/// into the cell frame of grid 0.
#[derive(Debug)]
pub struct MergingPipeline {
    params: MergeParams,
    finder: OrbFeaturesFinder,
    matcher: BestOf2NearestRangeMatcher,
    estimator: SpanningTreeEstimator,
    grids: Vec<Arc<OccupancyGrid>>,
    transforms: Vec<Homography>,
    state: PipelineState,
}

impl Default for MergingPipeline {
    fn default() -> Self {
        Self::new(MergeParams::default())
    }
}

impl MergingPipeline {
    pub fn new(params: MergeParams) -> Self {
        Self {
            finder: OrbFeaturesFinder::new(params.orb.clone()),
            matcher: BestOf2NearestRangeMatcher::new(params.matcher.clone()),
            estimator: SpanningTreeEstimator::new(params.estimator.clone()),
            params,
            grids: Vec::new(),
            transforms: Vec::new(),
            state: PipelineState::Empty,
        }
    }

    #[inline]
    pub fn params(&self) -> &MergeParams {
        &self.params
    }

    #[inline]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    #[inline]
    pub fn grids(&self) -> &[Arc<OccupancyGrid>] {
        &self.grids
    }

    /// Replace the input set. Previous transforms are discarded.
    pub fn feed<I>(&mut self, grids: I)
    where
        I: IntoIterator<Item = Arc<OccupancyGrid>>,
    {
        self.grids = grids.into_iter().collect();
        self.transforms.clear();
        self.state = PipelineState::Fed;
        log::debug!("fed {} grids", self.grids.len());
    }

    /// Estimate transforms with the bundled collaborators; see
    /// [`MergingPipeline::try_estimate_transform_with`].
    pub fn try_estimate_transform(&mut self) -> Result<(), MergeError> {
        let result = estimate_all(&self.grids, &self.finder, &self.matcher, &self.estimator);
        self.finish_estimation(result)
    }

    /// Estimate one transform per grid using caller-supplied collaborators.
    ///
    /// Zero grids give no transforms and one grid gives the identity, both
    /// without any feature work. On failure no transforms are kept.
    pub fn try_estimate_transform_with(
        &mut self,
        finder: &dyn FeaturesFinder,
        matcher: &dyn FeaturesMatcher,
        estimator: &dyn Estimator,
    ) -> Result<(), MergeError> {
        let result = estimate_all(&self.grids, finder, matcher, estimator);
        self.finish_estimation(result)
    }

    /// Like [`MergingPipeline::try_estimate_transform`], reporting only success.
    pub fn estimate_transform(&mut self) -> bool {
        match self.try_estimate_transform() {
            Ok(()) => true,
            Err(err) => {
                log::info!("transform estimation failed: {err}");
                false
            }
        }
    }

    fn finish_estimation(
        &mut self,
        result: Result<Vec<Homography>, MergeError>,
    ) -> Result<(), MergeError> {
        match result {
            Ok(transforms) => {
                self.transforms = transforms;
                self.state = PipelineState::EstimateSucceeded;
                Ok(())
            }
            Err(err) => {
                self.transforms.clear();
                self.state = PipelineState::EstimateFailed;
                Err(err)
            }
        }
    }

    /// Compose all grids with the current transforms.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(grids = self.grids.len()))
    )]
    pub fn try_compose_grids(&mut self) -> Result<OccupancyGrid, MergeError> {
        if self.grids.is_empty() {
            return Err(MergeError::NoGrids);
        }
        if self.state == PipelineState::EstimateFailed {
            return Err(MergeError::EstimationFailed);
        }
        if self.transforms.is_empty() {
            return Err(MergeError::NoTransformsAvailable);
        }

        let grids: Vec<&OccupancyGrid> = self.grids.iter().map(Arc::as_ref).collect();
        let merged = compose_grids(&grids, &self.transforms, &self.params.compose)?;
        self.state = PipelineState::Composed;
        Ok(merged)
    }

    /// Like [`MergingPipeline::try_compose_grids`], returning `None` on any failure.
    pub fn compose_grids(&mut self) -> Option<OccupancyGrid> {
        match self.try_compose_grids() {
            Ok(grid) => Some(grid),
            Err(MergeError::NoGrids) => None,
            Err(err) => {
                log::warn!("cannot compose grids: {err}");
                None
            }
        }
    }

    /// Current transforms in pose form; empty until estimation or assignment succeeds.
    pub fn transforms(&self) -> Vec<ExternalTransform> {
        self.transforms.iter().map(to_external).collect()
    }

    /// Replace all transforms, one per grid. Nothing changes on error.
    pub fn set_transforms(&mut self, transforms: &[ExternalTransform]) -> Result<(), MergeError> {
        self.check_count(transforms.len())?;
        let internal = transforms
            .iter()
            .enumerate()
            .map(|(index, t)| {
                to_internal(t).map_err(|source| MergeError::InvalidTransform { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.transforms = internal;
        self.state = PipelineState::EstimateSucceeded;
        Ok(())
    }

    #[inline]
    pub fn internal_transforms(&self) -> &[Homography] {
        &self.transforms
    }

    /// Replace all transforms in matrix form. Nothing changes on error.
    pub fn set_internal_transforms(
        &mut self,
        transforms: Vec<Homography>,
    ) -> Result<(), MergeError> {
        self.check_count(transforms.len())?;
        self.transforms = transforms;
        self.state = PipelineState::EstimateSucceeded;
        Ok(())
    }

    fn check_count(&self, got: usize) -> Result<(), MergeError> {
        if got != self.grids.len() {
            return Err(MergeError::TransformCountMismatch {
                expected: self.grids.len(),
                got,
            });
        }
        Ok(())
    }
}

#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(grids = grids.len()))
)]
fn estimate_all(
    grids: &[Arc<OccupancyGrid>],
    finder: &dyn FeaturesFinder,
    matcher: &dyn FeaturesMatcher,
    estimator: &dyn Estimator,
) -> Result<Vec<Homography>, MergeError> {
    match grids.len() {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![Homography::identity()]),
        _ => {}
    }

    log::debug!("computing features");
    let find = |grid: &Arc<OccupancyGrid>| -> ImageFeatures {
        let image = rasterize(grid);
        finder.find(&image.view())
    };
    #[cfg(feature = "rayon")]
    let features: Vec<ImageFeatures> = grids.par_iter().map(find).collect();
    #[cfg(not(feature = "rayon"))]
    let features: Vec<ImageFeatures> = grids.iter().map(find).collect();

    log::debug!("pairwise matching features");
    let matches = matcher.match_features(&features);

    log::debug!("estimating final transform");
    let transforms = estimator.estimate(&features, &matches)?;
    if transforms.len() != grids.len() {
        return Err(MergeError::TransformCountMismatch {
            expected: grids.len(),
            got: transforms.len(),
        });
    }
    anchor_to_first(transforms)
}

/// Re-express all transforms relative to the first, so that it is the identity.
fn anchor_to_first(transforms: Vec<Homography>) -> Result<Vec<Homography>, MergeError> {
    for (index, t) in transforms.iter().enumerate() {
        if !t.h.iter().all(|v| v.is_finite()) {
            return Err(MergeError::SingularTransform { index });
        }
    }
    let Some(first) = transforms.first() else {
        return Ok(transforms);
    };
    if first.is_identity(1e-12) {
        return Ok(transforms);
    }
    let inv = first
        .inverse()
        .ok_or(MergeError::SingularTransform { index: 0 })?;
    Ok(transforms
        .iter()
        .map(|t| {
            let anchored = inv.compose(t);
            anchored.normalized().unwrap_or(anchored)
        })
        .collect())
}
