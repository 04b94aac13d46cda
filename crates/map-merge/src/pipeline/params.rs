use crate::ComposeParams;
use map_merge_features::{EstimatorParams, MatcherParams, OrbParams};
use serde::{Deserialize, Serialize};

/// All knobs of the merging pipeline, one section per stage.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeParams {
    /// Feature extraction on the rasterized grids.
    pub orb: OrbParams,
    /// Pairwise matching and per-pair transform fitting.
    pub matcher: MatcherParams,
    /// Global transform estimation.
    pub estimator: EstimatorParams,
    /// Canvas construction and cell fusion.
    pub compose: ComposeParams,
}
