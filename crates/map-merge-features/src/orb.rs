//! ORB keypoints and descriptors from OpenCV's `features2d` module.

use crate::{Descriptor, FeaturesFinder, ImageFeatures, KeyPoint, OrbParams};
use map_merge_core::GrayImageView;
use nalgebra::Point2;
use opencv::core::{KeyPoint as CvKeyPoint, Mat, Ptr, Vector};
use opencv::features2d::{self, ORB_ScoreType};
use opencv::prelude::*;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Features finder backed by `cv::ORB`.
///
/// A detector is created per call, so one finder can serve many threads.
#[derive(Clone, Debug, Default)]
pub struct OrbFeaturesFinder {
    params: OrbParams,
}

impl OrbFeaturesFinder {
    pub fn new(params: OrbParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &OrbParams {
        &self.params
    }

    fn create_orb(&self) -> opencv::Result<Ptr<features2d::ORB>> {
        let p = &self.params;
        let score = if p.harris_score {
            ORB_ScoreType::HARRIS_SCORE
        } else {
            ORB_ScoreType::FAST_SCORE
        };
        features2d::ORB::create(
            i32::try_from(p.max_features).unwrap_or(i32::MAX),
            p.scale_factor,
            p.n_levels,
            p.edge_threshold,
            0,
            2,
            score,
            p.patch_size,
            p.fast_threshold,
        )
    }

    /// Detect keypoints and compute their descriptors.
    pub fn detect(&self, image: &GrayImageView<'_>) -> opencv::Result<ImageFeatures> {
        let mut features = ImageFeatures {
            width: image.width,
            height: image.height,
            ..ImageFeatures::default()
        };
        if image.width == 0 || image.height == 0 {
            return Ok(features);
        }

        let mat = gray_to_mat(image)?;
        let mut orb = self.create_orb()?;
        let mut keypoints = Vector::<CvKeyPoint>::new();
        let mut descriptors = Mat::default();
        let mask = Mat::default();
        orb.detect_and_compute(&mat, &mask, &mut keypoints, &mut descriptors, false)?;

        features.keypoints.reserve(keypoints.len());
        features.descriptors.reserve(keypoints.len());
        for (row, kp) in keypoints.iter().enumerate() {
            let Some(descriptor) = Descriptor::from_row(descriptors.at_row::<u8>(row as i32)?)
            else {
                continue;
            };
            let pt = kp.pt();
            features.keypoints.push(KeyPoint {
                position: Point2::new(pt.x, pt.y),
                angle: kp.angle(),
                response: kp.response(),
                octave: kp.octave(),
            });
            features.descriptors.push(descriptor);
        }
        log::debug!(
            "{} ORB keypoints in {}x{} image",
            features.len(),
            image.width,
            image.height
        );
        Ok(features)
    }
}

impl FeaturesFinder for OrbFeaturesFinder {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = image.width, height = image.height))
    )]
    fn find(&self, image: &GrayImageView<'_>) -> ImageFeatures {
        self.detect(image).unwrap_or_else(|err| {
            log::warn!(
                "ORB failed on {}x{} image: {err}",
                image.width,
                image.height
            );
            ImageFeatures {
                width: image.width,
                height: image.height,
                ..ImageFeatures::default()
            }
        })
    }
}

/// Single-channel `CV_8U` matrix holding a copy of the image.
fn gray_to_mat(image: &GrayImageView<'_>) -> opencv::Result<Mat> {
    let flat = Mat::from_slice(image.data)?.try_clone()?;
    let mat = flat.reshape(1, image.height as i32)?.try_clone()?;
    Ok(mat)
}
