//! Segmentation stage: one mask per detection, OR-ed into a unified mask

use crate::{
    config::SegmentationFailurePolicy,
    error::{MedsegError, Result},
    inference::BoxSegmenter,
    mask::BinaryMask,
    types::Detection,
};
use image::RgbImage;
use tracing::{debug, warn};

/// Segment the object inside one detection's box
///
/// The box is the only prompt. The extracted mask is brought to the source
/// image dimensions before it is returned.
///
/// # Errors
/// `Segmentation` when the segmenter fails or returns no usable mask
pub fn segment(
    segmenter: &mut dyn BoxSegmenter,
    image: &RgbImage,
    detection: &Detection,
) -> Result<BinaryMask> {
    let to_segmentation = |e: MedsegError| match e {
        MedsegError::Segmentation(_) => e,
        other => MedsegError::segmentation(format!(
            "segmenting {} at {:?}: {other}",
            detection.class_name, detection.bbox
        )),
    };

    let mask = segmenter
        .segment(image, &detection.bbox)
        .and_then(|output| output.into_mask())
        .map_err(to_segmentation)?;

    let (width, height) = image.dimensions();
    Ok(reconcile_shape(&mask, width, height))
}

/// Nearest-neighbour resize to `width x height`; same-shape masks pass through
#[must_use]
pub fn reconcile_shape(mask: &BinaryMask, width: u32, height: u32) -> BinaryMask {
    if mask.dimensions() != (width, height) {
        debug!(
            from = ?mask.dimensions(),
            to = ?(width, height),
            "resizing mask to source dimensions"
        );
    }
    mask.resize_nearest(width, height)
}

/// Pixel-wise OR of `masks`, starting from an all-zero `width x height` mask
///
/// # Errors
/// `Segmentation` if a mask does not match the target dimensions
pub fn accumulate<'a, I>(masks: I, width: u32, height: u32) -> Result<BinaryMask>
where
    I: IntoIterator<Item = &'a BinaryMask>,
{
    let mut unified = BinaryMask::zeros(width, height);
    for mask in masks {
        unified
            .union_with(mask)
            .map_err(|e| MedsegError::segmentation(format!("accumulating masks: {e}")))?;
    }
    Ok(unified)
}

/// Segment every detection in order and OR the results into one mask
///
/// With [`SegmentationFailurePolicy::Skip`] a failing detection is logged and
/// contributes nothing; with `Abort` the first failure is returned.
///
/// # Errors
/// `Segmentation` on the first failure under `Abort`
pub fn segment_all(
    segmenter: &mut dyn BoxSegmenter,
    image: &RgbImage,
    detections: &[Detection],
    policy: SegmentationFailurePolicy,
) -> Result<BinaryMask> {
    let (width, height) = image.dimensions();
    let mut unified = BinaryMask::zeros(width, height);

    for (index, detection) in detections.iter().enumerate() {
        match segment(segmenter, image, detection) {
            Ok(mask) => unified
                .union_with(&mask)
                .map_err(|e| MedsegError::segmentation(format!("accumulating masks: {e}")))?,
            Err(e) if policy == SegmentationFailurePolicy::Skip => {
                warn!(index, class = %detection.class_name, error = %e, "skipping detection");
            },
            Err(e) => return Err(e),
        }
    }

    Ok(unified)
}
