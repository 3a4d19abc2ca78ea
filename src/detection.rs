//! Detection stage

use crate::{
    error::{MedsegError, Result},
    inference::Detector,
    types::{BoundingBox, Detection},
};
use image::RgbImage;

/// Run the detector once and convert its boxes to integer pixel coordinates
///
/// The threshold is the detector's to apply; results are not re-filtered or
/// re-sorted here. No detections is an empty vector, not an error.
///
/// # Errors
/// `Detection` on any detector failure. Other error kinds raised inside the
/// detector are re-tagged so callers see a single class for this stage.
pub fn detect(
    detector: &mut dyn Detector,
    image: &RgbImage,
    confidence_threshold: f32,
) -> Result<Vec<Detection>> {
    let raw = detector
        .detect(image, confidence_threshold)
        .map_err(|e| match e {
            MedsegError::Detection(_) => e,
            other => MedsegError::detection(format!("{} failed: {other}", detector.name())),
        })?;

    Ok(raw
        .into_iter()
        .map(|d| Detection {
            bbox: BoundingBox::from_xyxy_truncated(d.xyxy),
            class_id: d.class_id,
            class_name: d.class_name,
            confidence: d.confidence,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::{raw_detection, MockDetector};

    #[test]
    fn test_boxes_truncated_and_order_kept() {
        let mut detector = MockDetector::new(vec![
            raw_detection([10.9, 20.2, 50.7, 60.99], 2, "glioma", 0.4),
            raw_detection([1.0, 2.0, 3.0, 4.0], 0, "pituitary", 0.95),
        ]);
        let image = RgbImage::new(100, 100);

        let detections = detect(&mut detector, &image, 0.3).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox, BoundingBox::new(10, 20, 50, 60));
        assert_eq!(detections[0].class_name, "glioma");
        assert_eq!(detections[1].class_name, "pituitary");
    }

    #[test]
    fn test_threshold_forwarded_to_detector() {
        let mut detector = MockDetector::new(vec![raw_detection([0.0; 4], 0, "a", 0.5)]);
        let image = RgbImage::new(8, 8);

        assert!(detect(&mut detector, &image, 0.6).unwrap().is_empty());
        assert_eq!(detector.thresholds_seen(), vec![0.6]);
    }

    #[test]
    fn test_no_detections_is_empty_not_error() {
        let mut detector = MockDetector::default();
        let image = RgbImage::new(8, 8);
        assert!(detect(&mut detector, &image, 0.3).unwrap().is_empty());
    }

    #[test]
    fn test_failure_is_detection_error() {
        let mut detector = MockDetector::failing();
        let image = RgbImage::new(8, 8);
        let err = detect(&mut detector, &image, 0.3).unwrap_err();
        assert!(matches!(err, MedsegError::Detection(_)));
    }
}
