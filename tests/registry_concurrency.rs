//! Concurrent requests over one shared pipeline
//!
//! Load-once and device behaviour of the registry itself is covered by the
//! unit tests in `src/registry.rs`.

mod common;

use common::{gradient_image, mock_pipeline};
use medseg::{
    backends::{mock::raw_detection, MockDetector, MockModelFactory},
    ExecutionProvider,
};

#[test]
fn test_parallel_requests_share_one_pipeline() {
    let detector = MockDetector::new(vec![raw_detection([2.0, 2.0, 6.0, 6.0], 0, "lesion", 0.75)]);
    let factory = MockModelFactory::new().with_detector(detector);
    let counters = factory.counters();
    let pipeline = mock_pipeline(factory);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let pipeline = &pipeline;
                scope.spawn(move || {
                    pipeline
                        .process_image(&gradient_image(8 + i, 8), ExecutionProvider::Cpu, 0.3)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(counters.detector_loads(), 1);
    assert_eq!(counters.segmenter_loads(), 1);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.summaries, vec!["lesion (75.0%)"]);
        assert_eq!(result.unified_mask.dimensions(), (8 + i as u32, 8));
        assert_eq!(result.unified_mask.foreground_pixels(), 16);
    }
}
