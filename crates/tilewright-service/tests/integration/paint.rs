use std::sync::Arc;

use tilewright_service::caching::FailureCode;
use tilewright_service::services::viewer::{PaintSpec, TilePaint};
use tilewright_sources::{PaintRect, SourceId, ViewPosition};

use crate::helpers::{Gate, TestProducer, wait_until};
use crate::{Repaints, setup_service};

const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 128];

fn spec(zoom: u8) -> PaintSpec {
    PaintSpec::new(PaintRect::from_size(800, 600), ViewPosition::new(0.5, 0.5, zoom))
}

#[test]
fn test_paint_until_complete() {
    let services = setup_service(|_| {});
    let base = Arc::new(services.cached_source(SourceId::new("base"), TestProducer::solid(GREEN)));
    let overlay = Arc::new(services.cached_source(
        SourceId::new("overlay"),
        TestProducer::solid(BLUE).with_credit("overlay imagery"),
    ));

    let mut viewer = services.viewer();
    viewer.add_layer(base.clone());
    viewer.add_layer(overlay.clone());
    let repaints = Repaints::default();

    let first = viewer.paint(&spec(3), repaints.invalidate());
    assert!(first.tiles_required > 0);
    assert!(wait_until(|| repaints.count() > 0));

    let mut passes = 1;
    let plan = loop {
        let plan = viewer.paint(&spec(3), repaints.invalidate());
        passes += 1;
        if plan.is_complete() {
            break plan;
        }
        assert!(passes < 1000, "paint passes never completed");
        std::thread::sleep(std::time::Duration::from_millis(1));
    };

    assert_eq!(plan.tiles_required, first.tiles_required);
    assert_eq!(plan.images().count(), plan.tiles_required);
    // every tile was produced once, however many passes asked for it
    let per_layer = plan.tiles_required / 2;
    assert_eq!(base.producer().image_calls(), per_layer);
    assert_eq!(overlay.producer().image_calls(), per_layer);
    assert_eq!(base.producer().bounds_calls(), 1);

    assert_eq!(viewer.base_layer_center_pixel(&spec(3)), Some(GREEN));
    assert_eq!(viewer.credits(), vec!["overlay imagery".to_owned()]);
}

#[test]
fn test_pending_tiles_never_block_painting() {
    let services = setup_service(|_| {});
    let gate = Gate::new();
    let base = Arc::new(services.cached_source(
        SourceId::new("base"),
        TestProducer::solid(GREEN).gated(&gate),
    ));

    let mut viewer = services.viewer();
    viewer.add_layer(base.clone());
    let repaints = Repaints::default();

    for _ in 0..10 {
        let plan = viewer.paint(&spec(2), repaints.invalidate());
        assert_eq!(plan.tiles_available, 0);
        assert!(plan.kits.iter().all(|kit| matches!(
            kit.meaty[..],
            [TilePaint::Placeholder { stack_order: 0 }]
        )));
    }

    gate.open();
    assert!(wait_until(|| {
        viewer.paint(&spec(2), repaints.invalidate()).is_complete()
    }));
}

#[test]
fn test_failed_tiles_show_details() {
    let services = setup_service(|config| config.viewer.show_failure_details = true);
    let base = Arc::new(services.cached_source(
        SourceId::new("base"),
        TestProducer::solid(GREEN).failing(FailureCode::Fetch("503 Service Unavailable".into())),
    ));

    let mut viewer = services.viewer();
    viewer.add_layer(base.clone());
    let repaints = Repaints::default();

    assert!(wait_until(|| {
        viewer.paint(&spec(1), repaints.invalidate()).is_complete()
    }));

    let plan = viewer.paint(&spec(1), repaints.invalidate());
    assert_eq!(plan.images().count(), 0);
    for kit in &plan.kits {
        assert!(matches!(
            &kit.meaty[..],
            [TilePaint::Message { text, .. }] if text == "fetch failed: 503 Service Unavailable"
        ));
    }

    // failures are served from the cache until the pipeline is invalidated
    let calls = base.producer().image_calls();
    assert_eq!(calls, plan.tiles_required);
    viewer.invalidate_pipeline();
    assert!(wait_until(|| {
        viewer.paint(&spec(1), repaints.invalidate()).is_complete()
    }));
    assert_eq!(base.producer().image_calls(), 2 * calls);
    assert!(base.cache().len() > 0);
}
