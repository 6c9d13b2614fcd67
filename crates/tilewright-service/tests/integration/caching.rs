use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tilewright_service::async_ref::{CallbackRegistration, GenerationCounter, Interest};
use tilewright_service::image::{ImageRef, PixelBuffer};
use tilewright_service::present::Present;
use tilewright_service::services::source::DisplayableSource;
use tilewright_sources::{SourceExtent, SourceId, TileAddress};

use crate::helpers::{Gate, ManualScheduler, TestProducer, TestRequest, wait_until};
use crate::{setup, setup_service};

const RED: [u8; 4] = [255, 0, 0, 255];

#[test]
fn test_concurrent_gets_share_one_production() {
    let services = setup_service(|_| {});
    let source = Arc::new(services.cached_source(SourceId::new("A"), TestProducer::solid(RED)));
    let address = TileAddress::new(2, 3, 4);

    let handles: Vec<_> = thread::scope(|scope| {
        let spawned: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    let mut handle = source.get_image(&address);
                    handle.set_interest(Interest::new(1));
                    handle
                })
            })
            .collect();
        spawned.into_iter().map(|t| t.join().unwrap()).collect()
    });

    assert!(handles.iter().all(|h| h.same_record(&handles[0])));
    assert!(wait_until(|| handles[0].is_terminal()));
    assert_eq!(source.producer().image_calls(), 1);
}

#[test]
fn test_duplicate_then_dispose_keeps_count() {
    setup();
    let caches = tilewright_service::caching::Caches::new(ManualScheduler::new());
    let source = SourceId::new("A");

    let handle = caches.get(&source, TestRequest::image(&source, "tile", RED));
    assert_eq!(handle.handle_count(), 1);

    let copy = handle.duplicate("copy");
    assert_eq!(handle.handle_count(), 2);
    copy.dispose();
    assert_eq!(handle.handle_count(), 1);
}

#[test]
fn test_terminal_callbacks_observe_same_value() {
    setup();
    let scheduler = ManualScheduler::new();
    let caches = tilewright_service::caching::Caches::new(scheduler.clone());
    let source = SourceId::new("A");
    let fired = Arc::new(AtomicUsize::new(0));

    let mut handle = caches.get(&source, TestRequest::image(&source, "tile", RED));
    handle.set_interest(Interest::new(1));
    let registration = handle.add_callback({
        let fired = Arc::clone(&fired);
        move |present| {
            assert!(matches!(present, Present::Image(_)));
            fired.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert!(matches!(registration, CallbackRegistration::Registered));

    scheduler.run_all();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    let first = handle.present();
    for _ in 0..3 {
        let registration = handle.add_callback(|_| panic!("callbacks on terminal records never run"));
        let CallbackRegistration::Ready(Present::Image(image)) = registration else {
            panic!("expected a ready image");
        };
        assert!(image.ptr_eq(first.image().unwrap()));
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_stale_generation_has_no_effect() {
    setup();
    let scheduler = ManualScheduler::new();
    let caches = tilewright_service::caching::Caches::new(scheduler.clone());
    let source = SourceId::new("A");
    let generation = GenerationCounter::new();
    let effects = Arc::new(AtomicUsize::new(0));

    let mut handle = caches.get(&source, TestRequest::image(&source, "tile", RED));
    handle.set_interest(Interest::new(1));

    generation.advance();
    let token = generation.token();
    let _ = handle.add_scoped_callback(&token, {
        let effects = Arc::clone(&effects);
        move |_| {
            effects.fetch_add(1, Ordering::SeqCst);
        }
    });

    generation.advance();
    assert!(!token.is_current());
    scheduler.run_all();
    assert!(handle.is_terminal());
    assert_eq!(effects.load(Ordering::SeqCst), 0);
}

#[test]
fn test_withdrawn_interest_keeps_results() {
    setup();
    let scheduler = ManualScheduler::new();
    let caches = tilewright_service::caching::Caches::new(scheduler.clone());
    let source = SourceId::new("A");

    let mut first = caches.get(&source, TestRequest::image(&source, "tile", RED));
    let mut second = first.duplicate("second");
    first.set_interest(Interest::new(5));
    second.set_interest(Interest::new(9));
    scheduler.run_all();

    first.set_interest(Interest::NONE);
    second.set_interest(Interest::NONE);
    assert_eq!(first.aggregate_interest(), Interest::NONE);

    let (Present::Image(a), Present::Image(b)) = (first.present(), second.present()) else {
        panic!("expected images");
    };
    assert!(a.ptr_eq(&b));
}

#[test]
fn test_image_share_lifecycle() {
    setup();
    let image = ImageRef::new(PixelBuffer::filled(4, 4, RED), "tile");
    let watch = image.watch();
    assert_eq!(image.count(), 1);

    let a = image.duplicate("a");
    let b = image.duplicate("b");
    assert_eq!(watch.count(), 3);

    a.dispose();
    b.dispose();
    assert!(!watch.is_released());
    image.dispose();
    assert!(watch.is_released());
    assert_eq!(watch.count(), 0);
}

#[test]
fn test_flush_while_pending() {
    let services = setup_service(|config| config.producers.workers = 1);
    let gate = Gate::new();
    let source = services.cached_source(SourceId::new("A"), TestProducer::solid(RED).gated(&gate));
    let address = TileAddress::new(2, 3, 4);

    let mut original = source.get_image(&address);
    original.set_interest(Interest::new(1));
    assert!(wait_until(|| services.producers().queued() == 0));

    source.flush();
    let mut fresh = source.get_image(&address);
    assert!(!fresh.same_record(&original));
    fresh.set_interest(Interest::new(1));

    gate.open();
    assert!(wait_until(|| original.is_terminal() && fresh.is_terminal()));
    assert!(original.present().image().is_some());
    assert_eq!(source.producer().image_calls(), 2);
}

#[test]
fn test_outside_extent_is_not_a_failure() {
    let services = setup_service(|_| {});
    let extent = SourceExtent {
        max_zoom: 10,
        ..SourceExtent::WORLD
    };
    let source = services.cached_source(
        SourceId::new("A"),
        TestProducer::solid(RED).with_extent(extent),
    );

    let handle = source.get_image(&TileAddress::new(0, 0, 11));
    assert!(matches!(handle.present(), Present::OutOfBounds));
    assert!(handle.present().failure().is_none());
    assert_eq!(source.producer().image_calls(), 0);
}

#[tokio::test]
async fn test_completion_across_threads() {
    let services = setup_service(|_| {});
    let source = services.cached_source(SourceId::new("A"), TestProducer::solid(RED));

    let mut handle = source.get_image(&TileAddress::new(1, 1, 2));
    let completion = handle.completion();
    handle.set_interest(Interest::new(1));

    let present = tokio::time::timeout(std::time::Duration::from_secs(5), completion)
        .await
        .unwrap();
    let image = present.image().unwrap();
    assert_eq!(image.with_lock(|buffer| buffer.pixel(0, 0)), Some(RED));

    // a completion of a terminal record is ready right away
    assert!(handle.completion().await.image().is_some());
}
