//! Handles to asynchronous computations.
//!
//! Each computation is represented by one shared [`AsyncRecord`], and every holder accesses
//! it through its own [`AsyncRef`]. Records start out [`Pending`](crate::present::Present::Pending)
//! and are resolved exactly once by a producer thread, after which their value never changes.
//!
//! Holders declare their [`Interest`] in a result. A record is handed to its [`Scheduler`] as
//! soon as anyone is interested, and is produced in order of the highest declared interest.
//! Once all interest is withdrawn, a record that did not start yet is deferred instead of
//! produced. Running productions can observe this through [`ProductionContext::is_wanted`].
//!
//! Completion callbacks may be scoped to an [`EpochToken`], in which case they are skipped
//! once a newer generation of paint passes has started.

use std::sync::Arc;

mod epoch;
mod handle;
mod interest;
mod record;

pub use epoch::*;
pub use handle::*;
pub use interest::*;
pub use record::{AsyncRecord, ProductionContext, ScheduleState};
pub(crate) use record::Production;

/// Accepts records that should be produced.
///
/// A record is scheduled whenever it becomes wanted, and again whenever its interest rises
/// while it is queued. Implementations call [`AsyncRecord::run`] with the priority of every
/// scheduled entry, which skips outdated and unwanted entries on its own.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, record: Arc<AsyncRecord>, priority: Interest);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::caching::{ComputationKey, FailureCode};
    use crate::image::{ImageRef, PixelBuffer};
    use crate::present::Present;
    use crate::test::{self, ManualScheduler};
    use tilewright_sources::SourceId;

    fn key(name: &str) -> ComputationKey {
        ComputationKey::builder("test", &SourceId::new("A"))
            .param("name", name)
            .build()
    }

    fn image_record(scheduler: &Arc<ManualScheduler>) -> Arc<AsyncRecord> {
        AsyncRecord::new(
            key("image"),
            Box::new(|_ctx| {
                Ok(Present::Image(ImageRef::new(
                    PixelBuffer::filled(2, 2, [1, 1, 1, 1]),
                    "test",
                )))
            }),
            scheduler.clone(),
        )
    }

    #[test]
    fn test_scheduled_on_interest() {
        test::setup();
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);

        let mut handle = AsyncRef::new(record.clone(), "test");
        assert_eq!(record.schedule_state(), ScheduleState::Idle);
        assert_eq!(scheduler.queued(), 0);

        handle.set_interest(Interest::new(5));
        assert_eq!(record.schedule_state(), ScheduleState::Queued);
        assert_eq!(scheduler.queued(), 1);

        assert_eq!(scheduler.run_all(), 1);
        assert_eq!(record.schedule_state(), ScheduleState::Done);
        assert!(handle.present().image().is_some());
    }

    #[test]
    fn test_aggregate_interest() {
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);

        let mut a = AsyncRef::new(record.clone(), "a");
        let mut b = a.duplicate("b");
        a.set_interest(Interest::new(3));
        b.set_interest(Interest::new(7));
        assert_eq!(a.aggregate_interest(), Interest::new(7));
        assert_eq!(a.interest(), Interest::new(3));

        // raising the priority of a queued record queues it again
        assert_eq!(scheduler.priorities(), vec![3, 7]);

        b.set_interest(Interest::NONE);
        assert_eq!(a.aggregate_interest(), Interest::new(3));

        drop(a);
        assert_eq!(record.aggregate_interest(), Interest::NONE);
        assert_eq!(record.handle_count(), 1);
    }

    #[test]
    fn test_deferred_without_interest() {
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);

        let mut handle = AsyncRef::new(record.clone(), "test");
        handle.set_interest(Interest::new(1));
        handle.set_interest(Interest::NONE);

        assert_eq!(scheduler.run_all(), 0);
        assert_eq!(record.schedule_state(), ScheduleState::Deferred);
        assert!(!handle.is_terminal());

        // regaining interest queues the record again
        handle.set_interest(Interest::new(1));
        assert_eq!(record.schedule_state(), ScheduleState::Queued);
        assert_eq!(scheduler.run_all(), 1);
        assert!(handle.is_terminal());
    }

    #[test]
    fn test_callbacks_fire_once() {
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);
        let fired = Arc::new(AtomicUsize::new(0));

        let mut handle = AsyncRef::new(record, "test");
        let counter = fired.clone();
        let registration = handle.add_callback(move |present| {
            assert!(present.image().is_some());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(matches!(registration, CallbackRegistration::Registered));

        handle.set_interest(Interest::new(1));
        scheduler.run_all();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // terminal records hand out their value instead of calling back
        for _ in 0..3 {
            let counter = fired.clone();
            let registration = handle.add_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            let CallbackRegistration::Ready(present) = registration else {
                panic!("expected a terminal record");
            };
            assert!(present.image().is_some());
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_callbacks_are_skipped() {
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);
        let generation = GenerationCounter::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut handle = AsyncRef::new(record, "test");

        generation.advance();
        let token = generation.token();
        let log = calls.clone();
        let _ = handle.add_scoped_callback(&token, move |_| log.lock().push("first pass"));

        generation.advance();
        let token = generation.token();
        let log = calls.clone();
        let _ = handle.add_scoped_callback(&token, move |_| log.lock().push("second pass"));

        handle.set_interest(Interest::new(1));
        scheduler.run_all();

        assert_eq!(*calls.lock(), vec!["second pass"]);
    }

    #[test]
    fn test_stale_callbacks_do_not_accumulate() {
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);
        let generation = GenerationCounter::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let handle = AsyncRef::new(record.clone(), "test");
        let counter = fired.clone();
        let _ = handle.add_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // a record that is never produced while passes keep registering
        for _ in 0..1000 {
            generation.advance();
            let counter = fired.clone();
            let _ = handle.add_scoped_callback(&generation.token(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(record.pending_callbacks(), 2);
        assert!(format!("{record:?}").contains("callbacks: 2"));

        let mut handle = handle;
        handle.set_interest(Interest::new(1));
        scheduler.run_all();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(record.pending_callbacks(), 0);
    }

    #[test]
    fn test_lowered_interest_is_requeued() {
        let scheduler = ManualScheduler::new();
        let produced = Arc::new(Mutex::new(Vec::new()));
        let record = |name: &'static str| {
            let produced = produced.clone();
            AsyncRecord::new(
                key(name),
                Box::new(move |_ctx| {
                    produced.lock().push(name);
                    Ok(Present::OutOfBounds)
                }),
                scheduler.clone(),
            )
        };

        let mut first = AsyncRef::new(record("first"), "first");
        let mut second = AsyncRef::new(record("second"), "second");
        first.set_interest(Interest::new(9));
        second.set_interest(Interest::new(5));
        first.set_interest(Interest::new(2));

        // the entry queued at 9 is replaced by one at 2
        assert_eq!(scheduler.run_next(), Some(false));
        assert_eq!(scheduler.priorities(), vec![5, 2]);
        assert_eq!(first.record().schedule_state(), ScheduleState::Queued);

        assert_eq!(scheduler.run_all(), 2);
        assert_eq!(*produced.lock(), vec!["second", "first"]);
    }

    #[test]
    fn test_failure_and_panic() {
        let scheduler = ManualScheduler::new();

        let failing = AsyncRecord::new(
            key("failing"),
            Box::new(|_ctx| Err(FailureCode::Decode("bad header".into()))),
            scheduler.clone(),
        );
        let panicking = AsyncRecord::new(
            key("panicking"),
            Box::new(|_ctx| panic!("producer bug")),
            scheduler.clone(),
        );

        let mut a = AsyncRef::new(failing, "a");
        let mut b = AsyncRef::new(panicking, "b");
        a.set_interest(Interest::new(1));
        b.set_interest(Interest::new(1));
        assert_eq!(scheduler.run_all(), 2);

        assert_eq!(
            a.present().failure(),
            Some(&FailureCode::Decode("bad header".into()))
        );
        assert_eq!(b.present().failure(), Some(&FailureCode::InternalError));
    }

    #[test]
    fn test_withdrawing_interest_keeps_result() {
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);

        let mut a = AsyncRef::new(record, "a");
        let mut b = a.duplicate("b");
        a.set_interest(Interest::new(1));
        b.set_interest(Interest::new(1));
        scheduler.run_all();

        a.set_interest(Interest::NONE);
        b.set_interest(Interest::NONE);
        assert!(a.present().image().is_some());
        assert!(b.present().image().is_some());
        assert_eq!(scheduler.queued(), 0);
    }

    #[test]
    fn test_production_sees_interest() {
        let scheduler = ManualScheduler::new();
        let wanted = Arc::new(Mutex::new(None));

        let seen = wanted.clone();
        let record = AsyncRecord::new(
            key("context"),
            Box::new(move |ctx| {
                *seen.lock() = Some((ctx.is_wanted(), ctx.interest()));
                Ok(Present::OutOfBounds)
            }),
            scheduler.clone(),
        );

        let mut handle = AsyncRef::new(record, "test");
        handle.set_interest(Interest::new(42));
        scheduler.run_all();

        assert_eq!(*wanted.lock(), Some((true, Interest::new(42))));
    }

    #[tokio::test]
    async fn test_completion() {
        let scheduler = ManualScheduler::new();
        let record = image_record(&scheduler);

        let mut handle = AsyncRef::new(record, "test");
        let completion = handle.completion();
        handle.set_interest(Interest::new(1));

        let runner = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.run_all())
        };
        let present = completion.await;
        assert_eq!(runner.join().unwrap(), 1);

        let image = present.image().unwrap();
        assert_eq!(image.with_lock(|buf| buf.pixel(1, 1)), Some([1, 1, 1, 1]));

        // already terminal
        assert!(handle.completion().await.image().is_some());
    }
}
