use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tilewright_service::config::Config;
use tilewright_service::services::viewer::Invalidate;
use tilewright_service::services::{SharedServices, create_service};

pub use tilewright_service::test::{self as helpers, setup};

/// Starts the services on two producer threads, after applying `update_config`.
pub fn setup_service(update_config: impl FnOnce(&mut Config)) -> SharedServices {
    setup();

    let mut config = Config::default();
    config.producers.workers = 2;
    config.producers.queue_poll = Duration::from_millis(10);
    update_config(&mut config);

    create_service(Arc::new(config)).unwrap()
}

/// Counts the repaints requested by paint passes.
#[derive(Clone, Debug, Default)]
pub struct Repaints(Arc<AtomicUsize>);

impl Repaints {
    pub fn invalidate(&self) -> Invalidate {
        let count = Arc::clone(&self.0);
        Arc::new(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
