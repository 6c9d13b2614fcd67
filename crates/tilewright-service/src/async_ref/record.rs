use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;

use super::{CallbackRegistration, EpochToken, Interest, Scheduler};
use crate::caching::{ComputationKey, FailureCode};
use crate::image::contract_violation;
use crate::present::Present;

pub(crate) type HandleId = u64;

/// The deferred work of a record, run at most once on a producer thread.
pub(crate) type Production =
    Box<dyn FnOnce(&ProductionContext) -> Result<Present, FailureCode> + Send>;

type Callback = Box<dyn FnOnce(&Present) + Send>;

struct PendingCallback {
    token: Option<EpochToken>,
    callback: Callback,
}

impl PendingCallback {
    fn is_stale(&self) -> bool {
        self.token.as_ref().is_some_and(|token| !token.is_current())
    }

    fn fire(self, key: &ComputationKey, present: &Present) {
        if let Some(token) = &self.token {
            if !token.is_current() {
                metric!(counter("async_ref.stale_callback") += 1);
                tracing::trace!(%key, epoch = token.epoch(), "dropped stale callback");
                return;
            }
        }

        let callback = self.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(present))).is_err() {
            tracing::error!(%key, "completion callback panicked");
        }
    }
}

/// Where a record stands in its way through the producer pool.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleState {
    /// Created, but nobody declared any interest yet.
    Idle,
    /// Waiting in the queue of a scheduler.
    Queued,
    /// Taken off the queue without running, because all interest was withdrawn.
    ///
    /// Declaring interest again queues the record anew.
    Deferred,
    /// Being produced right now.
    Running,
    /// Terminal.
    Done,
}

struct RecordState {
    interests: HashMap<HandleId, Interest>,
    handles: usize,
    callbacks: Vec<PendingCallback>,
    schedule: ScheduleState,
    production: Option<Production>,
}

impl RecordState {
    fn aggregate(&self) -> Interest {
        self.interests
            .values()
            .copied()
            .max()
            .unwrap_or(Interest::NONE)
    }
}

enum Start {
    Run(Production),
    Requeue(Interest),
    Skip,
}

/// The shared state behind all handles to one computation.
///
/// A record is minted by the cache for every new [`ComputationKey`], and presents
/// [`Present::Pending`] until it is resolved exactly once. All mutable state lives under a
/// lock scoped to the record. The terminal value itself is read without locking.
pub struct AsyncRecord {
    key: ComputationKey,
    present: OnceLock<Present>,
    state: Mutex<RecordState>,
    next_handle: AtomicU64,
    scheduler: Arc<dyn Scheduler>,
}

impl AsyncRecord {
    pub(crate) fn new(
        key: ComputationKey,
        production: Production,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            present: OnceLock::new(),
            state: Mutex::new(RecordState {
                interests: HashMap::new(),
                handles: 0,
                callbacks: Vec::new(),
                schedule: ScheduleState::Idle,
                production: Some(production),
            }),
            next_handle: AtomicU64::new(0),
            scheduler,
        })
    }

    /// Creates a record that is terminal from the start.
    pub(crate) fn resolved(
        key: ComputationKey,
        present: Present,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            present: OnceLock::from(present),
            state: Mutex::new(RecordState {
                interests: HashMap::new(),
                handles: 0,
                callbacks: Vec::new(),
                schedule: ScheduleState::Done,
                production: None,
            }),
            next_handle: AtomicU64::new(0),
            scheduler,
        })
    }

    pub fn key(&self) -> &ComputationKey {
        &self.key
    }

    /// The current state of the computation.
    ///
    /// A returned image is a new share of the buffer owned by the caller.
    pub fn present(&self) -> Present {
        self.present.get().cloned().unwrap_or(Present::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        self.present.get().is_some()
    }

    /// The maximum interest declared by any handle.
    pub fn aggregate_interest(&self) -> Interest {
        self.state.lock().aggregate()
    }

    pub fn schedule_state(&self) -> ScheduleState {
        self.state.lock().schedule
    }

    /// The number of live handles.
    pub fn handle_count(&self) -> usize {
        self.state.lock().handles
    }

    pub(crate) fn attach(&self) -> HandleId {
        self.state.lock().handles += 1;
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn detach(&self, id: HandleId) {
        let mut state = self.state.lock();
        state.interests.remove(&id);
        match state.handles.checked_sub(1) {
            Some(handles) => state.handles = handles,
            None => {
                drop(state);
                contract_violation("detached more handles than were attached");
            }
        }
    }

    /// Records the interest of one handle, and queues the record if it became wanted.
    pub(crate) fn set_interest(self: &Arc<Self>, id: HandleId, interest: Interest) {
        let schedule = {
            let mut state = self.state.lock();
            let before = state.aggregate();
            if interest.is_interested() {
                state.interests.insert(id, interest);
            } else {
                state.interests.remove(&id);
            }
            let after = state.aggregate();

            match state.schedule {
                ScheduleState::Idle | ScheduleState::Deferred
                    if after.is_interested() && state.production.is_some() =>
                {
                    state.schedule = ScheduleState::Queued;
                    Some(after)
                }
                // queue again with the raised priority, the outdated entry is skipped
                ScheduleState::Queued if after > before => Some(after),
                _ => None,
            }
        };

        if let Some(priority) = schedule {
            tracing::trace!(key = %self.key, priority = priority.raw(), "scheduling record");
            self.scheduler.schedule(Arc::clone(self), priority);
        }
    }

    /// Registers a callback for the transition to a terminal state.
    pub(crate) fn add_callback(
        &self,
        token: Option<EpochToken>,
        callback: Callback,
    ) -> CallbackRegistration {
        let mut state = self.state.lock();
        // `resolve` publishes the value under this lock, so no callback can be missed
        if let Some(present) = self.present.get() {
            return CallbackRegistration::Ready(present.clone());
        }

        // callbacks of past generations would never fire
        let before = state.callbacks.len();
        state.callbacks.retain(|callback| !callback.is_stale());
        let pruned = before - state.callbacks.len();
        if pruned > 0 {
            metric!(counter("async_ref.stale_callback") += pruned as i64);
        }

        state.callbacks.push(PendingCallback { token, callback });
        CallbackRegistration::Registered
    }

    /// The number of callbacks waiting for the record to resolve.
    pub fn pending_callbacks(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    /// Decides what to do with a queue entry of this record that was queued at `priority`.
    fn try_start(&self, priority: Interest) -> Start {
        let mut state = self.state.lock();
        if state.schedule != ScheduleState::Queued {
            // an outdated queue entry of a record that already started or was deferred
            return Start::Skip;
        }
        let current = state.aggregate();
        if !current.is_interested() {
            state.schedule = ScheduleState::Deferred;
            metric!(counter("producer.deferred") += 1, "kind" => self.key.kind());
            tracing::trace!(key = %self.key, "deferred record without interest");
            return Start::Skip;
        }
        if priority > current {
            metric!(counter("producer.demoted") += 1, "kind" => self.key.kind());
            return Start::Requeue(current);
        }
        state.schedule = ScheduleState::Running;
        match state.production.take() {
            Some(production) => Start::Run(production),
            None => Start::Skip,
        }
    }

    /// Runs the production of a record that was queued at `priority` on the current thread,
    /// and resolves it.
    ///
    /// Returns `false` if the record did not run. An entry that outranks the interest
    /// remaining in the record is queued again at that interest instead. Failures and panics
    /// of the production resolve the record to a [`Present::Failure`].
    pub fn run(self: &Arc<Self>, priority: Interest) -> bool {
        let production = match self.try_start(priority) {
            Start::Run(production) => production,
            Start::Requeue(current) => {
                tracing::trace!(
                    key = %self.key,
                    queued = priority.raw(),
                    priority = current.raw(),
                    "scheduling record with lowered priority"
                );
                self.scheduler.schedule(Arc::clone(self), current);
                return false;
            }
            Start::Skip => return false,
        };

        let context = ProductionContext {
            record: Arc::clone(self),
        };
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| production(&context)));
        metric!(timer("producer.duration") = start.elapsed(), "kind" => self.key.kind());

        let present = match result {
            Ok(Ok(present)) => present,
            Ok(Err(code)) => Present::Failure(code),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("unknown panic");
                metric!(counter("producer.panic") += 1, "kind" => self.key.kind());
                tracing::error!(key = %self.key, panic = message, "producer panicked");
                Present::Failure(FailureCode::InternalError)
            }
        };

        self.resolve(present);
        true
    }

    /// Publishes the terminal value and fires all registered callbacks.
    pub(crate) fn resolve(&self, present: Present) {
        let present = match present {
            Present::Pending => {
                contract_violation("resolved a record to `Pending`");
                Present::Failure(FailureCode::InternalError)
            }
            present => present,
        };

        let callbacks = {
            let mut state = self.state.lock();
            if let Err(present) = self.present.set(present) {
                drop(state);
                drop(present);
                contract_violation("resolved a record twice");
                return;
            }
            state.schedule = ScheduleState::Done;
            state.production = None;
            std::mem::take(&mut state.callbacks)
        };

        let Some(present) = self.present.get() else {
            return;
        };
        tracing::trace!(
            key = %self.key,
            present = present.name(),
            callbacks = callbacks.len(),
            "resolved record"
        );
        for callback in callbacks {
            callback.fire(&self.key, present);
        }
    }
}

impl fmt::Debug for AsyncRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AsyncRecord")
            .field("key", &self.key)
            .field("present", &self.present.get().map(Present::name))
            .field("schedule", &state.schedule)
            .field("handles", &state.handles)
            .field("interest", &state.aggregate())
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

/// Passed to a running production.
pub struct ProductionContext {
    record: Arc<AsyncRecord>,
}

impl ProductionContext {
    /// The key of the record being produced.
    pub fn key(&self) -> &ComputationKey {
        self.record.key()
    }

    /// The current aggregate interest in the result.
    pub fn interest(&self) -> Interest {
        self.record.aggregate_interest()
    }

    /// Whether anyone still wants the result.
    ///
    /// Productions use this to skip speculative follow-on work. Withdrawn interest never
    /// aborts a production that is already running.
    pub fn is_wanted(&self) -> bool {
        self.interest().is_interested()
    }
}
