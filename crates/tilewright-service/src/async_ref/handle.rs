use std::fmt;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};

use super::record::HandleId;
use super::{AsyncRecord, EpochToken, Interest};
use crate::caching::{ComputationKey, FailureCode};
use crate::present::Present;

/// The outcome of registering a completion callback.
#[derive(Debug)]
#[must_use]
pub enum CallbackRegistration {
    /// The record is still pending. The callback runs once it turns terminal.
    Registered,
    /// The record was already terminal. The callback was dropped without running, and the
    /// terminal value is returned instead.
    Ready(Present),
}

/// A handle to a possibly not yet computed result.
///
/// Handles are obtained from the cache, and all handles to the same [`ComputationKey`]
/// share one [`AsyncRecord`] for as long as the cache is not flushed. Each handle declares its
/// own [`Interest`]. The record is scheduled according to the maximum over all its handles.
///
/// Dropping or [disposing](Self::dispose) a handle withdraws its interest. The record, and
/// any result it holds, stays valid for all other handles.
pub struct AsyncRef {
    record: Arc<AsyncRecord>,
    id: HandleId,
    interest: Interest,
    tag: &'static str,
}

impl AsyncRef {
    pub(crate) fn new(record: Arc<AsyncRecord>, tag: &'static str) -> Self {
        let id = record.attach();
        Self {
            record,
            id,
            interest: Interest::NONE,
            tag,
        }
    }

    pub fn key(&self) -> &ComputationKey {
        self.record.key()
    }

    /// The diagnostic tag of this handle.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// The current state of the computation.
    ///
    /// This never blocks. A returned [`Present::Image`] is a new share of the image, which the
    /// caller releases by dropping it.
    pub fn present(&self) -> Present {
        self.record.present()
    }

    pub fn is_terminal(&self) -> bool {
        self.record.is_terminal()
    }

    /// Declares the interest of this handle.
    ///
    /// [`Interest::NONE`] withdraws this handle's demand. It does not abort a production that
    /// is already running, and never changes a terminal result.
    pub fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
        self.record.set_interest(self.id, interest);
    }

    /// The interest declared by this handle.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// The maximum interest declared by any handle to the same record.
    pub fn aggregate_interest(&self) -> Interest {
        self.record.aggregate_interest()
    }

    /// Registers `callback` to run once when the record turns terminal.
    ///
    /// If the record is terminal already, the callback is dropped and the terminal value is
    /// returned as [`CallbackRegistration::Ready`]. Callbacks run on the thread that resolves
    /// the record.
    pub fn add_callback<F>(&self, callback: F) -> CallbackRegistration
    where
        F: FnOnce(&Present) + Send + 'static,
    {
        self.record.add_callback(None, Box::new(callback))
    }

    /// Like [`add_callback`](Self::add_callback), but the callback is silently skipped if the
    /// generation of `token` is no longer current when the record turns terminal.
    pub fn add_scoped_callback<F>(&self, token: &EpochToken, callback: F) -> CallbackRegistration
    where
        F: FnOnce(&Present) + Send + 'static,
    {
        self.record.add_callback(Some(token.clone()), Box::new(callback))
    }

    /// Returns a new handle to the same record, without any interest.
    ///
    /// The `tag` is only used for diagnostics.
    pub fn duplicate(&self, tag: &'static str) -> AsyncRef {
        AsyncRef::new(Arc::clone(&self.record), tag)
    }

    /// Releases this handle.
    pub fn dispose(self) {
        drop(self)
    }

    /// The number of live handles to the same record.
    pub fn handle_count(&self) -> usize {
        self.record.handle_count()
    }

    /// Whether both handles refer to the same record.
    pub fn same_record(&self, other: &AsyncRef) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    pub fn record(&self) -> &Arc<AsyncRecord> {
        &self.record
    }

    pub(crate) fn record_addr(&self) -> usize {
        Arc::as_ptr(&self.record) as usize
    }

    /// A future resolving to the terminal value.
    ///
    /// This does not declare any interest, so the record is only produced if some handle
    /// wants it. The painting thread never awaits this.
    pub fn completion(&self) -> BoxFuture<'static, Present> {
        let (sender, receiver) = oneshot::channel();
        let registration = self.add_callback(move |present| {
            sender.send(present.clone()).ok();
        });
        match registration {
            CallbackRegistration::Ready(present) => future::ready(present).boxed(),
            CallbackRegistration::Registered => receiver
                .map(|result| result.unwrap_or(Present::Failure(FailureCode::InternalError)))
                .boxed(),
        }
    }
}

impl Drop for AsyncRef {
    fn drop(&mut self) {
        self.record.detach(self.id);
    }
}

impl fmt::Debug for AsyncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRef")
            .field("key", self.key())
            .field("tag", &self.tag)
            .field("interest", &self.interest)
            .finish()
    }
}
