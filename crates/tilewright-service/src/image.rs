//! Reference counted, lock guarded image buffers.
//!
//! A decoded tile is shared between the record that produced it and every paint pass that
//! displays it. Each owner holds its own [`ImageRef`]. The pixel buffer is released
//! deterministically when the last of them is disposed, no matter which thread that happens on.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Reports a violated usage contract.
///
/// This panics in debug builds. Release builds log the violation and count it in the
/// `async_ref.contract_violation` metric, and the offending operation becomes a no-op.
#[track_caller]
pub(crate) fn contract_violation(what: &str) {
    metric!(counter("async_ref.contract_violation") += 1);
    if cfg!(debug_assertions) {
        panic!("contract violation: {what}");
    }
    tracing::error!(what, "contract violation");
}

/// An explicit, shared reference count.
///
/// Every [`retain`](Self::retain) must be paired with exactly one [`release`](Self::release).
/// Releasing more often than retaining is a contract violation, and never lets the count
/// drop below zero.
#[derive(Debug)]
pub struct RefCount(AtomicUsize);

impl RefCount {
    /// Creates a count of one, owned by the creator.
    pub fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    /// Adds one reference.
    pub fn retain(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one reference, returning `true` if it was the last one.
    pub fn release(&self) -> bool {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
        match previous {
            Ok(previous) => previous == 1,
            Err(_) => {
                contract_violation("released a reference count that already dropped to zero");
                false
            }
        }
    }

    /// The current number of references.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded RGBA pixel buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Creates a transparent buffer of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 4;
        Self {
            width,
            height,
            data: vec![0; len],
        }
    }

    /// Creates a buffer filled with a single color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut buffer = Self::new(width, height);
        buffer.fill(rgba);
        buffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The raw RGBA bytes, row by row.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The size of the pixel data in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| (y as usize * self.width as usize + x as usize) * 4)
    }

    /// Reads the pixel at `(x, y)`, or `None` if it is out of range.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let offset = self.offset(x, y)?;
        let mut rgba = [0; 4];
        rgba.copy_from_slice(&self.data[offset..offset + 4]);
        Some(rgba)
    }

    /// Writes the pixel at `(x, y)`. Out of range coordinates are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if let Some(offset) = self.offset(x, y) {
            self.data[offset..offset + 4].copy_from_slice(&rgba);
        }
    }

    /// Sets every pixel to `rgba`.
    pub fn fill(&mut self, rgba: [u8; 4]) {
        for pixel in self.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
    }
}

struct ImageCell {
    count: RefCount,
    released: AtomicBool,
    buffer: Mutex<PixelBuffer>,
}

impl ImageCell {
    fn release(&self, tag: &'static str) {
        if self.count.release() {
            // the buffer is released here, not whenever the last `Arc` happens to go away
            let buffer = std::mem::take(&mut *self.buffer.lock());
            self.released.store(true, Ordering::Release);
            tracing::trace!(tag, bytes = buffer.byte_len(), "released image buffer");
        }
    }
}

/// A counted handle to a shared, published image buffer.
///
/// Handles are created with [`ImageRef::new`] and [`duplicate`](Self::duplicate), and released
/// with [`dispose`](Self::dispose) or by dropping them. Since `dispose` consumes the handle, a
/// handle can never be disposed twice. Pixels are only accessible under the buffer's guard
/// through [`with_lock`](Self::with_lock). Published buffers are read-only.
pub struct ImageRef {
    cell: Arc<ImageCell>,
    tag: &'static str,
}

impl ImageRef {
    /// Publishes `buffer`, returning the first handle to it.
    pub fn new(buffer: PixelBuffer, tag: &'static str) -> Self {
        Self {
            cell: Arc::new(ImageCell {
                count: RefCount::new(),
                released: AtomicBool::new(false),
                buffer: Mutex::new(buffer),
            }),
            tag,
        }
    }

    /// Returns a new, independent handle to the same buffer.
    ///
    /// The `tag` is only used for diagnostics.
    pub fn duplicate(&self, tag: &'static str) -> Self {
        self.cell.count.retain();
        Self {
            cell: Arc::clone(&self.cell),
            tag,
        }
    }

    /// Releases this handle. The buffer is released with the last handle.
    pub fn dispose(self) {
        drop(self)
    }

    /// Runs `f` while holding the buffer's guard.
    ///
    /// The guard is released when `f` returns or unwinds.
    pub fn with_lock<R>(&self, f: impl FnOnce(&PixelBuffer) -> R) -> R {
        let buffer = self.cell.buffer.lock();
        f(&buffer)
    }

    /// The number of live handles to this buffer.
    pub fn count(&self) -> usize {
        self.cell.count.get()
    }

    /// The diagnostic tag of this handle.
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// Whether two handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &ImageRef) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Observes this buffer without holding a reference to it.
    pub fn watch(&self) -> ImageWatch {
        ImageWatch {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl Clone for ImageRef {
    fn clone(&self) -> Self {
        self.duplicate(self.tag)
    }
}

impl Drop for ImageRef {
    fn drop(&mut self) {
        self.cell.release(self.tag);
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("tag", &self.tag)
            .field("count", &self.count())
            .finish()
    }
}

/// Observes the lifetime of an image buffer without keeping it alive.
#[derive(Clone)]
pub struct ImageWatch {
    cell: Arc<ImageCell>,
}

impl ImageWatch {
    /// The number of live handles to the buffer.
    pub fn count(&self) -> usize {
        self.cell.count.get()
    }

    /// Whether the last handle has been disposed and the buffer released.
    pub fn is_released(&self) -> bool {
        self.cell.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ImageWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageWatch")
            .field("count", &self.count())
            .field("released", &self.is_released())
            .finish()
    }
}
