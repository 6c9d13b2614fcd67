use std::collections::HashMap;

use super::AsyncRef;

/// The demand a holder declares for the result of a computation.
///
/// The value doubles as a scheduling priority: records are produced in the order of the
/// highest interest any of their holders declares. Paint passes set the
/// [`INTERESTED`](Self::INTERESTED) flag and add the number of visible pixels of a tile, so
/// larger tiles are produced first while even a fully clipped tile stays wanted.
///
/// An interest of zero withdraws the holder's demand.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Interest(u32);

impl Interest {
    /// No interest at all.
    pub const NONE: Interest = Interest(0);

    /// The flag marking a request as wanted, independent of its size.
    pub const INTERESTED: u32 = 0x8_0000;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The interest in a tile with `visible_area` pixels on screen.
    pub fn for_area(base: u32, visible_area: u64) -> Self {
        let area = u32::try_from(visible_area).unwrap_or(u32::MAX);
        Self(base.saturating_add(area))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Whether anyone is interested at all.
    pub fn is_interested(self) -> bool {
        self.0 != 0
    }
}

/// The interest a single paint pass declares on everything it touched.
///
/// Interests are collected first and only applied by [`activate`](Self::activate). Dropping
/// the list withdraws all of them. A viewer keeps the list of the previous pass alive until
/// the list of the current pass is activated, so records wanted by both passes never see
/// their interest drop to zero in between.
#[derive(Debug, Default)]
pub struct InterestList {
    entries: Vec<(AsyncRef, Interest)>,
    index: HashMap<usize, usize>,
    active: bool,
}

impl InterestList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `interest` in the record of `handle` to this list.
    ///
    /// Adding the same record twice keeps the larger interest. Once the list is active,
    /// interests are applied immediately.
    pub fn add(&mut self, handle: &AsyncRef, interest: Interest) {
        let position = match self.index.get(&handle.record_addr()) {
            Some(&position) => {
                let entry = &mut self.entries[position];
                entry.1 = entry.1.max(interest);
                position
            }
            None => {
                let position = self.entries.len();
                self.index.insert(handle.record_addr(), position);
                self.entries
                    .push((handle.duplicate("interest list"), interest));
                position
            }
        };

        if self.active {
            let (handle, interest) = &mut self.entries[position];
            handle.set_interest(*interest);
        }
    }

    /// Applies all collected interests.
    pub fn activate(&mut self) {
        for (handle, interest) in &mut self.entries {
            handle.set_interest(*interest);
        }
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The number of distinct records in this list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Keeps a fixed interest in a record for as long as it lives.
#[derive(Debug)]
pub struct PersistentInterest {
    handle: AsyncRef,
}

impl PersistentInterest {
    pub fn new(handle: &AsyncRef, interest: Interest) -> Self {
        let mut handle = handle.duplicate("persistent interest");
        handle.set_interest(interest);
        Self { handle }
    }

    /// Whether this guard keeps the record of `handle` alive.
    pub fn is_for(&self, handle: &AsyncRef) -> bool {
        self.handle.same_record(handle)
    }

    pub fn interest(&self) -> Interest {
        self.handle.interest()
    }
}
