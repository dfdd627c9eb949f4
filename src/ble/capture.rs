//! Fixed-capacity advertisement slab with a FIFO of filled slots.
//!
//! `allocate` + `enqueue` run inside the scan callback and never block;
//! `dequeue` + `release` belong to the single consumer task.  A [`Slot`]
//! is a move-only token, so a slot is either free, being filled, queued,
//! or being consumed - never two of these at once.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::ble::AdvertisementRecord;
use crate::config::CAPTURE_POOL_SLOTS;

/// Ownership token for one pool entry.
#[derive(Debug, PartialEq, Eq)]
pub struct Slot {
    index: usize,
}

struct Slab<const N: usize> {
    records: [AdvertisementRecord; N],
    in_use: [bool; N],
    used: usize,
}

impl<const N: usize> Slab<N> {
    const fn new() -> Self {
        Self {
            records: [AdvertisementRecord::EMPTY; N],
            in_use: [false; N],
            used: 0,
        }
    }
}

/// Capture pool with the firmware's slot count.
pub type AdvertisementPool<M> = CapturePool<M, CAPTURE_POOL_SLOTS>;

pub struct CapturePool<M: RawMutex, const N: usize> {
    slab: Mutex<M, RefCell<Slab<N>>>,
    queue: Channel<M, Slot, N>,
    exhausted: AtomicU32,
}

impl<M: RawMutex, const N: usize> CapturePool<M, N> {
    pub const fn new() -> Self {
        Self {
            slab: Mutex::new(RefCell::new(Slab::new())),
            queue: Channel::new(),
            exhausted: AtomicU32::new(0),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claim a free slot.  Returns `None` (and counts it) when all `N`
    /// slots are outstanding.
    pub fn allocate(&self) -> Option<Slot> {
        let slot = self.slab.lock(|slab| {
            let mut slab = slab.borrow_mut();
            let index = slab.in_use.iter().position(|used| !used)?;
            slab.in_use[index] = true;
            slab.used += 1;
            Some(Slot { index })
        });
        if slot.is_none() {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
        }
        slot
    }

    /// Store `record` in an allocated slot.
    pub fn fill(&self, slot: &Slot, record: AdvertisementRecord) {
        self.slab
            .lock(|slab| slab.borrow_mut().records[slot.index] = record);
    }

    /// Hand a filled slot to the consumer.  Never blocks.
    pub fn enqueue(&self, slot: Slot) {
        // The queue holds N entries and only N slots exist, so it cannot
        // be full; give the slot back rather than leak it if it ever is.
        if let Err(TrySendError::Full(slot)) = self.queue.try_send(slot) {
            self.release(slot);
        }
    }

    /// Wait for the oldest filled slot.
    pub async fn dequeue(&self) -> Slot {
        self.queue.receive().await
    }

    /// Take the oldest filled slot if there is one.
    pub fn try_dequeue(&self) -> Option<Slot> {
        self.queue.try_receive().ok()
    }

    /// Copy of the record held in `slot`.
    pub fn read(&self, slot: &Slot) -> AdvertisementRecord {
        self.slab.lock(|slab| slab.borrow().records[slot.index].clone())
    }

    /// Return `slot` to the free list.
    pub fn release(&self, slot: Slot) {
        self.slab.lock(|slab| {
            let mut slab = slab.borrow_mut();
            if slab.in_use[slot.index] {
                slab.in_use[slot.index] = false;
                slab.used -= 1;
            }
        });
    }

    /// Slots currently allocated (filling, queued, or being consumed).
    pub fn in_use(&self) -> usize {
        self.slab.lock(|slab| slab.borrow().used)
    }

    /// Allocation attempts refused because the pool was full.
    pub fn exhausted_count(&self) -> u32 {
        self.exhausted.load(Ordering::Relaxed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
