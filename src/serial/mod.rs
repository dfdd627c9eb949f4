//! Host serial link - two ring buffers between the USB byte pump and the
//! application tasks.
//!
//! - **RX**: the pump (interrupt side) pushes each received batch into the
//!   RX ring and gives one count on `rx_ready`.  The RX consumer takes a
//!   count, drains at most one batch worth of bytes, and feeds the
//!   [`framer::CommandFramer`].
//! - **TX**: producers append whole lines under the TX lock and kick the
//!   pump.  The pump drains the ring until it is empty, then parks on the
//!   kick signal again.
//!
//! Overflow on either side drops bytes and bumps a counter; it is never
//! fatal.

pub mod framer;
pub mod ring;

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::config::{RX_RING_SIZE, RX_SIGNAL_DEPTH, TX_RING_SIZE};
use crate::error::Error;
use ring::RingBuffer;

/// Anything that can deliver one telemetry line to the host.
pub trait LineSink {
    /// Queue `line` (already newline-terminated) for transmission.
    fn send_line(&self, line: &str) -> Result<(), Error>;
}

/// Serial transport with the firmware's ring sizes.
pub type HostSerial<M> = SerialTransport<M, RX_RING_SIZE, TX_RING_SIZE>;

pub struct SerialTransport<M: RawMutex, const RX: usize, const TX: usize> {
    rx: Mutex<M, RefCell<RingBuffer<RX>>>,
    /// Counting signal: one unit per RX batch.
    rx_ready: Channel<M, (), RX_SIGNAL_DEPTH>,
    tx: Mutex<M, RefCell<RingBuffer<TX>>>,
    /// Re-enables the TX pump ("TX interrupt enable").
    tx_kick: Signal<M, ()>,
    rx_dropped: AtomicU32,
    tx_dropped: AtomicU32,
}

impl<M: RawMutex, const RX: usize, const TX: usize> SerialTransport<M, RX, TX> {
    pub const fn new() -> Self {
        Self {
            rx: Mutex::new(RefCell::new(RingBuffer::new())),
            rx_ready: Channel::new(),
            tx: Mutex::new(RefCell::new(RingBuffer::new())),
            tx_kick: Signal::new(),
            rx_dropped: AtomicU32::new(0),
            tx_dropped: AtomicU32::new(0),
        }
    }

    // RX

    /// Interrupt side: store one received batch and wake the RX consumer.
    /// Never blocks.
    pub fn on_rx(&self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.is_empty() {
            return Ok(());
        }
        let stored = self.rx.lock(|rx| rx.borrow_mut().put(bytes));
        // Saturated counter: the consumer drains whatever is there anyway.
        let _ = self.rx_ready.try_send(());

        let dropped = bytes.len() - stored;
        if dropped > 0 {
            self.rx_dropped.fetch_add(dropped as u32, Ordering::Relaxed);
            return Err(Error::TransportOverflow { dropped });
        }
        Ok(())
    }

    /// Consumer side: wait for one batch signal, then drain up to
    /// `out.len()` bytes.  May return 0 if an earlier drain already took
    /// the bytes this signal announced.
    pub async fn receive(&self, out: &mut [u8]) -> usize {
        self.rx_ready.receive().await;
        self.rx.lock(|rx| rx.borrow_mut().get(out))
    }

    // TX

    /// Append `bytes` atomically with respect to other producers and kick
    /// the pump.  Whatever does not fit is dropped and counted.
    pub fn write(&self, bytes: &[u8]) -> Result<(), Error> {
        let stored = self.tx.lock(|tx| tx.borrow_mut().put(bytes));
        self.tx_kick.signal(());

        let dropped = bytes.len() - stored;
        if dropped > 0 {
            self.note_tx_dropped(dropped);
            return Err(Error::TransportOverflow { dropped });
        }
        Ok(())
    }

    /// Pump side: park until a producer has queued something.
    pub async fn wait_tx(&self) {
        self.tx_kick.wait().await
    }

    /// Pump side: remove up to `out.len()` bytes for transmission.
    /// Returns 0 once the ring is empty.
    pub fn take_tx(&self, out: &mut [u8]) -> usize {
        self.tx.lock(|tx| tx.borrow_mut().get(out))
    }

    /// Bytes the hardware failed to accept after they left the ring.
    pub fn note_tx_dropped(&self, n: usize) {
        self.tx_dropped.fetch_add(n as u32, Ordering::Relaxed);
    }

    /// Discard anything queued for the host (e.g. host went away).
    pub fn flush_tx(&self) {
        self.tx.lock(|tx| tx.borrow_mut().clear());
    }

    pub fn tx_pending(&self) -> usize {
        self.tx.lock(|tx| tx.borrow().len())
    }

    pub fn rx_dropped(&self) -> u32 {
        self.rx_dropped.load(Ordering::Relaxed)
    }

    pub fn tx_dropped(&self) -> u32 {
        self.tx_dropped.load(Ordering::Relaxed)
    }
}

impl<M: RawMutex, const RX: usize, const TX: usize> LineSink for SerialTransport<M, RX, TX> {
    fn send_line(&self, line: &str) -> Result<(), Error> {
        self.write(line.as_bytes())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
