//! Advertisement relay: scan callback → capture pool → host serial line.
//!
//! Line format:
//! ```text
//! address,address_kind,rssi,adv_kind,payload_len,payload_hex\n
//! A4:C1:38:5E:DE:26,0,-67,0,3,020106
//! ```

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::String;

use crate::ble::capture::CapturePool;
use crate::ble::{AdvertisementKind, AdvertisementRecord, PeerAddress};
use crate::error::Error;
use crate::serial::LineSink;

/// One formatted advertisement line (worst case is under 100 bytes).
pub type AdvertisementLine = String<128>;

/// Producer half, called from the scan callback for every report.
///
/// Newest data loses under pressure: when the pool is exhausted the report
/// is dropped and `ResourceExhausted` returned for the caller to count.
pub fn capture<M: RawMutex, const N: usize>(
    pool: &CapturePool<M, N>,
    address: PeerAddress,
    rssi: i8,
    kind: AdvertisementKind,
    data: &[u8],
) -> Result<(), Error> {
    let slot = pool.allocate().ok_or(Error::ResourceExhausted)?;
    pool.fill(&slot, AdvertisementRecord::new(address, rssi, kind, data));
    pool.enqueue(slot);
    Ok(())
}

/// Render one record as a telemetry line.
pub fn format_record(record: &AdvertisementRecord) -> AdvertisementLine {
    let mut line = AdvertisementLine::new();
    let _ = write!(
        line,
        "{},{},{},{},{},",
        record.address,
        record.address.kind().line_code(),
        record.rssi,
        record.kind.code(),
        record.payload.len()
    );
    for byte in &record.payload {
        let _ = write!(line, "{:02x}", byte);
    }
    let _ = line.push('\n');
    line
}

/// Consumer half: wait for the next captured advertisement, send it to the
/// host and give its slot back.
///
/// The slot stays held until the line has been handed over, and is
/// released even when the line could not be queued in full.
pub async fn forward_next<M: RawMutex, const N: usize>(
    pool: &CapturePool<M, N>,
    sink: &impl LineSink,
) -> Result<(), Error> {
    let slot = pool.dequeue().await;
    let line = format_record(&pool.read(&slot));
    let sent = sink.send_line(&line);
    pool.release(slot);
    sent
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
