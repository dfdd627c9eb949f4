//! BLE GAP passive scanner - feeds every advertisement report into the
//! capture pool.
//!
//! Runs until the surrounding future is dropped (scan stopped) or the
//! SoftDevice refuses to scan.

use defmt::info;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use nrf_softdevice::ble::central;
use nrf_softdevice::{raw, Softdevice};

use crate::ble::advertisements;
use crate::ble::capture::AdvertisementPool;
use crate::ble::{AddressKind, AdvertisementKind, PeerAddress};
use crate::config::{SCAN_INTERVAL, SCAN_WINDOW};

/// Scan continuously, capturing each report.
///
/// Only returns on a stack error.
pub async fn scan(
    sd: &Softdevice,
    pool: &AdvertisementPool<CriticalSectionRawMutex>,
) -> Result<(), central::ScanError> {
    info!("passive scan starting");

    let config = central::ScanConfig {
        active: false,
        interval: SCAN_INTERVAL as u32,
        window: SCAN_WINDOW as u32,
        ..Default::default()
    };

    central::scan(sd, &config, |params| {
        let data =
            unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };

        let address = PeerAddress::from_le_bytes(
            params.peer_addr.addr,
            AddressKind::from_raw(params.peer_addr.addr_type() as u8),
        );

        // Pool exhaustion is counted by the pool; nothing else to do here.
        let _ = advertisements::capture(pool, address, params.rssi, report_kind(&params.type_), data);

        None::<()>
    })
    .await
}

fn report_kind(report: &raw::ble_gap_adv_report_type_t) -> AdvertisementKind {
    AdvertisementKind::from_flags(
        report.connectable() != 0,
        report.scannable() != 0,
        report.directed() != 0,
        report.scan_response() != 0,
    )
}
