//! BLE ⇄ USB serial bridge for nRF52840.
//!
//! The firmware does two things over one USB CDC-ACM port:
//!
//! - relays every BLE advertisement it hears as a CSV line, and
//! - on a `LYWSD03MMC,<address>` command, connects to that sensor, pulls
//!   one temperature/humidity/battery reading, and reports it.
//!
//! Everything outside `usb`, `ble::radio` and `ble::scanner` is plain
//! `no_std` logic that builds and tests on the host:
//!
//! Usage: `cargo test --lib` / `cargo test --test integration`
//!
//! The firmware binary (`src/main.rs`) needs `--features embedded`.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod config;
pub mod error;
pub mod sensor;
pub mod serial;
#[cfg(feature = "embedded")]
pub mod usb;

pub use error::Error;

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════
