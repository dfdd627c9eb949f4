//! Application-wide constants and compile-time configuration.
//!
//! All buffer sizes, radio timing parameters, and protocol constants
//! live here so they can be tuned in one place.

// Advertisement capture

/// Number of advertisement records that can be outstanding at once
/// (captured but not yet written to the host).
pub const CAPTURE_POOL_SLOTS: usize = 64;

/// Maximum advertisement payload kept per record.  Longer payloads are
/// truncated silently.
pub const ADV_PAYLOAD_CAPACITY: usize = 32;

/// Passive scan interval (0.625 ms units).
pub const SCAN_INTERVAL: u16 = 0x0010;

/// Passive scan window (0.625 ms units).
pub const SCAN_WINDOW: u16 = 0x0010;

// Serial transport

/// RX ring buffer size.  Must be a power of two.
pub const RX_RING_SIZE: usize = 1 << 10;

/// TX ring buffer size.  Must be a power of two.
pub const TX_RING_SIZE: usize = 1 << 10;

/// Bytes moved per interrupt batch and per RX drain.
pub const RX_CHUNK: usize = 64;

/// Upper bound of the RX counting signal.
pub const RX_SIGNAL_DEPTH: usize = 1000;

/// Host command line buffer.
pub const COMMAND_BUFFER_SIZE: usize = 128;

/// Separator between command and argument.
pub const COMMAND_DELIMITER: u8 = b',';

/// Command line terminator.
pub const LINE_TERMINATOR: u8 = b'\n';

// Directed connection

/// Scan interval/window used while initiating (0.625 ms units). 0x60 = 60 ms.
pub const CONNECT_SCAN_INTERVAL: u16 = 0x0060;
pub const CONNECT_SCAN_WINDOW: u16 = 0x0060;

/// Stack-side connection establishment timeout (10 ms units). 1000 = 10 s.
pub const CONNECT_TIMEOUT: u16 = 1000;

/// BLE connection interval range (in 1.25 ms units).
/// 0x18 = 30 ms, 0x28 = 50 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 0x0018;
pub const BLE_CONN_INTERVAL_MAX: u16 = 0x0028;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// Client-side watchdog: longest wait for any single wireless event while a
/// connection is outstanding (seconds).  Exceeds `CONNECT_TIMEOUT` so the
/// stack normally reports first.
pub const LINK_SUPERVISION_SECS: u64 = 15;

// USB

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0001;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "ble-serial-bridge";
pub const USB_PRODUCT: &str = "BLE Sensor Serial Bridge";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// CDC-ACM bulk endpoint packet size.
pub const USB_PACKET_SIZE: usize = 64;

// Diagnostics

/// How often drop counters are checked and logged when they advance (seconds).
pub const DIAGNOSTICS_INTERVAL_SECS: u64 = 10;
