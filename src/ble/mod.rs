//! Bluetooth Low Energy subsystem.
//!
//! The radio (Nordic SoftDevice S140, **Central** role) is used two ways:
//!
//! 1. **Passive scanner** - every advertisement is captured into the
//!    [`capture::CapturePool`] from the scan callback and relayed to the
//!    host by the [`advertisements`] consumer.
//! 2. **Directed reader** - on a host command the
//!    [`connection::ConnectionManager`] stops scanning, connects to one
//!    sensor, configures it, subscribes, decodes one notification and
//!    disconnects again.
//!
//! The wireless stack is reached only through the [`Radio`] trait; stack
//! callbacks come back as [`LinkEvent`]s over a channel, so the state
//! machine itself needs no locking.

pub mod advertisements;
pub mod capture;
pub mod command;
pub mod connection;
#[cfg(feature = "embedded")]
pub mod radio;
#[cfg(feature = "embedded")]
pub mod scanner;

use core::fmt;

use heapless::Vec;

use crate::config::{
    ADV_PAYLOAD_CAPACITY, BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN, BLE_SLAVE_LATENCY,
    BLE_SUP_TIMEOUT, CONNECT_SCAN_INTERVAL, CONNECT_SCAN_WINDOW, CONNECT_TIMEOUT,
};
use crate::error::{Error, ProtocolError};
use crate::sensor::GattProfile;

/// Largest notification value carried in a [`LinkEvent`] (default ATT MTU - 3).
pub const NOTIFICATION_CAPACITY: usize = 20;

/// BLE address type, numbered as the SoftDevice reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AddressKind {
    Public = 0x00,
    RandomStatic = 0x01,
    RandomPrivateResolvable = 0x02,
    RandomPrivateNonResolvable = 0x03,
    Anonymous = 0x7F,
}

impl AddressKind {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x00 => AddressKind::Public,
            0x01 => AddressKind::RandomStatic,
            0x02 => AddressKind::RandomPrivateResolvable,
            0x03 => AddressKind::RandomPrivateNonResolvable,
            _ => AddressKind::Anonymous,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Code printed on advertisement lines: `0` public, `1` any random
    /// address.
    pub fn line_code(self) -> u8 {
        match self {
            AddressKind::Public => 0,
            _ => 1,
        }
    }
}

/// 48-bit device address plus its type.
///
/// Bytes are stored least-significant first (air order); `Display`
/// prints them most-significant first, upper-case, colon separated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    bytes: [u8; 6],
    kind: AddressKind,
}

impl PeerAddress {
    pub const fn from_le_bytes(bytes: [u8; 6], kind: AddressKind) -> Self {
        Self { bytes, kind }
    }

    pub fn from_msb_first(mut bytes: [u8; 6], kind: AddressKind) -> Self {
        bytes.reverse();
        Self { bytes, kind }
    }

    /// Parse a host-supplied `XX:XX:XX:XX:XX:XX` address (public).
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut msb_first = [0u8; 6];
        let mut parts = text.split(':');
        for byte in msb_first.iter_mut() {
            let part = parts.next().ok_or(ProtocolError::InvalidAddress)?;
            if part.len() != 2 || !part.bytes().all(|c| c.is_ascii_hexdigit()) {
                return Err(ProtocolError::InvalidAddress);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| ProtocolError::InvalidAddress)?;
        }
        if parts.next().is_some() {
            return Err(ProtocolError::InvalidAddress);
        }
        Ok(Self::from_msb_first(msb_first, AddressKind::Public))
    }

    /// Address bytes, least-significant first.
    pub fn le_bytes(&self) -> [u8; 6] {
        self.bytes
    }

    pub fn kind(&self) -> AddressKind {
        self.kind
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Advertising PDU type, numbered as on the telemetry line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AdvertisementKind {
    ConnectableUndirected = 0,
    ConnectableDirected = 1,
    ScannableUndirected = 2,
    NonConnectableUndirected = 3,
    ScanResponse = 4,
}

impl AdvertisementKind {
    /// Classify from the report-type flags the controller sets.
    pub fn from_flags(connectable: bool, scannable: bool, directed: bool, scan_response: bool) -> Self {
        if scan_response {
            AdvertisementKind::ScanResponse
        } else if directed {
            AdvertisementKind::ConnectableDirected
        } else if connectable {
            AdvertisementKind::ConnectableUndirected
        } else if scannable {
            AdvertisementKind::ScannableUndirected
        } else {
            AdvertisementKind::NonConnectableUndirected
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// One captured advertisement.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvertisementRecord {
    pub address: PeerAddress,
    /// Received Signal Strength Indicator (dBm).
    pub rssi: i8,
    pub kind: AdvertisementKind,
    /// Advertising data, truncated to [`ADV_PAYLOAD_CAPACITY`].
    pub payload: Vec<u8, ADV_PAYLOAD_CAPACITY>,
}

impl AdvertisementRecord {
    pub const EMPTY: Self = Self {
        address: PeerAddress::from_le_bytes([0; 6], AddressKind::Public),
        rssi: 0,
        kind: AdvertisementKind::NonConnectableUndirected,
        payload: Vec::new(),
    };

    /// Build a record, keeping at most [`ADV_PAYLOAD_CAPACITY`] bytes of `data`.
    pub fn new(address: PeerAddress, rssi: i8, kind: AdvertisementKind, data: &[u8]) -> Self {
        let mut payload = Vec::new();
        let keep = data.len().min(ADV_PAYLOAD_CAPACITY);
        // Cannot fail: `keep` is bounded by the capacity.
        let _ = payload.extend_from_slice(&data[..keep]);
        Self {
            address,
            rssi,
            kind,
            payload,
        }
    }
}

/// Opaque reference to the one outstanding connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u8);

/// Timing for a directed connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectParams {
    /// Initiator scan interval / window (0.625 ms units).
    pub scan_interval: u16,
    pub scan_window: u16,
    /// Give up establishing after this long (10 ms units).
    pub timeout: u16,
    /// Connection interval range (1.25 ms units).
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    /// Link supervision timeout (10 ms units).
    pub supervision_timeout: u16,
}

impl ConnectParams {
    pub const DIRECTED: Self = Self {
        scan_interval: CONNECT_SCAN_INTERVAL,
        scan_window: CONNECT_SCAN_WINDOW,
        timeout: CONNECT_TIMEOUT,
        interval_min: BLE_CONN_INTERVAL_MIN,
        interval_max: BLE_CONN_INTERVAL_MAX,
        latency: BLE_SLAVE_LATENCY,
        supervision_timeout: BLE_SUP_TIMEOUT,
    };
}

/// Requests the core makes of the wireless stack.
///
/// Every method only *starts* an operation and must not block; completion
/// arrives later as a [`LinkEvent`].  An `Err` means the request was not
/// accepted at all.
pub trait Radio {
    fn start_scan(&mut self) -> Result<(), Error>;
    fn stop_scan(&mut self);
    fn connect(&mut self, peer: &PeerAddress, params: &ConnectParams) -> Result<ConnHandle, Error>;
    fn write(&mut self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), Error>;
    fn subscribe(&mut self, conn: ConnHandle, profile: &GattProfile) -> Result<(), Error>;
    fn unsubscribe(&mut self, conn: ConnHandle, profile: &GattProfile) -> Result<(), Error>;
    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), Error>;
    /// Drop the stack's reference to a finished connection.
    fn release(&mut self, conn: ConnHandle);
}

/// Notification value as delivered by the stack.
pub type Notification = Vec<u8, NOTIFICATION_CAPACITY>;

/// Stack callbacks, delivered in order to the connection task.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// Connection attempt finished; `status == 0` means established.
    Connected { conn: ConnHandle, status: u8 },
    /// Configuration write completed.
    WriteComplete { conn: ConnHandle, status: u8 },
    /// CCC descriptor write completed.
    Subscribed { conn: ConnHandle, status: u8 },
    /// Value pushed by the peer on the subscribed characteristic.
    Notification { conn: ConnHandle, payload: Notification },
    /// Subscription removed (notification callback without payload).
    Unsubscribed { conn: ConnHandle },
    Disconnected { conn: ConnHandle, reason: u8 },
    /// No stack event within the supervision window.
    Timeout,
}

impl LinkEvent {
    /// Connection the event belongs to (`None` for the local timeout).
    pub fn conn(&self) -> Option<ConnHandle> {
        match self {
            LinkEvent::Connected { conn, .. }
            | LinkEvent::WriteComplete { conn, .. }
            | LinkEvent::Subscribed { conn, .. }
            | LinkEvent::Notification { conn, .. }
            | LinkEvent::Unsubscribed { conn }
            | LinkEvent::Disconnected { conn, .. } => Some(*conn),
            LinkEvent::Timeout => None,
        }
    }
}
