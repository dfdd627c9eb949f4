//! Sensor device kinds and their notification decoders.

pub mod lywsd03mmc;

use core::fmt::Write;

use heapless::String;

use crate::ble::PeerAddress;
use crate::error::ProtocolError;
pub use lywsd03mmc::SensorReading;

/// Formatted `address,label,temperature,humidity,voltage\n` line.
pub type ReadingLine = String<64>;

/// Fixed attribute handles used to pull one reading from a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GattProfile {
    /// Attribute written right after connecting.
    pub config_handle: u16,
    pub config_value: &'static [u8],
    /// Characteristic that carries the reading.
    pub value_handle: u16,
    /// Its Client Characteristic Configuration descriptor.
    pub ccc_handle: u16,
    pub ccc_value: [u8; 2],
}

/// Devices the bridge knows how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceKind {
    Lywsd03mmc,
}

impl DeviceKind {
    /// Look up the host command token (`LYWSD03MMC`).
    pub fn from_token(token: &str) -> Result<Self, ProtocolError> {
        match token {
            "LYWSD03MMC" => Ok(DeviceKind::Lywsd03mmc),
            _ => Err(ProtocolError::UnknownDevice),
        }
    }

    /// Label used on telemetry lines.
    pub fn label(&self) -> &'static str {
        match self {
            DeviceKind::Lywsd03mmc => "lywsd03mmc",
        }
    }

    pub fn profile(&self) -> &'static GattProfile {
        match self {
            DeviceKind::Lywsd03mmc => &lywsd03mmc::PROFILE,
        }
    }

    /// Decode one notification from this kind of device.
    pub fn decode(&self, data: &[u8]) -> Result<SensorReading, ProtocolError> {
        match self {
            DeviceKind::Lywsd03mmc => SensorReading::from_ble_bytes(data),
        }
    }
}

/// Render a reading as one telemetry line.
pub fn format_reading(peer: &PeerAddress, kind: DeviceKind, reading: &SensorReading) -> ReadingLine {
    let mut line = ReadingLine::new();
    // 17 + label + "-32768,255,65535" + separators fits in 64 bytes.
    let _ = write!(
        line,
        "{},{},{},{},{}\n",
        peer,
        kind.label(),
        reading.temperature,
        reading.humidity,
        reading.voltage
    );
    line
}
