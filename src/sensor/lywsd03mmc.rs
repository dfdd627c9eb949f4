//! Xiaomi LYWSD03MMC temperature / humidity sensor.
//!
//! Notification layout (5 bytes, little-endian):
//! ```text
//! Byte 0-1: Temperature, i16, tenths of a degree Celsius
//! Byte 2:   Relative humidity, u8, percent
//! Byte 3-4: Battery voltage, u16, millivolts
//! ```
//! Longer payloads are accepted; trailing bytes are ignored.

use super::GattProfile;
use crate::error::ProtocolError;

/// Size of the data notification in bytes.
pub const READING_SIZE: usize = 5;

/// Fixed attribute handles on the stock firmware.
pub const PROFILE: GattProfile = GattProfile {
    // Vendor configuration characteristic; F4 01 00 sets the
    // reporting parameters the device expects before streaming.
    config_handle: 0x0046,
    config_value: &[0xF4, 0x01, 0x00],
    value_handle: 0x0036,
    ccc_handle: 0x0038,
    // Indications.
    ccc_value: [0x02, 0x00],
};

/// One decoded measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorReading {
    /// Tenths of a degree Celsius.
    pub temperature: i16,
    /// Percent relative humidity.
    pub humidity: u8,
    /// Battery voltage in millivolts.
    pub voltage: u16,
}

impl SensorReading {
    /// Parse a raw notification payload.
    pub fn from_ble_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < READING_SIZE {
            return Err(ProtocolError::MalformedPayload { len: data.len() });
        }
        Ok(Self {
            temperature: i16::from_le_bytes([data[0], data[1]]),
            humidity: data[2],
            voltage: u16::from_le_bytes([data[3], data[4]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_payload() {
        let reading = SensorReading::from_ble_bytes(&[0xE6, 0x00, 0x2C, 0x50, 0x0C]).unwrap();
        assert_eq!(reading.temperature, 230); // 23.0 °C
        assert_eq!(reading.humidity, 44);
        assert_eq!(reading.voltage, 3152);
    }

    #[test]
    fn decodes_negative_temperature() {
        // -5.5 °C = -55 = 0xFFC9
        let reading = SensorReading::from_ble_bytes(&[0xC9, 0xFF, 0x50, 0xB8, 0x0B]).unwrap();
        assert_eq!(reading.temperature, -55);
        assert_eq!(reading.humidity, 80);
        assert_eq!(reading.voltage, 3000);
    }

    #[test]
    fn short_payload_fails_explicitly() {
        for len in 0..READING_SIZE {
            let data = [0u8; READING_SIZE];
            assert_eq!(
                SensorReading::from_ble_bytes(&data[..len]),
                Err(ProtocolError::MalformedPayload { len })
            );
        }
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let data = [0xE6, 0x00, 0x2C, 0x50, 0x0C, 0xFF, 0xFF];
        assert_eq!(SensorReading::from_ble_bytes(&data).unwrap().voltage, 3152);
    }
}
