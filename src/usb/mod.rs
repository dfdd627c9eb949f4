//! USB Device subsystem - presents a CDC-ACM serial port to the host.
//!
//! The nRF52840's built-in USB 2.0 Full-Speed controller is driven by
//! `embassy-usb`.  The port carries the line protocol in both directions:
//!
//! - host → device: `LYWSD03MMC,AA:BB:CC:DD:EE:FF\n` commands
//! - device → host: advertisement and sensor reading lines
//!
//! Two pump tasks move bytes between the bulk endpoints and the
//! [`crate::serial::SerialTransport`] rings, standing in for a UART
//! interrupt handler.

pub mod cdc;
