//! USB CDC-ACM device and the RX/TX byte pumps.
//!
//! VBUS is tracked in software: with the SoftDevice enabled the POWER
//! peripheral belongs to it, so USB power events arrive as SoC events and
//! are forwarded with [`on_soc_event`].

use defmt::{info, warn};
use embassy_nrf::usb::vbus_detect::SoftwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{self, bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use nrf_softdevice::{raw, SocEvent};
use static_cell::StaticCell;

use crate::config::{self, RX_CHUNK, USB_PACKET_SIZE};
use crate::serial::HostSerial;

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
});

pub type UsbDriver = Driver<'static, peripherals::USBD, &'static SoftwareVbusDetect>;

static VBUS: StaticCell<SoftwareVbusDetect> = StaticCell::new();
static CDC_STATE: StaticCell<State> = StaticCell::new();
static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 64]> = StaticCell::new();

/// Build result: the device runner plus both halves of the serial class.
pub struct UsbSerial {
    pub device: UsbDevice<'static, UsbDriver>,
    pub sender: Sender<'static, UsbDriver>,
    pub receiver: Receiver<'static, UsbDriver>,
}

/// Create the software VBUS detector and ask the SoftDevice for USB power
/// events.  Call after the SoftDevice is enabled, before [`init`].
pub fn init_vbus() -> &'static SoftwareVbusDetect {
    let mut status = 0u32;
    unsafe {
        raw::sd_power_usbregstatus_get(&mut status);
        raw::sd_power_usbdetected_enable(1);
        raw::sd_power_usbremoved_enable(1);
        raw::sd_power_usbpwrrdy_enable(1);
    }
    let detected = status & raw::NRF_POWER_USBREGSTATUS_VBUSDETECT_MSK != 0;
    let ready = status & raw::NRF_POWER_USBREGSTATUS_OUTPUTRDY_MSK != 0;
    VBUS.init(SoftwareVbusDetect::new(detected, ready))
}

/// SoftDevice SoC event hook: keep the VBUS detector current.
pub fn on_soc_event(vbus: &SoftwareVbusDetect, event: SocEvent) {
    match event {
        SocEvent::PowerUsbDetected => vbus.detected(true),
        SocEvent::PowerUsbRemoved => vbus.detected(false),
        SocEvent::PowerUsbPowerReady => vbus.ready(),
        _ => {}
    }
}

/// Initialise the USB stack with a single CDC-ACM function.
///
/// Must be called exactly once.  All static buffers are consumed here.
pub fn init(usbd: peripherals::USBD, vbus: &'static SoftwareVbusDetect) -> UsbSerial {
    let driver = Driver::new(usbd, Irqs, vbus);

    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = 100; // mA
    usb_config.max_packet_size_0 = 64;

    // Windows needs the IAD for a composite-style CDC function.
    usb_config.device_class = 0xEF;
    usb_config.device_sub_class = 0x02;
    usb_config.device_protocol = 0x01;
    usb_config.composite_with_iads = true;

    let mut builder = Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 64]),
    );

    let class = CdcAcmClass::new(&mut builder, CDC_STATE.init(State::new()), USB_PACKET_SIZE as u16);
    let (sender, receiver) = class.split();
    let device = builder.build();

    info!("USB CDC-ACM device initialised");

    UsbSerial {
        device,
        sender,
        receiver,
    }
}

/// Run the USB device stack (enumeration, suspend/resume, control
/// requests).  Never returns.
pub async fn run_usb_device(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    info!("USB device task started");
    device.run().await
}

/// Host → device pump: one RX batch per OUT packet.
pub async fn rx_pump(
    mut receiver: Receiver<'static, UsbDriver>,
    serial: &'static HostSerial<CriticalSectionRawMutex>,
) -> ! {
    let mut packet = [0u8; RX_CHUNK];
    loop {
        receiver.wait_connection().await;
        info!("host opened the serial port");

        loop {
            match receiver.read_packet(&mut packet).await {
                Ok(n) => {
                    if let Err(e) = serial.on_rx(&packet[..n]) {
                        warn!("RX ring full: {}", e);
                    }
                }
                Err(EndpointError::BufferOverflow) => warn!("RX packet larger than buffer"),
                Err(EndpointError::Disabled) => break,
            }
        }

        info!("host closed the serial port");
    }
}

/// Device → host pump.  Drains the TX ring in packet-sized pieces each
/// time a producer kicks it; a full last packet is followed by a ZLP so
/// the host completes the transfer.
pub async fn tx_pump(
    mut sender: Sender<'static, UsbDriver>,
    serial: &'static HostSerial<CriticalSectionRawMutex>,
) -> ! {
    let mut packet = [0u8; USB_PACKET_SIZE];
    loop {
        sender.wait_connection().await;

        'connected: loop {
            serial.wait_tx().await;

            let mut last = 0;
            loop {
                let n = serial.take_tx(&mut packet);
                if n == 0 {
                    break;
                }
                if sender.write_packet(&packet[..n]).await.is_err() {
                    serial.note_tx_dropped(n);
                    break 'connected;
                }
                last = n;
            }

            if last == USB_PACKET_SIZE && sender.write_packet(&[]).await.is_err() {
                break 'connected;
            }
        }

        // Nobody is listening; stale telemetry is not worth replaying.
        let stale = serial.tx_pending();
        serial.flush_tx();
        serial.note_tx_dropped(stale);
        warn!("host went away, {} TX bytes discarded", stale);
    }
}
