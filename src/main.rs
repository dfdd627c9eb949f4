//! ble-serial-bridge firmware - nRF52840 + SoftDevice S140 + USB CDC-ACM.
//!
//! Task layout:
//!
//! ```text
//!  softdevice_task   SoftDevice event pump (+ USB power SoC events)
//!  radio_task        scan / connect / GATT, owns the radio
//!  link_task         ConnectionManager, supervisory timeout
//!  command_task      RX ring → framer → ConnectCommand
//!  advert_task       capture pool → advertisement lines
//!  usb_task          USB device stack
//!  usb_rx / usb_tx   CDC-ACM ⇄ serial transport rings
//!  diagnostics_task  drop counters
//! ```

#![no_std]
#![no_main]

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::usb::vbus_detect::SoftwareVbusDetect;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_deadline, Duration, Instant, Timer};
use embassy_usb::class::cdc_acm::{Receiver, Sender};
use embassy_usb::UsbDevice;
use nrf_softdevice::{raw, Softdevice};
use {defmt_rtt as _, panic_probe as _};

use ble_serial_bridge::ble::advertisements;
use ble_serial_bridge::ble::capture::AdvertisementPool;
use ble_serial_bridge::ble::command::ConnectCommand;
use ble_serial_bridge::ble::connection::{ConnectionManager, StepDeadline};
use ble_serial_bridge::ble::radio::{
    self, ChannelRadio, RadioRequest, EVENT_QUEUE_DEPTH, REQUEST_QUEUE_DEPTH,
};
use ble_serial_bridge::ble::{LinkEvent, Radio};
use ble_serial_bridge::config::{DIAGNOSTICS_INTERVAL_SECS, LINK_SUPERVISION_SECS, RX_CHUNK};
use ble_serial_bridge::serial::framer::CommandFramer;
use ble_serial_bridge::serial::HostSerial;
use ble_serial_bridge::usb::cdc::{self, UsbDriver};

static POOL: AdvertisementPool<CriticalSectionRawMutex> = AdvertisementPool::new();
static SERIAL: HostSerial<CriticalSectionRawMutex> = HostSerial::new();
static COMMANDS: Channel<CriticalSectionRawMutex, ConnectCommand, 1> = Channel::new();
static RADIO_REQUESTS: Channel<CriticalSectionRawMutex, RadioRequest, REQUEST_QUEUE_DEPTH> = Channel::new();
static LINK_EVENTS: Channel<CriticalSectionRawMutex, LinkEvent, EVENT_QUEUE_DEPTH> = Channel::new();

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 23 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tasks
// ═══════════════════════════════════════════════════════════════════════════

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice, vbus: &'static SoftwareVbusDetect) -> ! {
    sd.run_with_callback(|event| cdc::on_soc_event(vbus, event)).await
}

#[embassy_executor::task]
async fn radio_task(sd: &'static Softdevice) -> ! {
    radio::radio_task(sd, &POOL, RADIO_REQUESTS.receiver(), LINK_EVENTS.sender()).await
}

/// Wait for the next stack event; while a connection is outstanding, give
/// up at the current step's deadline.
async fn next_link_event(deadline: Option<u64>) -> LinkEvent {
    let Some(ticks) = deadline else {
        return LINK_EVENTS.receive().await;
    };
    with_deadline(Instant::from_ticks(ticks), LINK_EVENTS.receive())
        .await
        .unwrap_or(LinkEvent::Timeout)
}

#[embassy_executor::task]
async fn link_task() -> ! {
    let mut radio = ChannelRadio::new(RADIO_REQUESTS.sender());
    let mut machine = ConnectionManager::new();
    let mut watch = StepDeadline::new();
    let window = Duration::from_secs(LINK_SUPERVISION_SECS).as_ticks();

    if let Err(e) = radio.start_scan() {
        defmt::panic!("could not start scanning: {}", e);
    }

    loop {
        let deadline = watch.observe(machine.state(), Instant::now().as_ticks(), window);
        let outcome = match select(COMMANDS.receive(), next_link_event(deadline)).await {
            Either::First(command) => {
                info!("reading {} at {}", command.device, command.peer);
                machine.connect(&mut radio, command).map(|_| None)
            }
            Either::Second(event) => machine.handle(&mut radio, &SERIAL, event),
        };

        match outcome {
            Ok(Some(reading)) => info!("reading: {}", reading),
            Ok(None) => {}
            Err(e) if e.is_fatal() => defmt::panic!("wireless stack failure: {}", e),
            Err(e) => warn!("connection: {} (now {})", e, machine.state()),
        }
    }
}

#[embassy_executor::task]
async fn command_task() -> ! {
    let mut framer: CommandFramer = CommandFramer::new();
    let mut chunk = [0u8; RX_CHUNK];

    loop {
        let n = SERIAL.receive(&mut chunk).await;
        let line = match framer.push(&chunk[..n]) {
            Ok(Some(line)) => line,
            Ok(None) => continue,
            Err(e) => {
                warn!("line discarded: {}", e);
                continue;
            }
        };

        info!("command {}, {}", line.cmd, line.arg);
        match ConnectCommand::parse(&line) {
            Ok(command) => {
                if COMMANDS.try_send(command).is_err() {
                    warn!("command dropped, previous one not taken yet");
                }
            }
            Err(e) => warn!("command ignored: {}", e),
        }
    }
}

#[embassy_executor::task]
async fn advert_task() -> ! {
    loop {
        // Overflow is counted by the transport and reported by diagnostics.
        let _ = advertisements::forward_next(&POOL, &SERIAL).await;
    }
}

#[embassy_executor::task]
async fn usb_task(device: UsbDevice<'static, UsbDriver>) -> ! {
    cdc::run_usb_device(device).await
}

#[embassy_executor::task]
async fn usb_rx_task(receiver: Receiver<'static, UsbDriver>) -> ! {
    cdc::rx_pump(receiver, &SERIAL).await
}

#[embassy_executor::task]
async fn usb_tx_task(sender: Sender<'static, UsbDriver>) -> ! {
    cdc::tx_pump(sender, &SERIAL).await
}

#[embassy_executor::task]
async fn diagnostics_task() -> ! {
    let mut last = (0, 0, 0);
    loop {
        Timer::after(Duration::from_secs(DIAGNOSTICS_INTERVAL_SECS)).await;
        let now = (POOL.exhausted_count(), SERIAL.rx_dropped(), SERIAL.tx_dropped());
        if now != last {
            warn!(
                "dropped so far: {} advertisements, {} RX bytes, {} TX bytes",
                now.0, now.1, now.2
            );
            last = now;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Entry point
// ═══════════════════════════════════════════════════════════════════════════

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("ble-serial-bridge starting");

    // Priorities 0, 1 and 4 belong to the SoftDevice.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);
    interrupt::USBD.set_priority(Priority::P2);

    let sd: &'static Softdevice = Softdevice::enable(&softdevice_config());
    let vbus = cdc::init_vbus();
    unwrap!(spawner.spawn(softdevice_task(sd, vbus)));

    unwrap!(spawner.spawn(radio_task(sd)));
    unwrap!(spawner.spawn(link_task()));

    let usb = cdc::init(p.USBD, vbus);
    unwrap!(spawner.spawn(usb_task(usb.device)));
    unwrap!(spawner.spawn(usb_rx_task(usb.receiver)));
    unwrap!(spawner.spawn(usb_tx_task(usb.sender)));

    unwrap!(spawner.spawn(command_task()));
    unwrap!(spawner.spawn(advert_task()));
    unwrap!(spawner.spawn(diagnostics_task()));

    info!("all tasks running");
}
