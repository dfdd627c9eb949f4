//! SoftDevice-backed [`Radio`].
//!
//! [`ChannelRadio`] only queues [`RadioRequest`]s; the [`radio_task`] owns
//! the SoftDevice side (scan, directed connect, GATT writes, notification
//! loop) and reports every completion as a [`LinkEvent`].

use defmt::{error, info, warn};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use heapless::Vec;
use nrf_softdevice::ble::gatt_client::{
    self, Characteristic, Descriptor, DiscoverError, HvxType, WriteError,
};
use nrf_softdevice::ble::{central, Address, AddressType, Connection, Uuid};
use nrf_softdevice::{raw, Softdevice};

use crate::ble::capture::AdvertisementPool;
use crate::ble::{
    scanner, AddressKind, ConnHandle, ConnectParams, LinkEvent, Notification, PeerAddress, Radio,
    NOTIFICATION_CAPACITY,
};
use crate::error::{ConnectError, Error, StackError};
use crate::sensor::GattProfile;

/// Queue depth between the connection manager and the radio task.
pub const REQUEST_QUEUE_DEPTH: usize = 8;
/// Queue depth for completions going the other way.
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Largest attribute value the bridge writes.
const WRITE_CAPACITY: usize = 8;

// HCI status / reason codes reported in `LinkEvent`s.
const HCI_SUCCESS: u8 = 0x00;
const HCI_UNKNOWN_CONNECTION: u8 = 0x02;
const HCI_CONNECTION_LIMIT: u8 = 0x09;
const HCI_UNSPECIFIED: u8 = 0x1F;
const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;
const HCI_REMOTE_TERMINATED: u8 = 0x13;
const HCI_FAILED_TO_ESTABLISH: u8 = 0x3E;

// ATT-level outcomes for GATT writes.
const GATT_DISCONNECTED: u8 = 0x0E;
const GATT_TIMEOUT: u8 = 0x0F;
const GATT_FAILURE: u8 = 0x80;

pub type RequestSender = Sender<'static, CriticalSectionRawMutex, RadioRequest, REQUEST_QUEUE_DEPTH>;
pub type RequestReceiver = Receiver<'static, CriticalSectionRawMutex, RadioRequest, REQUEST_QUEUE_DEPTH>;
pub type EventSender = Sender<'static, CriticalSectionRawMutex, LinkEvent, EVENT_QUEUE_DEPTH>;

#[derive(Clone, Debug, defmt::Format)]
pub enum RadioRequest {
    StartScan,
    StopScan,
    Connect {
        conn: ConnHandle,
        peer: PeerAddress,
        params: ConnectParams,
    },
    Write {
        conn: ConnHandle,
        handle: u16,
        data: Vec<u8, WRITE_CAPACITY>,
    },
    Subscribe {
        conn: ConnHandle,
        ccc_handle: u16,
        ccc_value: [u8; 2],
        value_handle: u16,
    },
    Unsubscribe {
        conn: ConnHandle,
        ccc_handle: u16,
    },
    Disconnect {
        conn: ConnHandle,
    },
    Release {
        conn: ConnHandle,
    },
}

/// [`Radio`] front end: every call is a non-blocking enqueue.
pub struct ChannelRadio {
    requests: RequestSender,
    generation: u8,
}

impl ChannelRadio {
    pub fn new(requests: RequestSender) -> Self {
        Self {
            requests,
            generation: 0,
        }
    }

    fn submit(&self, request: RadioRequest) -> Result<(), Error> {
        self.requests
            .try_send(request)
            .map_err(|_| StackError::RequestQueueFull.into())
    }
}

impl Radio for ChannelRadio {
    fn start_scan(&mut self) -> Result<(), Error> {
        self.submit(RadioRequest::StartScan)
    }

    fn stop_scan(&mut self) {
        if self.submit(RadioRequest::StopScan).is_err() {
            warn!("radio queue full, stop-scan dropped");
        }
    }

    fn connect(&mut self, peer: &PeerAddress, params: &ConnectParams) -> Result<ConnHandle, Error> {
        self.generation = self.generation.wrapping_add(1);
        let conn = ConnHandle(self.generation);
        self.submit(RadioRequest::Connect {
            conn,
            peer: *peer,
            params: *params,
        })?;
        Ok(conn)
    }

    fn write(&mut self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), Error> {
        let data = Vec::from_slice(data).map_err(|_| ConnectError::Rejected)?;
        self.submit(RadioRequest::Write { conn, handle, data })
    }

    fn subscribe(&mut self, conn: ConnHandle, profile: &GattProfile) -> Result<(), Error> {
        self.submit(RadioRequest::Subscribe {
            conn,
            ccc_handle: profile.ccc_handle,
            ccc_value: profile.ccc_value,
            value_handle: profile.value_handle,
        })
    }

    fn unsubscribe(&mut self, conn: ConnHandle, profile: &GattProfile) -> Result<(), Error> {
        self.submit(RadioRequest::Unsubscribe {
            conn,
            ccc_handle: profile.ccc_handle,
        })
    }

    fn disconnect(&mut self, conn: ConnHandle) -> Result<(), Error> {
        self.submit(RadioRequest::Disconnect { conn })
    }

    fn release(&mut self, conn: ConnHandle) {
        if self.submit(RadioRequest::Release { conn }).is_err() {
            warn!("radio queue full, release dropped");
        }
    }
}

/// Handle-addressed client: no discovery, just the one value handle the
/// current profile subscribed to.
struct SensorClient {
    value_handle: u16,
}

impl gatt_client::Client for SensorClient {
    type Event = Notification;

    fn on_hvx(&self, _conn: &Connection, _type_: HvxType, handle: u16, data: &[u8]) -> Option<Self::Event> {
        if handle != self.value_handle {
            return None;
        }
        let keep = data.len().min(NOTIFICATION_CAPACITY);
        Notification::from_slice(&data[..keep]).ok()
    }

    fn uuid() -> Uuid {
        // Environmental Sensing; only consulted by discovery, which is never run.
        Uuid::new_16(0x181A)
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self { value_handle: 0 }
    }

    fn discovered_characteristic(&mut self, _characteristic: &Characteristic, _descriptors: &[Descriptor]) {}

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }
}

struct Link {
    conn: ConnHandle,
    connection: Connection,
    client: SensorClient,
}

fn address_type(kind: AddressKind) -> AddressType {
    match kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::RandomStatic => AddressType::RandomStatic,
        AddressKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddressKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
        AddressKind::Anonymous => AddressType::Anonymous,
    }
}

fn connect_status(e: &central::ConnectError) -> u8 {
    match e {
        central::ConnectError::Timeout => HCI_FAILED_TO_ESTABLISH,
        central::ConnectError::NoFreeConn => HCI_CONNECTION_LIMIT,
        _ => HCI_UNSPECIFIED,
    }
}

fn write_status(result: Result<(), WriteError>) -> u8 {
    match result {
        Ok(()) => HCI_SUCCESS,
        Err(WriteError::Disconnected) => GATT_DISCONNECTED,
        Err(WriteError::Timeout) => GATT_TIMEOUT,
        Err(_) => GATT_FAILURE,
    }
}

/// Result of waiting on the radio while a directed connect is in flight.
enum Connecting {
    Established(Connection),
    Failed(u8),
    /// Interrupted by a request; a non-`Disconnect` one still needs running.
    Cancelled(Option<RadioRequest>),
}

async fn connect(
    sd: &Softdevice,
    peer: &PeerAddress,
    params: &ConnectParams,
    requests: &RequestReceiver,
) -> Connecting {
    let address = Address::new(address_type(peer.kind()), peer.le_bytes());
    let whitelist = [&address];
    let config = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            interval: params.scan_interval as u32,
            window: params.scan_window as u32,
            timeout: params.timeout,
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: params.interval_min,
            max_conn_interval: params.interval_max,
            slave_latency: params.latency,
            conn_sup_timeout: params.supervision_timeout,
        },
        ..Default::default()
    };

    match select(central::connect(sd, &config), requests.receive()).await {
        Either::First(Ok(connection)) => Connecting::Established(connection),
        Either::First(Err(e)) => {
            warn!("connect to {} failed: {}", peer, e);
            Connecting::Failed(connect_status(&e))
        }
        Either::Second(RadioRequest::Disconnect { .. }) => Connecting::Cancelled(None),
        Either::Second(other) => Connecting::Cancelled(Some(other)),
    }
}

/// What woke the radio task up.
enum Wake {
    Request(RadioRequest),
    LinkClosed(ConnHandle),
}

/// Serve the radio's background activity (notification loop or passive
/// scan) until the next request arrives.
async fn next_wake(
    sd: &Softdevice,
    pool: &AdvertisementPool<CriticalSectionRawMutex>,
    link: Option<&Link>,
    scanning: bool,
    requests: &RequestReceiver,
    events: &EventSender,
) -> Wake {
    if let Some(active) = link {
        let notifications = gatt_client::run(&active.connection, &active.client, |payload| {
            let event = LinkEvent::Notification {
                conn: active.conn,
                payload,
            };
            if events.try_send(event).is_err() {
                warn!("link event queue full, notification dropped");
            }
        });
        return match select(notifications, requests.receive()).await {
            Either::First(_) => Wake::LinkClosed(active.conn),
            Either::Second(request) => Wake::Request(request),
        };
    }

    if !scanning {
        return Wake::Request(requests.receive().await);
    }

    match select(scanner::scan(sd, pool), requests.receive()).await {
        Either::First(result) => {
            if let Err(e) = result {
                error!("scan failed: {}", e);
            }
            defmt::panic!("passive scan could not be started");
        }
        Either::Second(request) => Wake::Request(request),
    }
}

/// Owns the SoftDevice radio: passive scanning when idle, one directed
/// connection otherwise.
pub async fn radio_task(
    sd: &'static Softdevice,
    pool: &'static AdvertisementPool<CriticalSectionRawMutex>,
    requests: RequestReceiver,
    events: EventSender,
) -> ! {
    info!("radio task started");

    let mut scanning = false;
    let mut link: Option<Link> = None;
    let mut pending: Option<RadioRequest> = None;

    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => match next_wake(sd, pool, link.as_ref(), scanning, &requests, &events).await {
                Wake::Request(request) => request,
                Wake::LinkClosed(conn) => {
                    info!("link {} closed by peer", conn);
                    link = None;
                    events
                        .send(LinkEvent::Disconnected {
                            conn,
                            reason: HCI_REMOTE_TERMINATED,
                        })
                        .await;
                    continue;
                }
            },
        };

        match request {
            RadioRequest::StartScan => scanning = true,
            RadioRequest::StopScan => {
                if scanning {
                    info!("passive scan stopped");
                }
                scanning = false;
            }
            RadioRequest::Connect { conn, peer, params } => {
                info!("connecting to {} ({})", peer, conn);
                let status = match connect(sd, &peer, &params, &requests).await {
                    Connecting::Established(connection) => {
                        link = Some(Link {
                            conn,
                            connection,
                            client: SensorClient { value_handle: 0 },
                        });
                        HCI_SUCCESS
                    }
                    Connecting::Failed(status) => status,
                    Connecting::Cancelled(next) => {
                        info!("connect {} cancelled", conn);
                        pending = next;
                        HCI_UNKNOWN_CONNECTION
                    }
                };
                events.send(LinkEvent::Connected { conn, status }).await;
            }
            RadioRequest::Write { conn, handle, data } => {
                let status = match link.as_ref().filter(|l| l.conn == conn) {
                    Some(active) => write_status(gatt_client::write(&active.connection, handle, &data).await),
                    None => GATT_DISCONNECTED,
                };
                events.send(LinkEvent::WriteComplete { conn, status }).await;
            }
            RadioRequest::Subscribe {
                conn,
                ccc_handle,
                ccc_value,
                value_handle,
            } => {
                let status = match link.as_mut().filter(|l| l.conn == conn) {
                    Some(active) => {
                        active.client.value_handle = value_handle;
                        write_status(gatt_client::write(&active.connection, ccc_handle, &ccc_value).await)
                    }
                    None => GATT_DISCONNECTED,
                };
                events.send(LinkEvent::Subscribed { conn, status }).await;
            }
            RadioRequest::Unsubscribe { conn, ccc_handle } => {
                if let Some(active) = link.as_mut().filter(|l| l.conn == conn) {
                    active.client.value_handle = 0;
                    let status = write_status(gatt_client::write(&active.connection, ccc_handle, &[0x00, 0x00]).await);
                    if status != HCI_SUCCESS {
                        warn!("unsubscribe on {} failed: {=u8:#x}", conn, status);
                    }
                    events.send(LinkEvent::Unsubscribed { conn }).await;
                }
            }
            RadioRequest::Disconnect { conn } => {
                if link.as_ref().is_some_and(|l| l.conn == conn) {
                    if let Some(active) = link.take() {
                        // A link that is already gone reports an error here; it is down either way.
                        let _ = active.connection.disconnect();
                    }
                }
                events
                    .send(LinkEvent::Disconnected {
                        conn,
                        reason: HCI_LOCAL_HOST_TERMINATED,
                    })
                    .await;
            }
            RadioRequest::Release { conn } => {
                if link.as_ref().is_some_and(|l| l.conn == conn) {
                    link = None;
                }
            }
        }
    }
}
