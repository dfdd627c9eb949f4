//! Single-slot directed connection state machine.
//!
//! ```text
//!  Idle ──connect──► Connecting ──Connected(0)──► Configuring ──WriteComplete(0)──►
//!   ▲                    │                                                          │
//!   │           Connected(≠0): release                                              ▼
//!   │                    │                    AwaitingNotification ◄──Subscribed(0)── Subscribing
//!   │                    ▼                            │
//!   ├──────────────── (scan resumed)           Notification: decode, emit,
//!   │                                          unsubscribe, disconnect
//!   │                                                 ▼
//!   └──────────── Disconnected: release ◄──── Disconnecting
//! ```
//!
//! Any failure after the link exists requests a disconnect; if even that is
//! refused the slot is cleaned up locally.  Scanning is stopped for the
//! whole lifetime of a connection and resumed on every return to `Idle`.

use crate::ble::command::ConnectCommand;
use crate::ble::{ConnHandle, ConnectParams, LinkEvent, PeerAddress, Radio};
use crate::error::{ConnectError, Error};
use crate::sensor::{format_reading, DeviceKind, SensorReading};
use crate::serial::LineSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Idle,
    Connecting,
    Configuring,
    Subscribing,
    AwaitingNotification,
    Disconnecting,
}

/// The one outstanding connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionContext {
    pub peer: PeerAddress,
    pub device: DeviceKind,
    pub handle: ConnHandle,
}

pub struct ConnectionManager {
    state: LinkState,
    context: Option<ConnectionContext>,
}

impl ConnectionManager {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Idle,
            context: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == LinkState::Idle
    }

    pub fn context(&self) -> Option<&ConnectionContext> {
        self.context.as_ref()
    }

    /// Start reading one sensor: stop scanning and request a directed
    /// connection.
    ///
    /// Refused with `ConnectionFailed(Busy)` unless idle.  If the stack does
    /// not accept the request, scanning is resumed and the machine stays idle.
    pub fn connect<R: Radio>(&mut self, radio: &mut R, command: ConnectCommand) -> Result<(), Error> {
        if !self.is_idle() {
            return Err(ConnectError::Busy.into());
        }

        radio.stop_scan();
        match radio.connect(&command.peer, &ConnectParams::DIRECTED) {
            Ok(handle) => {
                self.context = Some(ConnectionContext {
                    peer: command.peer,
                    device: command.device,
                    handle,
                });
                self.state = LinkState::Connecting;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => {
                radio.start_scan()?;
                Err(ConnectError::Rejected.into())
            }
        }
    }

    /// Advance on one stack event.
    ///
    /// Returns the reading when one was decoded and queued for the host.
    /// Events for anything but the current connection are ignored.
    pub fn handle<R: Radio>(
        &mut self,
        radio: &mut R,
        sink: &impl LineSink,
        event: LinkEvent,
    ) -> Result<Option<SensorReading>, Error> {
        let Some(ctx) = self.context else {
            return Ok(None);
        };

        let conn = match event.conn() {
            Some(conn) if conn != ctx.handle => return Ok(None),
            Some(conn) => conn,
            None => return self.on_timeout(radio).map(|_| None),
        };

        match (self.state, event) {
            (LinkState::Connecting, LinkEvent::Connected { status: 0, .. }) => {
                let profile = ctx.device.profile();
                match radio.write(conn, profile.config_handle, profile.config_value) {
                    Ok(()) => {
                        self.state = LinkState::Configuring;
                        Ok(None)
                    }
                    Err(_) => self.abort(radio, ConnectError::Rejected),
                }
            }
            (LinkState::Connecting, LinkEvent::Connected { status, .. }) => {
                self.finish(radio)?;
                Err(ConnectError::Status(status).into())
            }

            (LinkState::Configuring, LinkEvent::WriteComplete { status: 0, .. }) => {
                match radio.subscribe(conn, ctx.device.profile()) {
                    Ok(()) => {
                        self.state = LinkState::Subscribing;
                        Ok(None)
                    }
                    Err(_) => self.abort(radio, ConnectError::Rejected),
                }
            }
            (LinkState::Configuring, LinkEvent::WriteComplete { status, .. }) => {
                self.abort(radio, ConnectError::Write(status))
            }

            (LinkState::Subscribing, LinkEvent::Subscribed { status: 0, .. }) => {
                self.state = LinkState::AwaitingNotification;
                Ok(None)
            }
            (LinkState::Subscribing, LinkEvent::Subscribed { status, .. }) => {
                self.abort(radio, ConnectError::Subscribe(status))
            }

            // The value may race the CCC write confirmation.
            (
                LinkState::Subscribing | LinkState::AwaitingNotification,
                LinkEvent::Notification { payload, .. },
            ) => {
                if payload.is_empty() {
                    // No payload: the peer confirmed the unsubscribe.
                    self.disconnect(radio)?;
                    return Ok(None);
                }

                let emitted = ctx.device.decode(&payload).map_err(Error::from).and_then(|reading| {
                    sink.send_line(&format_reading(&ctx.peer, ctx.device, &reading))?;
                    Ok(reading)
                });

                // Only one reading per command; a refused unsubscribe is
                // covered by the disconnect.
                let _ = radio.unsubscribe(conn, ctx.device.profile());
                self.disconnect(radio)?;
                emitted.map(Some)
            }

            (LinkState::Disconnecting, LinkEvent::Unsubscribed { .. }) => Ok(None),
            (_, LinkEvent::Unsubscribed { .. }) => {
                self.disconnect(radio)?;
                Ok(None)
            }

            // Connection completed after it was asked to go away.
            (LinkState::Disconnecting, LinkEvent::Connected { status: 0, .. }) => {
                if radio.disconnect(conn).is_err() {
                    self.finish(radio)?;
                }
                Ok(None)
            }
            (LinkState::Disconnecting, LinkEvent::Connected { .. }) => {
                self.finish(radio)?;
                Ok(None)
            }

            (LinkState::Disconnecting, LinkEvent::Disconnected { .. }) => {
                self.finish(radio)?;
                Ok(None)
            }
            (_, LinkEvent::Disconnected { reason, .. }) => {
                self.finish(radio)?;
                Err(ConnectError::LinkLost(reason).into())
            }

            // Out-of-order completion: nothing to do.
            _ => Ok(None),
        }
    }

    /// Supervisory timeout: no stack event arrived in time.
    fn on_timeout<R: Radio>(&mut self, radio: &mut R) -> Result<(), Error> {
        match self.state {
            LinkState::Idle => Ok(()),
            LinkState::Disconnecting => {
                self.finish(radio)?;
                Err(ConnectError::Timeout.into())
            }
            _ => self.abort(radio, ConnectError::Timeout).map(|_| ()),
        }
    }

    /// Tear the link down and report `cause`.
    fn abort<R: Radio>(&mut self, radio: &mut R, cause: ConnectError) -> Result<Option<SensorReading>, Error> {
        self.disconnect(radio)?;
        Err(cause.into())
    }

    /// Ask the stack to drop the link; clean up locally if it will not.
    fn disconnect<R: Radio>(&mut self, radio: &mut R) -> Result<(), Error> {
        let Some(ctx) = self.context else {
            return Ok(());
        };
        self.state = LinkState::Disconnecting;
        if radio.disconnect(ctx.handle).is_err() {
            self.finish(radio)?;
        }
        Ok(())
    }

    /// Release the slot and go back to passive scanning.
    fn finish<R: Radio>(&mut self, radio: &mut R) -> Result<(), Error> {
        if let Some(ctx) = self.context.take() {
            radio.release(ctx.handle);
        }
        self.state = LinkState::Idle;
        radio.start_scan()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline for the current non-idle step.
///
/// The window starts when the machine enters a state and is only restarted
/// by the next state change, so rejected commands and ignored events cannot
/// push it back.  Times are plain ticks of whatever clock the caller uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepDeadline {
    state: LinkState,
    deadline: Option<u64>,
}

impl StepDeadline {
    pub const fn new() -> Self {
        Self {
            state: LinkState::Idle,
            deadline: None,
        }
    }

    /// Note the machine's state after one pass; returns when to give up
    /// waiting, or `None` while idle.
    pub fn observe(&mut self, state: LinkState, now: u64, window: u64) -> Option<u64> {
        if state != self.state {
            self.state = state;
            self.deadline = (state != LinkState::Idle).then(|| now.saturating_add(window));
        }
        self.deadline
    }
}

impl Default for StepDeadline {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::{AddressKind, Notification};
    use crate::error::{ProtocolError, StackError};
    use crate::sensor::GattProfile;
    use core::cell::RefCell;
    use std::string::String;
    use std::vec::Vec;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        StartScan,
        StopScan,
        Connect(PeerAddress),
        Write(ConnHandle, u16, Vec<u8>),
        Subscribe(ConnHandle, u16),
        Unsubscribe(ConnHandle),
        Disconnect(ConnHandle),
        Release(ConnHandle),
    }

    #[derive(Default)]
    struct MockRadio {
        calls: Vec<Call>,
        next: u8,
        refuse_connect: bool,
        refuse_write: bool,
        refuse_disconnect: bool,
        scan_broken: bool,
    }

    impl MockRadio {
        fn take(&mut self) -> Vec<Call> {
            core::mem::take(&mut self.calls)
        }
    }

    impl Radio for MockRadio {
        fn start_scan(&mut self) -> Result<(), Error> {
            self.calls.push(Call::StartScan);
            if self.scan_broken {
                return Err(StackError::ScanStart.into());
            }
            Ok(())
        }

        fn stop_scan(&mut self) {
            self.calls.push(Call::StopScan);
        }

        fn connect(&mut self, peer: &PeerAddress, _params: &ConnectParams) -> Result<ConnHandle, Error> {
            self.calls.push(Call::Connect(*peer));
            if self.refuse_connect {
                return Err(ConnectError::Rejected.into());
            }
            self.next += 1;
            Ok(ConnHandle(self.next))
        }

        fn write(&mut self, conn: ConnHandle, handle: u16, data: &[u8]) -> Result<(), Error> {
            self.calls.push(Call::Write(conn, handle, data.to_vec()));
            if self.refuse_write {
                return Err(ConnectError::Rejected.into());
            }
            Ok(())
        }

        fn subscribe(&mut self, conn: ConnHandle, profile: &GattProfile) -> Result<(), Error> {
            self.calls.push(Call::Subscribe(conn, profile.ccc_handle));
            Ok(())
        }

        fn unsubscribe(&mut self, conn: ConnHandle, _profile: &GattProfile) -> Result<(), Error> {
            self.calls.push(Call::Unsubscribe(conn));
            Ok(())
        }

        fn disconnect(&mut self, conn: ConnHandle) -> Result<(), Error> {
            self.calls.push(Call::Disconnect(conn));
            if self.refuse_disconnect {
                return Err(ConnectError::Rejected.into());
            }
            Ok(())
        }

        fn release(&mut self, conn: ConnHandle) {
            self.calls.push(Call::Release(conn));
        }
    }

    #[derive(Default)]
    struct Lines(RefCell<Vec<String>>);

    impl LineSink for Lines {
        fn send_line(&self, line: &str) -> Result<(), Error> {
            self.0.borrow_mut().push(line.into());
            Ok(())
        }
    }

    const H1: ConnHandle = ConnHandle(1);

    fn peer() -> PeerAddress {
        PeerAddress::from_msb_first([0xA4, 0xC1, 0x38, 0x5E, 0xDE, 0x26], AddressKind::Public)
    }

    fn command() -> ConnectCommand {
        ConnectCommand {
            device: DeviceKind::Lywsd03mmc,
            peer: peer(),
        }
    }

    fn notification(conn: ConnHandle, bytes: &[u8]) -> LinkEvent {
        LinkEvent::Notification {
            conn,
            payload: Notification::from_slice(bytes).unwrap(),
        }
    }

    /// Drive a fresh machine up to `AwaitingNotification` on handle 1.
    fn subscribed(radio: &mut MockRadio, sink: &Lines) -> ConnectionManager {
        let mut machine = ConnectionManager::new();
        machine.connect(radio, command()).unwrap();
        machine.handle(radio, sink, LinkEvent::Connected { conn: H1, status: 0 }).unwrap();
        machine.handle(radio, sink, LinkEvent::WriteComplete { conn: H1, status: 0 }).unwrap();
        machine.handle(radio, sink, LinkEvent::Subscribed { conn: H1, status: 0 }).unwrap();
        assert_eq!(machine.state(), LinkState::AwaitingNotification);
        radio.take();
        machine
    }

    #[test]
    fn full_read_cycle() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();

        machine.connect(&mut radio, command()).unwrap();
        assert_eq!(machine.state(), LinkState::Connecting);
        assert_eq!(radio.take(), [Call::StopScan, Call::Connect(peer())]);

        machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0 }).unwrap();
        assert_eq!(machine.state(), LinkState::Configuring);
        assert_eq!(radio.take(), [Call::Write(H1, 0x0046, std::vec![0xF4, 0x01, 0x00])]);

        machine.handle(&mut radio, &sink, LinkEvent::WriteComplete { conn: H1, status: 0 }).unwrap();
        assert_eq!(machine.state(), LinkState::Subscribing);
        assert_eq!(radio.take(), [Call::Subscribe(H1, 0x0038)]);

        machine.handle(&mut radio, &sink, LinkEvent::Subscribed { conn: H1, status: 0 }).unwrap();
        assert_eq!(machine.state(), LinkState::AwaitingNotification);

        let reading = machine
            .handle(&mut radio, &sink, notification(H1, &[0xE6, 0x00, 0x2C, 0x50, 0x0C]))
            .unwrap()
            .unwrap();
        assert_eq!(reading.temperature, 230);
        assert_eq!(machine.state(), LinkState::Disconnecting);
        assert_eq!(radio.take(), [Call::Unsubscribe(H1), Call::Disconnect(H1)]);
        assert_eq!(
            sink.0.borrow().as_slice(),
            ["A4:C1:38:5E:DE:26,lywsd03mmc,230,44,3152\n"]
        );

        // Unsubscribe confirmation while already going down.
        machine.handle(&mut radio, &sink, LinkEvent::Unsubscribed { conn: H1 }).unwrap();
        assert!(radio.take().is_empty());

        machine.handle(&mut radio, &sink, LinkEvent::Disconnected { conn: H1, reason: 0x16 }).unwrap();
        assert!(machine.is_idle());
        assert!(machine.context().is_none());
        assert_eq!(radio.take(), [Call::Release(H1), Call::StartScan]);
    }

    #[test]
    fn failed_connection_returns_to_scanning_and_allows_retry() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();

        machine.connect(&mut radio, command()).unwrap();
        radio.take();
        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0x3E }),
            Err(Error::ConnectionFailed(ConnectError::Status(0x3E)))
        );
        assert!(machine.is_idle());
        assert_eq!(radio.take(), [Call::Release(H1), Call::StartScan]);

        machine.connect(&mut radio, command()).unwrap();
        assert_eq!(machine.context().unwrap().handle, ConnHandle(2));
    }

    #[test]
    fn connect_while_busy_is_rejected() {
        let mut radio = MockRadio::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        radio.take();

        assert_eq!(
            machine.connect(&mut radio, command()),
            Err(Error::ConnectionFailed(ConnectError::Busy))
        );
        assert!(radio.take().is_empty());
        assert_eq!(machine.context().unwrap().handle, H1);
    }

    #[test]
    fn refused_connect_request_resumes_scan() {
        let mut radio = MockRadio {
            refuse_connect: true,
            ..Default::default()
        };
        let mut machine = ConnectionManager::new();
        assert_eq!(
            machine.connect(&mut radio, command()),
            Err(Error::ConnectionFailed(ConnectError::Rejected))
        );
        assert!(machine.is_idle());
        assert_eq!(radio.take(), [Call::StopScan, Call::Connect(peer()), Call::StartScan]);
    }

    #[test]
    fn scan_restart_failure_is_fatal() {
        let mut radio = MockRadio {
            refuse_connect: true,
            scan_broken: true,
            ..Default::default()
        };
        let mut machine = ConnectionManager::new();
        let err = machine.connect(&mut radio, command()).unwrap_err();
        assert_eq!(err, Error::StackFailure(StackError::ScanStart));
        assert!(err.is_fatal());
    }

    #[test]
    fn write_failure_forces_disconnect() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0 }).unwrap();
        radio.take();

        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::WriteComplete { conn: H1, status: 0x80 }),
            Err(Error::ConnectionFailed(ConnectError::Write(0x80)))
        );
        assert_eq!(machine.state(), LinkState::Disconnecting);
        assert_eq!(radio.take(), [Call::Disconnect(H1)]);

        machine.handle(&mut radio, &sink, LinkEvent::Disconnected { conn: H1, reason: 0x16 }).unwrap();
        assert!(machine.is_idle());
    }

    #[test]
    fn refused_write_request_forces_disconnect() {
        let mut radio = MockRadio {
            refuse_write: true,
            ..Default::default()
        };
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0 }),
            Err(Error::ConnectionFailed(ConnectError::Rejected))
        );
        assert_eq!(machine.state(), LinkState::Disconnecting);
    }

    #[test]
    fn subscribe_failure_forces_disconnect() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0 }).unwrap();
        machine.handle(&mut radio, &sink, LinkEvent::WriteComplete { conn: H1, status: 0 }).unwrap();
        radio.take();

        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::Subscribed { conn: H1, status: 0x0A }),
            Err(Error::ConnectionFailed(ConnectError::Subscribe(0x0A)))
        );
        assert_eq!(radio.take(), [Call::Disconnect(H1)]);
    }

    #[test]
    fn refused_disconnect_cleans_up_locally() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = subscribed(&mut radio, &sink);
        radio.refuse_disconnect = true;

        machine.handle(&mut radio, &sink, notification(H1, &[0xE6, 0x00, 0x2C, 0x50, 0x0C])).unwrap();
        assert!(machine.is_idle());
        assert_eq!(
            radio.take(),
            [Call::Unsubscribe(H1), Call::Disconnect(H1), Call::Release(H1), Call::StartScan]
        );
    }

    #[test]
    fn short_notification_emits_nothing_but_still_disconnects() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = subscribed(&mut radio, &sink);

        assert_eq!(
            machine.handle(&mut radio, &sink, notification(H1, &[0xE6, 0x00])),
            Err(Error::Protocol(ProtocolError::MalformedPayload { len: 2 }))
        );
        assert!(sink.0.borrow().is_empty());
        assert_eq!(machine.state(), LinkState::Disconnecting);
        assert_eq!(radio.take(), [Call::Unsubscribe(H1), Call::Disconnect(H1)]);
    }

    #[test]
    fn empty_notification_means_unsubscribed() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = subscribed(&mut radio, &sink);

        assert_eq!(machine.handle(&mut radio, &sink, notification(H1, &[])), Ok(None));
        assert_eq!(machine.state(), LinkState::Disconnecting);
        assert_eq!(radio.take(), [Call::Disconnect(H1)]);
    }

    #[test]
    fn notification_racing_subscribe_confirmation_is_accepted() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0 }).unwrap();
        machine.handle(&mut radio, &sink, LinkEvent::WriteComplete { conn: H1, status: 0 }).unwrap();
        assert_eq!(machine.state(), LinkState::Subscribing);

        let reading = machine
            .handle(&mut radio, &sink, notification(H1, &[0xC9, 0xFF, 0x50, 0xB8, 0x0B]))
            .unwrap();
        assert_eq!(reading.map(|r| r.temperature), Some(-55));
        assert_eq!(sink.0.borrow().len(), 1);
    }

    #[test]
    fn unexpected_disconnect_reports_link_lost() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = subscribed(&mut radio, &sink);

        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::Disconnected { conn: H1, reason: 0x08 }),
            Err(Error::ConnectionFailed(ConnectError::LinkLost(0x08)))
        );
        assert!(machine.is_idle());
        assert_eq!(radio.take(), [Call::Release(H1), Call::StartScan]);
    }

    #[test]
    fn timeout_while_connecting_requests_disconnect() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        radio.take();

        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::Timeout),
            Err(Error::ConnectionFailed(ConnectError::Timeout))
        );
        assert_eq!(machine.state(), LinkState::Disconnecting);
        assert_eq!(radio.take(), [Call::Disconnect(H1)]);

        // Cancelled attempt completes with an error status.
        machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0x02 }).unwrap();
        assert!(machine.is_idle());
    }

    #[test]
    fn late_connection_after_timeout_is_dropped_again() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        let _ = machine.handle(&mut radio, &sink, LinkEvent::Timeout);
        radio.take();

        machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0 }).unwrap();
        assert_eq!(machine.state(), LinkState::Disconnecting);
        assert_eq!(radio.take(), [Call::Disconnect(H1)]);
    }

    #[test]
    fn timeout_while_disconnecting_forces_cleanup() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = subscribed(&mut radio, &sink);
        machine.handle(&mut radio, &sink, notification(H1, &[0xE6, 0x00, 0x2C, 0x50, 0x0C])).unwrap();
        radio.take();

        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::Timeout),
            Err(Error::ConnectionFailed(ConnectError::Timeout))
        );
        assert!(machine.is_idle());
        assert_eq!(radio.take(), [Call::Release(H1), Call::StartScan]);
    }

    #[test]
    fn timeout_while_idle_is_ignored() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        assert_eq!(machine.handle(&mut radio, &sink, LinkEvent::Timeout), Ok(None));
        assert!(radio.take().is_empty());
    }

    #[test]
    fn events_for_other_connections_are_ignored() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = subscribed(&mut radio, &sink);

        let stale = ConnHandle(9);
        machine.handle(&mut radio, &sink, notification(stale, &[0xE6, 0x00, 0x2C, 0x50, 0x0C])).unwrap();
        machine.handle(&mut radio, &sink, LinkEvent::Disconnected { conn: stale, reason: 0x13 }).unwrap();

        assert_eq!(machine.state(), LinkState::AwaitingNotification);
        assert!(sink.0.borrow().is_empty());
        assert!(radio.take().is_empty());
    }

    #[test]
    fn events_while_idle_are_ignored() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.handle(&mut radio, &sink, LinkEvent::Disconnected { conn: H1, reason: 0 }).unwrap();
        machine.handle(&mut radio, &sink, notification(H1, &[1, 2, 3, 4, 5])).unwrap();
        assert!(machine.is_idle());
        assert!(radio.take().is_empty());
        assert!(sink.0.borrow().is_empty());
    }

    #[test]
    fn out_of_order_completion_is_ignored() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        machine.connect(&mut radio, command()).unwrap();
        radio.take();

        machine.handle(&mut radio, &sink, LinkEvent::Subscribed { conn: H1, status: 0 }).unwrap();
        assert_eq!(machine.state(), LinkState::Connecting);
        assert!(radio.take().is_empty());
    }

    #[test]
    fn step_deadline_survives_rejected_commands() {
        let mut radio = MockRadio::default();
        let mut machine = ConnectionManager::new();
        let mut watch = StepDeadline::new();
        assert_eq!(watch.observe(machine.state(), 0, 15), None);

        machine.connect(&mut radio, command()).unwrap();
        assert_eq!(watch.observe(machine.state(), 2, 15), Some(17));

        // The host keeps re-sending while the stack stays silent.
        for now in [10, 14, 16] {
            assert_eq!(
                machine.connect(&mut radio, command()),
                Err(Error::ConnectionFailed(ConnectError::Busy))
            );
            assert_eq!(watch.observe(machine.state(), now, 15), Some(17));
        }
    }

    #[test]
    fn step_deadline_survives_ignored_events() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        let mut watch = StepDeadline::new();

        machine.connect(&mut radio, command()).unwrap();
        assert_eq!(watch.observe(machine.state(), 0, 15), Some(15));

        machine.handle(&mut radio, &sink, LinkEvent::Subscribed { conn: H1, status: 0 }).unwrap();
        machine.handle(&mut radio, &sink, LinkEvent::Disconnected { conn: ConnHandle(9), reason: 0x13 }).unwrap();
        assert_eq!(watch.observe(machine.state(), 12, 15), Some(15));
    }

    #[test]
    fn step_deadline_restarts_on_progress_and_clears_when_idle() {
        let mut radio = MockRadio::default();
        let sink = Lines::default();
        let mut machine = ConnectionManager::new();
        let mut watch = StepDeadline::new();

        machine.connect(&mut radio, command()).unwrap();
        assert_eq!(watch.observe(machine.state(), 0, 15), Some(15));

        machine.handle(&mut radio, &sink, LinkEvent::Connected { conn: H1, status: 0 }).unwrap();
        assert_eq!(watch.observe(machine.state(), 5, 15), Some(20));

        assert_eq!(
            machine.handle(&mut radio, &sink, LinkEvent::Timeout),
            Err(Error::ConnectionFailed(ConnectError::Timeout))
        );
        assert_eq!(machine.state(), LinkState::Disconnecting);
        assert_eq!(watch.observe(machine.state(), 20, 15), Some(35));

        machine.handle(&mut radio, &sink, LinkEvent::Disconnected { conn: H1, reason: 0x16 }).unwrap();
        assert_eq!(watch.observe(machine.state(), 21, 15), None);
    }
}
