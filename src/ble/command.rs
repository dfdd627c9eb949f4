//! Host command interpretation.
//!
//! A framed `cmd,arg` line becomes a [`ConnectCommand`] when `cmd` names a
//! supported device kind and `arg` is a peer address.

use crate::ble::PeerAddress;
use crate::error::ProtocolError;
use crate::sensor::DeviceKind;
use crate::serial::framer::CommandLine;

/// "Read one measurement from this sensor."
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectCommand {
    pub device: DeviceKind,
    pub peer: PeerAddress,
}

impl ConnectCommand {
    pub fn parse(line: &CommandLine<'_>) -> Result<Self, ProtocolError> {
        let device = DeviceKind::from_token(line.cmd)?;
        let peer = PeerAddress::parse(line.arg.trim())?;
        Ok(Self { device, peer })
    }
}

impl<'a> TryFrom<CommandLine<'a>> for ConnectCommand {
    type Error = ProtocolError;

    fn try_from(line: CommandLine<'a>) -> Result<Self, Self::Error> {
        Self::parse(&line)
    }
}
