use crate::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Frame command discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Dispatcher → consumer: process this payload
    Process = 0,
    /// Consumer → acknowledger: payload has been processed
    Ack = 1,
}

impl Command {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Command::Process => "PROCESS",
            Command::Ack => "ACK",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Command::Process),
            1 => Ok(Command::Ack),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESS" => Ok(Command::Process),
            "ACK" => Ok(Command::Ack),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = ProtocolError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
