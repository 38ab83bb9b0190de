use crate::{Command, HEADER_LEN, PROTO_VERSION, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use std::convert::Infallible;

impl From<Infallible> for ProtocolError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub command: Command,
    pub message: String,
}

/// Build a frame for `command` carrying `payload`.
///
/// `command` may be a [`Command`], a raw discriminator byte or a command name; the
/// latter two fail with [`ProtocolError::UnknownCommand`] when unrecognized.
pub fn encode<C>(command: C, payload: &str) -> Result<Bytes, ProtocolError>
where
    C: TryInto<Command>,
    ProtocolError: From<C::Error>,
{
    let command = command.try_into()?;
    let payload = payload.as_bytes();
    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(PROTO_VERSION);
    buf.put_u8(command.as_byte());
    buf.put_u32_le(len);
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Parse a frame.
///
/// Bytes past `6 + length` are ignored.
pub fn decode(buffer: &[u8]) -> Result<Decoded, ProtocolError> {
    if buffer.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            actual: buffer.len(),
        });
    }

    let version = buffer[0];
    if version != PROTO_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTO_VERSION,
            actual: version,
        });
    }

    let command = Command::try_from(buffer[1])?;

    let declared = u32::from_le_bytes([buffer[2], buffer[3], buffer[4], buffer[5]]) as usize;
    let needed = HEADER_LEN + declared;
    if buffer.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            actual: buffer.len(),
        });
    }

    let message = std::str::from_utf8(&buffer[HEADER_LEN..needed])
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .to_owned();

    Ok(Decoded { command, message })
}

/// Turn a received PROCESS frame into its ACK by overwriting the command byte.
///
/// Only the header is validated; the payload bytes are left exactly as received.
pub fn acknowledge_in_place(frame: &mut [u8]) -> Result<(), ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: HEADER_LEN,
            actual: frame.len(),
        });
    }
    if frame[0] != PROTO_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTO_VERSION,
            actual: frame[0],
        });
    }
    Command::try_from(frame[1])?;

    frame[1] = Command::Ack.as_byte();
    Ok(())
}
