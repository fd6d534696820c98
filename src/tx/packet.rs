//! Byte framing for ROBO TX packets.
//!
//! ```text
//! STX(2) | len(2, BE) | from(4) | to(4) | tid(2) | sid(2) | cmd(4) | count(4)
//!        | [transfer area(4)] | payload | checksum(2, BE) | ETX(1)
//! ```
//!
//! `len` counts the bytes from `from` through the end of the payload. The
//! checksum is the negated 16-bit sum of every byte from `len` through the
//! end of the payload.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::wire::Reader;

pub const STX: [u8; 2] = [0x02, 0x55];
pub const ETX: u8 = 0x03;

/// Node address of the host side.
pub const ADDRESS_HOST: u32 = 2;
/// Node address of the controller.
pub const ADDRESS_CONTROLLER: u32 = 1;

/// `from` through `count`.
const HEADER_LEN: usize = 20;
/// STX + length field.
const PREFIX_LEN: usize = 4;
/// checksum + ETX.
const SUFFIX_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum CommandCode {
    Echo = 1,
    Output = 2,
    Config = 5,
    RequestInfo = 6,
    EchoReply = 101,
    Input = 102,
    ConfigReply = 105,
    Info = 106,
}

impl CommandCode {
    /// Code the controller answers this request with.
    pub fn reply(self) -> Self {
        match self {
            Self::Echo => Self::EchoReply,
            Self::Output => Self::Input,
            Self::Config => Self::ConfigReply,
            Self::RequestInfo => Self::Info,
            reply => reply,
        }
    }

    /// Packets addressing a transfer area carry its id ahead of the payload.
    pub fn has_transfer_area(self) -> bool {
        matches!(
            self,
            Self::Output | Self::Input | Self::Config | Self::ConfigReply
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPacket {
    pub from: u32,
    pub to: u32,
    pub transaction_id: u16,
    pub session_id: u16,
    pub command: CommandCode,
    /// Present exactly when `command.has_transfer_area()`
    pub transfer_area: Option<u32>,
    pub payload: Vec<u8>,
}

impl TxPacket {
    /// Host-to-controller request.
    pub fn request(
        command: CommandCode,
        transaction_id: u16,
        session_id: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            from: ADDRESS_HOST,
            to: ADDRESS_CONTROLLER,
            transaction_id,
            session_id,
            command,
            transfer_area: command.has_transfer_area().then_some(0),
            payload,
        }
    }

    fn body_len(&self) -> usize {
        HEADER_LEN + self.transfer_area.map_or(0, |_| 4) + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = self.body_len();
        let mut out = Vec::with_capacity(PREFIX_LEN + body_len + SUFFIX_LEN);
        out.extend_from_slice(&STX);
        out.extend_from_slice(&(body_len as u16).to_be_bytes());
        out.extend_from_slice(&self.from.to_le_bytes());
        out.extend_from_slice(&self.to.to_le_bytes());
        out.extend_from_slice(&self.transaction_id.to_le_bytes());
        out.extend_from_slice(&self.session_id.to_le_bytes());
        out.extend_from_slice(&u32::from(self.command).to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        if let Some(area) = self.transfer_area {
            out.extend_from_slice(&area.to_le_bytes());
        }
        out.extend_from_slice(&self.payload);

        let sum = checksum(&out[2..]);
        out.extend_from_slice(&sum.to_be_bytes());
        out.push(ETX);
        out
    }

    /// Decode one complete packet. With `verify` set a wrong checksum is
    /// rejected.
    pub fn decode(buf: &[u8], verify: bool) -> Result<Self> {
        let body_len = frame_body_len(buf)?;
        let total = PREFIX_LEN + body_len + SUFFIX_LEN;
        if buf.len() < total {
            return Err(Error::TruncatedFrame {
                needed: total,
                available: buf.len(),
            });
        }

        let body_end = PREFIX_LEN + body_len;
        let mut reader = Reader::new(&buf[PREFIX_LEN..body_end]);
        let from = reader.u32()?;
        let to = reader.u32()?;
        let transaction_id = reader.u16()?;
        let session_id = reader.u16()?;
        let raw_command = reader.u32()?;
        let command = CommandCode::try_from(raw_command)
            .map_err(|_| Error::MalformedFrame("unknown command code"))?;
        let _payload_count = reader.u32()?;
        let transfer_area = if command.has_transfer_area() {
            Some(reader.u32()?)
        } else {
            None
        };
        let payload = reader.take(body_len - reader.position())?.to_vec();

        let carried = u16::from_be_bytes([buf[body_end], buf[body_end + 1]]);
        if buf[body_end + 2] != ETX {
            return Err(Error::MalformedFrame("missing end marker"));
        }
        if verify {
            let computed = checksum(&buf[2..body_end]);
            if computed != carried {
                return Err(Error::ChecksumMismatch {
                    expected: computed,
                    actual: carried,
                });
            }
        }

        Ok(Self {
            from,
            to,
            transaction_id,
            session_id,
            command,
            transfer_area,
            payload,
        })
    }
}

/// Negated 16-bit byte sum.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
        .wrapping_neg()
}

fn frame_body_len(buf: &[u8]) -> Result<usize> {
    if buf.len() < PREFIX_LEN {
        return Err(Error::TruncatedFrame {
            needed: PREFIX_LEN,
            available: buf.len(),
        });
    }
    if buf[..2] != STX {
        return Err(Error::MalformedFrame("missing start marker"));
    }
    let body_len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
    if body_len < HEADER_LEN {
        return Err(Error::MalformedFrame("length shorter than header"));
    }
    Ok(body_len)
}

/// Read one packet off `io`: prefix first, then exactly the announced rest.
pub fn read_packet(io: &mut dyn Transport, verify: bool) -> Result<TxPacket> {
    let mut frame = io.read(PREFIX_LEN)?;
    let body_len = frame_body_len(&frame)?;
    frame.extend(io.read(body_len + SUFFIX_LEN)?);

    if log::log_enabled!(log::Level::Trace) {
        log::trace!("TX: RX {} bytes: {:02X?}", frame.len(), frame);
    }
    TxPacket::decode(&frame, verify)
}
