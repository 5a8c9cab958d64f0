//! Request/reply packets exchanged over a service's FIFO pair.

use crate::ProtocolError;

/// Protocol id carried in byte 0 of every packet.
pub const PACKET_PROTOCOL: u8 = 1;
pub const PACKET_HEADER_LEN: usize = 3;
pub const PACKET_MAX_PAYLOAD: usize = 255;
pub const PACKET_MAX_LEN: usize = PACKET_HEADER_LEN + PACKET_MAX_PAYLOAD;

/// Type id of a client command packet.
pub const PACKET_TYPE_COMMAND: u8 = b'C';
/// Type id of the canonical reply: a 4-byte little-endian error code.
pub const PACKET_TYPE_ERROR: u8 = b'E';

const ERROR_PAYLOAD_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    protocol: u8,
    kind: u8,
    payload: Vec<u8>,
}

impl ControlPacket {
    pub fn new(protocol: u8, kind: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() > PACKET_MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            protocol,
            kind,
            payload: payload.to_vec(),
        })
    }

    /// A one-byte command packet, as sent by `perpctl`.
    pub fn command(code: u8) -> Self {
        Self {
            protocol: PACKET_PROTOCOL,
            kind: PACKET_TYPE_COMMAND,
            payload: vec![code],
        }
    }

    /// The canonical reply: zero for success, otherwise an errno value.
    pub fn error_reply(code: u32) -> Self {
        Self {
            protocol: PACKET_PROTOCOL,
            kind: PACKET_TYPE_ERROR,
            payload: code.to_le_bytes().to_vec(),
        }
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Number of bytes this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        PACKET_HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.wire_len());
        bytes.push(self.protocol);
        bytes.push(self.kind);
        // new() bounds the payload at 255
        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Decode exactly the bytes returned by one read.
    ///
    /// The byte count must equal the declared payload size plus the header;
    /// a short or long read is a framing error, never a partial packet.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < PACKET_HEADER_LEN {
            return Err(ProtocolError::ShortPacket(bytes.len()));
        }
        let declared = usize::from(bytes[2]);
        if bytes.len() != declared + PACKET_HEADER_LEN {
            return Err(ProtocolError::SizeMismatch {
                declared,
                read: bytes.len(),
            });
        }
        Ok(Self {
            protocol: bytes[0],
            kind: bytes[1],
            payload: bytes[PACKET_HEADER_LEN..].to_vec(),
        })
    }

    /// Interpret a reply as the canonical `'E'` packet and return its code.
    pub fn reply_code(&self) -> Result<u32, ProtocolError> {
        if self.protocol != PACKET_PROTOCOL {
            return Err(ProtocolError::ProtocolMismatch(self.protocol));
        }
        match (self.kind, <[u8; ERROR_PAYLOAD_LEN]>::try_from(self.payload.as_slice())) {
            (PACKET_TYPE_ERROR, Ok(code)) => Ok(u32::from_le_bytes(code)),
            _ => Err(ProtocolError::UnexpectedReply {
                kind: self.kind,
                len: self.payload.len(),
            }),
        }
    }
}
