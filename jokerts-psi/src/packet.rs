//! MPEG-TS packet header parsing.

use crate::error::PsiError;

/// TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// TS sync byte (0x47).
pub const SYNC_BYTE: u8 = 0x47;

/// Extract the 13-bit PID from a packet header.
///
/// The sync byte is not checked, so this works on any aligned span.
/// Spans shorter than a header yield the null PID.
#[inline]
pub fn packet_pid(data: &[u8]) -> u16 {
    if data.len() < 3 {
        return crate::pid::NULL;
    }
    ((data[1] as u16 & 0x1F) << 8) | data[2] as u16
}

/// The fields of a packet header the section demultiplexer acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub pid: u16,
    /// Transport scrambling control (2 bits).
    pub scrambling_control: u8,
    /// Adaptation field control (2 bits).
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
}

impl TsHeader {
    fn from_bytes(data: &[u8]) -> Self {
        TsHeader {
            transport_error: data[1] & 0x80 != 0,
            payload_unit_start: data[1] & 0x40 != 0,
            pid: packet_pid(data),
            scrambling_control: data[3] >> 6,
            adaptation_field_control: (data[3] >> 4) & 0x03,
            continuity_counter: data[3] & 0x0F,
        }
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }
}

/// A packet header and the payload after any adaptation field.
#[derive(Debug, Clone)]
pub struct TsPacket<'a> {
    pub header: TsHeader,
    /// Empty when the packet carries no payload or the adaptation field
    /// fills the packet.
    pub payload: &'a [u8],
}

impl<'a> TsPacket<'a> {
    /// Split a packet of at least 188 bytes into header and payload.
    pub fn parse(data: &'a [u8]) -> Result<Self, PsiError> {
        if data.len() < TS_PACKET_SIZE {
            return Err(PsiError::too_short("packet", TS_PACKET_SIZE, data.len()));
        }
        if data[0] != SYNC_BYTE {
            return Err(PsiError::InvalidSync(data[0]));
        }

        let header = TsHeader::from_bytes(data);
        let payload_start = if header.has_adaptation_field() {
            5 + data[4] as usize
        } else {
            4
        };
        let payload = if header.has_payload() && payload_start < TS_PACKET_SIZE {
            &data[payload_start..TS_PACKET_SIZE]
        } else {
            &[]
        };

        Ok(TsPacket { header, payload })
    }
}
