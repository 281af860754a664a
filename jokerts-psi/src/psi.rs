//! PSI (Program Specific Information) section parsing.
//!
//! Common section header parsing, CRC validation and reassembly of
//! sections that span several TS packets.

use crate::error::PsiError;
use crate::table_id;

/// PSI section header (common to all PSI tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension (for long sections).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

/// A parsed PSI section.
#[derive(Debug, Clone)]
pub struct PsiSection<'a> {
    /// Section header.
    pub header: PsiHeader,
    /// Section data (after header, before CRC).
    pub data: &'a [u8],
    /// CRC32 value.
    pub crc32: u32,
}

impl<'a> PsiSection<'a> {
    /// Parse a PSI section starting at its table_id byte.
    pub fn parse(data: &'a [u8]) -> Result<Self, PsiError> {
        if data.len() < 3 {
            return Err(PsiError::too_short("section header", 3, data.len()));
        }

        let table_id = data[0];
        let section_syntax_indicator = data[1] & 0x80 != 0;
        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;

        if section_length < 5 {
            return Err(PsiError::InvalidLength("section"));
        }

        let total_length = 3 + section_length as usize;
        if data.len() < total_length {
            return Err(PsiError::too_short("section", total_length, data.len()));
        }

        let header = if section_syntax_indicator {
            if total_length < 12 {
                return Err(PsiError::InvalidLength("long section"));
            }
            PsiHeader {
                table_id,
                section_syntax_indicator,
                section_length,
                table_id_extension: ((data[3] as u16) << 8) | data[4] as u16,
                version_number: (data[5] >> 1) & 0x1F,
                current_next_indicator: data[5] & 0x01 != 0,
                section_number: data[6],
                last_section_number: data[7],
            }
        } else {
            PsiHeader {
                table_id,
                section_syntax_indicator,
                section_length,
                table_id_extension: 0,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            }
        };

        let data_start = if section_syntax_indicator { 8 } else { 3 };
        let crc_offset = total_length - 4;

        let crc32 = u32::from_be_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);

        Ok(PsiSection {
            header,
            data: &data[data_start..crc_offset],
            crc32,
        })
    }

    /// Parse a section and reject it if its CRC does not match.
    pub fn parse_checked(data: &'a [u8]) -> Result<Self, PsiError> {
        let section = Self::parse(data)?;
        let calculated = crc32_mpeg2(&data[..section.total_length() - 4]);
        if calculated != section.crc32 {
            return Err(PsiError::CrcMismatch {
                calculated,
                carried: section.crc32,
            });
        }
        Ok(section)
    }

    /// Total section length including header and CRC.
    pub fn total_length(&self) -> usize {
        3 + self.header.section_length as usize
    }
}

/// Reassembles sections carried on one PID.
///
/// Feed it the payload of every packet on the PID, in order. Each complete
/// section is handed to the callback as a slice starting at its table_id.
#[derive(Debug, Default)]
pub struct SectionCollector {
    buffer: Vec<u8>,
    last_cc: Option<u8>,
    synced: bool,
}

impl SectionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one packet payload; returns the number of sections completed.
    pub fn push<F>(&mut self, payload: &[u8], cc: u8, payload_unit_start: bool, mut emit: F) -> usize
    where
        F: FnMut(&[u8]),
    {
        if let Some(last) = self.last_cc {
            if cc == last {
                // duplicate packet
                return 0;
            }
            if cc != (last + 1) & 0x0F {
                self.buffer.clear();
                self.synced = false;
            }
        }
        self.last_cc = Some(cc);

        let mut completed = 0;

        if payload_unit_start {
            let Some(&pointer) = payload.first() else {
                return 0;
            };
            let section_start = 1 + pointer as usize;
            if section_start > payload.len() {
                self.buffer.clear();
                self.synced = false;
                return 0;
            }

            if self.synced {
                self.buffer.extend_from_slice(&payload[1..section_start]);
                completed += self.drain(&mut emit);
            }

            self.buffer.clear();
            self.synced = true;
            self.buffer.extend_from_slice(&payload[section_start..]);
        } else if self.synced {
            self.buffer.extend_from_slice(payload);
        } else {
            return 0;
        }

        completed + self.drain(&mut emit)
    }

    fn drain<F>(&mut self, emit: &mut F) -> usize
    where
        F: FnMut(&[u8]),
    {
        let mut completed = 0;
        while self.synced && self.buffer.len() >= 3 {
            if self.buffer[0] == table_id::STUFFING {
                self.buffer.clear();
                self.synced = false;
                break;
            }

            let section_length = ((self.buffer[1] as usize & 0x0F) << 8) | self.buffer[2] as usize;
            let total = 3 + section_length;
            if self.buffer.len() < total {
                break;
            }

            emit(&self.buffer[..total]);
            completed += 1;
            self.buffer.drain(..total);

            if self.buffer.is_empty() {
                self.synced = false;
            }
        }
        completed
    }
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x80000000 != 0 {
                    crc = (crc << 1) ^ 0x04C11DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

/// Build a complete long section (header, body, CRC) for tests.
#[cfg(test)]
pub(crate) fn build_section(table_id: u8, extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let section_length = 5 + body.len() + 4;
    let mut out = vec![
        table_id,
        0xB0 | ((section_length >> 8) as u8 & 0x0F),
        section_length as u8,
        (extension >> 8) as u8,
        extension as u8,
        0xC1 | ((version & 0x1F) << 1),
        0x00,
        0x00,
    ];
    out.extend_from_slice(body);
    let crc = crc32_mpeg2(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}
