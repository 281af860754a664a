//! ATSC VCT (Virtual Channel Table) parsing.
//!
//! Terrestrial (0xC8) and cable (0xC9) VCTs are carried on the PSIP base
//! PID 0x1FFB and map program numbers to channel numbers and short names.

use crate::error::PsiError;
use crate::psi::PsiSection;
use crate::table_id;

/// Fixed part of one channel record.
const CHANNEL_RECORD_LEN: usize = 32;

/// One virtual channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VctChannel {
    /// Up to seven UTF-16 characters, trailing NULs removed.
    pub short_name: String,
    pub major_channel_number: u16,
    pub minor_channel_number: u16,
    pub modulation_mode: u8,
    pub channel_tsid: u16,
    /// Program number (matches the PAT).
    pub program_number: u16,
    pub access_controlled: bool,
    pub hidden: bool,
    /// 0x02 digital TV, 0x03 audio, 0x04 data.
    pub service_type: u8,
    pub source_id: u16,
}

/// Parsed TVCT or CVCT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VctTable {
    pub transport_stream_id: u16,
    pub version_number: u8,
    /// Cable VCT (0xC9) rather than terrestrial.
    pub cable: bool,
    pub channels: Vec<VctChannel>,
}

impl VctTable {
    pub fn parse(section: &PsiSection) -> Result<Self, PsiError> {
        let cable = match section.header.table_id {
            table_id::TVCT => false,
            table_id::CVCT => true,
            other => {
                return Err(PsiError::UnexpectedTable {
                    expected: "VCT",
                    actual: other,
                })
            }
        };

        let data = section.data;
        if data.len() < 2 {
            return Err(PsiError::too_short("VCT", 2, data.len()));
        }

        // data[0] is protocol_version
        let num_channels = data[1] as usize;
        let mut vct = VctTable {
            transport_stream_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            cable,
            channels: Vec::with_capacity(num_channels),
        };

        let mut offset = 2;
        for _ in 0..num_channels {
            if offset + CHANNEL_RECORD_LEN > data.len() {
                return Err(PsiError::InvalidLength("VCT channel loop"));
            }
            let rec = &data[offset..offset + CHANNEL_RECORD_LEN];

            let units: Vec<u16> = rec[..14]
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            let short_name = String::from_utf16_lossy(&units);

            let major_channel_number = ((rec[14] as u16 & 0x0F) << 6) | (rec[15] as u16 >> 2);
            let minor_channel_number = ((rec[15] as u16 & 0x03) << 8) | rec[16] as u16;
            let descriptors_length = ((rec[30] as usize & 0x03) << 8) | rec[31] as usize;

            vct.channels.push(VctChannel {
                short_name,
                major_channel_number,
                minor_channel_number,
                modulation_mode: rec[17],
                // rec[18..22] is carrier_frequency
                channel_tsid: u16::from_be_bytes([rec[22], rec[23]]),
                program_number: u16::from_be_bytes([rec[24], rec[25]]),
                access_controlled: rec[26] & 0x20 != 0,
                hidden: rec[26] & 0x10 != 0,
                service_type: rec[27] & 0x3F,
                source_id: u16::from_be_bytes([rec[28], rec[29]]),
            });

            offset += CHANNEL_RECORD_LEN + descriptors_length;
        }

        Ok(vct)
    }
}

#[cfg(test)]
pub(crate) fn build_channel(name: &str, major: u16, minor: u16, program: u16) -> Vec<u8> {
    let mut rec = Vec::with_capacity(CHANNEL_RECORD_LEN);
    let mut units: Vec<u16> = name.encode_utf16().take(7).collect();
    units.resize(7, 0);
    for u in units {
        rec.extend_from_slice(&u.to_be_bytes());
    }
    rec.push(0xF0 | ((major >> 6) as u8 & 0x0F));
    rec.push(((major as u8 & 0x3F) << 2) | ((minor >> 8) as u8 & 0x03));
    rec.push(minor as u8);
    rec.push(0x04); // 8VSB
    rec.extend_from_slice(&[0, 0, 0, 0]);
    rec.extend_from_slice(&0x0001u16.to_be_bytes());
    rec.extend_from_slice(&program.to_be_bytes());
    rec.push(0x0D); // ETM none, not access controlled, not hidden
    rec.push(0xC2); // digital TV
    rec.extend_from_slice(&0x0010u16.to_be_bytes());
    rec.extend_from_slice(&[0xFC, 0x00]);
    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::PsiHeader;

    #[test]
    fn test_parse_tvct() {
        let mut data = vec![0x00, 0x02];
        data.extend(build_channel("KQED-HD", 9, 1, 3));
        data.extend(build_channel("KQED", 9, 2, 4));
        data.extend_from_slice(&[0xFC, 0x00]);

        let section = PsiSection {
            header: PsiHeader {
                table_id: table_id::TVCT,
                section_syntax_indicator: true,
                section_length: (5 + data.len() + 4) as u16,
                table_id_extension: 0x0BB9,
                version_number: 2,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            },
            data: &data,
            crc32: 0,
        };

        let vct = VctTable::parse(&section).unwrap();
        assert!(!vct.cable);
        assert_eq!(vct.channels.len(), 2);
        assert_eq!(vct.channels[0].short_name, "KQED-HD");
        assert_eq!(vct.channels[0].major_channel_number, 9);
        assert_eq!(vct.channels[0].minor_channel_number, 1);
        assert_eq!(vct.channels[0].program_number, 3);
        assert_eq!(vct.channels[0].service_type, 0x02);
        assert_eq!(vct.channels[1].short_name, "KQED");
        assert_eq!(vct.channels[1].program_number, 4);
    }
}
