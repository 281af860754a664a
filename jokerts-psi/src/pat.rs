//! PAT (Program Association Table) parsing.
//!
//! The PAT is transmitted on PID 0x0000 and maps every program to the PID
//! of its PMT. A large PAT may be split over several sections; each
//! decoded section lists only its own share of the programs.

use crate::error::PsiError;
use crate::psi::PsiSection;
use crate::table_id;

/// A program number and the PID its PMT is carried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pid: u16,
}

/// One decoded PAT section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatTable {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Programs announced by this section. The NIT entry (program 0) is
    /// not a program and is left out.
    pub programs: Vec<PatEntry>,
}

impl PatTable {
    pub fn parse(section: &PsiSection) -> Result<Self, PsiError> {
        let header = section.header;
        if header.table_id != table_id::PAT {
            return Err(PsiError::UnexpectedTable {
                expected: "PAT",
                actual: header.table_id,
            });
        }
        if section.data.len() % 4 != 0 {
            return Err(PsiError::InvalidLength("PAT program loop"));
        }

        let programs = section
            .data
            .chunks_exact(4)
            .map(|entry| PatEntry {
                program_number: u16::from_be_bytes([entry[0], entry[1]]),
                pid: u16::from_be_bytes([entry[2] & 0x1F, entry[3]]),
            })
            .filter(|entry| entry.program_number != 0)
            .collect();

        Ok(PatTable {
            transport_stream_id: header.table_id_extension,
            version_number: header.version_number,
            section_number: header.section_number,
            last_section_number: header.last_section_number,
            programs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::PsiHeader;

    fn section(data: &[u8], section_number: u8, last_section_number: u8) -> PsiSection<'_> {
        PsiSection {
            header: PsiHeader {
                table_id: table_id::PAT,
                section_syntax_indicator: true,
                section_length: (5 + data.len() + 4) as u16,
                table_id_extension: 0x1234,
                version_number: 1,
                current_next_indicator: true,
                section_number,
                last_section_number,
            },
            data,
            crc32: 0,
        }
    }

    #[test]
    fn test_parse_pat() {
        let data = [
            0x00, 0x00, 0xE0, 0x10, // NIT on 0x0010
            0x01, 0x01, 0xE1, 0x00, // program 0x0101 -> PMT 0x0100
            0x01, 0x02, 0xE2, 0x00, // program 0x0102 -> PMT 0x0200
        ];

        let pat = PatTable::parse(&section(&data, 1, 2)).unwrap();

        assert_eq!(pat.transport_stream_id, 0x1234);
        assert_eq!(pat.version_number, 1);
        assert_eq!((pat.section_number, pat.last_section_number), (1, 2));
        assert_eq!(
            pat.programs,
            vec![
                PatEntry { program_number: 0x0101, pid: 0x0100 },
                PatEntry { program_number: 0x0102, pid: 0x0200 },
            ]
        );
    }

    #[test]
    fn test_pat_odd_length() {
        let data = [0x01, 0x01, 0xE1];
        assert!(PatTable::parse(&section(&data, 0, 0)).is_err());
    }
}
