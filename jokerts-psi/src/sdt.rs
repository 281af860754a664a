//! SDT (Service Description Table) parsing.
//!
//! The SDT is transmitted on PID 0x0011 and names the services of a
//! transport stream. Only the service descriptor of each entry is kept.

use crate::descriptor_tag;
use crate::descriptors::{find_descriptor, ServiceDescriptor};
use crate::error::PsiError;
use crate::psi::PsiSection;
use crate::table_id;

/// Service entry in the SDT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdtService {
    /// Service ID, equal to the program number in the PAT.
    pub service_id: u16,
    /// `None` when the entry has no usable service descriptor.
    pub service_descriptor: Option<ServiceDescriptor>,
}

impl SdtService {
    pub fn service_name(&self) -> Option<&str> {
        self.service_descriptor
            .as_ref()
            .map(|d| d.service_name.as_str())
    }
}

/// One decoded SDT section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdtTable {
    pub transport_stream_id: u16,
    pub version_number: u8,
    /// Describes the transport stream being received (table 0x42).
    pub actual: bool,
    pub services: Vec<SdtService>,
}

/// Bytes before the service loop: original_network_id and a reserved byte.
const SDT_PREFIX: usize = 3;
/// service_id, flags, running status and descriptors_loop_length.
const SERVICE_ENTRY_HEADER: usize = 5;

impl SdtTable {
    pub fn parse(section: &PsiSection) -> Result<Self, PsiError> {
        let actual = match section.header.table_id {
            table_id::SDT_ACTUAL => true,
            table_id::SDT_OTHER => false,
            other => {
                return Err(PsiError::UnexpectedTable {
                    expected: "SDT",
                    actual: other,
                })
            }
        };

        let data = section.data;
        if data.len() < SDT_PREFIX {
            return Err(PsiError::too_short("SDT", SDT_PREFIX, data.len()));
        }

        let mut services = Vec::new();
        let mut rest = &data[SDT_PREFIX..];
        while rest.len() >= SERVICE_ENTRY_HEADER {
            let service_id = u16::from_be_bytes([rest[0], rest[1]]);
            let loop_len = u16::from_be_bytes([rest[3] & 0x0F, rest[4]]) as usize;
            let Some(descriptors) = rest.get(SERVICE_ENTRY_HEADER..SERVICE_ENTRY_HEADER + loop_len) else {
                break;
            };

            services.push(SdtService {
                service_id,
                service_descriptor: find_descriptor(descriptors, descriptor_tag::SERVICE)
                    .and_then(|body| ServiceDescriptor::parse(body).ok()),
            });
            rest = &rest[SERVICE_ENTRY_HEADER + loop_len..];
        }

        Ok(SdtTable {
            transport_stream_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            actual,
            services,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psi::PsiHeader;

    fn section(table_id: u8, data: &[u8]) -> PsiSection<'_> {
        PsiSection {
            header: PsiHeader {
                table_id,
                section_syntax_indicator: true,
                section_length: (5 + data.len() + 4) as u16,
                table_id_extension: 0x0401,
                version_number: 1,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            },
            data,
            crc32: 0,
        }
    }

    #[test]
    fn test_parse_sdt() {
        let data = [
            0x20, 0x85, 0xFF, // original network ID, reserved
            0x01, 0x01, 0x01, 0x80, 0x0C, // service 0x0101, running, 12 descriptor bytes
            0x48, 0x0A, 0x01, 0x03, b'A', b'B', b'C', 0x04, b'C', b'H', b'0', b'1',
            0x01, 0x02, 0x01, 0x80, 0x00, // service 0x0102, no descriptors
        ];

        let sdt = SdtTable::parse(&section(table_id::SDT_ACTUAL, &data)).unwrap();

        assert!(sdt.actual);
        assert_eq!(sdt.transport_stream_id, 0x0401);
        assert_eq!(sdt.services.len(), 2);

        let named = &sdt.services[0];
        assert_eq!(named.service_id, 0x0101);
        assert_eq!(named.service_name(), Some("CH01"));
        let desc = named.service_descriptor.as_ref().unwrap();
        assert_eq!(desc.service_type, 0x01);
        assert_eq!(desc.provider_name, "ABC");

        assert_eq!(sdt.services[1].service_id, 0x0102);
        assert!(sdt.services[1].service_descriptor.is_none());
    }

    #[test]
    fn test_truncated_entry_ends_loop() {
        let data = [0x20, 0x85, 0xFF, 0x01, 0x01, 0x01, 0x80, 0x0C, 0x48, 0x0A];
        let sdt = SdtTable::parse(&section(table_id::SDT_OTHER, &data)).unwrap();
        assert!(!sdt.actual);
        assert!(sdt.services.is_empty());
    }

    #[test]
    fn test_reject_other_table() {
        let data = [0u8; 3];
        assert!(SdtTable::parse(&section(table_id::PAT, &data)).is_err());
    }
}
