//! Descriptor parsing for PSI/SI tables.

use encoding_rs::Encoding;

use crate::error::PsiError;

/// Service descriptor (0x48).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service type.
    pub service_type: u8,
    /// Service provider name.
    pub provider_name: String,
    /// Service name.
    pub service_name: String,
}

impl ServiceDescriptor {
    /// Parse a service descriptor body (after tag and length).
    pub fn parse(data: &[u8]) -> Result<Self, PsiError> {
        if data.len() < 3 {
            return Err(PsiError::too_short("service descriptor", 3, data.len()));
        }

        let service_type = data[0];
        let provider_name_length = data[1] as usize;

        if data.len() < 2 + provider_name_length + 1 {
            return Err(PsiError::InvalidLength("provider name"));
        }

        let provider_name = decode_dvb_string(&data[2..2 + provider_name_length]);

        let service_name_offset = 2 + provider_name_length;
        let service_name_length = data[service_name_offset] as usize;

        if data.len() < service_name_offset + 1 + service_name_length {
            return Err(PsiError::InvalidLength("service name"));
        }

        let service_name = decode_dvb_string(
            &data[service_name_offset + 1..service_name_offset + 1 + service_name_length],
        );

        Ok(ServiceDescriptor {
            service_type,
            provider_name,
            service_name,
        })
    }
}

/// Short label for a DVB service type; "Unknown" for unlisted types.
pub fn service_type_name(service_type: u8) -> &'static str {
    match service_type {
        0x01 => "Digital TV",
        0x02 => "Digital Radio",
        0x03 => "Teletext",
        0x0C => "Data Broadcast",
        0x11 => "MPEG-2 HD TV",
        0x16 => "H.264 SD TV",
        0x19 => "H.264 HD TV",
        0x1F => "HEVC TV",
        _ => "Unknown",
    }
}

/// Split a descriptor loop into `(tag, body)` pairs.
pub fn parse_descriptor_loop(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut descriptors = Vec::new();
    let mut offset = 0;

    while offset + 2 <= data.len() {
        let tag = data[offset];
        let length = data[offset + 1] as usize;
        offset += 2;

        if offset + length > data.len() {
            break;
        }

        descriptors.push((tag, &data[offset..offset + length]));
        offset += length;
    }

    descriptors
}

/// Find the body of the first descriptor with the given tag.
pub fn find_descriptor(data: &[u8], tag: u8) -> Option<&[u8]> {
    parse_descriptor_loop(data)
        .into_iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, d)| d)
}

/// Decode a DVB SI text field (EN 300 468 Annex A) to UTF-8.
///
/// A leading byte below 0x20 selects the character table; without one the
/// default table is assumed, approximated here by Latin-1.
pub fn decode_dvb_string(data: &[u8]) -> String {
    let Some(&first) = data.first() else {
        return String::new();
    };

    let (encoding, body): (&'static Encoding, &[u8]) = match first {
        0x01 => (encoding_rs::ISO_8859_5, &data[1..]),
        0x02 => (encoding_rs::ISO_8859_6, &data[1..]),
        0x03 => (encoding_rs::ISO_8859_7, &data[1..]),
        0x04 => (encoding_rs::ISO_8859_8, &data[1..]),
        0x05 => (encoding_rs::WINDOWS_1254, &data[1..]),
        0x06 => (encoding_rs::ISO_8859_10, &data[1..]),
        0x07 => (encoding_rs::WINDOWS_874, &data[1..]),
        0x09 => (encoding_rs::ISO_8859_13, &data[1..]),
        0x0A => (encoding_rs::ISO_8859_14, &data[1..]),
        0x0B => (encoding_rs::ISO_8859_15, &data[1..]),
        0x10 if data.len() >= 3 => (iso_8859_part(data[2]), &data[3..]),
        0x11 => (encoding_rs::UTF_16BE, &data[1..]),
        0x15 => (encoding_rs::UTF_8, &data[1..]),
        0x00..=0x1F => (encoding_rs::WINDOWS_1252, &data[1..]),
        _ => (encoding_rs::WINDOWS_1252, data),
    };

    if encoding == encoding_rs::UTF_8 || encoding == encoding_rs::UTF_16BE {
        let (text, _) = encoding.decode_without_bom_handling(body);
        return text.into_owned();
    }

    // Single-byte tables reserve 0x80-0x9F for control codes.
    let cleaned: Vec<u8> = body
        .iter()
        .filter_map(|&b| match b {
            0x8A => Some(b'\n'),
            0x80..=0x9F => None,
            _ => Some(b),
        })
        .collect();
    let (text, _) = encoding.decode_without_bom_handling(&cleaned);
    text.into_owned()
}

fn iso_8859_part(part: u8) -> &'static Encoding {
    match part {
        0x02 => encoding_rs::ISO_8859_2,
        0x03 => encoding_rs::ISO_8859_3,
        0x04 => encoding_rs::ISO_8859_4,
        0x05 => encoding_rs::ISO_8859_5,
        0x06 => encoding_rs::ISO_8859_6,
        0x07 => encoding_rs::ISO_8859_7,
        0x08 => encoding_rs::ISO_8859_8,
        0x09 => encoding_rs::WINDOWS_1254,
        0x0A => encoding_rs::ISO_8859_10,
        0x0B => encoding_rs::WINDOWS_874,
        0x0D => encoding_rs::ISO_8859_13,
        0x0E => encoding_rs::ISO_8859_14,
        0x0F => encoding_rs::ISO_8859_15,
        0x10 => encoding_rs::ISO_8859_16,
        _ => encoding_rs::WINDOWS_1252,
    }
}
