//! PMT (Program Map Table) parsing.
//!
//! The PMT lists the elementary streams (video, audio, data) of one program.

use crate::error::PsiError;
use crate::psi::PsiSection;
use crate::table_id;

/// Stream type values and their classification.
pub mod stream_type {
    pub const MPEG1_VIDEO: u8 = 0x01;
    pub const MPEG2_VIDEO: u8 = 0x02;
    pub const MPEG1_AUDIO: u8 = 0x03;
    pub const MPEG2_AUDIO: u8 = 0x04;
    pub const PRIVATE_SECTIONS: u8 = 0x05;
    pub const PES_PRIVATE_DATA: u8 = 0x06;
    /// AAC in ADTS framing.
    pub const AAC_AUDIO: u8 = 0x0F;
    /// AAC in LATM framing.
    pub const AAC_LATM: u8 = 0x11;
    pub const H264_VIDEO: u8 = 0x1B;
    pub const H265_VIDEO: u8 = 0x24;
    /// ATSC A/52.
    pub const AC3_AUDIO: u8 = 0x81;
    pub const EAC3_AUDIO: u8 = 0x87;

    pub fn is_video(stream_type: u8) -> bool {
        matches!(stream_type, MPEG1_VIDEO | MPEG2_VIDEO | H264_VIDEO | H265_VIDEO)
    }

    pub fn is_audio(stream_type: u8) -> bool {
        matches!(
            stream_type,
            MPEG1_AUDIO | MPEG2_AUDIO | AAC_AUDIO | AAC_LATM | AC3_AUDIO | EAC3_AUDIO
        )
    }

    /// Short label for listings; "Unknown" for unlisted types.
    pub fn name(stream_type: u8) -> &'static str {
        match stream_type {
            MPEG1_VIDEO => "MPEG-1 Video",
            MPEG2_VIDEO => "MPEG-2 Video",
            MPEG1_AUDIO => "MPEG-1 Audio",
            MPEG2_AUDIO => "MPEG-2 Audio",
            PRIVATE_SECTIONS => "Private Sections",
            PES_PRIVATE_DATA => "PES Private Data",
            AAC_AUDIO => "AAC",
            AAC_LATM => "AAC LATM",
            H264_VIDEO => "H.264",
            H265_VIDEO => "HEVC",
            AC3_AUDIO => "AC-3",
            EAC3_AUDIO => "E-AC-3",
            _ => "Unknown",
        }
    }
}

/// An elementary stream of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

/// One decoded PMT section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmtTable {
    pub program_number: u16,
    pub version_number: u8,
    pub streams: Vec<PmtStream>,
}

/// PCR_PID and program_info_length.
const PMT_PREFIX: usize = 4;
/// stream_type, elementary_PID and ES_info_length.
const STREAM_ENTRY_HEADER: usize = 5;

impl PmtTable {
    pub fn parse(section: &PsiSection) -> Result<Self, PsiError> {
        if section.header.table_id != table_id::PMT {
            return Err(PsiError::UnexpectedTable {
                expected: "PMT",
                actual: section.header.table_id,
            });
        }

        let data = section.data;
        if data.len() < PMT_PREFIX {
            return Err(PsiError::too_short("PMT", PMT_PREFIX, data.len()));
        }
        let program_info_len = u16::from_be_bytes([data[2] & 0x0F, data[3]]) as usize;
        let Some(mut rest) = data.get(PMT_PREFIX + program_info_len..) else {
            return Err(PsiError::InvalidLength("program info"));
        };

        let mut streams = Vec::new();
        while rest.len() >= STREAM_ENTRY_HEADER {
            let es_info_len = u16::from_be_bytes([rest[3] & 0x0F, rest[4]]) as usize;
            if rest.len() < STREAM_ENTRY_HEADER + es_info_len {
                break;
            }
            streams.push(PmtStream {
                stream_type: rest[0],
                elementary_pid: u16::from_be_bytes([rest[1] & 0x1F, rest[2]]),
            });
            rest = &rest[STREAM_ENTRY_HEADER + es_info_len..];
        }

        Ok(PmtTable {
            program_number: section.header.table_id_extension,
            version_number: section.header.version_number,
            streams,
        })
    }

    pub fn has_video(&self) -> bool {
        self.streams.iter().any(|s| stream_type::is_video(s.stream_type))
    }

    pub fn has_audio(&self) -> bool {
        self.streams.iter().any(|s| stream_type::is_audio(s.stream_type))
    }
}
