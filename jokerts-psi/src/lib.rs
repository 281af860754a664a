//! PSI/SI section demultiplexer for MPEG transport streams.
//!
//! This crate decodes the section tables needed to discover the services
//! carried by a transport stream. It is fed whole 188-byte packets and
//! reports decoded tables; it never owns the stream itself.
//!
//! # Supported Tables
//! - PAT (Program Association Table) - PID 0x0000
//! - PMT (Program Map Table) - Variable PIDs from PAT
//! - SDT (Service Description Table) - PID 0x0011
//! - TVCT/CVCT (ATSC Virtual Channel Table) - PID 0x1FFB
//!
//! # Usage
//! ```
//! use jokerts_psi::{PsiTable, SectionDemux};
//!
//! let mut demux = SectionDemux::new();
//! let packet = [0x47u8; 188];
//! demux.feed(&packet, |table| match table {
//!     PsiTable::Pat(pat) => println!("TSID: {}", pat.transport_stream_id),
//!     _ => {}
//! });
//! ```

mod demux;
mod descriptors;
mod error;
mod packet;
mod pat;
mod pmt;
mod psi;
mod sdt;
mod vct;

pub use demux::{PsiTable, SectionDemux};
pub use descriptors::{
    decode_dvb_string, find_descriptor, parse_descriptor_loop, service_type_name, ServiceDescriptor,
};
pub use error::PsiError;
pub use packet::{packet_pid, TsHeader, TsPacket, SYNC_BYTE, TS_PACKET_SIZE};
pub use pat::{PatEntry, PatTable};
pub use pmt::{stream_type, PmtStream, PmtTable};
pub use psi::{crc32_mpeg2, PsiHeader, PsiSection, SectionCollector};
pub use sdt::{SdtService, SdtTable};
pub use vct::{VctChannel, VctTable};

/// Well-known PIDs in MPEG-TS.
pub mod pid {
    /// Program Association Table PID.
    pub const PAT: u16 = 0x0000;
    /// Service Description Table (actual) PID.
    pub const SDT: u16 = 0x0011;
    /// ATSC PSIP base PID (MGT, VCT, STT).
    pub const ATSC_PSIP: u16 = 0x1FFB;
    /// Null packet PID (stuffing).
    pub const NULL: u16 = 0x1FFF;
    /// Largest valid 13-bit PID.
    pub const MAX: u16 = 0x1FFF;
}

/// Table IDs.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Program Map Section.
    pub const PMT: u8 = 0x02;
    /// Service Description Section (actual).
    pub const SDT_ACTUAL: u8 = 0x42;
    /// Service Description Section (other).
    pub const SDT_OTHER: u8 = 0x46;
    /// ATSC Terrestrial Virtual Channel Table.
    pub const TVCT: u8 = 0xC8;
    /// ATSC Cable Virtual Channel Table.
    pub const CVCT: u8 = 0xC9;
    /// Section stuffing.
    pub const STUFFING: u8 = 0xFF;
}

/// Descriptor tags.
pub mod descriptor_tag {
    /// Service descriptor.
    pub const SERVICE: u8 = 0x48;
}
