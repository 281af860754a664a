//! Per-PID section demultiplexer session.
//!
//! A `SectionDemux` is fed whole TS packets from any number of PIDs and
//! reports each newly seen table section, decoded.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::packet::TsPacket;
use crate::pat::PatTable;
use crate::pmt::PmtTable;
use crate::psi::{PsiSection, SectionCollector};
use crate::sdt::SdtTable;
use crate::table_id;
use crate::vct::VctTable;

/// A decoded table section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsiTable {
    Pat(PatTable),
    Pmt(PmtTable),
    Sdt(SdtTable),
    Vct(VctTable),
}

/// Identifies one version of one section of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SectionKey {
    pid: u16,
    table_id: u8,
    extension: u16,
    section_number: u8,
}

/// Demultiplexer session covering every PID it is fed.
#[derive(Debug, Default)]
pub struct SectionDemux {
    collectors: HashMap<u16, SectionCollector>,
    versions: HashMap<SectionKey, u8>,
    ignored_tables: HashSet<u8>,
}

impl SectionDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one 188-byte packet; decoded tables are passed to `on_table`.
    ///
    /// Packets with the transport error indicator set, scrambled packets
    /// and packets without payload are skipped.
    pub fn feed<F>(&mut self, packet: &[u8], mut on_table: F)
    where
        F: FnMut(PsiTable),
    {
        let parsed = match TsPacket::parse(packet) {
            Ok(p) => p,
            Err(e) => {
                trace!("[SectionDemux] skipping packet: {}", e);
                return;
            }
        };

        let header = parsed.header;
        if header.transport_error || header.is_scrambled() || parsed.payload.is_empty() {
            return;
        }

        let pid = header.pid;
        let mut sections: Vec<Vec<u8>> = Vec::new();
        self.collectors.entry(pid).or_default().push(
            parsed.payload,
            header.continuity_counter,
            header.payload_unit_start,
            |s| sections.push(s.to_vec()),
        );

        for raw in &sections {
            if let Some(table) = self.decode(pid, raw) {
                on_table(table);
            }
        }
    }

    /// Forget all partial sections and seen versions for a PID.
    pub fn reset_pid(&mut self, pid: u16) {
        self.collectors.remove(&pid);
        self.versions.retain(|k, _| k.pid != pid);
    }

    fn decode(&mut self, pid: u16, raw: &[u8]) -> Option<PsiTable> {
        let section = match PsiSection::parse_checked(raw) {
            Ok(s) => s,
            Err(e) => {
                debug!("[SectionDemux] PID 0x{:04X}: dropping section: {}", pid, e);
                return None;
            }
        };

        let header = section.header;
        if !header.section_syntax_indicator || !header.current_next_indicator {
            return None;
        }

        let key = SectionKey {
            pid,
            table_id: header.table_id,
            extension: header.table_id_extension,
            section_number: header.section_number,
        };
        if self.versions.get(&key) == Some(&header.version_number) {
            return None;
        }

        let decoded = match header.table_id {
            table_id::PAT => PatTable::parse(&section).map(PsiTable::Pat),
            table_id::PMT => PmtTable::parse(&section).map(PsiTable::Pmt),
            table_id::SDT_ACTUAL | table_id::SDT_OTHER => SdtTable::parse(&section).map(PsiTable::Sdt),
            table_id::TVCT | table_id::CVCT => VctTable::parse(&section).map(PsiTable::Vct),
            other => {
                if self.ignored_tables.insert(other) {
                    trace!("[SectionDemux] ignoring table 0x{:02X} on PID 0x{:04X}", other, pid);
                }
                return None;
            }
        };

        match decoded {
            Ok(table) => {
                debug!(
                    "[SectionDemux] PID 0x{:04X}: table 0x{:02X} ext 0x{:04X} version {} section {}",
                    pid, header.table_id, header.table_id_extension, header.version_number, header.section_number
                );
                self.versions.insert(key, header.version_number);
                Some(table)
            }
            Err(e) => {
                debug!("[SectionDemux] PID 0x{:04X}: table decode failed: {}", pid, e);
                None
            }
        }
    }
}

/// Wrap a section into TS packets on `pid`, starting at continuity counter `cc`.
#[cfg(test)]
pub(crate) fn packetize(pid: u16, mut cc: u8, section: &[u8]) -> Vec<[u8; 188]> {
    let mut packets = Vec::new();
    let mut remaining = section;
    let mut first = true;
    while first || !remaining.is_empty() {
        let mut pkt = [0xFFu8; 188];
        pkt[0] = 0x47;
        pkt[1] = ((pid >> 8) as u8 & 0x1F) | if first { 0x40 } else { 0 };
        pkt[2] = pid as u8;
        pkt[3] = 0x10 | (cc & 0x0F);
        let mut at = 4;
        if first {
            pkt[4] = 0;
            at = 5;
        }
        let n = remaining.len().min(188 - at);
        pkt[at..at + n].copy_from_slice(&remaining[..n]);
        remaining = &remaining[n..];
        packets.push(pkt);
        cc = (cc + 1) & 0x0F;
        first = false;
    }
    packets
}
