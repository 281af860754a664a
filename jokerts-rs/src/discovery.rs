//! Program discovery hook.
//!
//! Feeds PAT, SDT and ATSC PSIP packets (and the PMT PIDs the PAT points
//! at) into a section demultiplexer and turns its tables into program
//! registry updates.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use jokerts_psi::{pid, PatEntry, PatTable, PmtTable, PsiTable, SdtTable, SectionDemux, VctTable};

use crate::hooks::{HookContext, PacketHook};
use crate::registry::ElementaryStream;

/// PIDs the discovery hook is registered on at init.
pub const BASE_PIDS: [u16; 3] = [pid::PAT, pid::SDT, pid::ATSC_PSIP];

#[derive(Default)]
pub struct ProgramDiscovery {
    demux: SectionDemux,
    /// PMT PIDs currently followed.
    pmt_pids: BTreeSet<u16>,
    /// Version of the PAT being collected.
    pat_version: Option<u8>,
    /// Programs of each section of that version, by section number.
    pat_sections: BTreeMap<u8, Vec<PatEntry>>,
}

impl ProgramDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn on_pat(&mut self, pat: PatTable, ctx: &mut HookContext<'_>) {
        debug!(
            "[ProgramDiscovery] PAT v{} section {}/{}: TSID 0x{:04X}, {} programs",
            pat.version_number,
            pat.section_number,
            pat.last_section_number,
            pat.transport_stream_id,
            pat.programs.len()
        );

        if self.pat_version != Some(pat.version_number) {
            self.pat_version = Some(pat.version_number);
            self.pat_sections.clear();
        }

        for entry in &pat.programs {
            let pmt_pid = entry.pid;
            ctx.upsert_program(entry.program_number, |p| p.pmt_pid = Some(pmt_pid));
            self.follow_pmt(pmt_pid, ctx);
        }
        self.pat_sections.insert(pat.section_number, pat.programs);

        // stale PMT PIDs are only known once every section of the version is in
        let complete = (0..=pat.last_section_number).all(|n| self.pat_sections.contains_key(&n));
        if complete {
            self.release_stale_pmt_pids(ctx);
        }
    }

    fn follow_pmt(&mut self, pmt_pid: u16, ctx: &mut HookContext<'_>) {
        if BASE_PIDS.contains(&pmt_pid) || !self.pmt_pids.insert(pmt_pid) {
            return;
        }
        if let Err(e) = ctx.attach(pmt_pid) {
            warn!("[ProgramDiscovery] cannot follow PMT PID 0x{:04X}: {}", pmt_pid, e);
        }
    }

    /// Stop following PMT PIDs no section of the complete PAT announces.
    ///
    /// Programs stay in the registry; only their PMT PIDs are released.
    fn release_stale_pmt_pids(&mut self, ctx: &mut HookContext<'_>) {
        let announced: BTreeSet<u16> = self.pat_sections.values().flatten().map(|e| e.pid).collect();
        let stale: Vec<u16> = self.pmt_pids.difference(&announced).copied().collect();
        for pmt_pid in stale {
            debug!("[ProgramDiscovery] PMT PID 0x{:04X} no longer announced", pmt_pid);
            self.pmt_pids.remove(&pmt_pid);
            ctx.detach(pmt_pid);
            self.demux.reset_pid(pmt_pid);
        }
    }

    fn on_pmt(&mut self, pmt: PmtTable, ctx: &mut HookContext<'_>) {
        debug!(
            "[ProgramDiscovery] PMT program {} v{}: {} streams",
            pmt.program_number,
            pmt.version_number,
            pmt.streams.len()
        );
        let has_video = pmt.has_video();
        let has_audio = pmt.has_audio();
        ctx.upsert_program(pmt.program_number, |p| {
            p.set_streams(pmt.streams.iter().map(|s| ElementaryStream {
                pid: s.elementary_pid,
                stream_type: s.stream_type,
            }));
            p.has_video = has_video;
            p.has_audio = has_audio;
        });
    }

    fn on_sdt(&mut self, sdt: SdtTable, ctx: &mut HookContext<'_>) {
        if !sdt.actual {
            return;
        }
        debug!(
            "[ProgramDiscovery] SDT v{}: TSID 0x{:04X}, {} services",
            sdt.version_number,
            sdt.transport_stream_id,
            sdt.services.len()
        );
        for service in &sdt.services {
            let Some(desc) = &service.service_descriptor else {
                continue;
            };
            ctx.upsert_program(service.service_id, |p| {
                if !desc.service_name.is_empty() {
                    p.name = Some(desc.service_name.clone());
                }
                if !desc.provider_name.is_empty() {
                    p.provider = Some(desc.provider_name.clone());
                }
                p.service_type = Some(desc.service_type);
            });
        }
    }

    fn on_vct(&mut self, vct: VctTable, ctx: &mut HookContext<'_>) {
        for channel in &vct.channels {
            // 0 is an inactive channel, 0xFFFF an analog one
            if channel.program_number == 0 || channel.program_number == 0xFFFF {
                continue;
            }
            ctx.upsert_program(channel.program_number, |p| {
                if !channel.short_name.is_empty() {
                    p.name = Some(channel.short_name.clone());
                }
                p.service_type = Some(channel.service_type);
                p.virtual_channel = Some((channel.major_channel_number, channel.minor_channel_number));
            });
        }
    }
}

impl PacketHook for ProgramDiscovery {
    fn on_packet(&mut self, _pid: u16, packet: &[u8], ctx: &mut HookContext<'_>) {
        let mut tables = Vec::new();
        self.demux.feed(packet, |table| tables.push(table));

        for table in tables {
            match table {
                PsiTable::Pat(pat) => self.on_pat(pat, ctx),
                PsiTable::Pmt(pmt) => self.on_pmt(pmt, ctx),
                PsiTable::Sdt(sdt) => self.on_sdt(sdt, ctx),
                PsiTable::Vct(vct) => self.on_vct(vct, ctx),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders for PSI packets used by discovery and engine tests.

    use jokerts_psi::crc32_mpeg2;

    pub fn section(table_id: u8, extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
        numbered_section(table_id, extension, version, 0, 0, body)
    }

    pub fn numbered_section(
        table_id: u8,
        extension: u16,
        version: u8,
        number: u8,
        last: u8,
        body: &[u8],
    ) -> Vec<u8> {
        let section_length = 5 + body.len() + 4;
        let mut s = vec![
            table_id,
            0xB0 | ((section_length >> 8) as u8 & 0x0F),
            section_length as u8,
            (extension >> 8) as u8,
            extension as u8,
            0xC1 | ((version & 0x1F) << 1),
            number,
            last,
        ];
        s.extend_from_slice(body);
        let crc = crc32_mpeg2(&s);
        s.extend_from_slice(&crc.to_be_bytes());
        s
    }

    /// Single-packet carriage of a short section.
    pub fn packet(pid: u16, cc: u8, section: &[u8]) -> [u8; 188] {
        assert!(section.len() <= 183);
        let mut pkt = [0xFFu8; 188];
        pkt[0] = 0x47;
        pkt[1] = 0x40 | ((pid >> 8) as u8 & 0x1F);
        pkt[2] = pid as u8;
        pkt[3] = 0x10 | (cc & 0x0F);
        pkt[4] = 0;
        pkt[5..5 + section.len()].copy_from_slice(section);
        pkt
    }

    pub fn pat(version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
        pat_section(version, 0, 0, programs)
    }

    pub fn pat_section(version: u8, number: u8, last: u8, programs: &[(u16, u16)]) -> Vec<u8> {
        let mut body = Vec::new();
        for &(program, pmt_pid) in programs {
            body.extend_from_slice(&program.to_be_bytes());
            body.push(0xE0 | ((pmt_pid >> 8) as u8 & 0x1F));
            body.push(pmt_pid as u8);
        }
        numbered_section(0x00, 0x0001, version, number, last, &body)
    }

    pub fn pmt(program: u16, streams: &[(u8, u16)]) -> Vec<u8> {
        let mut body = vec![0xE1, 0x00, 0xF0, 0x00];
        for &(stream_type, es_pid) in streams {
            body.push(stream_type);
            body.push(0xE0 | ((es_pid >> 8) as u8 & 0x1F));
            body.push(es_pid as u8);
            body.extend_from_slice(&[0xF0, 0x00]);
        }
        section(0x02, program, 0, &body)
    }

    pub fn sdt(services: &[(u16, &str, &str)]) -> Vec<u8> {
        let mut body = vec![0x20, 0x85, 0xFF];
        for &(sid, provider, name) in services {
            let desc_len = 3 + provider.len() + name.len();
            body.extend_from_slice(&sid.to_be_bytes());
            body.push(0xFD);
            body.push(0x80 | (((desc_len + 2) >> 8) as u8 & 0x0F));
            body.push((desc_len + 2) as u8);
            body.extend_from_slice(&[0x48, desc_len as u8, 0x01, provider.len() as u8]);
            body.extend_from_slice(provider.as_bytes());
            body.push(name.len() as u8);
            body.extend_from_slice(name.as_bytes());
        }
        section(0x42, 0x0001, 0, &body)
    }
}
