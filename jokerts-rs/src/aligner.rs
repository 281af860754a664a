//! Realigns raw transfer chunks onto 188-byte TS packet boundaries.
//!
//! Alignment is acquired by finding three sync bytes at a 188-byte stride.
//! Once aligned, every 188-byte span is emitted whatever its first byte;
//! only a run of spans without a sync byte drops alignment and starts a new
//! scan at the offending span.

use log::{debug, warn};

use jokerts_psi::{SYNC_BYTE, TS_PACKET_SIZE};

/// Consecutive spans without a sync byte that drop alignment.
const LOSS_THRESHOLD: u32 = 3;

/// Bytes needed to test one candidate offset (three sync positions).
const SCAN_WINDOW: usize = 2 * TS_PACKET_SIZE + 1;

/// What one call to [`StreamAligner::push`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Packets emitted.
    pub packets: usize,
    /// Bytes thrown away while searching for sync.
    pub discarded: usize,
    /// Alignment was (re)acquired after a loss or after skipping bytes.
    pub resynced: bool,
}

/// Single-producer packet aligner.
#[derive(Debug)]
pub struct StreamAligner {
    tail: [u8; TS_PACKET_SIZE],
    tail_len: usize,
    aligned: bool,
    /// Alignment was held before and has been lost since.
    lost: bool,
    /// Bytes were dropped by a scan that did not lock.
    dropping: bool,
    bad_spans: u32,
    /// Unaligned bytes awaiting a sync scan.
    scan: Vec<u8>,
}

impl Default for StreamAligner {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAligner {
    pub fn new() -> Self {
        Self {
            tail: [0u8; TS_PACKET_SIZE],
            tail_len: 0,
            aligned: false,
            lost: false,
            dropping: false,
            bad_spans: 0,
            scan: Vec::with_capacity(SCAN_WINDOW * 2),
        }
    }

    /// Bytes of an incomplete packet carried to the next chunk.
    pub fn tail_size(&self) -> usize {
        self.tail_len
    }

    pub fn is_aligned(&self) -> bool {
        self.aligned
    }

    /// Forget partial data and require a fresh sync scan.
    ///
    /// Called when the byte stream is known to be discontinuous.
    pub fn reset(&mut self) {
        if self.aligned {
            self.lost = true;
        }
        self.aligned = false;
        self.tail_len = 0;
        self.bad_spans = 0;
        self.scan.clear();
    }

    /// Consume one chunk, passing each complete packet to `emit` in order.
    pub fn push<F>(&mut self, chunk: &[u8], mut emit: F) -> PushReport
    where
        F: FnMut(&[u8]),
    {
        let mut report = PushReport::default();

        if self.aligned {
            if !self.feed_aligned(chunk, &mut emit, &mut report) {
                return report;
            }
        } else {
            self.scan.extend_from_slice(chunk);
        }

        self.scan_for_sync(&mut emit, &mut report);
        report
    }

    /// Emit packets from aligned data. Returns `true` if alignment was lost,
    /// in which case the unconsumed bytes have been moved to `scan`.
    fn feed_aligned<F>(&mut self, chunk: &[u8], emit: &mut F, report: &mut PushReport) -> bool
    where
        F: FnMut(&[u8]),
    {
        let mut data = chunk;

        if self.tail_len > 0 {
            let need = TS_PACKET_SIZE - self.tail_len;
            if data.len() < need {
                self.tail[self.tail_len..self.tail_len + data.len()].copy_from_slice(data);
                self.tail_len += data.len();
                return false;
            }
            self.tail[self.tail_len..].copy_from_slice(&data[..need]);
            data = &data[need..];
            self.tail_len = 0;

            if !self.accept_span(self.tail[0]) {
                self.scan.extend_from_slice(&self.tail);
                self.scan.extend_from_slice(data);
                return true;
            }
            emit(&self.tail);
            report.packets += 1;
        }

        let whole = data.len() - data.len() % TS_PACKET_SIZE;
        for (i, packet) in data[..whole].chunks_exact(TS_PACKET_SIZE).enumerate() {
            if !self.accept_span(packet[0]) {
                self.scan.extend_from_slice(&data[i * TS_PACKET_SIZE..]);
                return true;
            }
            emit(packet);
            report.packets += 1;
        }

        let rest = &data[whole..];
        self.tail[..rest.len()].copy_from_slice(rest);
        self.tail_len = rest.len();
        false
    }

    fn accept_span(&mut self, first: u8) -> bool {
        if first == SYNC_BYTE {
            self.bad_spans = 0;
            return true;
        }
        self.bad_spans += 1;
        if self.bad_spans < LOSS_THRESHOLD {
            return true;
        }
        warn!(
            "[StreamAligner] sync lost after {} spans without 0x47, rescanning",
            LOSS_THRESHOLD
        );
        self.aligned = false;
        self.lost = true;
        self.bad_spans = 0;
        false
    }

    fn scan_for_sync<F>(&mut self, emit: &mut F, report: &mut PushReport)
    where
        F: FnMut(&[u8]),
    {
        loop {
            let mut buf = std::mem::take(&mut self.scan);

            let Some(offset) = find_sync(&buf) else {
                // keep every byte that could still start a sync run
                let keep_from = buf.len().saturating_sub(SCAN_WINDOW - 1);
                if keep_from > 0 {
                    self.dropping = true;
                    report.discarded += keep_from;
                    buf.drain(..keep_from);
                }
                self.scan = buf;
                return;
            };

            report.discarded += offset;
            if self.lost || self.dropping || offset > 0 {
                report.resynced = true;
                warn!(
                    "[StreamAligner] resynchronized at offset {} ({} bytes discarded this chunk)",
                    offset, report.discarded
                );
            } else {
                debug!("[StreamAligner] locked on packet boundary");
            }
            self.aligned = true;
            self.lost = false;
            self.dropping = false;
            self.bad_spans = 0;
            self.tail_len = 0;

            let lost = self.feed_aligned(&buf[offset..], emit, report);
            if !lost {
                buf.clear();
                self.scan = buf;
                return;
            }
        }
    }
}

/// First offset with sync bytes at `o`, `o + 188` and `o + 376`.
fn find_sync(buf: &[u8]) -> Option<usize> {
    if buf.len() < SCAN_WINDOW {
        return None;
    }
    (0..=buf.len() - SCAN_WINDOW).find(|&o| {
        buf[o] == SYNC_BYTE
            && buf[o + TS_PACKET_SIZE] == SYNC_BYTE
            && buf[o + 2 * TS_PACKET_SIZE] == SYNC_BYTE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Packets with varied payload, including stray sync bytes.
    fn stream(count: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(count * TS_PACKET_SIZE);
        let mut seed = 0x1234_5678u32;
        for n in 0..count {
            out.push(SYNC_BYTE);
            out.push((n >> 8) as u8 & 0x1F);
            out.push(n as u8);
            for _ in 3..TS_PACKET_SIZE {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                out.push((seed >> 16) as u8);
            }
        }
        out
    }

    fn collect(aligner: &mut StreamAligner, chunks: &[&[u8]]) -> (Vec<u8>, PushReport) {
        let mut out = Vec::new();
        let mut total = PushReport::default();
        for chunk in chunks {
            let r = aligner.push(chunk, |p| {
                assert_eq!(p.len(), TS_PACKET_SIZE);
                out.extend_from_slice(p);
            });
            total.packets += r.packets;
            total.discarded += r.discarded;
            total.resynced |= r.resynced;
        }
        (out, total)
    }

    #[test]
    fn test_alignment_independent_of_chunking() {
        let input = stream(40);
        for sizes in [
            &[1usize, 7, 188, 200, 377, 13][..],
            &[187, 189][..],
            &[1000][..],
            &[3][..],
        ] {
            let mut aligner = StreamAligner::new();
            let mut out = Vec::new();
            let mut pos = 0;
            let mut i = 0;
            while pos < input.len() {
                let end = (pos + sizes[i % sizes.len()]).min(input.len());
                aligner.push(&input[pos..end], |p| out.extend_from_slice(p));
                pos = end;
                i += 1;
            }
            assert_eq!(out, input, "chunk sizes {:?}", sizes);
            assert_eq!(aligner.tail_size(), 0);
        }
    }

    #[test]
    fn test_split_packet_boundary() {
        let input = stream(4);
        let mut aligner = StreamAligner::new();
        let (primed, _) = collect(&mut aligner, &[&input[..3 * TS_PACKET_SIZE]]);
        assert_eq!(primed.len(), 3 * TS_PACKET_SIZE);
        assert!(aligner.is_aligned());

        let last = &input[3 * TS_PACKET_SIZE..];
        let (out, report) = collect(&mut aligner, &[&last[..100], &last[100..]]);
        assert_eq!(report.packets, 1);
        assert_eq!(out, last);
        assert_eq!(aligner.tail_size(), 0);
    }

    #[test]
    fn test_resync_offset() {
        const K: usize = 57;
        let packets = stream(4);
        let mut input = vec![0x00u8; K];
        input.extend_from_slice(&packets);

        let mut aligner = StreamAligner::new();
        let (out, report) = collect(&mut aligner, &[&input]);
        assert_eq!(report.discarded, K);
        assert!(report.resynced);
        assert_eq!(&out[..TS_PACKET_SIZE], &input[K..K + TS_PACKET_SIZE]);
        assert_eq!(out, packets);
    }

    #[test]
    fn test_no_false_lock_on_two_hits() {
        let mut packets = Vec::new();
        for _ in 0..3 {
            packets.push(SYNC_BYTE);
            packets.extend_from_slice(&[0xFF; TS_PACKET_SIZE - 1]);
        }
        // two sync bytes at a 188 stride, but not three
        let mut input = vec![0u8; 288];
        input[0] = SYNC_BYTE;
        input[188] = SYNC_BYTE;
        input.extend_from_slice(&packets);

        let mut aligner = StreamAligner::new();
        let (out, report) = collect(&mut aligner, &[&input]);
        assert_eq!(report.discarded, 288);
        assert_eq!(out, packets);
    }

    #[test]
    fn test_recovers_after_alignment_loss() {
        let good = stream(6);
        let mut input = good[..3 * TS_PACKET_SIZE].to_vec();
        input.extend_from_slice(&[0u8; 3 * TS_PACKET_SIZE]);
        input.extend_from_slice(&good[3 * TS_PACKET_SIZE..]);

        let mut aligner = StreamAligner::new();
        let (out, report) = collect(&mut aligner, &[&input]);

        // two bad spans pass through, the third triggers the rescan
        assert_eq!(report.discarded, TS_PACKET_SIZE);
        assert!(report.resynced);
        assert_eq!(report.packets, 8);
        assert_eq!(&out[..3 * TS_PACKET_SIZE], &good[..3 * TS_PACKET_SIZE]);
        assert_eq!(&out[5 * TS_PACKET_SIZE..], &good[3 * TS_PACKET_SIZE..]);
    }

    #[test]
    fn test_unsynced_garbage_bounded() {
        let mut aligner = StreamAligner::new();
        let (out, report) = collect(&mut aligner, &[&[0u8; 5000]]);
        assert!(out.is_empty());
        assert_eq!(report.discarded, 5000 - (SCAN_WINDOW - 1));
        assert!(aligner.scan.len() < SCAN_WINDOW);
    }

    #[test]
    fn test_reset_drops_tail() {
        let input = stream(4);
        let mut aligner = StreamAligner::new();
        collect(&mut aligner, &[&input[..3 * TS_PACKET_SIZE + 50]]);
        assert_eq!(aligner.tail_size(), 50);

        aligner.reset();
        assert_eq!(aligner.tail_size(), 0);
        assert!(!aligner.is_aligned());

        let (out, report) = collect(&mut aligner, &[&input]);
        assert!(report.resynced);
        assert_eq!(out, input);
    }
}
