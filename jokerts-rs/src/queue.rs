//! Bounded FIFO of aligned packets with drop-oldest overflow.
//!
//! Packets live in a fixed arena of 188-byte slots allocated up front; the
//! queue itself only moves slot indices, so enqueue and dequeue never
//! allocate.

use std::collections::VecDeque;

use jokerts_psi::TS_PACKET_SIZE;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
struct PacketRef {
    slot: usize,
    sequence: u64,
    /// Bytes already copied out to the consumer.
    read_off: usize,
}

/// Byte-budgeted packet queue. Not synchronized; the engine wraps it in a lock.
#[derive(Debug)]
pub struct PacketQueue {
    arena: Vec<[u8; TS_PACKET_SIZE]>,
    free: Vec<usize>,
    packets: VecDeque<PacketRef>,
    next_sequence: u64,
    /// Bytes held by queued packets, partially read ones included.
    size: usize,
    max_size: usize,
}

impl PacketQueue {
    /// Allocate room for `max_size / 188` packets.
    pub fn with_max_size(max_size: usize) -> Result<Self, EngineError> {
        let capacity = max_size / TS_PACKET_SIZE;
        let alloc_err = || EngineError::Allocation {
            what: "packet arena",
            bytes: capacity * TS_PACKET_SIZE,
        };

        let mut arena: Vec<[u8; TS_PACKET_SIZE]> = Vec::new();
        arena.try_reserve_exact(capacity).map_err(|_| alloc_err())?;
        arena.resize(capacity, [0u8; TS_PACKET_SIZE]);

        let mut free = Vec::new();
        free.try_reserve_exact(capacity).map_err(|_| alloc_err())?;
        free.extend((0..capacity).rev());

        let mut packets = VecDeque::new();
        packets.try_reserve_exact(capacity).map_err(|_| alloc_err())?;

        Ok(Self {
            arena,
            free,
            packets,
            next_sequence: 0,
            size: 0,
            max_size,
        })
    }

    /// Append one packet, evicting the oldest packets until it fits.
    ///
    /// A head packet the consumer has started reading is kept while there
    /// is a younger packet to evict instead, so reads never tear a packet.
    /// Returns the number of packets evicted.
    pub fn enqueue(&mut self, packet: &[u8]) -> usize {
        if self.arena.is_empty() {
            return 1;
        }

        let mut evicted = 0;
        while self.size + TS_PACKET_SIZE > self.max_size || self.free.is_empty() {
            if !self.evict_oldest_unread() {
                break;
            }
            evicted += 1;
        }

        let Some(slot) = self.free.pop() else {
            return evicted + 1;
        };
        let n = packet.len().min(TS_PACKET_SIZE);
        self.arena[slot][..n].copy_from_slice(&packet[..n]);
        self.arena[slot][n..].fill(0xFF);

        self.packets.push_back(PacketRef {
            slot,
            sequence: self.next_sequence,
            read_off: 0,
        });
        self.next_sequence += 1;
        self.size += TS_PACKET_SIZE;
        evicted
    }

    /// Copy queued bytes into `buf` in FIFO order; returns bytes copied.
    ///
    /// A packet is released once all of its bytes have been copied out.
    pub fn dequeue_into(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(head) = self.packets.front_mut() else {
                break;
            };
            let n = (TS_PACKET_SIZE - head.read_off).min(buf.len() - copied);
            let src = &self.arena[head.slot][head.read_off..head.read_off + n];
            buf[copied..copied + n].copy_from_slice(src);
            head.read_off += n;
            copied += n;

            if head.read_off == TS_PACKET_SIZE {
                self.evict_head();
            }
        }
        copied
    }

    /// Release every queued packet.
    pub fn clear(&mut self) {
        while self.evict_head() {}
    }

    fn evict_oldest_unread(&mut self) -> bool {
        let head_started = self.packets.front().is_some_and(|p| p.read_off > 0);
        if head_started && self.packets.len() > 1 {
            if let Some(victim) = self.packets.remove(1) {
                self.free.push(victim.slot);
                self.size -= TS_PACKET_SIZE;
                return true;
            }
        }
        self.evict_head()
    }

    fn evict_head(&mut self) -> bool {
        match self.packets.pop_front() {
            Some(head) => {
                self.free.push(head.slot);
                self.size -= TS_PACKET_SIZE;
                true
            }
            None => false,
        }
    }

    /// Bytes held by queued packets.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Bytes the consumer can still read.
    pub fn readable(&self) -> usize {
        self.size - self.packets.front().map_or(0, |p| p.read_off)
    }

    /// Sequence number of the oldest queued packet.
    pub fn oldest_sequence(&self) -> Option<u64> {
        self.packets.front().map(|p| p.sequence)
    }
}
