//! Consumer-side handle.

use std::sync::Arc;

use crate::engine::Shared;
use crate::registry::Program;
use crate::stats::StatsSnapshot;

/// Pull-style access to a running engine from another thread.
///
/// Nothing here blocks: `read` returns 0 when no packet is queued and the
/// caller decides how long to back off.
#[derive(Clone)]
pub struct TsReader {
    shared: Arc<Shared>,
}

impl TsReader {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Copy queued TS bytes into `buf`; returns the number of bytes copied.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.shared.queue.lock().dequeue_into(buf)
    }

    /// Bytes ready to be read.
    pub fn available(&self) -> usize {
        self.shared.queue.lock().readable()
    }

    pub fn programs(&self) -> Arc<Vec<Program>> {
        self.shared.registry.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::transport::MemoryTransport;

    fn packet(tag: u8) -> [u8; 188] {
        let mut p = [tag; 188];
        p[0] = 0x47;
        p[1] = 0x01;
        p[2] = 0x00;
        p
    }

    #[test]
    fn test_partial_reads_from_consumer_thread() {
        let (transport, device) = MemoryTransport::new();
        let mut engine = Engine::init(EngineConfig::default(), transport).unwrap();
        engine.start().unwrap();
        let reader = engine.reader();

        // three packets to lock, the last two are the ones read back
        let mut input = packet(0x10).to_vec();
        input.extend_from_slice(&packet(0xA0));
        input.extend_from_slice(&packet(0xB0));
        device.push(&input);

        let consumer = std::thread::spawn(move || {
            while reader.available() < 3 * 188 {
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            let mut buf = [0u8; 188];
            assert_eq!(reader.read(&mut buf), 188);
            assert_eq!(buf[3], 0x10);

            let mut got = Vec::new();
            let mut small = [0u8; 100];
            for _ in 0..4 {
                let n = reader.read(&mut small);
                got.extend_from_slice(&small[..n]);
            }
            assert_eq!(reader.read(&mut small), 0);
            got
        });

        let got = consumer.join().unwrap();
        assert_eq!(got.len(), 376);
        assert_eq!(&got[..188], &packet(0xA0)[..]);
        assert_eq!(&got[188..], &packet(0xB0)[..]);
        engine.stop().unwrap();
    }
}
