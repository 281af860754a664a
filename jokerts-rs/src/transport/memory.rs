//! In-process transport fed from another thread.

use std::collections::VecDeque;
use std::sync::Arc;

use log::trace;
use parking_lot::{Condvar, Mutex};

use super::{CancelTransfers, Completion, Transfer, TransferStatus, Transport};
use crate::error::TransportError;

enum Event {
    Data(Vec<u8>),
    Error(TransportError),
    Eof,
}

#[derive(Default)]
struct State {
    pending: VecDeque<Transfer>,
    inbox: VecDeque<Event>,
    cancelled: bool,
    submitted: u64,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    ready: Condvar,
}

/// Transport whose transfers are completed by a [`MemoryDevice`].
///
/// Pushed bytes fill submitted transfers in order; a chunk larger than the
/// head transfer's buffer is split across successive transfers.
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

/// Feeding side of a [`MemoryTransport`]. Cloneable and usable from any thread.
#[derive(Clone)]
pub struct MemoryDevice {
    inner: Arc<Inner>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryDevice) {
        let inner = Arc::new(Inner::default());
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MemoryDevice { inner },
        )
    }
}

impl MemoryDevice {
    /// Queue bytes for delivery. Returns `false` once the transport was cancelled.
    pub fn push(&self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        self.post(Event::Data(data.to_vec()))
    }

    /// Make the next transfer to complete fail with `error`.
    pub fn fail(&self, error: TransportError) -> bool {
        self.post(Event::Error(error))
    }

    /// Signal the end of the stream once queued data has been delivered.
    pub fn finish(&self) -> bool {
        self.post(Event::Eof)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    /// Transfers submitted so far, resubmissions included.
    pub fn submitted(&self) -> u64 {
        self.inner.state.lock().submitted
    }

    /// Transfers currently waiting for data.
    pub fn outstanding(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    fn post(&self, event: Event) -> bool {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return false;
        }
        state.inbox.push_back(event);
        self.inner.ready.notify_all();
        true
    }
}

impl Transport for MemoryTransport {
    fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError> {
        let mut state = self.inner.state.lock();
        if state.cancelled {
            return Err(TransportError::Cancelled);
        }
        trace!("[MemoryTransport] submit slot {}", transfer.slot);
        state.pending.push_back(transfer);
        state.submitted += 1;
        Ok(())
    }

    fn wait_completion(&mut self) -> Result<Completion, TransportError> {
        let mut state = self.inner.state.lock();
        loop {
            if state.cancelled {
                return match state.pending.pop_front() {
                    Some(transfer) => Ok(Completion::new(transfer, TransferStatus::Cancelled)),
                    None => Err(TransportError::Closed),
                };
            }
            if state.pending.is_empty() {
                return Err(TransportError::Closed);
            }

            if let Some(status) = Self::next_status(&mut state) {
                let mut transfer = match state.pending.pop_front() {
                    Some(t) => t,
                    None => return Err(TransportError::Closed),
                };
                let status = match status {
                    Pending::Copy => Self::fill(&mut state, &mut transfer),
                    Pending::Done(status) => status,
                };
                return Ok(Completion::new(transfer, status));
            }

            self.inner.ready.wait(&mut state);
        }
    }

    fn canceller(&self) -> Arc<dyn CancelTransfers> {
        Arc::new(MemoryCanceller {
            inner: Arc::clone(&self.inner),
        })
    }
}

enum Pending {
    Copy,
    Done(TransferStatus),
}

impl MemoryTransport {
    /// Decide how the head transfer completes, consuming non-data events.
    fn next_status(state: &mut State) -> Option<Pending> {
        match state.inbox.front()? {
            Event::Data(_) => Some(Pending::Copy),
            // end of stream stays queued so every later transfer sees it
            Event::Eof => Some(Pending::Done(TransferStatus::EndOfStream)),
            Event::Error(_) => match state.inbox.pop_front() {
                Some(Event::Error(e)) => Some(Pending::Done(TransferStatus::Failed(e))),
                _ => None,
            },
        }
    }

    fn fill(state: &mut State, transfer: &mut Transfer) -> TransferStatus {
        let Some(Event::Data(data)) = state.inbox.front_mut() else {
            return TransferStatus::Completed(0);
        };
        let n = data.len().min(transfer.buffer.len());
        transfer.buffer[..n].copy_from_slice(&data[..n]);
        if n == data.len() {
            state.inbox.pop_front();
        } else {
            data.drain(..n);
        }
        TransferStatus::Completed(n)
    }
}

struct MemoryCanceller {
    inner: Arc<Inner>,
}

impl CancelTransfers for MemoryCanceller {
    fn cancel_all(&self) {
        let mut state = self.inner.state.lock();
        state.cancelled = true;
        state.inbox.clear();
        self.inner.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(slot: usize, size: usize) -> Transfer {
        Transfer {
            slot,
            buffer: vec![0u8; size],
        }
    }

    #[test]
    fn test_large_chunk_split_across_transfers() {
        let (mut transport, device) = MemoryTransport::new();
        transport.submit(transfer(0, 4)).unwrap();
        transport.submit(transfer(1, 4)).unwrap();
        device.push(&[1, 2, 3, 4, 5, 6]);

        let first = transport.wait_completion().unwrap();
        assert_eq!(first.transfer.slot, 0);
        assert_eq!(first.data(), &[1, 2, 3, 4]);

        let second = transport.wait_completion().unwrap();
        assert_eq!(second.transfer.slot, 1);
        assert_eq!(second.data(), &[5, 6]);
    }

    #[test]
    fn test_failure_then_eof() {
        let (mut transport, device) = MemoryTransport::new();
        device.fail(TransportError::Stall);
        device.finish();
        transport.submit(transfer(0, 8)).unwrap();
        transport.submit(transfer(1, 8)).unwrap();
        transport.submit(transfer(2, 8)).unwrap();

        let c = transport.wait_completion().unwrap();
        assert!(matches!(c.status, TransferStatus::Failed(TransportError::Stall)));
        let c = transport.wait_completion().unwrap();
        assert!(matches!(c.status, TransferStatus::EndOfStream));
        let c = transport.wait_completion().unwrap();
        assert!(matches!(c.status, TransferStatus::EndOfStream));
        assert!(matches!(transport.wait_completion(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_cancel_completes_outstanding() {
        let (mut transport, device) = MemoryTransport::new();
        transport.submit(transfer(0, 8)).unwrap();
        transport.submit(transfer(1, 8)).unwrap();
        device.push(&[0xAA; 8]);

        transport.canceller().cancel_all();
        assert!(device.is_cancelled());
        assert!(!device.push(&[0xBB; 8]));

        for _ in 0..2 {
            let c = transport.wait_completion().unwrap();
            assert!(matches!(c.status, TransferStatus::Cancelled));
            assert!(c.data().is_empty());
        }
        assert!(matches!(transport.submit(transfer(0, 8)), Err(TransportError::Cancelled)));
        assert!(matches!(transport.wait_completion(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_wait_wakes_on_push() {
        let (mut transport, device) = MemoryTransport::new();
        transport.submit(transfer(0, 8)).unwrap();

        let feeder = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            device.push(&[7; 3]);
        });

        let c = transport.wait_completion().unwrap();
        assert_eq!(c.data(), &[7, 7, 7]);
        feeder.join().unwrap();
    }
}
