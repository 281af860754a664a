//! Transport replaying a byte source (file or stdin) through the pool.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace};

use super::{CancelTransfers, Completion, Transfer, TransferStatus, Transport};
use crate::error::TransportError;

/// Completes each submitted transfer with one read from `R`.
///
/// Reads happen inside [`Transport::wait_completion`], so cancelling only
/// takes effect once a blocked read returns.
pub struct ReaderTransport<R> {
    source: R,
    pending: VecDeque<Transfer>,
    cancelled: Arc<AtomicBool>,
    eof: bool,
    bytes_read: u64,
}

impl<R: Read + Send + 'static> ReaderTransport<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            pending: VecDeque::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            eof: false,
            bytes_read: 0,
        }
    }

    fn read_into(&mut self, buffer: &mut [u8]) -> TransferStatus {
        loop {
            match self.source.read(buffer) {
                Ok(0) => {
                    debug!("[ReaderTransport] end of input after {} bytes", self.bytes_read);
                    self.eof = true;
                    return TransferStatus::EndOfStream;
                }
                Ok(n) => {
                    self.bytes_read += n as u64;
                    return TransferStatus::Completed(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return TransferStatus::Failed(TransportError::Io(e)),
            }
        }
    }
}

impl<R: Read + Send + 'static> Transport for ReaderTransport<R> {
    fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(TransportError::Cancelled);
        }
        self.pending.push_back(transfer);
        Ok(())
    }

    fn wait_completion(&mut self) -> Result<Completion, TransportError> {
        let mut transfer = self.pending.pop_front().ok_or(TransportError::Closed)?;

        let status = if self.cancelled.load(Ordering::Acquire) {
            TransferStatus::Cancelled
        } else if self.eof {
            TransferStatus::EndOfStream
        } else {
            let status = self.read_into(&mut transfer.buffer);
            trace!("[ReaderTransport] slot {}: {:?}", transfer.slot, status);
            status
        };

        Ok(Completion::new(transfer, status))
    }

    fn canceller(&self) -> Arc<dyn CancelTransfers> {
        Arc::new(FlagCanceller(Arc::clone(&self.cancelled)))
    }
}

struct FlagCanceller(Arc<AtomicBool>);

impl CancelTransfers for FlagCanceller {
    fn cancel_all(&self) {
        self.0.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "gone"))
        }
    }

    fn transfer(slot: usize) -> Transfer {
        Transfer {
            slot,
            buffer: vec![0u8; 4],
        }
    }

    #[test]
    fn test_reads_then_eof() {
        let mut transport = ReaderTransport::new(Cursor::new(vec![1u8, 2, 3, 4, 5, 6]));
        for slot in 0..3 {
            transport.submit(transfer(slot)).unwrap();
        }

        let c = transport.wait_completion().unwrap();
        assert_eq!(c.data(), &[1, 2, 3, 4]);
        let c = transport.wait_completion().unwrap();
        assert_eq!(c.data(), &[5, 6]);
        let c = transport.wait_completion().unwrap();
        assert!(matches!(c.status, TransferStatus::EndOfStream));
        assert!(matches!(transport.wait_completion(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_read_error_is_failure() {
        let mut transport = ReaderTransport::new(Broken);
        transport.submit(transfer(0)).unwrap();
        let c = transport.wait_completion().unwrap();
        assert!(matches!(c.status, TransferStatus::Failed(TransportError::Io(_))));
    }

    #[test]
    fn test_cancel() {
        let mut transport = ReaderTransport::new(Cursor::new(vec![0u8; 16]));
        transport.submit(transfer(0)).unwrap();
        transport.canceller().cancel_all();

        let c = transport.wait_completion().unwrap();
        assert!(matches!(c.status, TransferStatus::Cancelled));
        assert!(matches!(transport.submit(transfer(0)), Err(TransportError::Cancelled)));
    }
}
