//! Transport collaborators.
//!
//! A transport moves pool buffers to the device and back. The engine owns
//! the buffers; a [`Transfer`] lends one to the transport and the matching
//! [`Completion`] returns it, so a running pipeline never allocates.

use std::sync::Arc;

use crate::error::TransportError;

mod memory;
mod reader;

pub use memory::{MemoryDevice, MemoryTransport};
pub use reader::ReaderTransport;

/// One outstanding read request.
#[derive(Debug)]
pub struct Transfer {
    /// Index of the buffer in the engine's pool; acts as the request handle.
    pub slot: usize,
    /// Buffer to fill. Its length is the maximum transfer size.
    pub buffer: Vec<u8>,
}

/// Outcome of a single transfer.
#[derive(Debug)]
pub enum TransferStatus {
    /// `len` bytes at the start of the buffer are valid.
    Completed(usize),
    Failed(TransportError),
    /// Cancelled by [`CancelTransfers::cancel_all`].
    Cancelled,
    /// The source is exhausted; no data is carried.
    EndOfStream,
}

/// A finished transfer, handing its buffer back.
#[derive(Debug)]
pub struct Completion {
    pub transfer: Transfer,
    pub status: TransferStatus,
}

impl Completion {
    pub fn new(transfer: Transfer, status: TransferStatus) -> Self {
        Self { transfer, status }
    }

    /// Bytes delivered by a successful transfer.
    pub fn data(&self) -> &[u8] {
        match self.status {
            TransferStatus::Completed(len) => {
                &self.transfer.buffer[..len.min(self.transfer.buffer.len())]
            }
            _ => &[],
        }
    }
}

/// Cross-thread handle that aborts every outstanding transfer.
pub trait CancelTransfers: Send + Sync {
    /// After this returns, every submitted transfer completes as
    /// [`TransferStatus::Cancelled`] and new submissions are refused.
    fn cancel_all(&self);
}

/// Asynchronous read transport driven by the producer thread.
pub trait Transport: Send + 'static {
    /// Queue a transfer. The buffer comes back through [`Transport::wait_completion`].
    fn submit(&mut self, transfer: Transfer) -> Result<(), TransportError>;

    /// Block until the next transfer finishes.
    ///
    /// Returns `Err(TransportError::Closed)` when nothing is outstanding.
    fn wait_completion(&mut self) -> Result<Completion, TransportError>;

    /// Handle usable from any thread to cancel outstanding transfers.
    fn canceller(&self) -> Arc<dyn CancelTransfers>;
}
