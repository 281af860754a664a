//! Keeps the transfer pool in flight.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, trace, warn};

use crate::error::{EngineError, TransportError};
use crate::transport::{Completion, Transfer, TransferStatus, Transport};

/// Consecutive failures on one buffer that mean the device is gone.
const MAX_STRIKES: u8 = 2;

/// Allocate `count` zeroed buffers of `size` bytes.
pub fn allocate_pool(count: usize, size: usize) -> Result<Vec<Vec<u8>>, EngineError> {
    let alloc_err = || EngineError::Allocation {
        what: "transfer pool",
        bytes: count.saturating_mul(size),
    };

    let mut pool = Vec::new();
    pool.try_reserve_exact(count).map_err(|_| alloc_err())?;
    for _ in 0..count {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(size).map_err(|_| alloc_err())?;
        buffer.resize(size, 0);
        pool.push(buffer);
    }
    Ok(pool)
}

/// Result of handling one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Data of this length was delivered (or discarded after cancel).
    Data(usize),
    /// First failure on a buffer; it was resubmitted.
    Retried,
    Cancelled,
    EndOfStream,
    /// Nothing is outstanding any more.
    Drained,
}

pub struct TransferSubmitter {
    transport: Box<dyn Transport>,
    strikes: Vec<u8>,
    in_flight: usize,
}

impl TransferSubmitter {
    pub fn new(transport: Box<dyn Transport>, pool_size: usize) -> Self {
        Self {
            transport,
            strikes: vec![0; pool_size],
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Submit every pool buffer. On failure the caller must drain.
    pub fn submit_all(&mut self, pool: Vec<Vec<u8>>) -> Result<(), EngineError> {
        let count = pool.len();
        for (slot, buffer) in pool.into_iter().enumerate() {
            self.transport.submit(Transfer { slot, buffer })?;
            self.in_flight += 1;
        }
        debug!("[Submitter] {} transfers submitted", count);
        Ok(())
    }

    /// Wait for one completion and handle it.
    ///
    /// `on_data` receives the filled region unless `cancel` is set by the
    /// time the completion arrives. Successful and first-failure buffers are
    /// resubmitted unless cancelled; a second consecutive failure on the
    /// same buffer is returned as [`EngineError::DeviceLost`].
    pub fn complete_one<F>(&mut self, cancel: &AtomicBool, on_data: F) -> Result<Step, EngineError>
    where
        F: FnOnce(&[u8]),
    {
        let Completion { transfer, status } = match self.transport.wait_completion() {
            Ok(c) => c,
            Err(TransportError::Closed) => {
                self.in_flight = 0;
                return Ok(Step::Drained);
            }
            Err(e) => return Err(EngineError::Transport(e)),
        };
        self.in_flight = self.in_flight.saturating_sub(1);
        let slot = transfer.slot;
        let cancelled = cancel.load(Ordering::Acquire);

        match status {
            TransferStatus::Completed(len) => {
                trace!("[Submitter] slot {} completed with {} bytes", slot, len);
                if let Some(s) = self.strikes.get_mut(slot) {
                    *s = 0;
                }
                if !cancelled {
                    let len = len.min(transfer.buffer.len());
                    on_data(&transfer.buffer[..len]);
                }
                self.resubmit(transfer, cancel)?;
                Ok(Step::Data(len))
            }
            TransferStatus::Failed(e) => {
                let strikes = match self.strikes.get_mut(slot) {
                    Some(s) => {
                        *s += 1;
                        *s
                    }
                    None => MAX_STRIKES,
                };
                if strikes >= MAX_STRIKES {
                    error!("[Submitter] slot {} failed twice in a row: {}", slot, e);
                    return Err(EngineError::DeviceLost { slot, source: e });
                }
                warn!("[Submitter] slot {} transfer failed, retrying: {}", slot, e);
                self.resubmit(transfer, cancel)?;
                Ok(Step::Retried)
            }
            TransferStatus::Cancelled => Ok(Step::Cancelled),
            TransferStatus::EndOfStream => Ok(Step::EndOfStream),
        }
    }

    fn resubmit(&mut self, transfer: Transfer, cancel: &AtomicBool) -> Result<(), EngineError> {
        if cancel.load(Ordering::Acquire) {
            return Ok(());
        }
        let slot = transfer.slot;
        match self.transport.submit(transfer) {
            Ok(()) => {
                self.in_flight += 1;
                Ok(())
            }
            // lost the race with a stop request
            Err(TransportError::Cancelled) => Ok(()),
            Err(e) => {
                error!("[Submitter] slot {} could not be resubmitted: {}", slot, e);
                Err(EngineError::DeviceLost { slot, source: e })
            }
        }
    }

    /// Wait for every outstanding transfer to come back, discarding data.
    pub fn drain(&mut self) {
        let mut drained = 0usize;
        while self.in_flight > 0 {
            match self.transport.wait_completion() {
                Ok(_) => {
                    self.in_flight -= 1;
                    drained += 1;
                }
                Err(e) => {
                    debug!("[Submitter] drain ended early: {}", e);
                    self.in_flight = 0;
                }
            }
        }
        debug!("[Submitter] drained {} transfers", drained);
    }
}
