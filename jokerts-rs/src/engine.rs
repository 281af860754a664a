//! Capture session: lifecycle, producer thread and the consumer surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use jokerts_psi::{packet_pid, TS_PACKET_SIZE};

use crate::aligner::StreamAligner;
use crate::config::EngineConfig;
use crate::discovery::{ProgramDiscovery, BASE_PIDS};
use crate::error::EngineError;
use crate::hooks::{HookTable, PacketHook, SharedHook};
use crate::queue::PacketQueue;
use crate::reader::TsReader;
use crate::registry::{Program, ProgramRegistry};
use crate::stats::{Stats, StatsSnapshot};
use crate::submitter::{allocate_pool, Step, TransferSubmitter};
use crate::transport::{CancelTransfers, Transport};

/// Engine lifecycle. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Buffers and queue allocated, nothing submitted yet.
    Init,
    /// Producer thread running.
    Running,
    /// Cancellation requested, or the producer ended on its own and has
    /// not been joined yet.
    Stopping,
    /// Producer joined, queue and hooks released.
    Stopped,
}

/// State shared between the producer thread and consumers.
pub(crate) struct Shared {
    pub(crate) queue: Mutex<PacketQueue>,
    pub(crate) hooks: HookTable,
    pub(crate) registry: ProgramRegistry,
    pub(crate) stats: Stats,
    cancel: AtomicBool,
    state: Mutex<EngineState>,
    fatal: Mutex<Option<EngineError>>,
    finished: AtomicBool,
}

impl Shared {
    /// Everything that happens to one aligned packet, in order.
    fn process_packet(&self, packet: &[u8]) {
        let pid = packet_pid(packet);
        self.hooks.dispatch(pid, packet, &self.registry);

        let evicted = self.queue.lock().enqueue(packet);
        self.stats.add_dropped(evicted as u64);
        self.stats.add_packets(1, TS_PACKET_SIZE as u64);
    }
}

/// A capture session.
///
/// ```no_run
/// use jokerts::{Engine, EngineConfig, ReaderTransport};
///
/// let file = std::fs::File::open("capture.ts")?;
/// let mut engine = Engine::init(EngineConfig::default(), ReaderTransport::new(file))?;
/// engine.start()?;
/// let mut buf = [0u8; 188 * 100];
/// let n = engine.read(&mut buf);
/// engine.stop()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Engine {
    shared: Arc<Shared>,
    config: EngineConfig,
    transport: Option<Box<dyn Transport>>,
    pool: Vec<Vec<u8>>,
    canceller: Arc<dyn CancelTransfers>,
    producer: Option<JoinHandle<()>>,
    /// Strong reference to the discovery hook; the table only holds weak ones.
    discovery: Option<SharedHook>,
}

impl Engine {
    /// Allocate a session over `transport`.
    ///
    /// Fails with [`EngineError::Allocation`] if the transfer pool or the
    /// packet arena cannot be allocated.
    pub fn init<T: Transport>(config: EngineConfig, transport: T) -> Result<Self, EngineError> {
        config.validate()?;

        let queue = PacketQueue::with_max_size(config.ts_list_size_max)?;
        let pool = allocate_pool(config.num_buffers, config.buffer_size())?;
        let canceller = transport.canceller();

        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            hooks: HookTable::new(),
            registry: ProgramRegistry::new(),
            stats: Stats::new(),
            cancel: AtomicBool::new(false),
            state: Mutex::new(EngineState::Init),
            fatal: Mutex::new(None),
            finished: AtomicBool::new(false),
        });

        let discovery = if config.discover_programs {
            let hook: SharedHook = Arc::new(Mutex::new(ProgramDiscovery::new()));
            for pid in BASE_PIDS {
                shared.hooks.register(pid, &hook)?;
            }
            Some(hook)
        } else {
            None
        };

        info!(
            "[Engine] initialized: {} x {} byte transfers, queue limit {} bytes ({} packets)",
            config.num_buffers,
            config.buffer_size(),
            config.ts_list_size_max,
            config.queue_capacity()
        );

        Ok(Self {
            shared,
            config,
            transport: Some(Box::new(transport)),
            pool,
            canceller,
            producer: None,
            discovery,
        })
    }

    /// Submit every transfer and start the producer thread.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let state = self.state();
        if state != EngineState::Init {
            return Err(EngineError::InvalidState { from: state, op: "start" });
        }
        let Some(transport) = self.transport.take() else {
            return Err(EngineError::InvalidState { from: state, op: "start" });
        };

        let pool = std::mem::take(&mut self.pool);
        let mut submitter = TransferSubmitter::new(transport, pool.len());
        if let Err(e) = submitter.submit_all(pool) {
            error!("[Engine] initial submission failed: {}", e);
            self.abort_start(&mut submitter);
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        let canceller = Arc::clone(&self.canceller);
        // set before the thread exists so an early exit cannot be overwritten
        *self.shared.state.lock() = EngineState::Running;

        let spawned = std::thread::Builder::new()
            .name("jokerts-producer".to_string())
            .spawn(move || run_producer(shared, submitter, canceller));

        match spawned {
            Ok(handle) => {
                self.producer = Some(handle);
                info!("[Engine] started");
                Ok(())
            }
            Err(e) => {
                error!("[Engine] failed to spawn producer thread: {}", e);
                self.canceller.cancel_all();
                self.release();
                Err(EngineError::ThreadSpawn(e))
            }
        }
    }

    fn abort_start(&mut self, submitter: &mut TransferSubmitter) {
        self.shared.cancel.store(true, Ordering::Release);
        self.canceller.cancel_all();
        submitter.drain();
        self.release();
    }

    /// Stop the session and wait for the producer thread to exit.
    ///
    /// Returns the device-loss error if that is what ended the session.
    /// Calling `stop` again is a no-op.
    pub fn stop(&mut self) -> Result<(), EngineError> {
        let from = {
            let mut state = self.shared.state.lock();
            let from = *state;
            match from {
                EngineState::Stopped => return Ok(()),
                EngineState::Init => {}
                EngineState::Running | EngineState::Stopping => *state = EngineState::Stopping,
            }
            from
        };
        debug!("[Engine] stop requested while {:?}", from);

        self.shared.cancel.store(true, Ordering::Release);
        self.canceller.cancel_all();

        let mut result = Ok(());
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                error!("[Engine] producer thread panicked");
                result = Err(EngineError::ProducerPanicked);
            }
        }
        if let Some(fatal) = self.shared.fatal.lock().take() {
            result = Err(fatal);
        }

        let stats = self.stats();
        self.release();
        info!(
            "[Engine] stopped: {} packets in, {} dropped, {} resyncs",
            stats.packets_in, stats.packets_dropped, stats.resyncs
        );
        result
    }

    /// Drop queued packets, hooks and buffers; enter `Stopped`.
    fn release(&mut self) {
        self.shared.queue.lock().clear();
        self.shared.hooks.clear();
        self.discovery = None;
        self.transport = None;
        self.pool = Vec::new();
        *self.shared.state.lock() = EngineState::Stopped;
    }

    /// Copy queued TS bytes into `buf`. Never blocks; returns 0 when empty.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        self.shared.queue.lock().dequeue_into(buf)
    }

    /// A cloneable handle for a consumer thread.
    pub fn reader(&self) -> TsReader {
        TsReader::new(Arc::clone(&self.shared))
    }

    /// Route packets on `pid` to `hook`, replacing any previous hook there.
    ///
    /// The engine only keeps a weak reference: the hook is dropped from the
    /// table once the caller drops its `Arc`.
    pub fn register_hook<H>(&self, pid: u16, hook: &Arc<Mutex<H>>) -> Result<(), EngineError>
    where
        H: PacketHook + 'static,
    {
        let state = self.state();
        if state == EngineState::Stopped {
            return Err(EngineError::InvalidState { from: state, op: "register a hook" });
        }
        let hook: SharedHook = hook.clone();
        self.shared.hooks.register(pid, &hook)
    }

    pub fn unregister_hook(&self, pid: u16) -> bool {
        self.shared.hooks.unregister(pid)
    }

    /// PIDs that currently have a live hook, discovery's own included.
    pub fn hooked_pids(&self) -> Vec<u16> {
        self.shared.hooks.registered_pids()
    }

    /// Snapshot of the discovered programs, in discovery order.
    pub fn programs(&self) -> Arc<Vec<Program>> {
        self.shared.registry.snapshot()
    }

    pub fn program(&self, number: u16) -> Option<Program> {
        self.shared.registry.get(number)
    }

    /// Number of programs discovered so far.
    pub fn program_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Called on the producer thread whenever a program's name changes.
    pub fn set_name_callback<F>(&self, callback: F)
    where
        F: Fn(&Program) + Send + Sync + 'static,
    {
        self.shared.registry.set_name_callback(Some(Arc::new(callback)));
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    /// The producer has exited on its own (end of input or device loss).
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Bytes currently queued.
    pub fn queued_bytes(&self) -> usize {
        self.shared.queue.lock().size()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state() != EngineState::Stopped {
            if let Err(e) = self.stop() {
                warn!("[Engine] error while stopping on drop: {}", e);
            }
        }
    }
}

/// Producer thread body.
fn run_producer(shared: Arc<Shared>, mut submitter: TransferSubmitter, canceller: Arc<dyn CancelTransfers>) {
    let mut aligner = StreamAligner::new();
    debug!("[Engine] producer running");

    let result = loop {
        if shared.cancel.load(Ordering::Acquire) || submitter.in_flight() == 0 {
            break Ok(());
        }

        let step = submitter.complete_one(&shared.cancel, |data| {
            let report = aligner.push(data, |packet| shared.process_packet(packet));
            if report.discarded > 0 {
                shared.stats.add_discarded(report.discarded as u64);
            }
            if report.resynced {
                shared.stats.add_resync();
            }
        });

        match step {
            Ok(Step::Data(_)) => shared.stats.add_transfer_completed(),
            Ok(Step::Retried) => {
                shared.stats.add_transfer_error();
                // the failed transfer left a gap in the byte stream
                aligner.reset();
            }
            Ok(Step::Cancelled) => {}
            Ok(Step::EndOfStream) => {
                info!("[Engine] end of stream");
                break Ok(());
            }
            Ok(Step::Drained) => break Ok(()),
            Err(e) => {
                if matches!(e, EngineError::DeviceLost { .. }) {
                    shared.stats.add_transfer_error();
                }
                break Err(e);
            }
        }
    };

    shared.cancel.store(true, Ordering::Release);
    canceller.cancel_all();
    submitter.drain();

    if let Err(e) = result {
        error!("[Engine] producer stopped: {}", e);
        *shared.fatal.lock() = Some(e);
    }
    {
        let mut state = shared.state.lock();
        if *state == EngineState::Running {
            *state = EngineState::Stopping;
        }
    }
    shared.finished.store(true, Ordering::Release);
    debug!("[Engine] producer exited");
}
