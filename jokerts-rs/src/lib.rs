//! Transport stream capture engine for USB TV receivers.
//!
//! The engine keeps a pool of transfers in flight, realigns the byte
//! stream onto 188-byte TS packets, queues them for a pull-style consumer
//! and feeds selected PIDs to hooks, one of which discovers the programs
//! carried by the stream.

mod aligner;
mod config;
mod discovery;
mod engine;
mod error;
mod hooks;
mod queue;
mod reader;
mod registry;
mod stats;
mod submitter;
pub mod transport;

pub use aligner::{PushReport, StreamAligner};
pub use config::{ConfigFile, EngineConfig, LoggingSection, DEFAULT_CONFIG_FILE};
pub use discovery::ProgramDiscovery;
pub use engine::{Engine, EngineState};
pub use error::{ConfigError, EngineError, TransportError};
pub use hooks::{HookContext, PacketHook};
pub use queue::PacketQueue;
pub use reader::TsReader;
pub use registry::{ElementaryStream, Program};
pub use stats::StatsSnapshot;
pub use transport::{MemoryDevice, MemoryTransport, ReaderTransport, Transport};
