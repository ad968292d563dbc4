//! A snooping cache coherence simulator.
//!
//! Private per-core caches sit on one serializing bus together with main memory. Every
//! cache runs one of the MI, MSI, MESI, Dragon or Hybrid protocols per line; the bus
//! admits one transaction at a time and broadcasts it to every other cache.

pub mod bus;
pub mod cache;
pub mod common;
pub mod config;
pub mod error;
pub mod memory;
pub mod processor;
pub mod protocol;
pub mod store;
pub mod system;
pub mod utils;

pub use bus::{Bus, BusGrant, BusStats, BusTransaction, Completion, SnoopReply, Snooper};
pub use cache::{Cache, CacheStats, LineSnapshot};
pub use common::*;
pub use config::{AddrRange, CacheConfig, MemoryConfig, Replacement, SystemConfig};
pub use error::{CoherenceError, ConfigError};
pub use memory::{MainMemory, Memory};
pub use processor::{Processor, ProcessorStats};
pub use protocol::{BusOp, Event, Protocol, ProtocolKind, State};
pub use system::{CoreReport, Report, System};
