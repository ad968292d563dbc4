use thiserror::Error;

use crate::common::{Addr, CacheId};
use crate::protocol::{Event, ProtocolKind, State};

pub type Result<T> = std::result::Result<T, CoherenceError>;

/// Rejected system configuration, reported at construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cache size bits ({cache_size_bit}) must cover set bits ({set_bit}) + block offset ({block_offset})")]
    Geometry {
        block_offset: u32,
        set_bit: u32,
        cache_size_bit: u32,
    },

    #[error("cache size of 2^{0} bytes is not supported (max 2^32)")]
    CacheTooLarge(u32),

    #[error("a system needs at least one core")]
    NoCores,

    #[error("cacheable range [{start:#x}, {end:#x}) is empty or not block aligned")]
    BadCacheableRange { start: u64, end: u64 },

    #[error("cacheable range [{start:#x}, {end:#x}) overlaps private range [{private_start:#x}, {private_end:#x})")]
    OverlapsPrivate {
        start: u64,
        end: u64,
        private_start: u64,
        private_end: u64,
    },

    #[error("unknown protocol `{0}`")]
    UnknownProtocol(String),

    #[error("could not read config: {0}")]
    Io(String),

    #[error("could not parse config: {0}")]
    Parse(String),
}

/// Violations of the coherence contract and malformed requests.
#[derive(Error, Debug)]
pub enum CoherenceError {
    #[error("{protocol} cache {cache}: no transition for {event:?} in state {state:?} at {addr}")]
    UnexpectedEvent {
        protocol: ProtocolKind,
        cache: CacheId,
        state: State,
        event: Event,
        addr: Addr,
    },

    #[error("caches {first} and {second} both supplied data for {addr}")]
    InconsistentSupply {
        addr: Addr,
        first: CacheId,
        second: CacheId,
    },

    #[error("single-writer violated at {addr}: {holders:?}")]
    MultipleWriters {
        addr: Addr,
        holders: Vec<(CacheId, State)>,
    },

    #[error("caches disagree on the value of {addr}")]
    StaleCopy { addr: Addr },

    #[error("{size}-byte access at {addr} crosses a {block_size}-byte block")]
    SplitAccess {
        addr: Addr,
        size: usize,
        block_size: usize,
    },

    #[error("invalid trace line {line}: {reason}")]
    Trace { line: usize, reason: String },

    #[error("{0} trace files, but default store values only cover 255 cores")]
    TooManyTraces(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
