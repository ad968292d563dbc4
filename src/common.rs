use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub type CacheId = u32;

/// Geometry of one private cache, given as bit widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSpec {          // unit     reasonable defaults
    pub block_offset: u32,      // bits     5   (32 byte blocks)
    pub set_bit: u32,           // bits     4   (16 sets)
    pub cache_size_bit: u32,    // bits     15  (32 KiB)
}

impl Default for CacheSpec {
    fn default() -> Self {
        CacheSpec {
            block_offset: 5,
            set_bit: 4,
            cache_size_bit: 15,
        }
    }
}

impl CacheSpec {
    pub fn block_size(&self) -> usize {
        1 << self.block_offset
    }
    pub fn num_sets(&self) -> usize {
        1 << self.set_bit
    }
    pub fn cache_size(&self) -> usize {
        1 << self.cache_size_bit
    }
    /// ways per set, derived from the three widths
    pub fn assoc(&self) -> usize {
        self.cache_size() / self.num_sets() / self.block_size()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_size_bit < self.set_bit + self.block_offset {
            return Err(ConfigError::Geometry {
                block_offset: self.block_offset,
                set_bit: self.set_bit,
                cache_size_bit: self.cache_size_bit,
            });
        }
        if self.cache_size_bit > 32 {
            return Err(ConfigError::CacheTooLarge(self.cache_size_bit));
        }
        Ok(())
    }
}

/// Latencies used to estimate bus occupancy. Never affects functional behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSpec {         // unit     reasonable defaults
    pub word_size: u32,         // bytes    4
    pub address_size: u32,      // bytes    4
    pub mem_lat: u32,           // cpu      100
    pub hit_lat: u32,           // cpu      1
    pub bus_word_tf_lat: u32,   // cpu      2
}

impl Default for TimingSpec {
    fn default() -> Self {
        TimingSpec {
            word_size: 4,
            address_size: 4,
            mem_lat: 100,
            hit_lat: 1,
            bus_word_tf_lat: 2,
        }
    }
}

pub mod timing {
    use super::TimingSpec;
    pub fn c2c_msg(spec: &TimingSpec) -> u64 {
        // assuming immediate response through wired OR
        (spec.bus_word_tf_lat * spec.address_size / spec.word_size.max(1)) as u64
    }
    pub fn c2c_transfer(spec: &TimingSpec, block_size: usize) -> u64 {
        spec.bus_word_tf_lat as u64 * block_size as u64 / spec.word_size.max(1) as u64
    }
    pub fn flush(spec: &TimingSpec) -> u64 {
        spec.mem_lat as u64
    }
    pub fn mem_fetch(spec: &TimingSpec) -> u64 {
        spec.mem_lat as u64
    }
    pub fn hit(spec: &TimingSpec) -> u64 {
        spec.hit_lat as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Addr(pub u64);

impl Addr {
    /// get set index and tag of this address under given cache spec
    pub fn pos(&self, spec: &CacheSpec) -> (usize, u64) {
        let index = (self.0 >> spec.block_offset) & ((1u64 << spec.set_bit) - 1);
        let tag = self.0 >> (spec.block_offset + spec.set_bit);
        (index as usize, tag)
    }
    pub fn offset(&self, spec: &CacheSpec) -> usize {
        (self.0 & ((1u64 << spec.block_offset) - 1)) as usize
    }
    /// address of the first byte of the enclosing block
    pub fn block(&self, spec: &CacheSpec) -> Addr {
        Addr((self.0 >> spec.block_offset) << spec.block_offset)
    }
    pub fn from_pos(tag: u64, index: usize, spec: &CacheSpec) -> Addr {
        Addr((tag << (spec.block_offset + spec.set_bit)) | ((index as u64) << spec.block_offset))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Addr {
    fn from(a: u64) -> Self {
        Addr(a)
    }
}

// MESSAGE TYPES

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Read,
    Write,
}

/// A load or store issued by a core. Must not straddle a block boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuRequest {
    pub addr: Addr,
    pub op: Op,
    pub size: usize,
    pub data: Vec<u8>,
}

impl CpuRequest {
    pub fn read(addr: impl Into<Addr>, size: usize) -> Self {
        CpuRequest {
            addr: addr.into(),
            op: Op::Read,
            size,
            data: Vec::new(),
        }
    }
    pub fn write(addr: impl Into<Addr>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        CpuRequest {
            addr: addr.into(),
            op: Op::Write,
            size: data.len(),
            data,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CpuResponse {
    pub data: Vec<u8>,
    pub success: bool,
}

// instructions

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Read(Addr),
    Write(Addr, u8),
    Other(u32),
}

pub type Instructions = VecDeque<Instr>;
