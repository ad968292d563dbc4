use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Addr, CacheSpec, TimingSpec};
use crate::error::ConfigError;
use crate::protocol::ProtocolKind;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Replacement {
    #[default]
    Lru,
    /// second chance
    Clock,
}

/// Half-open address range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrRange {
    pub start: u64,
    pub end: u64,
}

impl AddrRange {
    pub fn new(start: u64, end: u64) -> Self {
        AddrRange { start, end }
    }
    pub fn contains(&self, addr: Addr) -> bool {
        (self.start..self.end).contains(&addr.0)
    }
    pub fn overlaps(&self, other: &AddrRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {       // unit     reasonable defaults
    pub block_offset: u32,     // bits     5
    pub set_bit: u32,          // bits     4
    pub cache_size_bit: u32,   // bits     15
    pub replacement: Replacement,
    pub invalid_threshold: u32, // count   5   (hybrid only)
}

impl Default for CacheConfig {
    fn default() -> Self {
        let geometry = CacheSpec::default();
        CacheConfig {
            block_offset: geometry.block_offset,
            set_bit: geometry.set_bit,
            cache_size_bit: geometry.cache_size_bit,
            replacement: Replacement::Lru,
            invalid_threshold: 5,
        }
    }
}

impl CacheConfig {
    pub fn spec(&self) -> CacheSpec {
        CacheSpec {
            block_offset: self.block_offset,
            set_bit: self.set_bit,
            cache_size_bit: self.cache_size_bit,
        }
    }
}

/// Which addresses go through the caches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// everything outside this range bypasses the caches; `None` caches all
    pub cacheable: Option<AddrRange>,
    /// ranges that are never cached
    pub private: Vec<AddrRange>,
}

impl MemoryConfig {
    pub fn is_cacheable(&self, addr: Addr) -> bool {
        self.cacheable.map_or(true, |r| r.contains(addr))
            && !self.private.iter().any(|r| r.contains(addr))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub protocol: ProtocolKind,
    pub cores: usize,
    pub cache: CacheConfig,
    pub timing: TimingSpec,
    pub memory: MemoryConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            protocol: ProtocolKind::Mesi,
            cores: 4,
            cache: CacheConfig::default(),
            timing: TimingSpec::default(),
            memory: MemoryConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.as_ref().display())))?;
        text.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let spec = self.cache.spec();
        spec.validate()?;
        if self.cores == 0 {
            return Err(ConfigError::NoCores);
        }
        if let Some(r) = self.memory.cacheable {
            let mask = spec.block_size() as u64 - 1;
            if r.start >= r.end || r.start & mask != 0 || r.end & mask != 0 {
                return Err(ConfigError::BadCacheableRange { start: r.start, end: r.end });
            }
            if let Some(p) = self.memory.private.iter().find(|p| p.overlaps(&r)) {
                return Err(ConfigError::OverlapsPrivate {
                    start: r.start,
                    end: r.end,
                    private_start: p.start,
                    private_end: p.end,
                });
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for SystemConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
