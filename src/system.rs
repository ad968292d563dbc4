//! Wiring of a whole machine: one bus, one cache per core, and main memory.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;

use log::{info, warn};
use serde::Serialize;

use crate::bus::{Bus, BusStats};
use crate::cache::{Cache, CacheStats, LineSnapshot};
use crate::common::{Addr, CacheId, Instructions};
use crate::config::SystemConfig;
use crate::error::{CoherenceError, ConfigError, Result};
use crate::memory::{MainMemory, Memory};
use crate::processor::{Processor, ProcessorStats};
use crate::protocol::ProtocolKind;

pub struct System {
    config: SystemConfig,
    bus: Arc<Bus>,
    caches: Vec<Cache>,
}

/// Statistics gathered after a run.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub protocol: ProtocolKind,
    pub cores: Vec<CoreReport>,
    pub bus: BusStats,
    /// cycles until the slowest core finished
    pub total_cycles: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CoreReport {
    pub id: CacheId,
    pub processor: ProcessorStats,
    pub cache: CacheStats,
    #[serde(skip)]
    pub loaded: Vec<(Addr, u8)>,
}

impl System {
    pub fn new(config: SystemConfig) -> std::result::Result<Self, ConfigError> {
        Self::with_memory(config, Box::new(MainMemory::new()))
    }

    pub fn with_memory(
        config: SystemConfig,
        memory: Box<dyn Memory>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let spec = config.cache.spec();
        info!(
            "{} system: {} cores, {} sets x {} ways x {} B",
            config.protocol,
            config.cores,
            spec.num_sets(),
            spec.assoc(),
            spec.block_size()
        );
        let bus = Arc::new(Bus::new(spec, config.timing, memory));
        let caches = (0..config.cores as CacheId)
            .map(|id| {
                Cache::new(
                    id,
                    config.protocol.build(config.cache.invalid_threshold),
                    config.cache.replacement,
                    config.memory.clone(),
                    bus.clone(),
                )
            })
            .collect();
        Ok(System { config, bus, caches })
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn caches(&self) -> &[Cache] {
        &self.caches
    }

    /// Run one trace per core, each on its own thread, then audit the final state.
    /// Cores without a trace stay idle.
    pub fn run(&self, traces: Vec<Instructions>) -> Result<Report> {
        if traces.len() > self.caches.len() {
            warn!(
                "{} traces for {} cores, ignoring the rest",
                traces.len(),
                self.caches.len()
            );
        }
        let results = thread::scope(|s| {
            let handles: Vec<_> = self
                .caches
                .iter()
                .zip(traces)
                .map(|(cache, insts)| s.spawn(move || Processor::new(cache, insts).run()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect::<Vec<_>>()
        });

        let mut cores = Vec::new();
        for (cache, result) in self.caches.iter().zip(results) {
            let (processor, loaded) = result?;
            cores.push(CoreReport {
                id: cache.id(),
                processor,
                cache: cache.stats(),
                loaded,
            });
        }
        self.audit()?;
        Ok(self.report(cores))
    }

    fn report(&self, cores: Vec<CoreReport>) -> Report {
        Report {
            protocol: self.config.protocol,
            total_cycles: cores.iter().map(|c| c.processor.cycle_count).max().unwrap_or(0),
            cores,
            bus: self.bus.stats(),
        }
    }

    /// Check the single-writer and value invariants over every cached block.
    pub fn audit(&self) -> Result<()> {
        let mut blocks: BTreeMap<Addr, Vec<(CacheId, LineSnapshot)>> = BTreeMap::new();
        for cache in &self.caches {
            for line in cache.lines() {
                blocks.entry(line.addr).or_default().push((cache.id(), line));
            }
        }
        let block_size = self.config.cache.spec().block_size();
        for (addr, copies) in blocks {
            let owners = copies.iter().filter(|(_, l)| l.state.is_owner()).count();
            let exclusive = copies.iter().any(|(_, l)| l.state.is_exclusive());
            if owners > 1 || (exclusive && copies.len() > 1) {
                return Err(CoherenceError::MultipleWriters {
                    addr,
                    holders: copies.iter().map(|(id, l)| (*id, l.state)).collect(),
                });
            }
            let first = &copies[0].1.data;
            if copies.iter().any(|(_, l)| &l.data != first) {
                return Err(CoherenceError::StaleCopy { addr });
            }
            if !copies.iter().any(|(_, l)| l.dirty) && self.bus.peek(addr, block_size) != *first {
                return Err(CoherenceError::StaleCopy { addr });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "protocol: {}", self.protocol)?;
        writeln!(f, "total cycles: {}", self.total_cycles)?;
        for core in &self.cores {
            let (p, c) = (&core.processor, &core.cache);
            writeln!(
                f,
                "core {}: cycles {} (idle {}), loads {}, stores {}, other {}",
                core.id, p.cycle_count, p.idle_cycle_count, p.load_count, p.store_count, p.other_count
            )?;
            let accesses = c.hits + c.misses;
            let miss_rate = if accesses > 0 { c.misses as f64 / accesses as f64 } else { 0.0 };
            writeln!(
                f,
                "  cache: hits {}, misses {} ({:.2}%), evictions {}, writebacks {}, invalidations {}, uncached {}",
                c.hits,
                c.misses,
                miss_rate * 100.0,
                c.evictions,
                c.writebacks,
                c.invalidations,
                c.uncached
            )?;
        }
        let b = &self.bus;
        writeln!(
            f,
            "bus: {} transactions ({} read, {} read-exclusive, {} invalidate, {} update, {} writeback)",
            b.transactions, b.reads, b.read_exclusives, b.invalidates, b.updates, b.writebacks
        )?;
        write!(
            f,
            "     {} cache-to-cache, {} memory fetches, {} uncached, {} busy cycles",
            b.cache_to_cache, b.memory_fetches, b.uncached, b.busy_cycles
        )
    }
}
