use log::{info, trace};
use serde::Serialize;

use crate::cache::Cache;
use crate::common::{Addr, CacheId, Instr, Instructions};
use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    // cycle counters
    pub cycle_count: u64,
    pub idle_cycle_count: u64,

    // instruction counters
    pub load_count: u64,
    pub store_count: u64,
    pub other_count: u64,
}

/// A core replaying a trace against its private cache, one blocking request at a time.
pub struct Processor<'a> {
    pub id: CacheId,
    cache: &'a Cache,
    insts: Instructions,
    stats: ProcessorStats,
    /// values returned by loads, in program order
    loaded: Vec<(Addr, u8)>,
}

impl<'a> Processor<'a> {
    pub fn new(cache: &'a Cache, insts: Instructions) -> Self {
        Processor {
            id: cache.id(),
            cache,
            insts,
            stats: ProcessorStats::default(),
            loaded: Vec::new(),
        }
    }

    /// Execute the next instruction. Returns false once the trace is exhausted.
    pub fn step(&mut self) -> Result<bool> {
        let Some(inst) = self.insts.pop_front() else {
            return Ok(false);
        };
        trace!("core {} executes {:?}", self.id, inst);
        match inst {
            Instr::Read(addr) => {
                self.stats.load_count += 1;
                let data = self.stalled(|c| c.read(addr, 1))?;
                self.loaded.push((addr, data.first().copied().unwrap_or(0)));
            }
            Instr::Write(addr, value) => {
                self.stats.store_count += 1;
                self.stalled(|c| c.write(addr, vec![value]))?;
            }
            Instr::Other(cycles) => {
                self.stats.other_count += 1;
                self.stats.cycle_count += cycles as u64;
            }
        }
        Ok(true)
    }

    pub fn run(mut self) -> Result<(ProcessorStats, Vec<(Addr, u8)>)> {
        while self.step()? {}
        info!(
            "core {} done after {} cycles ({} idle)",
            self.id, self.stats.cycle_count, self.stats.idle_cycle_count
        );
        Ok((self.stats, self.loaded))
    }

    // time spent waiting is whatever the cache booked as stall cycles for this access
    fn stalled<T>(&mut self, f: impl FnOnce(&Cache) -> Result<T>) -> Result<T> {
        let before = self.cache.stats().stall_cycles;
        let out = f(self.cache)?;
        let waited = self.cache.stats().stall_cycles - before;
        self.stats.cycle_count += waited;
        self.stats.idle_cycle_count += waited;
        Ok(out)
    }
}
