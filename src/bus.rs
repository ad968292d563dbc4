//! The snooping bus.
//!
//! One cache at a time holds the bus. Requests queue up in arrival order and the head
//! of the queue gets the next grant. The holder may issue any number of transactions
//! before dropping its [`BusGrant`]. A transaction is shown to every registered
//! snooper except the requester, which learns the outcome from the [`Completion`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use log::{debug, trace};
use serde::Serialize;

use crate::common::{timing, Addr, CacheId, CacheSpec, TimingSpec};
use crate::error::{CoherenceError, Result};
use crate::memory::Memory;
use crate::protocol::BusOp;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusTransaction {
    pub kind: BusOp,
    /// block address
    pub addr: Addr,
    pub requester: CacheId,
    /// whole block for Update and Writeback
    pub payload: Option<Vec<u8>>,
}

impl BusTransaction {
    pub fn new(kind: BusOp, addr: Addr, requester: CacheId) -> Self {
        BusTransaction { kind, addr, requester, payload: None }
    }

    pub fn with_payload(mut self, data: Vec<u8>) -> Self {
        self.payload = Some(data);
        self
    }
}

/// What one snooper reports back for a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnoopReply {
    /// held a valid copy when the transaction arrived
    pub held: bool,
    /// still holds a valid copy afterwards (drives the shared line)
    pub retained: bool,
    /// the copy was accessed locally since the last update it received
    pub touched: bool,
    pub data: Option<Vec<u8>>,
    /// memory must take a copy of `data`
    pub flush: bool,
}

/// Outcome of a transaction as seen by the requester.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    /// some other cache still holds the block
    pub shared: bool,
    /// number of other caches that held the block before the transaction
    pub sharers: usize,
    /// some other holder had used its copy since the previous update
    pub touched: bool,
    /// block returned by a fetching transaction
    pub data: Option<Vec<u8>>,
    pub supplier: Option<CacheId>,
    pub cycles: u64,
}

pub trait Snooper: Send + Sync {
    fn id(&self) -> CacheId;

    /// React to a transaction issued by another cache.
    fn snoop(&self, txn: &BusTransaction) -> Result<SnoopReply>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub transactions: u64,
    pub reads: u64,
    pub read_exclusives: u64,
    pub invalidates: u64,
    pub updates: u64,
    pub writebacks: u64,
    pub cache_to_cache: u64,
    pub memory_fetches: u64,
    pub uncached: u64,
    pub busy_cycles: u64,
}

impl BusStats {
    fn count(&mut self, kind: BusOp) {
        self.transactions += 1;
        match kind {
            BusOp::Read => self.reads += 1,
            BusOp::ReadExclusive => self.read_exclusives += 1,
            BusOp::Invalidate => self.invalidates += 1,
            BusOp::Update => self.updates += 1,
            BusOp::Writeback => self.writebacks += 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BusState {
    Unlocked,
    Locked(CacheId),
}

struct Arbiter {
    state: BusState,
    lock_queue: VecDeque<CacheId>,
}

struct Backend {
    memory: Box<dyn Memory>,
    stats: BusStats,
    trace: Option<Vec<BusTransaction>>,
}

pub struct Bus {
    spec: CacheSpec,
    timing: TimingSpec,
    arbiter: Mutex<Arbiter>,
    granted: Condvar,
    backend: Mutex<Backend>,
    snoopers: RwLock<Vec<Arc<dyn Snooper>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Bus {
    pub fn new(spec: CacheSpec, timing: TimingSpec, memory: Box<dyn Memory>) -> Self {
        Bus {
            spec,
            timing,
            arbiter: Mutex::new(Arbiter {
                state: BusState::Unlocked,
                lock_queue: VecDeque::new(),
            }),
            granted: Condvar::new(),
            backend: Mutex::new(Backend {
                memory,
                stats: BusStats::default(),
                trace: None,
            }),
            snoopers: RwLock::new(Vec::new()),
        }
    }

    pub fn spec(&self) -> &CacheSpec {
        &self.spec
    }

    pub fn timing(&self) -> &TimingSpec {
        &self.timing
    }

    pub fn register(&self, snooper: Arc<dyn Snooper>) {
        self.snoopers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snooper);
    }

    /// Block until `id` owns the bus. Grants are handed out in request order.
    pub fn acquire(&self, id: CacheId) -> BusGrant<'_> {
        let mut arb = lock(&self.arbiter);
        arb.lock_queue.push_back(id);
        while arb.state != BusState::Unlocked || arb.lock_queue.front() != Some(&id) {
            arb = self.granted.wait(arb).unwrap_or_else(PoisonError::into_inner);
        }
        arb.lock_queue.pop_front();
        arb.state = BusState::Locked(id);
        trace!("bus granted to cache {id}");
        BusGrant { bus: self, id }
    }

    fn release(&self, id: CacheId) {
        let mut arb = lock(&self.arbiter);
        debug_assert_eq!(arb.state, BusState::Locked(id));
        arb.state = BusState::Unlocked;
        trace!("bus released by cache {id}");
        self.granted.notify_all();
    }

    pub fn stats(&self) -> BusStats {
        lock(&self.backend).stats.clone()
    }

    /// Start recording every coherent transaction.
    pub fn enable_trace(&self) {
        lock(&self.backend).trace.get_or_insert_with(Vec::new);
    }

    pub fn trace(&self) -> Vec<BusTransaction> {
        lock(&self.backend).trace.clone().unwrap_or_default()
    }

    /// Memory contents without going through the caches.
    pub fn peek(&self, addr: Addr, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        lock(&self.backend).memory.peek(addr, &mut buf);
        buf
    }

    fn snoopers(&self) -> Vec<Arc<dyn Snooper>> {
        self.snoopers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Exclusive use of the bus. Released on drop.
pub struct BusGrant<'a> {
    bus: &'a Bus,
    id: CacheId,
}

impl BusGrant<'_> {
    pub fn transact(&self, txn: BusTransaction) -> Result<Completion> {
        let bus = self.bus;
        let t = &bus.timing;
        let block_size = bus.spec.block_size();
        debug!("cache {} -> {:?} {}", txn.requester, txn.kind, txn.addr);

        let mut done = Completion {
            cycles: timing::c2c_msg(t),
            ..Completion::default()
        };
        let mut flushed = None;
        for snooper in bus.snoopers().iter().filter(|s| s.id() != txn.requester) {
            let reply = snooper.snoop(&txn)?;
            if reply.held {
                done.sharers += 1;
            }
            done.shared |= reply.retained;
            done.touched |= reply.touched;
            if let Some(data) = reply.data {
                if let Some(first) = done.supplier {
                    return Err(CoherenceError::InconsistentSupply {
                        addr: txn.addr,
                        first,
                        second: snooper.id(),
                    });
                }
                done.supplier = Some(snooper.id());
                if reply.flush {
                    flushed = Some(data.clone());
                }
                done.data = Some(data);
            }
        }

        let mut backend = lock(&bus.backend);
        if let Some(data) = &flushed {
            backend.memory.write(txn.addr, data);
            done.cycles += timing::flush(t);
        }
        match txn.kind {
            BusOp::Read | BusOp::ReadExclusive => {
                if done.data.is_some() {
                    backend.stats.cache_to_cache += 1;
                    done.cycles += timing::c2c_transfer(t, block_size);
                } else {
                    let mut buf = vec![0; block_size];
                    backend.memory.read(txn.addr, &mut buf);
                    backend.stats.memory_fetches += 1;
                    done.cycles += timing::mem_fetch(t);
                    done.data = Some(buf);
                }
            }
            BusOp::Writeback => {
                if let Some(data) = &txn.payload {
                    backend.memory.write(txn.addr, data);
                }
                done.cycles += timing::flush(t);
            }
            BusOp::Update => done.cycles += timing::c2c_transfer(t, block_size),
            BusOp::Invalidate => (),
        }
        backend.stats.count(txn.kind);
        backend.stats.busy_cycles += done.cycles;
        if let Some(trace) = backend.trace.as_mut() {
            trace.push(txn);
        }
        Ok(done)
    }

    /// Read outside the cacheable range, straight from memory.
    pub fn read_uncached(&self, addr: Addr, buf: &mut [u8]) -> u64 {
        let mut backend = lock(&self.bus.backend);
        backend.memory.read(addr, buf);
        self.count_uncached(&mut backend)
    }

    pub fn write_uncached(&self, addr: Addr, data: &[u8]) -> u64 {
        let mut backend = lock(&self.bus.backend);
        backend.memory.write(addr, data);
        self.count_uncached(&mut backend)
    }

    fn count_uncached(&self, backend: &mut Backend) -> u64 {
        let cycles = timing::c2c_msg(&self.bus.timing) + timing::mem_fetch(&self.bus.timing);
        backend.stats.uncached += 1;
        backend.stats.busy_cycles += cycles;
        cycles
    }
}

impl Drop for BusGrant<'_> {
    fn drop(&mut self) {
        self.bus.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MainMemory;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        id: CacheId,
        reply: SnoopReply,
        seen: AtomicUsize,
    }

    impl Fixed {
        fn new(id: CacheId, reply: SnoopReply) -> Arc<Self> {
            Arc::new(Fixed { id, reply, seen: AtomicUsize::new(0) })
        }
    }

    impl Snooper for Fixed {
        fn id(&self) -> CacheId {
            self.id
        }
        fn snoop(&self, _: &BusTransaction) -> Result<SnoopReply> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn spec() -> CacheSpec {
        CacheSpec { block_offset: 2, set_bit: 1, cache_size_bit: 4 }
    }

    fn bus() -> Bus {
        Bus::new(spec(), TimingSpec::default(), Box::new(MainMemory::new()))
    }

    #[test]
    fn requester_does_not_snoop_itself() {
        let bus = bus();
        let a = Fixed::new(0, SnoopReply::default());
        let b = Fixed::new(1, SnoopReply::default());
        bus.register(a.clone());
        bus.register(b.clone());
        let g = bus.acquire(0);
        g.transact(BusTransaction::new(BusOp::Invalidate, Addr(0), 0)).unwrap();
        assert_eq!(a.seen.load(Ordering::SeqCst), 0);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_falls_back_to_memory() {
        let bus = bus();
        {
            let g = bus.acquire(0);
            let wb = BusTransaction::new(BusOp::Writeback, Addr(8), 0).with_payload(vec![1, 2, 3, 4]);
            g.transact(wb).unwrap();
            let done = g.transact(BusTransaction::new(BusOp::Read, Addr(8), 0)).unwrap();
            assert_eq!(done.data, Some(vec![1, 2, 3, 4]));
            assert_eq!(done.supplier, None);
            assert!(!done.shared);
        }
        let stats = bus.stats();
        assert_eq!((stats.writebacks, stats.reads, stats.memory_fetches), (1, 1, 1));
    }

    #[test]
    fn flush_supplies_and_updates_memory() {
        let bus = bus();
        let owner = SnoopReply {
            held: true,
            retained: true,
            data: Some(vec![9; 4]),
            flush: true,
            ..SnoopReply::default()
        };
        bus.register(Fixed::new(1, owner));
        let done = bus
            .acquire(0)
            .transact(BusTransaction::new(BusOp::Read, Addr(4), 0))
            .unwrap();
        assert_eq!(done.supplier, Some(1));
        assert!(done.shared);
        assert_eq!(done.sharers, 1);
        assert_eq!(bus.peek(Addr(4), 4), vec![9; 4]);
        assert_eq!(bus.stats().cache_to_cache, 1);
    }

    #[test]
    fn two_suppliers_are_rejected() {
        let bus = bus();
        let supply = SnoopReply { held: true, data: Some(vec![0; 4]), ..SnoopReply::default() };
        bus.register(Fixed::new(1, supply.clone()));
        bus.register(Fixed::new(2, supply));
        let err = bus
            .acquire(0)
            .transact(BusTransaction::new(BusOp::Read, Addr(0), 0))
            .unwrap_err();
        assert!(matches!(err, CoherenceError::InconsistentSupply { first: 1, second: 2, .. }));
    }

    #[test]
    fn update_leaves_memory_alone() {
        let bus = bus();
        bus.enable_trace();
        let up = BusTransaction::new(BusOp::Update, Addr(0), 0).with_payload(vec![7; 4]);
        bus.acquire(0).transact(up.clone()).unwrap();
        assert_eq!(bus.peek(Addr(0), 4), vec![0; 4]);
        assert_eq!(bus.trace(), vec![up]);
    }

    #[test]
    fn grants_are_exclusive() {
        let bus = bus();
        let inside = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for id in 0..4 {
                let (bus, inside) = (&bus, &inside);
                s.spawn(move || {
                    for _ in 0..50 {
                        let _g = bus.acquire(id);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        std::thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
    }
}
