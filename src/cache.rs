//! Per-core coherent cache controller.
//!
//! A request first tries to complete locally under the cache's own lock. When the
//! protocol asks for a bus transaction the lock is dropped, the bus is acquired, and
//! the request is resolved again from scratch while holding both. Snoops from other
//! caches only ever take this cache's lock, so the lock order is always bus, then
//! cache.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use serde::Serialize;

use crate::bus::{Bus, BusGrant, BusTransaction, SnoopReply, Snooper};
use crate::common::{timing, Addr, CacheId, CacheSpec, CpuRequest, CpuResponse, Op};
use crate::config::{MemoryConfig, Replacement};
use crate::error::{CoherenceError, Result};
use crate::protocol::{BusOp, DataAction, Event, Protocol, ProtocolKind, Sharing, State, Transition};
use crate::store::{Evicted, LineStore, Slot};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// valid lines replaced to make room
    pub evictions: u64,
    /// evictions that wrote dirty data back
    pub writebacks: u64,
    /// valid lines lost to other caches' transactions
    pub invalidations: u64,
    pub uncached: u64,
    pub stall_cycles: u64,
}

/// A valid line as seen from outside the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineSnapshot {
    pub addr: Addr,
    pub state: State,
    pub dirty: bool,
    pub data: Vec<u8>,
}

struct CacheCore {
    store: LineStore,
    stats: CacheStats,
}

struct Inner {
    id: CacheId,
    protocol: Box<dyn Protocol>,
    core: Mutex<CacheCore>,
}

pub struct Cache {
    inner: Arc<Inner>,
    bus: Arc<Bus>,
    memory: MemoryConfig,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn decide(&self, state: State, sharing: &Sharing, event: Event, addr: Addr) -> Result<Transition> {
        self.protocol
            .transition(state, sharing, event)
            .ok_or(CoherenceError::UnexpectedEvent {
                protocol: self.protocol.kind(),
                cache: self.id,
                state,
                event,
                addr,
            })
    }
}

impl Cache {
    /// Create a cache and attach it to `bus`.
    pub fn new(
        id: CacheId,
        protocol: Box<dyn Protocol>,
        replacement: Replacement,
        memory: MemoryConfig,
        bus: Arc<Bus>,
    ) -> Self {
        let store = LineStore::new(*bus.spec(), replacement);
        let inner = Arc::new(Inner {
            id,
            protocol,
            core: Mutex::new(CacheCore {
                store,
                stats: CacheStats::default(),
            }),
        });
        bus.register(inner.clone());
        Cache { inner, bus, memory }
    }

    pub fn id(&self) -> CacheId {
        self.inner.id
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.inner.protocol.kind()
    }

    pub fn spec(&self) -> &CacheSpec {
        self.bus.spec()
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.inner.core).stats.clone()
    }

    /// Coherence state of the block holding `addr`.
    pub fn state(&self, addr: impl Into<Addr>) -> State {
        let core = lock(&self.inner.core);
        let block = addr.into().block(self.spec());
        core.store.lookup(block).map_or(State::Invalid, |(_, s)| s)
    }

    pub fn lines(&self) -> Vec<LineSnapshot> {
        let core = lock(&self.inner.core);
        core.store
            .valid_lines()
            .map(|(addr, l)| LineSnapshot {
                addr,
                state: l.state,
                dirty: l.dirty,
                data: l.data.clone(),
            })
            .collect()
    }

    pub fn read(&self, addr: impl Into<Addr>, size: usize) -> Result<Vec<u8>> {
        Ok(self.access(CpuRequest::read(addr, size))?.data)
    }

    pub fn write(&self, addr: impl Into<Addr>, data: impl Into<Vec<u8>>) -> Result<()> {
        self.access(CpuRequest::write(addr, data)).map(|_| ())
    }

    /// Serve one CPU request, blocking until it is complete.
    pub fn access(&self, req: CpuRequest) -> Result<CpuResponse> {
        let spec = *self.spec();
        let size = match req.op {
            Op::Read => req.size,
            Op::Write => req.data.len(),
        };
        if req.addr.offset(&spec) + size > spec.block_size() {
            return Err(CoherenceError::SplitAccess {
                addr: req.addr,
                size,
                block_size: spec.block_size(),
            });
        }
        if !self.memory.is_cacheable(req.addr) {
            return Ok(self.access_uncached(&req));
        }
        let block = req.addr.block(&spec);
        let event = Event::from(req.op);

        let hit = {
            let mut core = lock(&self.inner.core);
            let found = core.store.lookup(block);
            let state = found.map_or(State::Invalid, |(_, s)| s);
            let sharing = found.map(|(slot, _)| core.store.line(slot).sharing).unwrap_or_default();
            let t = self.inner.decide(state, &sharing, event, block)?;
            if state.is_valid() {
                core.stats.hits += 1;
            } else {
                core.stats.misses += 1;
            }
            if let (None, Some((slot, _))) = (t.bus, found) {
                trace!("cache {} hit {:?} {} in {:?}", self.id(), req.op, req.addr, state);
                core.stats.stall_cycles += timing::hit(self.bus.timing());
                return Ok(self.serve_local(&mut core, slot, state, &req, t.next.resolve(false)));
            }
            state.is_valid()
        };

        let grant = self.bus.acquire(self.id());
        let mut core = lock(&self.inner.core);
        // a copy lost while waiting for the grant turns the upgrade into a full miss
        if hit && !core.store.lookup(block).is_some_and(|(_, s)| s.is_valid()) {
            core.stats.hits -= 1;
            core.stats.misses += 1;
        }
        let (resp, cycles) = self.resolve(&grant, &mut core, &req, block)?;
        core.stats.stall_cycles += cycles + timing::hit(self.bus.timing());
        Ok(resp)
    }

    /// Complete a request while holding the bus. The line may have changed since the
    /// first lookup, so the protocol is consulted again.
    fn resolve(
        &self,
        grant: &BusGrant<'_>,
        core: &mut CacheCore,
        req: &CpuRequest,
        block: Addr,
    ) -> Result<(CpuResponse, u64)> {
        let event = Event::from(req.op);
        let mut cycles = 0;
        loop {
            let found = core.store.lookup(block);
            let state = found.map_or(State::Invalid, |(_, s)| s);
            let sharing = found.map(|(slot, _)| core.store.line(slot).sharing).unwrap_or_default();
            let t = self.inner.decide(state, &sharing, event, block)?;
            let op = match (t.bus, found) {
                (Some(op), _) => op,
                (None, Some((slot, _))) => {
                    return Ok((self.serve_local(core, slot, state, req, t.next.resolve(false)), cycles))
                }
                (None, None) => {
                    return Err(CoherenceError::UnexpectedEvent {
                        protocol: self.protocol(),
                        cache: self.id(),
                        state,
                        event,
                        addr: block,
                    })
                }
            };

            let slot = match found {
                Some((slot, _)) => slot,
                None => {
                    let (slot, evicted) = core.store.allocate(block);
                    if let Some(ev) = evicted {
                        cycles += self.evict(grant, core, ev)?;
                    }
                    slot
                }
            };

            let mut txn = BusTransaction::new(op, block, self.id());
            if op == BusOp::Update {
                let mut merged = core.store.line(slot).data.clone();
                let off = req.addr.offset(self.spec());
                merged[off..off + req.data.len()].copy_from_slice(&req.data);
                txn = txn.with_payload(merged);
            }
            let done = grant.transact(txn)?;
            cycles += done.cycles;
            let next = t.next.resolve(done.shared);
            debug!(
                "cache {} {:?} {}: {:?} -> {:?} via {:?}",
                self.id(),
                req.op,
                block,
                state,
                next,
                op
            );
            self.inner
                .protocol
                .settle(&mut core.store.line_mut(slot).sharing, op, req.op, &done);

            match t.data {
                DataAction::Fill | DataAction::FillReplay => {
                    if let Some(data) = &done.data {
                        core.store.write(slot, 0, data);
                    }
                    core.store.set_state(slot, next);
                    let line = core.store.line_mut(slot);
                    line.dirty = false;
                    line.sharing.touched = true;
                    if t.data == DataAction::Fill {
                        return Ok((serve(core, slot, req, next), cycles));
                    }
                }
                _ => return Ok((serve(core, slot, req, next), cycles)),
            }
        }
    }

    /// Serve a request the protocol completes without the bus.
    fn serve_local(
        &self,
        core: &mut CacheCore,
        slot: Slot,
        state: State,
        req: &CpuRequest,
        next: State,
    ) -> CpuResponse {
        let sharing = &mut core.store.line_mut(slot).sharing;
        self.inner.protocol.hit(sharing, state, req.op);
        serve(core, slot, req, next)
    }

    fn evict(&self, grant: &BusGrant<'_>, core: &mut CacheCore, ev: Evicted) -> Result<u64> {
        core.stats.evictions += 1;
        if !ev.dirty {
            debug!("cache {} drops {} in {:?}", self.id(), ev.addr, ev.state);
            return Ok(0);
        }
        debug!("cache {} writes back {} from {:?}", self.id(), ev.addr, ev.state);
        core.stats.writebacks += 1;
        let txn = BusTransaction::new(BusOp::Writeback, ev.addr, self.id()).with_payload(ev.data);
        Ok(grant.transact(txn)?.cycles)
    }

    fn access_uncached(&self, req: &CpuRequest) -> CpuResponse {
        let grant = self.bus.acquire(self.id());
        let mut resp = CpuResponse { success: true, ..CpuResponse::default() };
        let cycles = match req.op {
            Op::Read => {
                resp.data = vec![0; req.size];
                grant.read_uncached(req.addr, &mut resp.data)
            }
            Op::Write => grant.write_uncached(req.addr, &req.data),
        };
        let mut core = lock(&self.inner.core);
        core.stats.uncached += 1;
        core.stats.stall_cycles += cycles;
        resp
    }
}

/// Perform the CPU access on a line the protocol says may serve it.
fn serve(core: &mut CacheCore, slot: Slot, req: &CpuRequest, next: State) -> CpuResponse {
    let off = req.addr.offset(core.store.spec());
    core.store.touch(slot);
    core.store.set_state(slot, next);
    core.store.line_mut(slot).sharing.touched = true;
    let data = match req.op {
        Op::Read => core.store.line(slot).data[off..off + req.size].to_vec(),
        Op::Write => {
            core.store.write(slot, off, &req.data);
            core.store.line_mut(slot).dirty = true;
            Vec::new()
        }
    };
    CpuResponse { data, success: true }
}

impl Snooper for Inner {
    fn id(&self) -> CacheId {
        self.id
    }

    fn snoop(&self, txn: &BusTransaction) -> Result<SnoopReply> {
        let mut core = lock(&self.core);
        let Some((slot, state)) = core.store.lookup(txn.addr).filter(|(_, s)| s.is_valid()) else {
            return Ok(SnoopReply::default());
        };
        let event = Event::from(txn.kind);
        let t = self.decide(state, &core.store.line(slot).sharing, event, txn.addr)?;
        let next = t.next.resolve(false);

        let line = core.store.line(slot);
        let mut reply = SnoopReply {
            held: true,
            retained: next.is_valid(),
            touched: line.sharing.touched,
            ..SnoopReply::default()
        };
        match t.data {
            DataAction::Supply => reply.data = Some(line.data.clone()),
            DataAction::Flush => {
                reply.data = Some(line.data.clone());
                reply.flush = true;
            }
            DataAction::Absorb => {
                if let Some(payload) = &txn.payload {
                    core.store.write(slot, 0, payload);
                }
            }
            _ => (),
        }
        core.store.set_state(slot, next);
        let line = core.store.line_mut(slot);
        self.protocol.observe(&mut line.sharing, event);
        if matches!(t.data, DataAction::Flush | DataAction::Absorb) || !next.is_valid() {
            line.dirty = false;
        }
        if !next.is_valid() {
            core.stats.invalidations += 1;
        }
        trace!(
            "cache {} snooped {:?} {} from {}: {:?} -> {:?}",
            self.id,
            txn.kind,
            txn.addr,
            txn.requester,
            state,
            next
        );
        Ok(reply)
    }
}

impl Snooper for Cache {
    fn id(&self) -> CacheId {
        self.inner.id
    }

    fn snoop(&self, txn: &BusTransaction) -> Result<SnoopReply> {
        self.inner.snoop(txn)
    }
}
