//! Set-associative line storage.
//!
//! Slots stay allocated after their line is invalidated by a snoop, so the tag and
//! the sharing history survive until the slot is reused. Invalidated slots are reused
//! before any valid way is replaced.

use crate::common::{Addr, CacheSpec};
use crate::config::Replacement;
use crate::protocol::{Sharing, State};

#[derive(Clone, Debug, Default)]
pub struct Line {
    pub tag: u64,
    pub state: State,
    pub dirty: bool,
    pub data: Vec<u8>,
    pub sharing: Sharing,
    present: bool,
    last_used: u64,
    referenced: bool,
}

/// Position of a line: set index and way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Slot {
    pub set: usize,
    pub way: usize,
}

/// A valid line pushed out to make room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Evicted {
    pub addr: Addr,
    pub state: State,
    pub dirty: bool,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug)]
struct CacheSet {
    lines: Vec<Line>,
    mru_ctr: u64,
    clock: usize,
}

impl CacheSet {
    fn new(assoc: usize) -> Self {
        Self {
            lines: vec![Line::default(); assoc],
            mru_ctr: 0,
            clock: 0,
        }
    }

    fn find(&self, tag: u64) -> Option<usize> {
        self.lines.iter().position(|l| l.present && l.tag == tag)
    }

    fn touch(&mut self, way: usize) {
        self.mru_ctr += 1;
        let line = &mut self.lines[way];
        line.last_used = self.mru_ctr;
        line.referenced = true;
    }

    fn victim(&mut self, policy: Replacement) -> usize {
        if let Some(way) = self.lines.iter().position(|l| !l.present) {
            return way;
        }
        if let Some(way) = self.lines.iter().position(|l| !l.state.is_valid()) {
            return way;
        }
        match policy {
            Replacement::Lru => self
                .lines
                .iter()
                .enumerate()
                .min_by_key(|(_, l)| l.last_used)
                .map(|(i, _)| i)
                .unwrap_or(0),
            Replacement::Clock => loop {
                let n = self.lines.len();
                let hand = self.clock;
                self.clock = (self.clock + 1) % n;
                let line = &mut self.lines[hand];
                if line.referenced {
                    line.referenced = false;
                } else {
                    break hand;
                }
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct LineStore {
    spec: CacheSpec,
    policy: Replacement,
    sets: Vec<CacheSet>,
}

impl LineStore {
    pub fn new(spec: CacheSpec, policy: Replacement) -> Self {
        let sets = (0..spec.num_sets()).map(|_| CacheSet::new(spec.assoc())).collect();
        LineStore { spec, policy, sets }
    }

    pub fn spec(&self) -> &CacheSpec {
        &self.spec
    }

    /// The slot holding `addr`, if any. The state may be Invalid when the line was
    /// invalidated but its slot not yet reused.
    pub fn lookup(&self, addr: Addr) -> Option<(Slot, State)> {
        let (set, tag) = addr.pos(&self.spec);
        self.sets[set]
            .find(tag)
            .map(|way| (Slot { set, way }, self.sets[set].lines[way].state))
    }

    pub fn line(&self, slot: Slot) -> &Line {
        &self.sets[slot.set].lines[slot.way]
    }

    pub fn line_mut(&mut self, slot: Slot) -> &mut Line {
        &mut self.sets[slot.set].lines[slot.way]
    }

    pub fn touch(&mut self, slot: Slot) {
        self.sets[slot.set].touch(slot.way);
    }

    /// Claim a slot for `addr`, returning the valid line it displaced.
    pub fn allocate(&mut self, addr: Addr) -> (Slot, Option<Evicted>) {
        let (set, tag) = addr.pos(&self.spec);
        let block_size = self.spec.block_size();
        let way = self.sets[set].victim(self.policy);
        let old = std::mem::take(&mut self.sets[set].lines[way]);
        let evicted = (old.present && old.state.is_valid()).then(|| Evicted {
            addr: Addr::from_pos(old.tag, set, &self.spec),
            state: old.state,
            dirty: old.dirty,
            data: old.data,
        });
        self.sets[set].lines[way] = Line {
            tag,
            present: true,
            data: vec![0; block_size],
            ..Line::default()
        };
        let slot = Slot { set, way };
        self.touch(slot);
        (slot, evicted)
    }

    pub fn write(&mut self, slot: Slot, offset: usize, data: &[u8]) {
        let line = self.line_mut(slot);
        line.data[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn set_state(&mut self, slot: Slot, state: State) {
        self.line_mut(slot).state = state;
    }

    /// Every line currently in a valid state, with its block address.
    pub fn valid_lines(&self) -> impl Iterator<Item = (Addr, &Line)> + '_ {
        self.sets.iter().enumerate().flat_map(move |(set, s)| {
            s.lines
                .iter()
                .filter(|l| l.present && l.state.is_valid())
                .map(move |l| (Addr::from_pos(l.tag, set, &self.spec), l))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 4-byte blocks, 2 sets, 2 ways
    fn spec() -> CacheSpec {
        CacheSpec { block_offset: 2, set_bit: 1, cache_size_bit: 4 }
    }

    fn fill(store: &mut LineStore, a: u64) -> Option<Evicted> {
        let (slot, ev) = store.allocate(Addr(a));
        store.set_state(slot, State::Shared);
        ev
    }

    #[test]
    fn geometry_partitions_the_address() {
        let s = spec();
        assert_eq!(s.assoc(), 2);
        let a = Addr(0b1011_0_11);
        assert_eq!(a.pos(&s), (0, 0b1011));
        assert_eq!(a.offset(&s), 0b11);
        assert_eq!(Addr::from_pos(0b1011, 0, &s), a.block(&s));
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut store = LineStore::new(spec(), Replacement::Lru);
        assert!(fill(&mut store, 0x00).is_none());
        assert!(fill(&mut store, 0x08).is_none());
        let (slot, _) = store.lookup(Addr(0x00)).unwrap();
        store.touch(slot);
        let ev = fill(&mut store, 0x10).unwrap();
        assert_eq!(ev.addr, Addr(0x08));
        assert!(store.lookup(Addr(0x00)).is_some());
    }

    #[test]
    fn clock_gives_second_chance() {
        let mut store = LineStore::new(spec(), Replacement::Clock);
        fill(&mut store, 0x00);
        fill(&mut store, 0x08);
        // both referenced: the hand clears both and takes way 0
        let ev = fill(&mut store, 0x10).unwrap();
        assert_eq!(ev.addr, Addr(0x00));
        // way 1 lost its reference bit on the sweep
        let ev = fill(&mut store, 0x18).unwrap();
        assert_eq!(ev.addr, Addr(0x08));
    }

    #[test]
    fn invalidated_slot_is_reused_first() {
        let mut store = LineStore::new(spec(), Replacement::Lru);
        fill(&mut store, 0x00);
        fill(&mut store, 0x08);
        let (slot, _) = store.lookup(Addr(0x08)).unwrap();
        store.set_state(slot, State::Invalid);
        assert!(fill(&mut store, 0x10).is_none());
        assert!(store.lookup(Addr(0x00)).is_some());
        assert!(store.lookup(Addr(0x08)).is_none());
    }

    #[test]
    fn valid_lines_report_block_addresses() {
        let mut store = LineStore::new(spec(), Replacement::Lru);
        fill(&mut store, 0x05);
        fill(&mut store, 0x1b);
        let mut addrs: Vec<_> = store.valid_lines().map(|(a, _)| a).collect();
        addrs.sort();
        assert_eq!(addrs, vec![Addr(0x04), Addr(0x18)]);
    }
}
