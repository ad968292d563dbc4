//! Coherence state machines.
//!
//! Every protocol is a table from (state, event) to a [`Transition`]. The controller
//! owns the line and the bus port; a protocol only decides. Pairs with no entry are
//! impossible under a correct protocol and surface as
//! [`CoherenceError::UnexpectedEvent`](crate::error::CoherenceError::UnexpectedEvent).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bus::Completion;
use crate::common::Op;
use crate::error::ConfigError;

mod dragon;
mod hybrid;
mod mesi;
mod mi;
mod msi;

pub use dragon::Dragon;
pub use hybrid::Hybrid;
pub use mesi::Mesi;
pub use mi::Mi;
pub use msi::Msi;

/// Union of the states used by all protocols; each protocol uses a subset.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
    SharedClean,
    SharedModified,
}

impl State {
    pub fn is_valid(&self) -> bool {
        *self != State::Invalid
    }
    /// states that guarantee no other cache holds the line
    pub fn is_exclusive(&self) -> bool {
        matches!(self, State::Exclusive | State::Modified)
    }
    /// states of which at most one may exist per address system-wide
    pub fn is_owner(&self) -> bool {
        matches!(self, State::Exclusive | State::Modified | State::SharedModified)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusOp {
    Read,
    ReadExclusive,
    Invalidate,
    Update,
    Writeback,
}

impl BusOp {
    /// transactions that return a block to the requester
    pub fn fetches(&self) -> bool {
        matches!(self, BusOp::Read | BusOp::ReadExclusive)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    LocalRead,
    LocalWrite,
    BusRead,
    BusReadExclusive,
    BusInvalidate,
    BusUpdate,
    BusWriteback,
}

impl Event {
    pub fn is_invalidating(&self) -> bool {
        matches!(self, Event::BusReadExclusive | Event::BusInvalidate)
    }
}

impl From<Op> for Event {
    fn from(op: Op) -> Self {
        match op {
            Op::Read => Event::LocalRead,
            Op::Write => Event::LocalWrite,
        }
    }
}

impl From<BusOp> for Event {
    fn from(op: BusOp) -> Self {
        match op {
            BusOp::Read => Event::BusRead,
            BusOp::ReadExclusive => Event::BusReadExclusive,
            BusOp::Invalidate => Event::BusInvalidate,
            BusOp::Update => Event::BusUpdate,
            BusOp::Writeback => Event::BusWriteback,
        }
    }
}

/// Next state, possibly decided by the shared line sampled during the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    To(State),
    Shared { shared: State, alone: State },
}

impl Next {
    pub fn resolve(self, shared: bool) -> State {
        match self {
            Next::To(s) => s,
            Next::Shared { shared: s, .. } if shared => s,
            Next::Shared { alone, .. } => alone,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataAction {
    None,
    /// serve the CPU access from the line
    Access,
    /// install the block returned by the bus, then serve the access
    Fill,
    /// install the block returned by the bus, then run the access again as a hit
    FillReplay,
    /// put the block on the bus; memory takes a copy
    Flush,
    /// hand the block to the requester; memory stays stale
    Supply,
    /// overwrite the line with the update payload
    Absorb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: Next,
    pub bus: Option<BusOp>,
    pub data: DataAction,
}

impl Transition {
    pub fn hit(next: State) -> Self {
        Transition { next: Next::To(next), bus: None, data: DataAction::Access }
    }
    pub fn bus(op: BusOp, next: Next) -> Self {
        Transition { next, bus: Some(op), data: DataAction::Access }
    }
    pub fn fill(op: BusOp, next: Next) -> Self {
        Transition { next, bus: Some(op), data: DataAction::Fill }
    }
    pub fn fill_replay(op: BusOp, next: Next) -> Self {
        Transition { next, bus: Some(op), data: DataAction::FillReplay }
    }
    pub fn snoop(next: State, data: DataAction) -> Self {
        Transition { next: Next::To(next), bus: None, data }
    }
}

/// Per-line sharing history. Only the hybrid protocol reads it.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sharing {
    /// saturating count of invalidations involving this line
    pub invalidations: u32,
    /// local access since the last snooped update
    pub touched: bool,
}

pub trait Protocol: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProtocolKind;

    fn transition(&self, state: State, sharing: &Sharing, event: Event) -> Option<Transition>;

    /// Requester-side bookkeeping once its own transaction completed.
    fn settle(&self, _sharing: &mut Sharing, _op: BusOp, _local: Op, _completion: &Completion) {}

    /// Snooper-side bookkeeping for a bus event that hit a valid line.
    fn observe(&self, _sharing: &mut Sharing, _event: Event) {}

    /// Bookkeeping for a request served from `state` without a bus transaction.
    fn hit(&self, _sharing: &mut Sharing, _state: State, _local: Op) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Mi,
    Msi,
    Mesi,
    Dragon,
    Hybrid,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 5] = [
        ProtocolKind::Mi,
        ProtocolKind::Msi,
        ProtocolKind::Mesi,
        ProtocolKind::Dragon,
        ProtocolKind::Hybrid,
    ];

    /// `invalid_threshold` is only used by the hybrid protocol.
    pub fn build(self, invalid_threshold: u32) -> Box<dyn Protocol> {
        match self {
            ProtocolKind::Mi => Box::new(Mi),
            ProtocolKind::Msi => Box::new(Msi),
            ProtocolKind::Mesi => Box::new(Mesi),
            ProtocolKind::Dragon => Box::new(Dragon),
            ProtocolKind::Hybrid => Box::new(Hybrid::new(invalid_threshold)),
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolKind::Mi => "MI",
            ProtocolKind::Msi => "MSI",
            ProtocolKind::Mesi => "MESI",
            ProtocolKind::Dragon => "Dragon",
            ProtocolKind::Hybrid => "Hybrid",
        };
        f.write_str(name)
    }
}

impl FromStr for ProtocolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mi" => Ok(ProtocolKind::Mi),
            "msi" => Ok(ProtocolKind::Msi),
            "mesi" => Ok(ProtocolKind::Mesi),
            "dragon" => Ok(ProtocolKind::Dragon),
            "hybrid" => Ok(ProtocolKind::Hybrid),
            _ => Err(ConfigError::UnknownProtocol(s.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_resolves_on_shared_line() {
        let n = Next::Shared { shared: State::Shared, alone: State::Exclusive };
        assert_eq!(n.resolve(true), State::Shared);
        assert_eq!(n.resolve(false), State::Exclusive);
        assert_eq!(Next::To(State::Modified).resolve(true), State::Modified);
    }

    #[test]
    fn protocol_names_parse() {
        for kind in ProtocolKind::ALL {
            assert_eq!(kind.to_string().parse::<ProtocolKind>().unwrap(), kind);
        }
        assert!("moesi".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn every_protocol_fills_on_cold_miss() {
        for kind in ProtocolKind::ALL {
            let p = kind.build(3);
            for ev in [Event::LocalRead, Event::LocalWrite] {
                let t = p.transition(State::Invalid, &Sharing::default(), ev).unwrap();
                assert!(t.bus.map_or(false, |op| op.fetches()), "{kind} {ev:?}");
                assert!(matches!(t.data, DataAction::Fill | DataAction::FillReplay));
            }
        }
    }

    #[test]
    fn snoops_on_invalid_lines_are_never_legal() {
        // the controller never consults a protocol for lines it does not hold
        for kind in ProtocolKind::ALL {
            let p = kind.build(3);
            assert!(p.transition(State::Invalid, &Sharing::default(), Event::BusRead).is_none());
        }
    }
}
