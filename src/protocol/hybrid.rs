use super::*;

/// MESI-style invalidation that switches to Dragon-style updates per line.
///
/// Each line counts invalidations it took part in, saturating at `threshold`. Below
/// the threshold a shared write invalidates the other copies; at the threshold it
/// broadcasts an update instead. The count drops back to zero when a write finds
/// no other copy, or when an update reaches sharers none of which touched the line
/// since the previous update.
#[derive(Debug, Clone, Copy)]
pub struct Hybrid {
    threshold: u32,
}

const FILL: Next = Next::Shared { shared: State::SharedClean, alone: State::Exclusive };
const UPDATE: Next = Next::Shared { shared: State::SharedModified, alone: State::Modified };

impl Hybrid {
    pub fn new(threshold: u32) -> Self {
        Hybrid { threshold }
    }

    pub fn updating(&self, sharing: &Sharing) -> bool {
        sharing.invalidations >= self.threshold
    }

    fn bump(&self, sharing: &mut Sharing) {
        sharing.invalidations = (sharing.invalidations + 1).min(self.threshold);
    }
}

impl Protocol for Hybrid {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Hybrid
    }

    fn transition(&self, state: State, sharing: &Sharing, event: Event) -> Option<Transition> {
        use Event::*;
        use State::*;
        let updating = self.updating(sharing);
        Some(match (state, event) {
            // processor side
            (Invalid, LocalRead) => Transition::fill(BusOp::Read, FILL),
            (Invalid, LocalWrite) if updating => Transition::fill_replay(BusOp::Read, FILL),
            (Invalid, LocalWrite) => Transition::fill(BusOp::ReadExclusive, Next::To(Modified)),
            (Exclusive, LocalRead) => Transition::hit(Exclusive),
            (Exclusive, LocalWrite) => Transition::hit(Modified),
            (SharedClean, LocalRead) => Transition::hit(SharedClean),
            (SharedModified, LocalRead) => Transition::hit(SharedModified),
            (SharedClean | SharedModified, LocalWrite) if updating => {
                Transition::bus(BusOp::Update, UPDATE)
            }
            (SharedClean | SharedModified, LocalWrite) => {
                Transition::bus(BusOp::Invalidate, Next::To(Modified))
            }
            (Modified, LocalRead | LocalWrite) => Transition::hit(Modified),
            // bus side
            (Exclusive | SharedClean, BusRead) => Transition::snoop(SharedClean, DataAction::None),
            (Modified | SharedModified, BusRead) => Transition::snoop(SharedModified, DataAction::Supply),
            (SharedClean | SharedModified, BusUpdate) => Transition::snoop(SharedClean, DataAction::Absorb),
            (Exclusive | SharedClean, BusReadExclusive) => Transition::snoop(Invalid, DataAction::None),
            (SharedClean, BusInvalidate) => Transition::snoop(Invalid, DataAction::None),
            (Modified | SharedModified, BusReadExclusive) => Transition::snoop(Invalid, DataAction::Flush),
            (SharedModified, BusInvalidate) => Transition::snoop(Invalid, DataAction::Flush),
            (SharedClean, BusWriteback) => Transition::snoop(SharedClean, DataAction::None),
            _ => return None,
        })
    }

    fn settle(&self, sharing: &mut Sharing, op: BusOp, local: Op, completion: &Completion) {
        match op {
            BusOp::Invalidate | BusOp::ReadExclusive if local == Op::Write => {
                if completion.sharers > 0 {
                    self.bump(sharing);
                } else {
                    sharing.invalidations = 0;
                }
            }
            // update-mode write miss, replayed as a hit once the line is filled
            BusOp::Read if local == Op::Write => {
                if completion.sharers == 0 {
                    sharing.invalidations = 0;
                }
            }
            BusOp::Update => {
                // nobody left to update, or nobody read the previous update
                if !completion.shared || !completion.touched {
                    sharing.invalidations = 0;
                }
            }
            _ => (),
        }
    }

    fn hit(&self, sharing: &mut Sharing, state: State, local: Op) {
        // an exclusive line has no sharers to invalidate
        if local == Op::Write && matches!(state, State::Exclusive | State::Modified) {
            sharing.invalidations = 0;
        }
    }

    fn observe(&self, sharing: &mut Sharing, event: Event) {
        match event {
            e if e.is_invalidating() => self.bump(sharing),
            Event::BusUpdate => sharing.touched = false,
            _ => (),
        }
    }
}
