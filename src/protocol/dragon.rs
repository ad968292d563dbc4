use super::*;

/// Write-update. Writes to shared lines are broadcast instead of invalidating the
/// other copies, and a line only leaves a cache through replacement.
///
/// The modified owner (M or Sm) supplies data to readers without updating memory;
/// ownership moves to whoever broadcasts the latest update.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dragon;

const FILL: Next = Next::Shared { shared: State::SharedClean, alone: State::Exclusive };
const UPDATE: Next = Next::Shared { shared: State::SharedModified, alone: State::Modified };

impl Protocol for Dragon {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Dragon
    }

    fn transition(&self, state: State, _: &Sharing, event: Event) -> Option<Transition> {
        use Event::*;
        use State::*;
        Some(match (state, event) {
            // processor side
            (Invalid, LocalRead) => Transition::fill(BusOp::Read, FILL),
            (Invalid, LocalWrite) => Transition::fill_replay(BusOp::Read, FILL),
            (Exclusive, LocalRead) => Transition::hit(Exclusive),
            (Exclusive, LocalWrite) => Transition::hit(Modified),
            (SharedClean, LocalRead) => Transition::hit(SharedClean),
            (SharedModified, LocalRead) => Transition::hit(SharedModified),
            (SharedClean | SharedModified, LocalWrite) => Transition::bus(BusOp::Update, UPDATE),
            (Modified, LocalRead | LocalWrite) => Transition::hit(Modified),
            // bus side
            (Exclusive | SharedClean, BusRead) => Transition::snoop(SharedClean, DataAction::None),
            (Modified | SharedModified, BusRead) => Transition::snoop(SharedModified, DataAction::Supply),
            (SharedClean | SharedModified, BusUpdate) => Transition::snoop(SharedClean, DataAction::Absorb),
            (SharedClean, BusWriteback) => Transition::snoop(SharedClean, DataAction::None),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(state: State, event: Event) -> Option<Transition> {
        Dragon.transition(state, &Sharing::default(), event)
    }

    #[test]
    fn write_miss_reads_then_replays() {
        let tr = t(State::Invalid, Event::LocalWrite).unwrap();
        assert_eq!(tr.bus, Some(BusOp::Read));
        assert_eq!(tr.data, DataAction::FillReplay);
    }

    #[test]
    fn shared_write_broadcasts_update() {
        for s in [State::SharedClean, State::SharedModified] {
            let tr = t(s, Event::LocalWrite).unwrap();
            assert_eq!(tr.bus, Some(BusOp::Update));
            assert_eq!(tr.next.resolve(true), State::SharedModified);
            assert_eq!(tr.next.resolve(false), State::Modified);
        }
    }

    #[test]
    fn owner_supplies_and_keeps_ownership() {
        let tr = t(State::Modified, Event::BusRead).unwrap();
        assert_eq!(tr.next, Next::To(State::SharedModified));
        assert_eq!(tr.data, DataAction::Supply);
    }

    #[test]
    fn never_invalidates() {
        for s in [State::Exclusive, State::SharedClean, State::SharedModified, State::Modified] {
            assert!(t(s, Event::BusInvalidate).is_none());
            assert!(t(s, Event::BusReadExclusive).is_none());
        }
    }
}
