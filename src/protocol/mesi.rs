use super::*;

/// MSI plus Exclusive: a read miss nobody else shares can later be written silently.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mesi;

impl Protocol for Mesi {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Mesi
    }

    fn transition(&self, state: State, _: &Sharing, event: Event) -> Option<Transition> {
        use Event::*;
        use State::*;
        Some(match (state, event) {
            // processor side
            (Invalid, LocalRead) => Transition::fill(
                BusOp::Read,
                Next::Shared { shared: Shared, alone: Exclusive },
            ),
            (Invalid, LocalWrite) => Transition::fill(BusOp::ReadExclusive, Next::To(Modified)),
            (Shared, LocalRead) => Transition::hit(Shared),
            (Shared, LocalWrite) => Transition::bus(BusOp::Invalidate, Next::To(Modified)),
            (Exclusive, LocalRead) => Transition::hit(Exclusive),
            (Exclusive, LocalWrite) => Transition::hit(Modified),
            (Modified, LocalRead | LocalWrite) => Transition::hit(Modified),
            // bus side
            (Shared, BusRead) => Transition::snoop(Shared, DataAction::None),
            (Shared, BusReadExclusive | BusInvalidate) => Transition::snoop(Invalid, DataAction::None),
            (Exclusive, BusRead) => Transition::snoop(Shared, DataAction::None),
            (Exclusive, BusReadExclusive) => Transition::snoop(Invalid, DataAction::None),
            (Modified, BusRead) => Transition::snoop(Shared, DataAction::Flush),
            (Modified, BusReadExclusive) => Transition::snoop(Invalid, DataAction::Flush),
            _ => return None,
        })
    }
}
