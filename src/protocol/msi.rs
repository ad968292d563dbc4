use super::*;

/// Write-invalidate with a single clean sharing state.
///
/// A write miss issues one ReadExclusive instead of a Read followed by an Invalidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Msi;

impl Protocol for Msi {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Msi
    }

    fn transition(&self, state: State, _: &Sharing, event: Event) -> Option<Transition> {
        use Event::*;
        use State::*;
        Some(match (state, event) {
            // processor side
            (Invalid, LocalRead) => Transition::fill(BusOp::Read, Next::To(Shared)),
            (Invalid, LocalWrite) => Transition::fill(BusOp::ReadExclusive, Next::To(Modified)),
            (Shared, LocalRead) => Transition::hit(Shared),
            (Shared, LocalWrite) => Transition::bus(BusOp::Invalidate, Next::To(Modified)),
            (Modified, LocalRead | LocalWrite) => Transition::hit(Modified),
            // bus side
            (Shared, BusRead) => Transition::snoop(Shared, DataAction::None),
            (Shared, BusReadExclusive | BusInvalidate) => Transition::snoop(Invalid, DataAction::None),
            (Modified, BusRead) => Transition::snoop(Shared, DataAction::Flush),
            (Modified, BusReadExclusive) => Transition::snoop(Invalid, DataAction::Flush),
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_hit_on_shared_upgrades() {
        let t = Msi.transition(State::Shared, &Sharing::default(), Event::LocalWrite).unwrap();
        assert_eq!(t.bus, Some(BusOp::Invalidate));
        assert_eq!(t.data, DataAction::Access);
        assert_eq!(t.next.resolve(true), State::Modified);
    }

    #[test]
    fn invalidate_seen_in_modified_is_a_violation() {
        assert!(Msi.transition(State::Modified, &Sharing::default(), Event::BusInvalidate).is_none());
    }
}
