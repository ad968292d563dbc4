use super::*;

/// Two states. Every miss takes the line exclusively; every snoop hit gives it up.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mi;

impl Protocol for Mi {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Mi
    }

    fn transition(&self, state: State, _: &Sharing, event: Event) -> Option<Transition> {
        use Event::*;
        use State::*;
        Some(match (state, event) {
            (Invalid, LocalRead | LocalWrite) => {
                Transition::fill(BusOp::ReadExclusive, Next::To(Modified))
            }
            (Modified, LocalRead | LocalWrite) => Transition::hit(Modified),
            (Modified, BusRead | BusReadExclusive | BusInvalidate) => {
                Transition::snoop(Invalid, DataAction::Flush)
            }
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_miss_takes_ownership() {
        let t = Mi.transition(State::Invalid, &Sharing::default(), Event::LocalRead).unwrap();
        assert_eq!(t.bus, Some(BusOp::ReadExclusive));
        assert_eq!(t.next.resolve(true), State::Modified);
    }

    #[test]
    fn snoop_hit_flushes_and_invalidates() {
        let t = Mi.transition(State::Modified, &Sharing::default(), Event::BusReadExclusive).unwrap();
        assert_eq!(t.next, Next::To(State::Invalid));
        assert_eq!(t.data, DataAction::Flush);
    }
}
