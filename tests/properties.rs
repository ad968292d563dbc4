use std::collections::HashMap;

use cachesim_cc::*;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    Read { core: usize, addr: u64 },
    Write { core: usize, addr: u64, value: u8 },
}

const CORES: usize = 3;

fn step() -> impl Strategy<Value = Step> {
    // 6 blocks over 2 sets of 2 ways: plenty of conflict evictions
    let addr = (0u64..6, 0u64..8).prop_map(|(block, off)| block * 8 + off);
    prop_oneof![
        (0..CORES, addr.clone()).prop_map(|(core, addr)| Step::Read { core, addr }),
        (0..CORES, addr, any::<u8>()).prop_map(|(core, addr, value)| Step::Write { core, addr, value }),
    ]
}

fn protocol() -> impl Strategy<Value = ProtocolKind> {
    prop::sample::select(ProtocolKind::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_read_sees_the_last_write(
        protocol in protocol(),
        threshold in 0u32..4,
        steps in prop::collection::vec(step(), 1..120),
    ) {
        let config = SystemConfig {
            protocol,
            cores: CORES,
            cache: CacheConfig {
                block_offset: 3,
                set_bit: 1,
                cache_size_bit: 5,
                invalid_threshold: threshold,
                ..CacheConfig::default()
            },
            ..SystemConfig::default()
        };
        let sys = System::new(config).unwrap();
        let mut model: HashMap<u64, u8> = HashMap::new();
        for s in steps {
            match s {
                Step::Read { core, addr } => {
                    let got = sys.caches()[core].read(addr, 1).unwrap();
                    prop_assert_eq!(got[0], model.get(&addr).copied().unwrap_or(0));
                }
                Step::Write { core, addr, value } => {
                    sys.caches()[core].write(addr, vec![value]).unwrap();
                    model.insert(addr, value);
                }
            }
            // single writer and agreeing copies after every transaction boundary
            prop_assert!(sys.audit().is_ok(), "{:?}", sys.audit());
        }
    }
}
