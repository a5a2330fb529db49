mod common;

use std::time::Duration;

use proptest::prelude::*;

use atsim::*;
use common::{stub_system, Answer};

fn answer() -> impl Strategy<Value = Answer> {
    prop_oneof![
        (0u64..50).prop_map(|ns| Answer::Later(Duration::from_nanos(ns))),
        (0u64..50).prop_map(|ns| Answer::Updated(Duration::from_nanos(ns))),
        Just(Answer::Completed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn every_address_lands_where_the_map_says(address in 0u64..1200, len in 1usize..=8) {
        let script = vec![Request::write(address, vec![0x5a; len])];
        let mut platform = Platform::with_scripts(SystemSpec::default(), vec![script]);
        let report = platform.run().unwrap();
        let done = &report.completions[0][0];

        let region = address / 512;
        let local = address % 512;
        if region < 2 && local + len as u64 <= 512 {
            prop_assert_eq!(done.status, ResponseStatus::Ok);
            let mem = platform.memory(region as usize).borrow();
            prop_assert_eq!(mem.accesses()[0].address, local);
            prop_assert_eq!(mem.peek(local as usize, len), Some(&vec![0x5a; len][..]));
            let other = platform.memory(1 - region as usize).borrow();
            prop_assert!(other.accesses().is_empty());
        } else {
            prop_assert_eq!(done.status, ResponseStatus::AddressError);
        }
        prop_assert_eq!(report.routes, 0);
        prop_assert_eq!(report.live, 0);
    }

    #[test]
    fn reads_return_the_last_write(
        address in (0u64..1024).prop_filter("fits in its region", |a| a % 512 <= 508),
        data in prop::array::uniform4(any::<u8>()),
        delay in 0u64..20,
    ) {
        let script = vec![Request::write(address, data), Request::read(address, 4)];
        let spec = SystemSpec { fixed_delay_ns: Some(delay), ..SystemSpec::default() };
        let report = Platform::with_scripts(spec, vec![script]).run().unwrap();
        prop_assert_eq!(&report.completions[0][1].data, &data.to_vec());
        prop_assert_eq!(report.verified, 1);
    }

    #[test]
    fn processor_never_overlaps_accept_windows(
        answers in prop::collection::vec(answer(), 1..12),
    ) {
        let n = answers.len() as u64;
        let script = (0..n).map(|i| Request::write(i, [i as u8])).collect();
        let (scheduler, pool, cpu, stub) = stub_system(script, answers, false);
        scheduler.run().unwrap();

        let stub = stub.borrow();
        prop_assert_eq!(stub.begin_reqs as u64, n);
        prop_assert_eq!(stub.overlaps, 0);
        prop_assert!(cpu.borrow().is_done());
        prop_assert_eq!(pool.borrow().live(), 0);
    }

    #[test]
    fn random_platforms_run_clean(
        processors in 1usize..5,
        memories in 1usize..4,
        seed in any::<u64>(),
    ) {
        let spec = SystemSpec { processors, memories, requests: 8, seed, ..SystemSpec::default() };
        let report = Platform::new(spec).run().unwrap();
        prop_assert_eq!(report.requests(), processors * 8);
        prop_assert_eq!(report.routes, 0);
        prop_assert_eq!(report.live, 0);
        prop_assert_eq!(report.allocated, report.recycled);
    }
}
