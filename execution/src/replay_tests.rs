//! Property tests for replay determinism.
//!
//! Given the same genesis and the same ordered calls, independent runtimes (and a runtime
//! restarted part way through) must produce identical receipts, state roots, and event
//! logs.

#[cfg(test)]
mod tests {
    use crate::mocks::{
        create_account, create_initialized_runtime, set_value, test_call, transfer, TestCall,
    };
    use crate::{DispatchResult, Runtime, RuntimeConfig};
    use futures::{executor::block_on, StreamExt};
    use keel_types::{Address, BlockHeader, RuntimeCall};
    use proptest::prelude::*;

    fn arb_account() -> impl Strategy<Value = Address> {
        (1u64..4).prop_map(create_account)
    }

    fn arb_call() -> impl Strategy<Value = (RuntimeCall, Address)> {
        prop_oneof![
            (any::<u64>(), arb_account()).prop_map(|(value, sender)| (set_value(value), sender)),
            (arb_account(), 0u64..700, arb_account())
                .prop_map(|(to, amount, sender)| (transfer(to, amount), sender)),
            (0u8..3, arb_account())
                .prop_map(|(count, sender)| (test_call(TestCall::Emit(count)), sender)),
            (0u8..3, arb_account())
                .prop_map(|(emit, sender)| (test_call(TestCall::Fail { emit }), sender)),
        ]
    }

    fn replay(runtime: &mut Runtime, calls: &[(RuntimeCall, Address)]) -> Vec<DispatchResult> {
        runtime
            .execute(calls.iter().cloned())
            .expect("replay should not halt")
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn replay_is_deterministic(calls in prop::collection::vec(arb_call(), 0..32)) {
            let mut first = create_initialized_runtime(RuntimeConfig::default());
            let mut second = create_initialized_runtime(RuntimeConfig::default());

            let a = replay(&mut first, &calls);
            let b = replay(&mut second, &calls);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(first.state_root(), second.state_root());
            prop_assert_eq!(first.events_root(), second.events_root());
            prop_assert_eq!(
                first.events().iter_from(0).collect::<Vec<_>>(),
                second.events().iter_from(0).collect::<Vec<_>>()
            );
        }

        #[test]
        fn restart_does_not_change_outcome(
            calls in prop::collection::vec(arb_call(), 1..32),
            split in any::<prop::sample::Index>(),
        ) {
            let split = split.index(calls.len());
            let mut straight = create_initialized_runtime(RuntimeConfig::default());
            let expected = replay(&mut straight, &calls);

            let mut runtime = create_initialized_runtime(RuntimeConfig::default());
            let mut results = replay(&mut runtime, &calls[..split]);
            let (registry, backend) = runtime.shutdown();
            let mut runtime = Runtime::start(RuntimeConfig::default(), registry, backend)
                .expect("restart");
            results.extend(replay(&mut runtime, &calls[split..]));

            prop_assert_eq!(results, expected);
            prop_assert_eq!(runtime.state_root(), straight.state_root());
            prop_assert_eq!(runtime.events_root(), straight.events_root());
        }
    }

    #[test]
    fn header_changes_do_not_affect_call_roots() {
        let calls = vec![
            (set_value(1), create_account(1)),
            (transfer(create_account(2), 5), create_account(1)),
        ];
        let mut first = create_initialized_runtime(RuntimeConfig::default());
        let mut second = create_initialized_runtime(RuntimeConfig::default());
        second
            .begin_block(BlockHeader::genesis(0).child(99))
            .expect("block");

        let a = replay(&mut first, &calls);
        let b = replay(&mut second, &calls);
        assert_eq!(a, b);
    }

    #[test]
    fn subscribers_see_every_committed_event() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        let reader = runtime.events();
        replay(
            &mut runtime,
            &[
                (test_call(TestCall::Emit(2)), create_account(1)),
                (test_call(TestCall::Fail { emit: 2 }), create_account(1)),
                (set_value(4), create_account(1)),
            ],
        );

        let head: Vec<_> = block_on(reader.stream_from(0).take(2).collect::<Vec<_>>());
        let events_root = runtime.events_root();
        drop(runtime);
        let tail: Vec<_> = block_on(reader.stream_from(2).collect::<Vec<_>>());

        let sequences: Vec<u64> = head.iter().chain(tail.iter()).map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(tail[0].origin, keel_types::Origin::Transaction(2));

        let rebuilt = head
            .iter()
            .chain(tail.iter())
            .fold(crate::events::empty_root(), |root, entry| {
                crate::events::fold_root(&root, entry)
            });
        assert_eq!(rebuilt, events_root);
    }
}
