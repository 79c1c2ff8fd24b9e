//! Atomicity tests for reverted and nested calls.
//!
//! A call that fails must leave no trace in consensus state or the event log, and a
//! failure inside a nested checkpoint must only discard what that checkpoint produced.

#[cfg(test)]
mod tests {
    use crate::mocks::{
        create_account, create_initialized_runtime, set_value, test_call, TestCall, TestModule,
        TEST_FAILURE,
    };
    use crate::modules::{ValueSetter, ValueUpdated};
    use crate::{Error, Phase, RuntimeConfig};
    use keel_types::Outcome;
    use proptest::prelude::*;

    #[test]
    fn failed_call_discards_state_and_events() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        let state_root = runtime.state_root();
        let events_root = runtime.events_root();

        let result = runtime
            .dispatch(&test_call(TestCall::Fail { emit: 3 }), create_account(1), 0)
            .expect("dispatch");
        assert_eq!(result.receipt.error().map(|e| e.kind()), Some(TEST_FAILURE));
        assert_eq!(result.state_root, state_root);
        assert_eq!(result.events_root, events_root);
        assert!(runtime.events().is_empty());
        assert_eq!(
            TestModule::new().counter().get(&runtime.query()).unwrap(),
            Some(0)
        );

        // Sequence numbers stay gapless after a revert.
        let result = runtime
            .dispatch(&test_call(TestCall::Emit(2)), create_account(1), 1)
            .expect("dispatch");
        assert_eq!(
            result.receipt.outcome,
            Outcome::Committed {
                first_event: 0,
                event_count: 2
            }
        );
        assert_eq!(
            runtime
                .events()
                .iter_from(0)
                .map(|entry| entry.sequence)
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn recovered_nested_failure_keeps_caller_changes() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        // The caller is not the value-setter admin, so the nested call fails.
        let nested = set_value(5);
        let result = runtime
            .dispatch(
                &test_call(TestCall::Recover(Box::new(nested))),
                create_account(2),
                0,
            )
            .expect("dispatch");

        assert!(result.receipt.is_committed());
        let query = runtime.query();
        let module = TestModule::new();
        assert_eq!(module.counter().get(&query).unwrap(), Some(1));
        assert_eq!(module.recovered().get(&query).unwrap(), Some(1));
        assert_eq!(ValueSetter::new().value(&query).unwrap(), None);
        assert!(runtime.events().is_empty());
    }

    #[test]
    fn nested_success_commits_with_caller() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        let result = runtime
            .dispatch(
                &test_call(TestCall::Forward(Box::new(set_value(5)))),
                create_account(1),
                0,
            )
            .expect("dispatch");
        assert!(result.receipt.is_committed());

        // The callee keeps the original sender and tags its event with its own module.
        let entry = runtime.events().get(0).expect("event");
        assert_eq!(entry.decode::<ValueUpdated>().unwrap(), ValueUpdated(5));
        assert_eq!(entry.module, keel_types::ModuleId::from_name("value-setter"));
        assert_eq!(
            TestModule::new().counter().get(&runtime.query()).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn propagated_nested_failure_reverts_caller() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        let root = runtime.state_root();
        let result = runtime
            .dispatch(
                &test_call(TestCall::Forward(Box::new(set_value(5)))),
                create_account(2),
                0,
            )
            .expect("dispatch");
        assert_eq!(result.receipt.error().map(|e| e.kind()), Some("unauthorized"));
        assert_eq!(runtime.state_root(), root);
        assert_eq!(
            TestModule::new().counter().get(&runtime.query()).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn failed_atomic_block_is_dropped() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        runtime
            .execute([
                (test_call(TestCall::Atomic { value: 1, fail: false }), create_account(1)),
                (test_call(TestCall::Atomic { value: 2, fail: true }), create_account(1)),
            ])
            .expect("execute");

        let query = runtime.query();
        let module = TestModule::new();
        // Both outer calls committed their counter bump.
        assert_eq!(module.counter().get(&query).unwrap(), Some(2));
        assert_eq!(module.log().len(&query).unwrap(), 1);
        assert_eq!(module.log().get(&query, 0).unwrap(), Some(1));
        assert_eq!(runtime.events().len(), 1);
    }

    #[test]
    fn ignored_nested_fatal_error_still_halts() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        let roots = (runtime.state_root(), runtime.events_root());
        let call = TestCall::Swallow(Box::new(test_call(TestCall::Fatal)));
        assert!(matches!(
            runtime.dispatch(&test_call(call), create_account(1), 0),
            Err(Error::Fatal { context: "dispatch", .. })
        ));
        assert_eq!(runtime.phase(), Phase::Halted);
        assert_eq!((runtime.state_root(), runtime.events_root()), roots);
        assert!(runtime.query().receipt(0).unwrap().is_none());
        assert_eq!(
            TestModule::new().counter().get(&runtime.query()).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn ignored_namespace_violation_still_halts() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        let root = runtime.state_root();
        let call = TestCall::Swallow(Box::new(test_call(TestCall::Trespass)));
        assert!(matches!(
            runtime.dispatch(&test_call(call), create_account(1), 0),
            Err(Error::Fatal { .. })
        ));
        assert_eq!(runtime.phase(), Phase::Halted);
        assert_eq!(runtime.state_root(), root);
        assert_eq!(runtime.next_tx_index(), 0);
    }

    #[test]
    fn ignored_business_error_commits() {
        let mut runtime = create_initialized_runtime(RuntimeConfig::default());
        let call = TestCall::Swallow(Box::new(test_call(TestCall::Fail { emit: 2 })));
        let result = runtime
            .dispatch(&test_call(call), create_account(1), 0)
            .expect("dispatch");
        assert!(result.receipt.is_committed());
        assert_eq!(runtime.events().len(), 0);
        assert_eq!(
            TestModule::new().counter().get(&runtime.query()).unwrap(),
            Some(1)
        );
    }

    #[test]
    fn accessory_writes_do_not_move_state_root() {
        let mut noted = create_initialized_runtime(RuntimeConfig::default());
        let mut plain = create_initialized_runtime(RuntimeConfig::default());
        for (tx_index, value) in [7u64, 7, 0, u64::MAX].into_iter().enumerate() {
            let tx_index = tx_index as u64;
            let a = noted
                .dispatch(&test_call(TestCall::Note(value)), create_account(1), tx_index)
                .expect("note");
            let b = plain
                .dispatch(&test_call(TestCall::Emit(0)), create_account(1), tx_index)
                .expect("emit");
            assert!(a.receipt.is_committed());
            assert_eq!(a.state_root, b.state_root);
            assert_eq!(a.events_root, b.events_root);
        }

        let query = noted.query();
        let notes = TestModule::new().notes().items(&query).unwrap();
        assert_eq!(notes, vec![7, 7, 0, u64::MAX]);
        assert_eq!(
            TestModule::new().notes().len(&plain.query()).unwrap(),
            0
        );
    }

    fn arb_call() -> impl Strategy<Value = TestCall> {
        prop_oneof![
            (0u8..4).prop_map(TestCall::Emit),
            (0u8..4).prop_map(|emit| TestCall::Fail { emit }),
            (any::<u64>(), any::<bool>()).prop_map(|(value, fail)| TestCall::Atomic { value, fail }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn reverts_never_move_roots(calls in prop::collection::vec(arb_call(), 1..24)) {
            let mut runtime = create_initialized_runtime(RuntimeConfig::default());
            let mut expected_events = 0u64;
            for (tx_index, call) in calls.into_iter().enumerate() {
                let before = (runtime.state_root(), runtime.events_root());
                let expected = match &call {
                    TestCall::Emit(count) => Some(u64::from(*count)),
                    TestCall::Atomic { fail, .. } => Some(u64::from(!*fail)),
                    _ => None,
                };
                let result = runtime
                    .dispatch(&test_call(call), create_account(1), tx_index as u64)
                    .expect("dispatch");
                match expected {
                    Some(count) => {
                        prop_assert_eq!(
                            result.receipt.outcome,
                            Outcome::Committed { first_event: expected_events, event_count: count }
                        );
                        expected_events += count;
                    }
                    None => {
                        prop_assert!(!result.receipt.is_committed());
                        prop_assert_eq!((result.state_root, result.events_root), before);
                    }
                }
                prop_assert_eq!(runtime.events().len(), expected_events);
            }
            prop_assert_eq!(runtime.phase(), Phase::Ready);
        }
    }
}
