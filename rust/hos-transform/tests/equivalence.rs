//! Transformed programs must be observationally identical to their input:
//! same return values, same raised exceptions, same printed output.

mod common;

use hos_core::ir::Module;
use hos_transform::{transform, Seed};
use proptest::prelude::*;

fn assert_equivalent(original: &Module, protected: &Module, x: i64, label: &str) {
    for (name, args) in common::invocations(x) {
        let expected = hos_rt::execute(original, name, args.clone()).expect("original runs");
        let actual = hos_rt::execute(protected, name, args)
            .unwrap_or_else(|e| panic!("{label}: {name}({x}) failed: {e}"));
        assert_eq!(expected, actual, "{label}: {name}({x}) diverged");
    }
}

fn check_all_strategies(genome: u64, x: i64) {
    let original = common::sample_module("sample.hos");
    for (label, strategy) in common::strategies() {
        let out = transform(original.clone(), &strategy, Seed::new(genome))
            .unwrap_or_else(|f| panic!("{label}: transform failed: {f}"));
        assert_equivalent(&original, &out.module, x, &label);
    }
}

#[test]
fn test_edge_inputs_preserved() {
    for x in [0, 1, -1, 13, 2, 3, 4, i64::MAX, i64::MIN] {
        check_all_strategies(7, x);
    }
}

#[test]
fn test_caught_and_uncaught_exceptions_preserved() {
    let original = common::sample_module("exceptions.hos");
    let strategy = hos_core::Strategy::with_features([
        (hos_core::Feature::Flattening, 1.0),
        (hos_core::Feature::ExceptionFlow, 1.0),
        (hos_core::Feature::FakeBranches, 1.0),
    ])
    .unwrap();
    for genome in 0..16 {
        let out = transform(original.clone(), &strategy, Seed::new(genome)).unwrap();
        for a in [0, 13, 5] {
            let args = vec![hos_core::Value::Int(a)];
            let expected = hos_rt::execute(&original, "safe_div", args.clone()).unwrap();
            let actual = hos_rt::execute(&out.module, "safe_div", args).unwrap();
            assert_eq!(expected, actual, "genome {genome}, a = {a}");
        }
    }
}

#[test]
fn test_long_running_loop_completes_after_flattening() {
    let original = common::sample_module("long.hos");
    let strategy = hos_core::Strategy::with_features([
        (hos_core::Feature::Flattening, 1.0),
        (hos_core::Feature::GarbageInjection, 1.0),
        (hos_core::Feature::FakeBranches, 1.0),
    ])
    .unwrap();
    let out = transform(original.clone(), &strategy, Seed::new(5)).unwrap();
    let args = vec![hos_core::Value::Int(1_500_000)];
    let expected = hos_rt::execute(&original, "sum_to", args.clone()).unwrap();
    let actual = hos_rt::execute(&out.module, "sum_to", args).unwrap();
    assert_eq!(expected, actual);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_every_strategy_preserves_behaviour(genome in any::<u64>(), x in -1000i64..1000) {
        check_all_strategies(genome, x);
    }
}
