//! Property-based invariants over generated modules
//!
//! Random straight-line-plus-diamond modules exercise the laws the rest of
//! the toolchain leans on: canonical text round-trips, verification is
//! pure and survives a round-trip, and DCE is idempotent.

use proptest::prelude::*;
use viper_il::transform::{Dce, Pass};
use viper_il::{module_text, parse_module, verify};

/// A generated binary operation on the running accumulator.
#[derive(Debug, Clone)]
enum Step {
    Add(i64),
    Sub(i64),
    Mul(i64),
    Xor(i64),
    /// Dead computation: result never used
    Dead(i64),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<i32>().prop_map(|k| Step::Add(k as i64)),
        any::<i32>().prop_map(|k| Step::Sub(k as i64)),
        (-1000i64..1000).prop_map(Step::Mul),
        any::<i32>().prop_map(|k| Step::Xor(k as i64)),
        any::<i32>().prop_map(|k| Step::Dead(k as i64)),
    ]
}

/// Render a module: a chain of steps over an accumulator, then a diamond
/// on the accumulator's sign feeding a join block parameter.
fn render_module(seed: i64, steps: &[Step]) -> String {
    let mut src = String::new();
    src.push_str("module \"gen\"\n\nfn @main() -> i64 {\nentry:\n");
    src.push_str(&format!("  %acc0 = add i64 {}, 0\n", seed));
    let mut acc = "acc0".to_string();
    for (n, s) in steps.iter().enumerate() {
        let next = format!("acc{}", n + 1);
        match s {
            Step::Add(k) => src.push_str(&format!("  %{} = add i64 %{}, {}\n", next, acc, k)),
            Step::Sub(k) => src.push_str(&format!("  %{} = sub i64 %{}, {}\n", next, acc, k)),
            Step::Mul(k) => src.push_str(&format!("  %{} = mul i64 %{}, {}\n", next, acc, k)),
            Step::Xor(k) => src.push_str(&format!("  %{} = xor i64 %{}, {}\n", next, acc, k)),
            Step::Dead(k) => {
                src.push_str(&format!("  %dead{} = mul i64 %{}, {}\n", n, acc, k));
                src.push_str(&format!("  %{} = add i64 %{}, 0\n", next, acc));
            }
        }
        acc = next;
    }
    src.push_str(&format!("  %neg = icmp.slt i64 %{}, 0\n", acc));
    src.push_str("  cbr %neg, flip, keep\nflip:\n");
    src.push_str(&format!("  %f = sub i64 0, %{}\n  br join(%f)\n", acc));
    src.push_str(&format!("keep:\n  br join(%{})\n", acc));
    src.push_str("join(%out: i64):\n  ret %out\n}\n");
    src
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_parse_emit_round_trip(seed in any::<i32>(), steps in prop::collection::vec(step_strategy(), 0..12)) {
        let src = render_module(seed as i64, &steps);
        let m1 = parse_module(&src, "gen.vil").expect("generated module parses");
        let t1 = module_text(&m1);
        let m2 = parse_module(&t1, "gen.vil").expect("canonical text parses");
        let t2 = module_text(&m2);
        prop_assert_eq!(t1, t2, "canonical text must be a fixed point");
    }

    #[test]
    fn prop_verify_survives_round_trip(seed in any::<i32>(), steps in prop::collection::vec(step_strategy(), 0..12)) {
        let src = render_module(seed as i64, &steps);
        let m1 = parse_module(&src, "gen.vil").expect("parse");
        prop_assert!(verify(&m1).is_ok());
        let m2 = parse_module(&module_text(&m1), "gen.vil").expect("reparse");
        prop_assert!(verify(&m2).is_ok());
    }

    #[test]
    fn prop_verify_is_pure(seed in any::<i32>(), steps in prop::collection::vec(step_strategy(), 0..8)) {
        let src = render_module(seed as i64, &steps);
        let m = parse_module(&src, "gen.vil").expect("parse");
        let snapshot = m.clone();
        let first = verify(&m).is_ok();
        let second = verify(&m).is_ok();
        prop_assert_eq!(first, second);
        prop_assert_eq!(m, snapshot, "verifier must not mutate");
    }

    #[test]
    fn prop_dce_idempotent(seed in any::<i32>(), steps in prop::collection::vec(step_strategy(), 0..12)) {
        let src = render_module(seed as i64, &steps);
        let mut m = parse_module(&src, "gen.vil").expect("parse");
        prop_assert!(verify(&m).is_ok());
        Dce.run(&mut m).expect("dce");
        prop_assert!(verify(&m).is_ok(), "dce must preserve verification");
        let after_once = m.clone();
        let changed = Dce.run(&mut m).expect("dce twice");
        prop_assert!(!changed, "second dce run must be a no-op");
        prop_assert_eq!(m, after_once);
    }

    #[test]
    fn prop_pipeline_preserves_verification(seed in any::<i32>(), steps in prop::collection::vec(step_strategy(), 0..12)) {
        let src = render_module(seed as i64, &steps);
        let mut m = parse_module(&src, "gen.vil").expect("parse");
        prop_assert!(verify(&m).is_ok());
        viper_il::transform::Pipeline::standard().run(&mut m).expect("pipeline");
        prop_assert!(verify(&m).is_ok(), "optimized module must re-verify");
    }
}
