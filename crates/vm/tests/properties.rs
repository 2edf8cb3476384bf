//! Optimizer/interpreter agreement
//!
//! For random generated modules, running the optimized module must produce
//! the same halt state and value as running the original. This is the
//! behavioral half of the pass contract; the structural half (re-verifies)
//! lives with the IL crate.

use proptest::prelude::*;
use viper_il::{parse_module, verify};
use viper_vm::{RunState, Runner, VmConfig};

#[derive(Debug, Clone)]
enum Step {
    Add(i64),
    Mul(i64),
    Xor(i64),
    Shl(u8),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<i32>().prop_map(|k| Step::Add(k as i64)),
        (-64i64..64).prop_map(Step::Mul),
        any::<i32>().prop_map(|k| Step::Xor(k as i64)),
        (0u8..70).prop_map(Step::Shl),
    ]
}

fn render_module(seed: i64, steps: &[Step]) -> String {
    let mut src = String::new();
    src.push_str("module \"gen\"\n\nfn @main() -> i64 {\nentry:\n");
    src.push_str(&format!("  %acc0 = add i64 {}, 0\n", seed));
    let mut acc = "acc0".to_string();
    for (n, s) in steps.iter().enumerate() {
        let next = format!("acc{}", n + 1);
        match s {
            Step::Add(k) => src.push_str(&format!("  %{} = add i64 %{}, {}\n", next, acc, k)),
            Step::Mul(k) => src.push_str(&format!("  %{} = mul i64 %{}, {}\n", next, acc, k)),
            Step::Xor(k) => src.push_str(&format!("  %{} = xor i64 %{}, {}\n", next, acc, k)),
            Step::Shl(k) => src.push_str(&format!("  %{} = shl i64 %{}, {}\n", next, acc, k)),
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

fn run_src(src: &str) -> RunState {
    let module = parse_module(src, "gen.vil").expect("parse");
    let cert = verify(&module).expect("verify");
    let mut runner =
        Runner::new(&module, cert, VmConfig::default(), "main", Vec::new()).expect("arm");
    runner.continue_run();
    runner.state().clone()
}

fn run_optimized(src: &str) -> RunState {
    let mut module = parse_module(src, "gen.vil").expect("parse");
    verify(&module).expect("verify");
    viper_il::transform::Pipeline::standard()
        .run(&mut module)
        .expect("pipeline");
    let cert = verify(&module).expect("optimized re-verify");
    let mut runner =
        Runner::new(&module, cert, VmConfig::default(), "main", Vec::new()).expect("arm");
    runner.continue_run();
    runner.state().clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_optimized_module_behaves_identically(
        seed in any::<i32>(),
        steps in prop::collection::vec(step_strategy(), 0..10),
    ) {
        let src = render_module(seed as i64, &steps);
        let plain = run_src(&src);
        let optimized = run_optimized(&src);
        prop_assert_eq!(plain, optimized);
    }

    #[test]
    fn prop_dispatch_modes_agree(
        seed in any::<i32>(),
        steps in prop::collection::vec(step_strategy(), 0..8),
    ) {
        use viper_vm::DispatchMode;
        let src = render_module(seed as i64, &steps);
        let module = parse_module(&src, "gen.vil").expect("parse");
        let cert = verify(&module).expect("verify");
        let mut states = Vec::new();
        for dispatch in [DispatchMode::Table, DispatchMode::Switch, DispatchMode::Threaded] {
            let config = VmConfig { dispatch, ..VmConfig::default() };
            let mut runner = Runner::new(&module, cert, config, "main", Vec::new()).expect("arm");
            runner.continue_run();
            states.push(runner.state().clone());
        }
        prop_assert_eq!(&states[0], &states[1]);
        prop_assert_eq!(&states[1], &states[2]);
    }
}
