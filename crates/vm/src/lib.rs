//! Viper VM
//!
//! Deterministic tree-walking interpreter over verified Viper IL: frame
//! management, block-parameter passing, switch-dispatch caching, tail-call
//! optimization, tracing/breakpoints, and the FFI bridge into the runtime
//! library. One VM instance runs on one OS thread; all per-execution state
//! lives in [`exec::ExecState`], so independent instances do not interact.

pub mod config;
pub mod exec;
pub mod ffi;
pub mod frame;
pub mod report;
pub mod rtval;
pub mod runner;
pub mod switch_cache;
pub mod trace;

pub use config::{DispatchMode, SwitchMode, VmConfig};
pub use exec::ExecState;
pub use rtval::RtValue;
pub use runner::{RunState, Runner};
pub use trace::{BreakTable, TraceSink};

use viper_il::{Certified, Module};
use viper_runtime::error::Trap;

/// One-call convenience: run `@main()` of a verified module to a terminal
/// state with default settings.
pub fn run_main(module: &Module, cert: Certified, config: VmConfig) -> Result<RunState, Trap> {
    viper_runtime::runtime_init(None, config.rc_debug);
    let mut runner = Runner::new(module, cert, config, "main", Vec::new())?;
    runner.continue_run();
    Ok(runner.state().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::{parse_module, verify};

    #[test]
    fn test_run_main_tiny() {
        let m = parse_module(
            r#"
module "t"
fn @main() -> i64 {
entry:
  %0 = add i64 40, 2
  ret %0
}
"#,
            "t.vil",
        )
        .unwrap();
        let cert = verify(&m).unwrap();
        let state = run_main(&m, cert, VmConfig::default()).unwrap();
        assert_eq!(state, RunState::Halted(RtValue::I64(42)));
    }
}
