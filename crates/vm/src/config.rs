//! VM configuration
//!
//! All environment knobs are read exactly once, when the VM is
//! constructed, into this explicit struct. Nothing else in the interpreter
//! consults the environment.
//!
//! | Knob                | Values                                    |
//! |---------------------|-------------------------------------------|
//! | `VIPER_DISPATCH`    | `table`, `switch`, `threaded`             |
//! | `VIPER_SWITCH_MODE` | `auto`, `dense`, `sorted`, `hashed`, `linear` |
//! | `VIPER_RC_DEBUG`    | `1` enables heap magic validation         |
//! | `VIPER_VM_TAILCALL` | `0` disables TCO (default on)             |
//! | `VIPER_REPORT`      | `json` prints a run summary to stderr     |

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Function-pointer table; most portable
    Table,
    /// match-based dispatch (the compiler emits a jump table)
    Switch,
    /// Direct threading is not expressible in stable Rust; accepted and
    /// mapped to the match loop
    Threaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    Auto,
    Dense,
    Sorted,
    Hashed,
    /// Plain linear scan, for validating the other backends
    Linear,
}

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub dispatch: DispatchMode,
    pub switch_mode: SwitchMode,
    pub rc_debug: bool,
    pub tailcall: bool,
    pub report_json: bool,
    /// Frame-stack depth cap; exceeding it is a StackOverflow trap
    pub max_frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            dispatch: DispatchMode::Switch,
            switch_mode: SwitchMode::Auto,
            rc_debug: false,
            tailcall: true,
            report_json: false,
            max_frames: 4096,
        }
    }
}

impl VmConfig {
    /// Snapshot the process environment. Called once at VM construction.
    pub fn from_env() -> Self {
        let mut cfg = VmConfig::default();
        match std::env::var("VIPER_DISPATCH").as_deref() {
            Ok("table") => cfg.dispatch = DispatchMode::Table,
            Ok("threaded") => cfg.dispatch = DispatchMode::Threaded,
            _ => cfg.dispatch = DispatchMode::Switch,
        }
        match std::env::var("VIPER_SWITCH_MODE").as_deref() {
            Ok("dense") => cfg.switch_mode = SwitchMode::Dense,
            Ok("sorted") => cfg.switch_mode = SwitchMode::Sorted,
            Ok("hashed") => cfg.switch_mode = SwitchMode::Hashed,
            Ok("linear") => cfg.switch_mode = SwitchMode::Linear,
            _ => cfg.switch_mode = SwitchMode::Auto,
        }
        cfg.rc_debug = std::env::var("VIPER_RC_DEBUG").as_deref() == Ok("1");
        cfg.tailcall = std::env::var("VIPER_VM_TAILCALL").as_deref() != Ok("0");
        cfg.report_json = std::env::var("VIPER_REPORT").as_deref() == Ok("json");
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_snapshot() {
        unsafe {
            std::env::set_var("VIPER_DISPATCH", "table");
            std::env::set_var("VIPER_SWITCH_MODE", "linear");
            std::env::set_var("VIPER_VM_TAILCALL", "0");
        }
        let cfg = VmConfig::from_env();
        assert_eq!(cfg.dispatch, DispatchMode::Table);
        assert_eq!(cfg.switch_mode, SwitchMode::Linear);
        assert!(!cfg.tailcall);
        unsafe {
            std::env::remove_var("VIPER_DISPATCH");
            std::env::remove_var("VIPER_SWITCH_MODE");
            std::env::remove_var("VIPER_VM_TAILCALL");
        }
        let cfg = VmConfig::from_env();
        assert_eq!(cfg.dispatch, DispatchMode::Switch);
        assert!(cfg.tailcall);
    }
}
