//! Run summaries (`VIPER_REPORT=json`)
//!
//! Printed to stderr after a run finishes so scripts can scrape outcome,
//! retired-instruction count and wall time without parsing program output.

use crate::runner::RunState;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Terminal state name: halted / trapped / step-limit / paused
    pub state: String,
    /// Trap reason code when state is trapped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trap: Option<String>,
    pub steps_retired: u64,
    pub wall_ms: u128,
}

impl RunReport {
    pub fn new(state: &RunState, steps_retired: u64, wall_ms: u128) -> Self {
        let (state_name, trap) = match state {
            RunState::Halted(_) => ("halted", None),
            RunState::Trapped(t) => ("trapped", Some(t.kind.to_string())),
            RunState::StepLimit => ("step-limit", None),
            RunState::Breakpoint => ("breakpoint", None),
            RunState::Paused => ("paused", None),
            RunState::Ready | RunState::Running => ("running", None),
        };
        RunReport {
            state: state_name.to_string(),
            trap,
            steps_retired,
            wall_ms,
        }
    }

    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => tracing::warn!(error = %e, "run report serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtval::RtValue;

    #[test]
    fn test_report_shape() {
        let r = RunReport::new(&RunState::Halted(RtValue::I64(0)), 42, 7);
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"state\":\"halted\""));
        assert!(json.contains("\"steps_retired\":42"));
        assert!(!json.contains("trap"));
    }

    #[test]
    fn test_trap_included() {
        let t = viper_runtime::Trap {
            kind: viper_runtime::TrapKind::DivideByZero,
            message: String::new(),
        };
        let r = RunReport::new(&RunState::Trapped(t), 1, 0);
        assert!(serde_json::to_string(&r).unwrap().contains("DivideByZero"));
    }
}
