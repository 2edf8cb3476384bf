//! Runner state machine
//!
//! `Ready -> Running -> {Halted | Trapped | Breakpoint | Paused |
//! StepLimit}`. [`Runner::step`] retires exactly one instruction;
//! [`Runner::continue_run`] retires until a non-running state. Breakpoint
//! and Paused are resumable; the rest are terminal.
//!
//! Every instruction retirement is a suspension point: the step budget,
//! cancellation flag, breakpoint table and trace sink are all consulted
//! between instructions, never during one.

use crate::config::VmConfig;
use crate::exec::{ExecState, Flow};
use crate::rtval::RtValue;
use crate::trace::{BreakTable, TraceSink};
use viper_il::{Certified, Module};
use viper_runtime::error::{Trap, TrapKind};

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Ready,
    Running,
    /// Program returned from the entry function
    Halted(RtValue),
    /// Unhandled trap
    Trapped(Trap),
    /// Paused before an instruction whose source line matched
    Breakpoint,
    /// Cooperative cancellation
    Paused,
    /// Step budget exhausted
    StepLimit,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Halted(_) | RunState::Trapped(_) | RunState::StepLimit
        )
    }
}

pub struct Runner<'m> {
    module: &'m Module,
    exec: ExecState<'m>,
    state: RunState,
    breaks: BreakTable,
    max_steps: Option<u64>,
    cancel_requested: bool,
    /// (file id, line, block) of the previous breakpoint trigger, for
    /// coalescing repeated hits on one line within one block
    last_break: Option<(u32, u32, usize)>,
}

impl<'m> Runner<'m> {
    /// Build a runner for a verified module, armed at `entry` with `args`.
    pub fn new(
        module: &'m Module,
        cert: Certified,
        config: VmConfig,
        entry: &str,
        args: Vec<RtValue>,
    ) -> Result<Self, Trap> {
        let mut exec = ExecState::new(module, cert, config);
        exec.arm(entry, args)?;
        Ok(Runner {
            module,
            exec,
            state: RunState::Ready,
            breaks: BreakTable::new(),
            max_steps: None,
            cancel_requested: false,
            last_break: None,
        })
    }

    pub fn set_trace(&mut self, sink: TraceSink) {
        self.exec.trace = Some(sink);
    }

    pub fn add_breakpoint(&mut self, file: &str, line: u32) {
        self.breaks.add(file, line);
    }

    pub fn set_max_steps(&mut self, max: u64) {
        self.max_steps = Some(max);
    }

    /// Cooperative cancellation; takes effect at the next suspension point.
    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn exec(&self) -> &ExecState<'m> {
        &self.exec
    }

    pub fn steps_retired(&self) -> u64 {
        self.exec.steps_retired
    }

    /// Retire exactly one instruction (or transition to a pause/terminal
    /// state without retiring one).
    pub fn step(&mut self) -> &RunState {
        if self.state.is_terminal() {
            return &self.state;
        }
        self.state = RunState::Running;

        if self.exec.done() {
            self.state = RunState::Halted(RtValue::Unit);
            return &self.state;
        }
        if let Some(max) = self.max_steps {
            if self.exec.steps_retired >= max {
                self.state = RunState::StepLimit;
                return &self.state;
            }
        }
        if self.cancel_requested {
            self.cancel_requested = false;
            self.state = RunState::Paused;
            return &self.state;
        }
        if self.breakpoint_hit() {
            self.state = RunState::Breakpoint;
            return &self.state;
        }
        if self.exec.trace.is_some() {
            let line = self.exec.trace_line();
            self.exec.emit_trace(&line);
        }
        match self.exec.execute_one() {
            Flow::Next | Flow::Jumped => {
                self.state = RunState::Running;
            }
            Flow::Halted(v) => {
                self.state = RunState::Halted(v);
            }
            Flow::Fatal(t) => {
                self.state = RunState::Trapped(t);
            }
        }
        &self.state
    }

    /// Run until a non-running state.
    pub fn continue_run(&mut self) -> &RunState {
        loop {
            self.step();
            if self.state != RunState::Running {
                return &self.state;
            }
        }
    }

    /// True when the next instruction triggers a breakpoint: its location
    /// matches a registered `(file, line)` and the previous trigger was in
    /// a different block (hits on one line coalesce within a block).
    fn breakpoint_hit(&mut self) -> bool {
        if self.breaks.is_empty() {
            return false;
        }
        let instr = self.exec.cur_instr();
        if instr.loc.is_none() {
            return false;
        }
        let Some(file) = self.module.file_name(instr.loc) else {
            return false;
        };
        if !self.breaks.matches(file, instr.loc.line) {
            return false;
        }
        let (func, block) = self.exec.cur_site();
        let key = (instr.loc.file, instr.loc.line, func << 32 | block);
        if self.last_break == Some(key) {
            return false;
        }
        self.last_break = Some(key);
        true
    }

    /// Result value after a Halted state; `None` otherwise.
    pub fn result(&self) -> Option<&RtValue> {
        match &self.state {
            RunState::Halted(v) => Some(v),
            _ => None,
        }
    }

    /// Terminal trap after a Trapped state.
    pub fn trap(&self) -> Option<&Trap> {
        match &self.state {
            RunState::Trapped(t) => Some(t),
            _ => None,
        }
    }

    /// The StepLimit state expressed as a structured trap reason.
    pub fn step_limit_trap() -> Trap {
        Trap {
            kind: TrapKind::StepLimitReached,
            message: "step budget exhausted".to_string(),
        }
    }
}
