//! Trap reporting across the FFI boundary
//!
//! Runtime functions never panic across the C ABI. A function that hits a
//! trap condition records it in thread-local state and returns a dummy
//! value; the interpreter (or native prologue) checks for a pending trap
//! after the call and starts unwinding.

use std::cell::RefCell;
use std::fmt;

/// Structured reason codes for VM-visible runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    DivideByZero,
    Overflow,
    Bounds,
    NullObject,
    InvalidCast,
    InvalidConversion,
    StackOverflow,
    StepLimitReached,
    RcMagicMismatch,
    Io,
    Unsupported,
}

impl fmt::Display for TrapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrapKind::DivideByZero => "DivideByZero",
            TrapKind::Overflow => "Overflow",
            TrapKind::Bounds => "Bounds",
            TrapKind::NullObject => "NullObject",
            TrapKind::InvalidCast => "InvalidCast",
            TrapKind::InvalidConversion => "InvalidConversion",
            TrapKind::StackOverflow => "StackOverflow",
            TrapKind::StepLimitReached => "StepLimitReached",
            TrapKind::RcMagicMismatch => "RcMagicMismatch",
            TrapKind::Io => "Io",
            TrapKind::Unsupported => "Unsupported",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trap {
    pub kind: TrapKind,
    pub message: String,
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trap: {}: {}", self.kind, self.message)
    }
}

thread_local! {
    static PENDING_TRAP: RefCell<Option<Trap>> = const { RefCell::new(None) };
}

/// Record a trap. A trap already pending is kept; the first cause wins.
pub fn set_trap(kind: TrapKind, message: impl Into<String>) {
    PENDING_TRAP.with(|t| {
        let mut slot = t.borrow_mut();
        if slot.is_none() {
            *slot = Some(Trap {
                kind,
                message: message.into(),
            });
        }
    });
}

/// Take (and clear) the pending trap.
pub fn take_trap() -> Option<Trap> {
    PENDING_TRAP.with(|t| t.borrow_mut().take())
}

pub fn has_trap() -> bool {
    PENDING_TRAP.with(|t| t.borrow().is_some())
}

pub fn clear_trap() {
    PENDING_TRAP.with(|t| *t.borrow_mut() = None);
}

/// FFI-safe pending-trap probe for native-code callers.
#[unsafe(no_mangle)]
pub extern "C" fn viper_rt_has_trap() -> bool {
    has_trap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trap_wins() {
        clear_trap();
        set_trap(TrapKind::DivideByZero, "x / 0");
        set_trap(TrapKind::Bounds, "late");
        let t = take_trap().unwrap();
        assert_eq!(t.kind, TrapKind::DivideByZero);
        assert!(!has_trap());
    }

    #[test]
    fn test_display() {
        let t = Trap {
            kind: TrapKind::Bounds,
            message: "index 9 out of 0..3".to_string(),
        };
        assert_eq!(t.to_string(), "trap: Bounds: index 9 out of 0..3");
    }
}
