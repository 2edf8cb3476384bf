//! Runtime register values
//!
//! One tagged value per live SSA id. Integer widths all ride in `I64`
//! sign-extended; the instruction's type annotation decides masking.
//! `Str`/`Arr` carry runtime heap payload pointers; each register slot
//! that holds one owns a refcount (see the ownership rules in `exec`).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtValue {
    /// Void results and uninitialized slots
    Unit,
    I64(i64),
    F64(f64),
    /// Raw address: alloca storage, global cells, function addresses
    Ptr(usize),
    /// String heap handle (payload pointer)
    Str(*mut u8),
    /// Array heap handle (payload pointer)
    Arr(*mut u8),
    Null,
}

impl RtValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RtValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RtValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Heap payload pointer when this value owns a handle.
    pub fn handle(&self) -> Option<*mut u8> {
        match self {
            RtValue::Str(p) | RtValue::Arr(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_truthy_i1(&self) -> bool {
        matches!(self, RtValue::I64(v) if *v & 1 == 1)
    }
}

impl fmt::Display for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtValue::Unit => write!(f, "void"),
            RtValue::I64(v) => write!(f, "{}", v),
            RtValue::F64(v) => write!(f, "{}", viper_runtime::strings::format_f64_user(*v)),
            RtValue::Ptr(p) => write!(f, "ptr:{:#x}", p),
            RtValue::Str(p) => write!(f, "str:{:p}", p),
            RtValue::Arr(p) => write!(f, "arr:{:p}", p),
            RtValue::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(RtValue::I64(5).as_i64(), Some(5));
        assert_eq!(RtValue::F64(1.5).as_i64(), None);
        assert!(RtValue::I64(1).is_truthy_i1());
        assert!(!RtValue::I64(2).is_truthy_i1());
    }

    #[test]
    fn test_display_uses_canonical_floats() {
        assert_eq!(RtValue::F64(0.1 + 0.2).to_string(), "0.3");
        assert_eq!(RtValue::I64(-3).to_string(), "-3");
    }
}
