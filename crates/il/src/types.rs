//! IL type system
//!
//! Types are structural: two types are equal iff their kind and parameters
//! match. `Str` and `Array` are reference-counted heap handles with their own
//! identity; they never alias raw `Ptr` values.

use std::fmt;

/// A first-class IL type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Opaque byte-addressed pointer
    Ptr,
    /// Reference-counted UTF-8 string handle
    Str,
    /// Reference-counted vector handle with element type
    Array(Box<Type>),
    /// Struct payload layout, by declaration index in the module
    Struct(u32),
    /// Function pointer with full signature
    Func(Box<Signature>),
}

impl Type {
    /// Integer types, including `i1`.
    pub fn is_int(&self) -> bool {
        matches!(self, Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Width in bits for integer types; 0 for everything else.
    pub fn int_bits(&self) -> u32 {
        match self {
            Type::I1 => 1,
            Type::I8 => 8,
            Type::I16 => 16,
            Type::I32 => 32,
            Type::I64 => 64,
            _ => 0,
        }
    }

    /// Size in bytes when stored in memory (`load`/`store`/`alloca` units).
    ///
    /// Handles (`Str`, `Array`, `Ptr`, `Func`) are one machine word.
    /// `Void` and `Struct` have no scalar store size and report 0; struct
    /// layout is resolved against the module's declaration table.
    pub fn store_size(&self) -> u64 {
        match self {
            Type::Void | Type::Struct(_) => 0,
            Type::I1 | Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 | Type::F32 => 4,
            Type::I64 | Type::F64 => 8,
            Type::Ptr | Type::Str | Type::Array(_) | Type::Func(_) => 8,
        }
    }

    /// True for types passed and stored as refcounted heap handles.
    pub fn is_handle(&self) -> bool {
        matches!(self, Type::Str | Type::Array(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::I1 => write!(f, "i1"),
            Type::I8 => write!(f, "i8"),
            Type::I16 => write!(f, "i16"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ptr => write!(f, "ptr"),
            Type::Str => write!(f, "str"),
            Type::Array(elem) => write!(f, "[{}]", elem),
            Type::Struct(id) => write!(f, "struct.{}", id),
            Type::Func(sig) => write!(f, "{}", sig),
        }
    }
}

/// Ordered parameter types plus a single return type.
///
/// Variadic signatures are not supported at IL level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl Signature {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Signature { params, ret }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        assert_eq!(Type::Array(Box::new(Type::I64)), Type::Array(Box::new(Type::I64)));
        assert_ne!(Type::Array(Box::new(Type::I64)), Type::Array(Box::new(Type::F64)));
        assert_eq!(
            Type::Func(Box::new(Signature::new(vec![Type::I64], Type::Void))),
            Type::Func(Box::new(Signature::new(vec![Type::I64], Type::Void))),
        );
    }

    #[test]
    fn test_display_round_names() {
        assert_eq!(Type::I64.to_string(), "i64");
        assert_eq!(Type::Array(Box::new(Type::Str)).to_string(), "[str]");
        assert_eq!(
            Type::Func(Box::new(Signature::new(vec![Type::I64, Type::I64], Type::I64))).to_string(),
            "fn(i64, i64) -> i64"
        );
    }

    #[test]
    fn test_store_sizes() {
        assert_eq!(Type::I1.store_size(), 1);
        assert_eq!(Type::I32.store_size(), 4);
        assert_eq!(Type::Str.store_size(), 8);
        assert_eq!(Type::Void.store_size(), 0);
    }
}
