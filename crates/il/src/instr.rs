//! Instructions, opcodes, and the opcode schema table
//!
//! Opcode-specific operand rules live in one declarative schema
//! ([`schema`]) that both the verifier and the interpreter index into,
//! instead of per-opcode classes.

use crate::types::Type;
use crate::value::{SsaId, Value};
use std::fmt;

/// Integer comparison predicate (`icmp.<pred>.<ty>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl IntPred {
    pub fn mnemonic(self) -> &'static str {
        match self {
            IntPred::Eq => "eq",
            IntPred::Ne => "ne",
            IntPred::Slt => "slt",
            IntPred::Sle => "sle",
            IntPred::Sgt => "sgt",
            IntPred::Sge => "sge",
            IntPred::Ult => "ult",
            IntPred::Ule => "ule",
            IntPred::Ugt => "ugt",
            IntPred::Uge => "uge",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => IntPred::Eq,
            "ne" => IntPred::Ne,
            "slt" => IntPred::Slt,
            "sle" => IntPred::Sle,
            "sgt" => IntPred::Sgt,
            "sge" => IntPred::Sge,
            "ult" => IntPred::Ult,
            "ule" => IntPred::Ule,
            "ugt" => IntPred::Ugt,
            "uge" => IntPred::Uge,
            _ => return None,
        })
    }
}

/// Float comparison predicate (`fcmp.<pred>.<ty>`).
///
/// Comparisons never trap on NaN: `eq/lt/le/gt/ge` are ordered (false when
/// either operand is NaN), `ne` is unordered (true on NaN), `uno` is true
/// iff either operand is NaN and `ord` is its negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ord,
    Uno,
}

impl FloatPred {
    pub fn mnemonic(self) -> &'static str {
        match self {
            FloatPred::Eq => "eq",
            FloatPred::Ne => "ne",
            FloatPred::Lt => "lt",
            FloatPred::Le => "le",
            FloatPred::Gt => "gt",
            FloatPred::Ge => "ge",
            FloatPred::Ord => "ord",
            FloatPred::Uno => "uno",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => FloatPred::Eq,
            "ne" => FloatPred::Ne,
            "lt" => FloatPred::Lt,
            "le" => FloatPred::Le,
            "gt" => FloatPred::Gt,
            "ge" => FloatPred::Ge,
            "ord" => FloatPred::Ord,
            "uno" => FloatPred::Uno,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Integer arithmetic (wrapping; sdiv/udiv/srem/urem trap on zero divisor)
    Add,
    Sub,
    Mul,
    Sdiv,
    Udiv,
    Srem,
    Urem,
    // Float arithmetic
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    // Absolute value, integer or float per the type suffix
    Abs,
    // Bitwise / shifts, width fixed by operand type
    And,
    Or,
    Xor,
    Shl,
    Lshr,
    Ashr,
    // Comparisons, result i1
    ICmp(IntPred),
    FCmp(FloatPred),
    // Conversions, written `op.<from>.<to>`
    Sext,
    Zext,
    Trunc,
    SiToFp,
    UiToFp,
    FpToSi,
    FpToUi,
    Bitcast,
    PtrToInt,
    IntToPtr,
    // Memory
    Alloca,
    Load,
    Store,
    Gep,
    AddrOf,
    // Terminators
    Ret,
    Br,
    CBr,
    Switch,
    Unreachable,
    Resume,
    // Calls
    Call,
    ICall,
    Invoke,
    Landingpad,
}

/// Operand-shape rule class for an opcode, indexed by verifier and VM alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Two operands of the annotated integer type, result same type
    IntBin,
    /// Two operands of the annotated float type, result same type
    FloatBin,
    /// One operand of the annotated numeric type, result same type
    NumUnary,
    /// Two integer operands, result i1
    IntCmp,
    /// Two float operands, result i1
    FloatCmp,
    /// One operand of the source type, result of the destination type
    Convert,
    Alloca,
    Load,
    Store,
    Gep,
    AddrOf,
    Ret,
    Br,
    CBr,
    Switch,
    Unreachable,
    Resume,
    Call,
    ICall,
    Invoke,
    Landingpad,
}

/// Side-effect class, consulted by DCE and BasicAA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectClass {
    /// No observable effect beyond the result
    Pure,
    /// Pure but may trap (division, checked conversions)
    MayTrap,
    /// Reads memory
    ReadMem,
    /// Writes memory
    WriteMem,
    /// Calls (effects per callee / signature table)
    CallEffect,
    /// Control transfer
    Control,
}

pub struct OpSchema {
    pub mnemonic: &'static str,
    pub kind: OpKind,
    pub terminator: bool,
    pub has_result: bool,
    pub effect: EffectClass,
}

/// The declarative opcode schema. One row per opcode.
pub fn schema(op: Opcode) -> OpSchema {
    use EffectClass::*;
    use OpKind::*;
    let row = |mnemonic, kind, terminator, has_result, effect| OpSchema {
        mnemonic,
        kind,
        terminator,
        has_result,
        effect,
    };
    match op {
        Opcode::Add => row("add", IntBin, false, true, Pure),
        Opcode::Sub => row("sub", IntBin, false, true, Pure),
        Opcode::Mul => row("mul", IntBin, false, true, Pure),
        Opcode::Sdiv => row("sdiv", IntBin, false, true, MayTrap),
        Opcode::Udiv => row("udiv", IntBin, false, true, MayTrap),
        Opcode::Srem => row("srem", IntBin, false, true, MayTrap),
        Opcode::Urem => row("urem", IntBin, false, true, MayTrap),
        Opcode::Fadd => row("fadd", FloatBin, false, true, Pure),
        Opcode::Fsub => row("fsub", FloatBin, false, true, Pure),
        Opcode::Fmul => row("fmul", FloatBin, false, true, Pure),
        Opcode::Fdiv => row("fdiv", FloatBin, false, true, Pure),
        Opcode::Abs => row("abs", NumUnary, false, true, Pure),
        Opcode::And => row("and", IntBin, false, true, Pure),
        Opcode::Or => row("or", IntBin, false, true, Pure),
        Opcode::Xor => row("xor", IntBin, false, true, Pure),
        Opcode::Shl => row("shl", IntBin, false, true, Pure),
        Opcode::Lshr => row("lshr", IntBin, false, true, Pure),
        Opcode::Ashr => row("ashr", IntBin, false, true, Pure),
        Opcode::ICmp(_) => row("icmp", IntCmp, false, true, Pure),
        Opcode::FCmp(_) => row("fcmp", FloatCmp, false, true, Pure),
        Opcode::Sext => row("sext", Convert, false, true, Pure),
        Opcode::Zext => row("zext", Convert, false, true, Pure),
        Opcode::Trunc => row("trunc", Convert, false, true, Pure),
        Opcode::SiToFp => row("sitofp", Convert, false, true, Pure),
        Opcode::UiToFp => row("uitofp", Convert, false, true, Pure),
        Opcode::FpToSi => row("fptosi", Convert, false, true, MayTrap),
        Opcode::FpToUi => row("fptoui", Convert, false, true, MayTrap),
        Opcode::Bitcast => row("bitcast", Convert, false, true, Pure),
        Opcode::PtrToInt => row("ptrtoint", Convert, false, true, Pure),
        Opcode::IntToPtr => row("inttoptr", Convert, false, true, Pure),
        Opcode::Alloca => row("alloca", OpKind::Alloca, false, true, Pure),
        Opcode::Load => row("load", OpKind::Load, false, true, ReadMem),
        Opcode::Store => row("store", OpKind::Store, false, false, WriteMem),
        Opcode::Gep => row("gep", OpKind::Gep, false, true, Pure),
        Opcode::AddrOf => row("addrof", OpKind::AddrOf, false, true, Pure),
        Opcode::Ret => row("ret", OpKind::Ret, true, false, Control),
        Opcode::Br => row("br", OpKind::Br, true, false, Control),
        Opcode::CBr => row("cbr", OpKind::CBr, true, false, Control),
        Opcode::Switch => row("switch", OpKind::Switch, true, false, Control),
        Opcode::Unreachable => row("unreachable", OpKind::Unreachable, true, false, Control),
        Opcode::Resume => row("resume", OpKind::Resume, true, false, Control),
        Opcode::Call => row("call", OpKind::Call, false, true, CallEffect),
        Opcode::ICall => row("icall", OpKind::ICall, false, true, CallEffect),
        Opcode::Invoke => row("invoke", OpKind::Invoke, true, true, CallEffect),
        Opcode::Landingpad => row("landingpad", OpKind::Landingpad, false, true, Pure),
    }
}

/// Index of a basic block within its function's block arena.
pub type BlockId = usize;

/// A branch edge: destination block plus the argument list feeding the
/// destination's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchTarget {
    pub block: BlockId,
    pub args: Vec<Value>,
}

/// Source location: file id into the module's file table, 1-indexed
/// line/column. [`SourceLoc::NONE`] marks instructions without location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: u32,
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub const NONE: SourceLoc = SourceLoc {
        file: u32::MAX,
        line: 0,
        col: 0,
    };

    pub fn new(file: u32, line: u32, col: u32) -> Self {
        SourceLoc { file, line, col }
    }

    pub fn is_none(&self) -> bool {
        self.file == u32::MAX
    }
}

/// One IL instruction.
///
/// The shape is uniform across opcodes; which fields are meaningful is
/// dictated by the opcode's [`schema`] row:
///
/// - `ty` is the operand/annotation type: element type for `alloca`,
///   access type for `load`/`store`, operand type for arithmetic and
///   comparisons, *source* type for conversions, scrutinee type for
///   `switch`.
/// - `result_ty` is the defined temporary's type (`Void` when none).
/// - `targets` holds branch edges: `br` one, `cbr` two (then, else),
///   `invoke` two (normal, unwind), `switch` the default at index 0
///   followed by one per case key.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub op: Opcode,
    pub result: Option<SsaId>,
    pub result_ty: Type,
    pub ty: Type,
    pub operands: Vec<Value>,
    /// Direct callee symbol for `call`/`invoke`
    pub callee: Option<String>,
    /// Parameter types for `icall` (return type is `result_ty`)
    pub sig_params: Vec<Type>,
    pub targets: Vec<BranchTarget>,
    /// Case keys for `switch`, parallel to `targets[1..]`
    pub case_keys: Vec<i32>,
    /// Tail-call hint on `call`/`icall`; the verifier checks tail position
    pub tail: bool,
    pub loc: SourceLoc,
    /// Optional front-end handler scope hint; the verifier recomputes the
    /// scope tree from the CFG and does not trust this field
    pub eh_scope: Option<u32>,
}

impl Instr {
    /// A bare instruction of the given opcode with no operands.
    pub fn new(op: Opcode) -> Self {
        Instr {
            op,
            result: None,
            result_ty: Type::Void,
            ty: Type::Void,
            operands: Vec::new(),
            callee: None,
            sig_params: Vec::new(),
            targets: Vec::new(),
            case_keys: Vec::new(),
            tail: false,
            loc: SourceLoc::NONE,
            eh_scope: None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        schema(self.op).terminator
    }

    /// All values this instruction reads, including branch arguments.
    pub fn uses(&self) -> impl Iterator<Item = &Value> {
        self.operands
            .iter()
            .chain(self.targets.iter().flat_map(|t| t.args.iter()))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::ICmp(p) => write!(f, "icmp.{}", p.mnemonic()),
            Opcode::FCmp(p) => write!(f, "fcmp.{}", p.mnemonic()),
            other => write!(f, "{}", schema(*other).mnemonic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_flags() {
        assert!(schema(Opcode::Ret).terminator);
        assert!(schema(Opcode::Switch).terminator);
        assert!(schema(Opcode::Invoke).terminator);
        assert!(!schema(Opcode::Call).terminator);
        assert!(!schema(Opcode::Landingpad).terminator);
    }

    #[test]
    fn test_effect_classes() {
        assert_eq!(schema(Opcode::Add).effect, EffectClass::Pure);
        assert_eq!(schema(Opcode::Sdiv).effect, EffectClass::MayTrap);
        assert_eq!(schema(Opcode::Store).effect, EffectClass::WriteMem);
        assert_eq!(schema(Opcode::Call).effect, EffectClass::CallEffect);
    }

    #[test]
    fn test_uses_covers_branch_args() {
        let mut i = Instr::new(Opcode::Br);
        i.targets.push(BranchTarget {
            block: 1,
            args: vec![Value::Temp(4), Value::ConstInt(1)],
        });
        let uses: Vec<_> = i.uses().collect();
        assert_eq!(uses.len(), 2);
        assert_eq!(uses[0], &Value::Temp(4));
    }

    #[test]
    fn test_pred_mnemonic_round_trip() {
        for p in [
            IntPred::Eq,
            IntPred::Ne,
            IntPred::Slt,
            IntPred::Sle,
            IntPred::Sgt,
            IntPred::Sge,
            IntPred::Ult,
            IntPred::Ule,
            IntPred::Ugt,
            IntPred::Uge,
        ] {
            assert_eq!(IntPred::from_mnemonic(p.mnemonic()), Some(p));
        }
        for p in [
            FloatPred::Eq,
            FloatPred::Ne,
            FloatPred::Lt,
            FloatPred::Le,
            FloatPred::Gt,
            FloatPred::Ge,
            FloatPred::Ord,
            FloatPred::Uno,
        ] {
            assert_eq!(FloatPred::from_mnemonic(p.mnemonic()), Some(p));
        }
    }
}
