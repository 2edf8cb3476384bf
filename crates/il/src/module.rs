//! Module, function, and basic-block containers plus the builder API
//!
//! Blocks and instructions live in arenas owned by their `Function`; all
//! cross-references are stable integer ids (block index, SSA id), never
//! owning pointers, so the cyclic CFG and use/def edges stay plain data.
//!
//! Builder methods perform construction-time sanity checks only (name
//! collisions, terminate-once, branch arity). Full correctness is the
//! verifier's job.

use crate::instr::{BlockId, BranchTarget, Instr, Opcode, SourceLoc};
use crate::types::{Signature, Type};
use crate::value::{SsaId, Value};

/// Typed block parameter with its SSA id.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub id: SsaId,
}

/// Straight-line instruction sequence ending in exactly one terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub name: String,
    pub params: Vec<Param>,
    pub instrs: Vec<Instr>,
}

impl Block {
    pub fn is_terminated(&self) -> bool {
        self.instrs.last().is_some_and(|i| i.is_terminator())
    }

    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last().filter(|i| i.is_terminator())
    }
}

/// OOP metadata attached to methods and constructors.
#[derive(Debug, Clone, PartialEq)]
pub struct FnOopInfo {
    /// Receiver class name (`Namespace.Class`)
    pub class: String,
    /// Vtable slot index when the function is virtual
    pub slot: Option<u32>,
    pub ctor: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub sig: Signature,
    /// Block zero is the entry; function parameters are its parameters.
    pub blocks: Vec<Block>,
    pub oop: Option<FnOopInfo>,
    next_ssa: SsaId,
}

impl Function {
    /// Create a function with an empty entry block whose parameters mirror
    /// the signature.
    pub fn new(name: impl Into<String>, sig: Signature, param_names: &[&str]) -> Self {
        let mut f = Function {
            name: name.into(),
            sig: sig.clone(),
            blocks: Vec::new(),
            oop: None,
            next_ssa: 0,
        };
        let params: Vec<(String, Type)> = sig
            .params
            .iter()
            .enumerate()
            .map(|(i, ty)| {
                let name = param_names
                    .get(i)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("arg{}", i));
                (name, ty.clone())
            })
            .collect();
        f.create_block("entry", params)
            .expect("entry block on empty function cannot collide");
        f
    }

    /// A function shell with no blocks at all; the parser and transforms
    /// fill in blocks explicitly. Prefer [`Function::new`] when building
    /// by hand.
    pub fn new_empty(name: impl Into<String>, sig: Signature) -> Self {
        Function {
            name: name.into(),
            sig,
            blocks: Vec::new(),
            oop: None,
            next_ssa: 0,
        }
    }

    /// Allocate a fresh SSA id. Monotonic per function.
    pub fn reserve_temp(&mut self) -> SsaId {
        let id = self.next_ssa;
        self.next_ssa += 1;
        id
    }

    /// Number of SSA ids allocated so far (register file size for the VM).
    pub fn ssa_count(&self) -> u32 {
        self.next_ssa
    }

    /// Append a block, assigning fresh SSA ids to each parameter.
    /// Rejects duplicate block names.
    pub fn create_block(
        &mut self,
        name: impl Into<String>,
        params: Vec<(String, Type)>,
    ) -> Result<BlockId, String> {
        let name = name.into();
        if self.blocks.iter().any(|b| b.name == name) {
            return Err(format!(
                "duplicate block name '{}' in function @{}",
                name, self.name
            ));
        }
        let params = params
            .into_iter()
            .map(|(pname, ty)| Param {
                name: pname,
                ty,
                id: self.reserve_temp(),
            })
            .collect();
        self.blocks.push(Block {
            name,
            params,
            instrs: Vec::new(),
        });
        Ok(self.blocks.len() - 1)
    }

    pub fn block_id(&self, name: &str) -> Option<BlockId> {
        self.blocks.iter().position(|b| b.name == name)
    }

    /// Append a non-terminator instruction. Rejects after the terminator.
    pub fn add_instr(&mut self, block: BlockId, instr: Instr) -> Result<(), String> {
        if self.blocks[block].is_terminated() {
            return Err(format!(
                "block '{}' already terminated",
                self.blocks[block].name
            ));
        }
        self.blocks[block].instrs.push(instr);
        Ok(())
    }

    /// Install the block's terminator. Rejects a second terminator.
    pub fn set_terminator(&mut self, block: BlockId, term: Instr) -> Result<(), String> {
        if !term.is_terminator() {
            return Err(format!("{} is not a terminator", term.op));
        }
        self.add_instr(block, term)
    }

    /// `br dest(args)` with construction-time arity and literal-type checks
    /// against the destination's parameters.
    pub fn branch(&mut self, src: BlockId, dest: BlockId, args: Vec<Value>) -> Result<(), String> {
        self.check_edge(dest, &args)?;
        let mut i = Instr::new(Opcode::Br);
        i.targets.push(BranchTarget { block: dest, args });
        self.set_terminator(src, i)
    }

    /// `cbr cond, then(args), else(args)`.
    pub fn cond_branch(
        &mut self,
        src: BlockId,
        cond: Value,
        then_dest: BlockId,
        then_args: Vec<Value>,
        else_dest: BlockId,
        else_args: Vec<Value>,
    ) -> Result<(), String> {
        self.check_edge(then_dest, &then_args)?;
        self.check_edge(else_dest, &else_args)?;
        let mut i = Instr::new(Opcode::CBr);
        i.operands.push(cond);
        i.targets.push(BranchTarget {
            block: then_dest,
            args: then_args,
        });
        i.targets.push(BranchTarget {
            block: else_dest,
            args: else_args,
        });
        self.set_terminator(src, i)
    }

    /// `ret` / `ret value`.
    pub fn ret(&mut self, src: BlockId, value: Option<Value>) -> Result<(), String> {
        let mut i = Instr::new(Opcode::Ret);
        i.ty = self.sig.ret.clone();
        if let Some(v) = value {
            i.operands.push(v);
        }
        self.set_terminator(src, i)
    }

    fn check_edge(&self, dest: BlockId, args: &[Value]) -> Result<(), String> {
        let Some(block) = self.blocks.get(dest) else {
            return Err(format!("branch to unknown block #{}", dest));
        };
        if block.params.len() != args.len() {
            return Err(format!(
                "branch to '{}' passes {} args, block expects {}",
                block.name,
                args.len(),
                block.params.len()
            ));
        }
        // Literal/parameter kind mismatches are catchable now; temp types
        // need the verifier's def table.
        for (param, arg) in block.params.iter().zip(args) {
            let bad = match arg {
                Value::ConstFloat(_) => !param.ty.is_float(),
                Value::ConstBool(_) => param.ty != Type::I1,
                Value::ConstInt(_) => !param.ty.is_int(),
                Value::ConstStr(_) => param.ty != Type::Str,
                Value::Null => !matches!(param.ty, Type::Ptr | Type::Str | Type::Array(_)),
                Value::Temp(_) | Value::Global(_) => false,
            };
            if bad {
                return Err(format!(
                    "branch to '{}': argument {} does not fit parameter type {}",
                    block.name, arg, param.ty
                ));
            }
        }
        Ok(())
    }
}

/// Declared extern: canonical name plus IL signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Extern {
    pub name: String,
    pub sig: Signature,
}

/// Struct/class payload layout declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Module-level named constant, addressable with `addrof`.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalConst {
    pub name: String,
    pub ty: Type,
    pub init: GlobalInit,
}

/// Interface implementation: interface name plus slot symbols in the
/// interface's method declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceImpl {
    pub iface: String,
    pub slots: Vec<String>,
}

/// Class metadata: vptr layout, vtable in base-first append-only slot
/// order, itables, and the mangled constructor name
/// (`<Namespace>.<Class>.__ctor`).
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub base: Option<String>,
    /// Payload field layout following the 8-byte vptr
    pub fields: Vec<Type>,
    /// Mangled method symbols by slot; overrides reuse the base's index
    pub vtable: Vec<String>,
    pub interfaces: Vec<InterfaceImpl>,
}

impl ClassDecl {
    pub fn ctor_symbol(&self) -> String {
        format!("{}.__ctor", self.name)
    }
}

/// A named, self-contained IL unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub name: String,
    pub structs: Vec<StructDecl>,
    pub externs: Vec<Extern>,
    pub globals: Vec<GlobalConst>,
    pub classes: Vec<ClassDecl>,
    pub funcs: Vec<Function>,
    /// String literal pool referenced by `Value::ConstStr`
    pub strings: Vec<String>,
    /// File table referenced by `SourceLoc::file`
    pub files: Vec<String>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn func(&self, name: &str) -> Option<&Function> {
        self.funcs.iter().find(|f| f.name == name)
    }

    pub fn func_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.funcs.iter_mut().find(|f| f.name == name)
    }

    pub fn extern_sig(&self, name: &str) -> Option<&Signature> {
        self.externs.iter().find(|e| e.name == name).map(|e| &e.sig)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalConst> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Intern a string literal, reusing an existing pool slot.
    pub fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.strings.iter().position(|p| p == s) {
            return idx as u32;
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as u32
    }

    /// Intern a source file path for `SourceLoc`.
    pub fn intern_file(&mut self, path: &str) -> u32 {
        if let Some(idx) = self.files.iter().position(|p| p == path) {
            return idx as u32;
        }
        self.files.push(path.to_string());
        (self.files.len() - 1) as u32
    }

    pub fn file_name(&self, loc: SourceLoc) -> Option<&str> {
        if loc.is_none() {
            return None;
        }
        self.files.get(loc.file as usize).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fn() -> Function {
        Function::new(
            "f",
            Signature::new(vec![Type::I64], Type::I64),
            &["x"],
        )
    }

    #[test]
    fn test_entry_params_mirror_signature() {
        let f = sample_fn();
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].name, "entry");
        assert_eq!(f.blocks[0].params.len(), 1);
        assert_eq!(f.blocks[0].params[0].ty, Type::I64);
        assert_eq!(f.blocks[0].params[0].id, 0);
    }

    #[test]
    fn test_duplicate_block_name_rejected() {
        let mut f = sample_fn();
        assert!(f.create_block("body", vec![]).is_ok());
        assert!(f.create_block("body", vec![]).is_err());
    }

    #[test]
    fn test_terminate_once() {
        let mut f = sample_fn();
        f.ret(0, Some(Value::Temp(0))).unwrap();
        assert!(f.ret(0, Some(Value::Temp(0))).is_err());
        assert!(f.add_instr(0, Instr::new(Opcode::Add)).is_err());
    }

    #[test]
    fn test_branch_arity_checked() {
        let mut f = sample_fn();
        let body = f
            .create_block("body", vec![("i".to_string(), Type::I64)])
            .unwrap();
        assert!(f.branch(0, body, vec![]).is_err());
        assert!(f.branch(0, body, vec![Value::ConstInt(0)]).is_ok());
    }

    #[test]
    fn test_branch_literal_type_checked() {
        let mut f = sample_fn();
        let body = f
            .create_block("body", vec![("i".to_string(), Type::I64)])
            .unwrap();
        assert!(f.branch(0, body, vec![Value::ConstFloat(1.0)]).is_err());
    }

    #[test]
    fn test_string_pool_interning() {
        let mut m = Module::new("m");
        let a = m.intern_string("hello");
        let b = m.intern_string("hello");
        let c = m.intern_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(m.strings.len(), 2);
    }
}
