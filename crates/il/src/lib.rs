//! Viper IL
//!
//! Typed SSA intermediate language with explicit basic-block parameters:
//! the data model, the round-trippable textual format, on-demand analyses,
//! the verifier, and the optimization pipeline. The VM and the native
//! backends both consume modules certified by [`verify::verify`].
//!
//! # Layout
//!
//! - [`types`], [`value`], [`instr`], [`module`] - the data model and
//!   builder API
//! - [`parse`] / [`emit`] - canonical text I/O
//! - [`analysis`] - CFG, orders, dominators, basic alias analysis
//! - [`verify`] - structural/typing/SSA/edge/EH checks
//! - [`transform`] - SCCP, mem2reg, peephole, DCE behind a pass driver
//! - [`sigtable`] - the runtime extern signature catalog
//! - [`fold`] - scalar operation semantics shared with the interpreter

pub mod analysis;
pub mod diag;
pub mod emit;
pub mod fold;
pub mod instr;
pub mod module;
pub mod parse;
pub mod sigtable;
pub mod transform;
pub mod types;
pub mod value;
pub mod verify;

pub use diag::{Diag, DiagLoc, Severity};
pub use emit::module_text;
pub use instr::{BlockId, BranchTarget, FloatPred, Instr, IntPred, Opcode, SourceLoc};
pub use module::{Block, Extern, Function, GlobalConst, GlobalInit, Module, Param};
pub use parse::parse_module;
pub use types::{Signature, Type};
pub use value::{SsaId, Value};
pub use verify::{Certified, verify};
