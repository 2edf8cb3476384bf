//! On-demand analyses over IL functions
//!
//! Nothing here mutates the IR. Each analysis builds a parallel index keyed
//! by block index and is dropped when the caller is done with it.

pub mod alias;
pub mod cfg;
pub mod dom;
pub mod order;

pub use alias::{AliasResult, ModRef, basic_alias, call_mod_ref};
pub use cfg::CfgContext;
pub use dom::DomTree;
pub use order::{is_acyclic, post_order, reverse_post_order, topo_order};
