//! Call frames
//!
//! A frame owns the register file for one function activation plus its
//! stack allocations. Register slots that hold `str`/`[T]` handles own one
//! refcount each; [`Frame::store`] releases the previous owner and
//! [`Frame::release_all`] runs at teardown (pop, tail-call reuse, trap
//! unwind past the frame).

use crate::rtval::RtValue;
use viper_il::value::SsaId;
use viper_runtime::heap;

pub struct Frame {
    /// Index into the module's function list
    pub func: usize,
    pub block: usize,
    /// Instruction index within the block
    pub ip: usize,
    regs: Vec<RtValue>,
    /// Scratch for branch-argument evaluation (owned values in transit)
    pub scratch: Vec<RtValue>,
    /// Backing storage for `alloca`; freed with the frame
    pub allocas: Vec<Box<[u8]>>,
    /// Error token while executing inside a handler scope
    pub handler_trap: Option<viper_runtime::Trap>,
}

impl Frame {
    pub fn new(func: usize, reg_count: usize) -> Self {
        Frame {
            func,
            block: 0,
            ip: 0,
            regs: vec![RtValue::Unit; reg_count],
            scratch: Vec::new(),
            allocas: Vec::new(),
            handler_trap: None,
        }
    }

    pub fn get(&self, id: SsaId) -> RtValue {
        self.regs
            .get(id as usize)
            .copied()
            .unwrap_or(RtValue::Unit)
    }

    /// Store an OWNED value, releasing the slot's previous owner.
    pub fn store(&mut self, id: SsaId, value: RtValue) {
        let slot = id as usize;
        if slot >= self.regs.len() {
            self.regs.resize(slot + 1, RtValue::Unit);
        }
        if let Some(old) = self.regs[slot].handle() {
            unsafe { heap::rt_release(old) };
        }
        self.regs[slot] = value;
    }

    /// Release every owned handle. Used at teardown and tail-call reuse.
    pub fn release_all(&mut self) {
        for v in self.regs.iter_mut() {
            if let Some(p) = v.handle() {
                unsafe { heap::rt_release(p) };
            }
            *v = RtValue::Unit;
        }
        for v in self.scratch.drain(..) {
            if let Some(p) = v.handle() {
                unsafe { heap::rt_release(p) };
            }
        }
        self.allocas.clear();
        self.handler_trap = None;
    }

    /// Reshape for tail-call reuse: same frame, new function.
    pub fn rebind(&mut self, func: usize, reg_count: usize) {
        self.release_all();
        self.func = func;
        self.block = 0;
        self.ip = 0;
        self.regs.clear();
        self.regs.resize(reg_count, RtValue::Unit);
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_runtime::heap::rt_refcount;
    use viper_runtime::strings::new_str;

    #[test]
    fn test_store_releases_previous_owner() {
        unsafe {
            let a = new_str("a");
            let b = new_str("b");
            heap::rt_retain(a); // probe reference so we can watch the count
            let mut f = Frame::new(0, 4);
            f.store(0, RtValue::Str(a));
            assert_eq!(rt_refcount(a), 2);
            f.store(0, RtValue::Str(b));
            assert_eq!(rt_refcount(a), 1, "overwrite must release");
            drop(f); // releases b
            heap::rt_release(a);
        }
    }

    #[test]
    fn test_rebind_clears_registers() {
        let mut f = Frame::new(0, 2);
        f.store(1, RtValue::I64(9));
        f.rebind(3, 5);
        assert_eq!(f.func, 3);
        assert_eq!(f.get(1), RtValue::Unit);
        assert_eq!(f.get(4), RtValue::Unit);
    }
}
