//! Viper runtime library
//!
//! The C-ABI surface shared by the VM interpreter and the native code
//! backends: refcounted heap handles, strings, arrays, console and file
//! I/O, math, and the object system. Canonical extern names live in the
//! IL signature table; the symbols exported here are the `rt_*` aliases
//! that table maps onto.
//!
//! # Initialization
//!
//! Call [`runtime_init`] once per process before executing code. It pins
//! `LC_NUMERIC` to the C locale, seeds the RNG, and installs the
//! refcount-debug knob. Nothing in this crate self-initializes lazily.

pub mod arrays;
pub mod console;
pub mod error;
pub mod files;
pub mod heap;
pub mod math;
pub mod object;
pub mod strings;
pub mod threads;

pub use error::{Trap, TrapKind, clear_trap, has_trap, set_trap, take_trap};

/// Process-wide runtime setup.
///
/// `seed` fixes the RNG (tests, reproducible runs); `None` seeds from the
/// OS. `rc_debug` enables heap-header magic validation on retain/release.
pub fn runtime_init(seed: Option<u64>, rc_debug: bool) {
    // All numeric text I/O assumes the C locale.
    unsafe {
        libc::setlocale(libc::LC_NUMERIC, c"C".as_ptr());
    }
    let seed = seed.unwrap_or_else(|| {
        use rand::RngCore;
        rand::rngs::OsRng.next_u64()
    });
    math::seed_rng(seed);
    heap::set_rc_debug(rc_debug);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        runtime_init(Some(7), false);
        runtime_init(Some(7), true);
        assert!(!has_trap());
    }
}
