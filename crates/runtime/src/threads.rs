//! Thread externs (`Viper.Threads.*`)
//!
//! Under native backends a spawned thread runs compiled code directly. The
//! interpreter cannot hand an IL function index to a raw OS thread without
//! an embedding callback, so in VM builds these externs trap with a clear
//! reason instead of half-working. The VM's FFI bridge intercepts
//! `Viper.Threads.*` before it reaches these stubs when the host provides
//! a spawn callback.

use crate::error::{TrapKind, set_trap};

#[unsafe(no_mangle)]
pub extern "C" fn rt_thread_spawn(_entry: *const u8) -> i64 {
    set_trap(
        TrapKind::Unsupported,
        "Viper.Threads.Spawn requires natively compiled code or a host spawn callback",
    );
    -1
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_thread_join(_handle: i64) {
    set_trap(
        TrapKind::Unsupported,
        "Viper.Threads.Join requires natively compiled code or a host spawn callback",
    );
}
