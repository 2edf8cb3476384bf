//! Math externs (`Viper.Math.*`) and the process-wide RNG
//!
//! The RNG is the one piece of process-global mutable state the runtime
//! owns besides the class registry. It is seeded explicitly by
//! [`crate::runtime_init`]; `Viper.Math.RandomizeI64` reseeds it.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

static RNG: Mutex<Option<StdRng>> = Mutex::new(None);

/// Install the RNG with a fixed seed. Called once at startup; calling it
/// again reseeds (which is exactly what `RandomizeI64` does).
pub fn seed_rng(seed: u64) {
    let mut guard = RNG.lock().expect("rng lock");
    *guard = Some(StdRng::seed_from_u64(seed));
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_sqrt(x: f64) -> f64 {
    x.sqrt()
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_sin(x: f64) -> f64 {
    x.sin()
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_cos(x: f64) -> f64 {
    x.cos()
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_floor(x: f64) -> f64 {
    x.floor()
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_ceil(x: f64) -> f64 {
    x.ceil()
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_abs_i64(x: i64) -> i64 {
    x.wrapping_abs()
}

/// Uniform value in `[0, 1)`.
#[unsafe(no_mangle)]
pub extern "C" fn rt_rnd() -> f64 {
    let mut guard = RNG.lock().expect("rng lock");
    let rng = guard.get_or_insert_with(|| StdRng::seed_from_u64(0));
    rng.gen_range(0.0..1.0)
}

#[unsafe(no_mangle)]
pub extern "C" fn rt_randomize(seed: i64) {
    seed_rng(seed as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_seeded_sequence_is_deterministic() {
        rt_randomize(1234);
        let a: Vec<f64> = (0..4).map(|_| rt_rnd()).collect();
        rt_randomize(1234);
        let b: Vec<f64> = (0..4).map(|_| rt_rnd()).collect();
        assert_eq!(a, b);
        for v in a {
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_scalar_math() {
        assert_eq!(rt_sqrt(9.0), 3.0);
        assert_eq!(rt_pow(2.0, 10.0), 1024.0);
        assert_eq!(rt_floor(1.7), 1.0);
        assert_eq!(rt_ceil(1.2), 2.0);
        assert_eq!(rt_abs_i64(-5), 5);
    }
}
