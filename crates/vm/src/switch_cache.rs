//! Switch dispatch backends
//!
//! On the first execution of a `switch.i32` the case values are profiled
//! (`range = max-min+1`, `density = count/range`) and a backend is
//! selected:
//!
//! - dense jump table when `range <= 4096` and `density >= 0.60`,
//! - hash map when `count >= 64` and `density < 0.15`,
//! - sorted binary search otherwise.
//!
//! Duplicate case keys keep the first occurrence. The chosen backend is
//! memoized per instruction in the execution state; `VIPER_SWITCH_MODE`
//! forces a specific backend (including the linear scan used to validate
//! the others).

use crate::config::SwitchMode;
use std::collections::HashMap;

const DENSE_MAX_RANGE: u64 = 4096;
const DENSE_MIN_DENSITY: f64 = 0.60;
const HASH_MIN_COUNT: usize = 64;
const HASH_MAX_DENSITY: f64 = 0.15;

/// Target-slot index inside the instruction: 0 is the default edge,
/// case `n` lives at `n + 1`.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchBackend {
    /// `table[k - min]` -> slot
    Dense { min: i32, table: Vec<u32> },
    Hashed(HashMap<i32, u32>),
    /// (key, slot) pairs sorted by key
    Sorted(Vec<(i32, u32)>),
    /// First-match scan over the raw keys
    Linear(Vec<(i32, u32)>),
}

impl SwitchBackend {
    /// Profile the case keys and pick a backend.
    pub fn build(case_keys: &[i32], mode: SwitchMode) -> SwitchBackend {
        // First occurrence wins for duplicate keys.
        let mut first: Vec<(i32, u32)> = Vec::with_capacity(case_keys.len());
        let mut seen = std::collections::HashSet::new();
        for (n, &k) in case_keys.iter().enumerate() {
            if seen.insert(k) {
                first.push((k, n as u32 + 1));
            }
        }
        let pairs = first;
        match mode {
            SwitchMode::Linear => return SwitchBackend::Linear(pairs),
            SwitchMode::Dense => return Self::dense(&pairs),
            SwitchMode::Hashed => return SwitchBackend::Hashed(pairs.into_iter().collect()),
            SwitchMode::Sorted => return Self::sorted(pairs),
            SwitchMode::Auto => {}
        }
        if pairs.is_empty() {
            return SwitchBackend::Sorted(pairs);
        }
        let min = pairs.iter().map(|&(k, _)| k).min().expect("nonempty");
        let max = pairs.iter().map(|&(k, _)| k).max().expect("nonempty");
        let range = (max as i64 - min as i64 + 1) as u64;
        let density = pairs.len() as f64 / range as f64;
        if range <= DENSE_MAX_RANGE && density >= DENSE_MIN_DENSITY {
            Self::dense(&pairs)
        } else if pairs.len() >= HASH_MIN_COUNT && density < HASH_MAX_DENSITY {
            SwitchBackend::Hashed(pairs.into_iter().collect())
        } else {
            Self::sorted(pairs)
        }
    }

    fn dense(pairs: &[(i32, u32)]) -> SwitchBackend {
        if pairs.is_empty() {
            return SwitchBackend::Dense { min: 0, table: Vec::new() };
        }
        let min = pairs.iter().map(|&(k, _)| k).min().expect("nonempty");
        let max = pairs.iter().map(|&(k, _)| k).max().expect("nonempty");
        let range = (max as i64 - min as i64 + 1) as usize;
        let mut table = vec![0u32; range];
        for &(k, slot) in pairs {
            let at = (k as i64 - min as i64) as usize;
            if table[at] == 0 {
                table[at] = slot;
            }
        }
        SwitchBackend::Dense { min, table }
    }

    fn sorted(mut pairs: Vec<(i32, u32)>) -> SwitchBackend {
        pairs.sort_by_key(|&(k, _)| k);
        SwitchBackend::Sorted(pairs)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SwitchBackend::Dense { .. } => "dense",
            SwitchBackend::Hashed(_) => "hashed",
            SwitchBackend::Sorted(_) => "sorted",
            SwitchBackend::Linear(_) => "linear",
        }
    }

    /// Resolve a scrutinee to a target slot (0 = default edge).
    pub fn lookup(&self, k: i32) -> u32 {
        match self {
            SwitchBackend::Dense { min, table } => {
                let off = k as i64 - *min as i64;
                if off < 0 || off >= table.len() as i64 {
                    0
                } else {
                    table[off as usize]
                }
            }
            SwitchBackend::Hashed(map) => map.get(&k).copied().unwrap_or(0),
            SwitchBackend::Sorted(pairs) => match pairs.binary_search_by_key(&k, |&(key, _)| key) {
                Ok(i) => pairs[i].1,
                Err(_) => 0,
            },
            SwitchBackend::Linear(pairs) => pairs
                .iter()
                .find(|&&(key, _)| key == k)
                .map(|&(_, slot)| slot)
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: i32, step: i32) -> Vec<i32> {
        (0..n).map(|i| i * step).collect()
    }

    #[test]
    fn test_dense_selection_and_lookup() {
        let ks = keys(100, 1);
        let b = SwitchBackend::build(&ks, SwitchMode::Auto);
        assert!(matches!(b, SwitchBackend::Dense { .. }));
        assert_eq!(b.lookup(50), 51);
        assert_eq!(b.lookup(-1), 0);
        assert_eq!(b.lookup(100), 0);
    }

    #[test]
    fn test_sparse_large_goes_hashed() {
        let ks = keys(100, 1000);
        let b = SwitchBackend::build(&ks, SwitchMode::Auto);
        assert!(matches!(b, SwitchBackend::Hashed(_)));
        assert_eq!(b.lookup(7000), 8);
        assert_eq!(b.lookup(7001), 0);
    }

    #[test]
    fn test_small_sparse_goes_sorted() {
        let ks = vec![5, 100, -7, 4096];
        let b = SwitchBackend::build(&ks, SwitchMode::Auto);
        assert!(matches!(b, SwitchBackend::Sorted(_)));
        assert_eq!(b.lookup(-7), 3);
        assert_eq!(b.lookup(4096), 4);
        assert_eq!(b.lookup(0), 0);
    }

    #[test]
    fn test_duplicate_keys_first_wins() {
        for mode in [
            SwitchMode::Auto,
            SwitchMode::Dense,
            SwitchMode::Sorted,
            SwitchMode::Hashed,
            SwitchMode::Linear,
        ] {
            let b = SwitchBackend::build(&[3, 3, 4], mode);
            assert_eq!(b.lookup(3), 1, "mode {:?}", mode);
        }
    }

    #[test]
    fn test_backends_agree_with_linear() {
        let ks = vec![0, 2, 4, 9, -3, 77, 1024];
        let linear = SwitchBackend::build(&ks, SwitchMode::Linear);
        for mode in [SwitchMode::Dense, SwitchMode::Sorted, SwitchMode::Hashed] {
            let b = SwitchBackend::build(&ks, mode);
            for probe in -10..1100 {
                assert_eq!(b.lookup(probe), linear.lookup(probe), "mode {:?}", mode);
            }
        }
    }

    #[test]
    fn test_empty_case_list() {
        let b = SwitchBackend::build(&[], SwitchMode::Auto);
        assert_eq!(b.lookup(0), 0);
    }
}
