//! Minimal perfect hashing.
//!
//! [`MinimalPerfectHash`] maps a fixed set of n unique keys bijectively onto
//! `[0, n)` with one i32 salt per hash bucket (CHD-style bucket salting).
//! Build order is fully deterministic: the same key set always produces the
//! same salts, so persisted traces and freshly built tables agree on slot
//! assignment bit-for-bit.
//!
//! Lookups of keys outside the build set return *some* in-range slot; they
//! are not validated here. [`MphMap`](map::MphMap) layers stored keys on top
//! when that check is needed.
//!
//! The decode hot path uses this for O(1) page-address-to-bytes lookups
//! while replaying hundreds of millions of instructions.

pub mod map;

pub use map::MphMap;

use crate::domain::MphError;
use log::debug;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use xxhash_rust::xxh64::xxh64;

/// Wall-clock budget for the whole salt search. Exceeding it means the key
/// distribution is pathological and construction fails hard.
const SALT_SEARCH_BUDGET: Duration = Duration::from_secs(10);

/// Check the deadline only every this many candidate salts.
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

/// Key types the hash can be built over.
pub trait MphKey: Copy + Eq + std::hash::Hash {
    /// Salted hash of the key. Salt 0 is the bucketing hash.
    fn hash_with_seed(self, seed: u64) -> u64;
}

impl MphKey for u64 {
    #[inline]
    fn hash_with_seed(self, seed: u64) -> u64 {
        xxh64(&self.to_le_bytes(), seed)
    }
}

impl MphKey for u32 {
    #[inline]
    fn hash_with_seed(self, seed: u64) -> u64 {
        xxh64(&self.to_le_bytes(), seed)
    }
}

/// A minimal perfect hash function over a fixed key set.
#[derive(Debug, Clone)]
pub struct MinimalPerfectHash<K: MphKey> {
    salts: Vec<i32>,
    nkeys: usize,
    _marker: std::marker::PhantomData<K>,
}

impl<K: MphKey> MinimalPerfectHash<K> {
    /// Build the hash over `keys`.
    ///
    /// # Errors
    /// Fails on an empty or non-unique key set, or when no conflict-free
    /// salt is found for some bucket within the wall-clock budget.
    pub fn build(keys: &[K]) -> Result<Self, MphError> {
        if keys.is_empty() {
            return Err(MphError::NoKeys);
        }
        let nkeys = keys.len();
        let unique: HashSet<K> = keys.iter().copied().collect();
        if unique.len() != nkeys {
            return Err(MphError::NonUniqueKeys { num_keys: nkeys, num_unique: unique.len() });
        }

        // Group keys into n buckets by their unsalted hash.
        let mut buckets: Vec<Vec<K>> = vec![Vec::new(); nkeys];
        for &key in keys {
            let bucket_id = (key.hash_with_seed(0) % nkeys as u64) as usize;
            buckets[bucket_id].push(key);
        }

        // Resolve larger buckets first; ties resolve in a fixed order so the
        // construction is deterministic run-to-run.
        let mut order: Vec<usize> = (0..nkeys).collect();
        order.sort_unstable_by_key(|&id| (buckets[id].len(), id));
        order.reverse();

        let mut salts = vec![0i32; nkeys];
        let mut slot_used = vec![false; nkeys];
        let mut next_free_slot = 0usize;
        let deadline = Instant::now() + SALT_SEARCH_BUDGET;

        for &bucket_id in &order {
            let bucket = &buckets[bucket_id];
            match bucket.len() {
                0 => break, // sorted descending: only empty buckets remain
                1 => {
                    while slot_used[next_free_slot] {
                        next_free_slot += 1;
                    }
                    slot_used[next_free_slot] = true;
                    // Negative salt encodes the slot directly, no rehash.
                    salts[bucket_id] = -i32::try_from(next_free_slot).expect("slot fits i32") - 1;
                }
                bucket_len => {
                    let salt = Self::find_salt(bucket, &mut slot_used, nkeys, deadline)
                        .ok_or(MphError::SaltSearchTimeout {
                            bucket_len,
                            budget_secs: SALT_SEARCH_BUDGET.as_secs(),
                        })?;
                    salts[bucket_id] = i32::try_from(salt).expect("salt fits i32");
                }
            }
        }

        debug!("built mph over {nkeys} keys");
        Ok(Self { salts, nkeys, _marker: std::marker::PhantomData })
    }

    /// Search increasing salts until every key in the bucket lands on a
    /// distinct, currently unused slot. Marks the slots used on success.
    fn find_salt(
        bucket: &[K],
        slot_used: &mut [bool],
        nkeys: usize,
        deadline: Instant,
    ) -> Option<u64> {
        let mut slots: Vec<usize> = Vec::with_capacity(bucket.len());
        let mut salt = 1u64;
        loop {
            slots.clear();
            let mut ok = true;
            for &key in bucket {
                let slot = (key.hash_with_seed(salt) % nkeys as u64) as usize;
                if slot_used[slot] || slots.contains(&slot) {
                    ok = false;
                    break;
                }
                slots.push(slot);
            }
            if ok {
                for &slot in &slots {
                    slot_used[slot] = true;
                }
                return Some(salt);
            }
            if salt % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() > deadline {
                return None;
            }
            salt += 1;
            if salt > i32::MAX as u64 {
                return None;
            }
        }
    }

    /// Slot of `key` in `[0, n)`.
    ///
    /// Only meaningful for keys from the build set; anything else collides
    /// with some assigned slot.
    #[inline]
    #[must_use]
    pub fn lookup(&self, key: K) -> u32 {
        let bucket_id = (key.hash_with_seed(0) % self.nkeys as u64) as usize;
        let salt = self.salts[bucket_id];
        if salt < 0 {
            (-(i64::from(salt)) - 1) as u32
        } else {
            (key.hash_with_seed(salt as u64) % self.nkeys as u64) as u32
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nkeys
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nkeys == 0
    }

    /// Per-bucket salts, for inspection and persistence.
    #[must_use]
    pub fn salts(&self) -> &[i32] {
        &self.salts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn assert_is_permutation(mph: &MinimalPerfectHash<u64>, keys: &[u64]) {
        let mut idxes: Vec<u32> = keys.iter().map(|&k| mph.lookup(k)).collect();
        idxes.sort_unstable();
        idxes.dedup();
        assert_eq!(idxes.len(), keys.len());
        assert_eq!(idxes[0], 0);
        assert_eq!(idxes[idxes.len() - 1] as usize, keys.len() - 1);
    }

    #[test]
    fn single_key() {
        let keys = [0x1234_5678u64];
        let mph = MinimalPerfectHash::build(&keys).unwrap();
        assert_eq!(mph.lookup(keys[0]), 0);
    }

    #[test]
    fn two_keys_forced_into_one_bucket() {
        // Find a second key that lands in the same bucket as the first so
        // the salted search path runs even at n = 2.
        let a = 1u64;
        let target = a.hash_with_seed(0) % 2;
        let b = (2u64..).find(|k| k.hash_with_seed(0) % 2 == target).unwrap();
        let keys = [a, b];
        let mph = MinimalPerfectHash::build(&keys).unwrap();
        assert_is_permutation(&mph, &keys);
    }

    #[test]
    fn hundred_thousand_random_keys() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut keys: Vec<u64> = (0..100_000).map(|_| rng.gen()).collect();
        keys.sort_unstable();
        keys.dedup();
        let mph = MinimalPerfectHash::build(&keys).unwrap();
        assert_is_permutation(&mph, &keys);
    }

    #[test]
    fn build_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut keys: Vec<u64> = (0..10_000).map(|_| rng.gen()).collect();
        keys.sort_unstable();
        keys.dedup();
        let a = MinimalPerfectHash::build(&keys).unwrap();
        let b = MinimalPerfectHash::build(&keys).unwrap();
        assert_eq!(a.salts(), b.salts());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let keys = [1u64, 2, 3, 2];
        assert_eq!(
            MinimalPerfectHash::build(&keys).unwrap_err(),
            MphError::NonUniqueKeys { num_keys: 4, num_unique: 3 }
        );
    }

    #[test]
    fn empty_key_set_is_rejected() {
        assert_eq!(MinimalPerfectHash::<u64>::build(&[]).unwrap_err(), MphError::NoKeys);
    }
}
