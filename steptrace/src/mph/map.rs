//! Growable map keyed by a minimal perfect hash.
//!
//! Keys and values live in two dense `Vec`s indexed by the current hash's
//! slot assignment. Each insert of a *new* key rebuilds the hash over the
//! grown key set, then permutes both vectors in place by following the
//! displacement cycles of old-slot-to-new-slot, so no second allocation of
//! the value storage is needed. Lookups stay a hash plus one key compare.
//!
//! Rebuild-per-insert makes insertion O(n); this map is for sets that are
//! built once (or grown rarely) and then hit hard on the read side.

use super::{MinimalPerfectHash, MphKey};
use crate::domain::MphError;

#[derive(Debug, Clone)]
pub struct MphMap<K: MphKey, V> {
    mph: Option<MinimalPerfectHash<K>>,
    keys: Vec<K>,
    vals: Vec<V>,
}

impl<K: MphKey, V> MphMap<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self { mph: None, keys: Vec::new(), vals: Vec::new() }
    }

    /// Build directly from a pairs list, with a single hash construction.
    ///
    /// # Errors
    /// Fails on duplicate keys or a salt-search timeout.
    pub fn from_pairs(pairs: Vec<(K, V)>) -> Result<Self, MphError> {
        if pairs.is_empty() {
            return Ok(Self::new());
        }
        let (mut keys, mut vals): (Vec<K>, Vec<V>) = pairs.into_iter().unzip();
        let mph = MinimalPerfectHash::build(&keys)?;
        relayout(&mph, &mut keys, &mut vals);
        Ok(Self { mph: Some(mph), keys, vals })
    }

    /// Insert or replace. Inserting a new key rebuilds the hash.
    ///
    /// # Errors
    /// Propagates hash construction failure; the map is unchanged on error.
    pub fn insert(&mut self, key: K, val: V) -> Result<(), MphError> {
        if let Some(slot) = self.slot_of(key) {
            self.vals[slot] = val;
            return Ok(());
        }
        self.keys.push(key);
        let mph = match MinimalPerfectHash::build(&self.keys) {
            Ok(mph) => mph,
            Err(e) => {
                self.keys.pop();
                return Err(e);
            }
        };
        self.vals.push(val);
        relayout(&mph, &mut self.keys, &mut self.vals);
        self.mph = Some(mph);
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn get(&self, key: K) -> Option<&V> {
        self.slot_of(key).map(|slot| &self.vals[slot])
    }

    #[inline]
    #[must_use]
    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slot_of(key).map(|slot| &mut self.vals[slot])
    }

    #[must_use]
    pub fn contains_key(&self, key: K) -> bool {
        self.slot_of(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.keys.iter().copied().zip(self.vals.iter())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.vals.iter()
    }

    /// Slot of `key` if it is actually present. The hash maps unknown keys
    /// onto some occupied slot, so the stored key must be compared.
    #[inline]
    fn slot_of(&self, key: K) -> Option<usize> {
        let mph = self.mph.as_ref()?;
        let slot = mph.lookup(key) as usize;
        (self.keys[slot] == key).then_some(slot)
    }
}

impl<K: MphKey, V> Default for MphMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Permute `keys`/`vals` in place so `keys[mph.lookup(k)] == k`.
///
/// Walks each displacement cycle with swaps; every element moves at most
/// once into its final slot, so the pass is O(n) swaps total.
fn relayout<K: MphKey, V>(mph: &MinimalPerfectHash<K>, keys: &mut [K], vals: &mut [V]) {
    for i in 0..keys.len() {
        loop {
            let want = mph.lookup(keys[i]) as usize;
            if want == i {
                break;
            }
            keys.swap(i, want);
            vals.swap(i, want);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn insert_then_get() {
        let mut map: MphMap<u64, String> = MphMap::new();
        assert!(map.get(1).is_none());
        map.insert(1, "one".into()).unwrap();
        map.insert(2, "two".into()).unwrap();
        map.insert(3, "three".into()).unwrap();
        assert_eq!(map.get(2).unwrap(), "two");
        assert_eq!(map.len(), 3);
        assert!(map.get(4).is_none());
    }

    #[test]
    fn insert_replaces_existing_value() {
        let mut map: MphMap<u32, u64> = MphMap::new();
        map.insert(5, 50).unwrap();
        map.insert(5, 500).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(*map.get(5).unwrap(), 500);
    }

    #[test]
    fn relayout_preserves_all_pairs_across_growth() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut map: MphMap<u64, u64> = MphMap::new();
        let mut reference = std::collections::HashMap::new();
        for _ in 0..500 {
            let k: u64 = rng.gen();
            map.insert(k, !k).unwrap();
            reference.insert(k, !k);
        }
        assert_eq!(map.len(), reference.len());
        for (&k, &v) in &reference {
            assert_eq!(map.get(k), Some(&v));
        }
    }

    #[test]
    fn from_pairs_matches_incremental_inserts() {
        let pairs: Vec<(u64, u32)> = (0..64).map(|i| (i * 0x9e37, i as u32)).collect();
        let bulk = MphMap::from_pairs(pairs.clone()).unwrap();
        let mut incr = MphMap::new();
        for (k, v) in pairs {
            incr.insert(k, v).unwrap();
        }
        for (k, v) in bulk.iter() {
            assert_eq!(incr.get(k), Some(v));
        }
    }

    #[test]
    fn iter_yields_matching_pairs() {
        let map = MphMap::from_pairs(vec![(10u64, 'a'), (20, 'b'), (30, 'c')]).unwrap();
        for (k, &v) in map.iter() {
            assert_eq!(map.get(k), Some(&v));
        }
        assert_eq!(map.iter().count(), 3);
    }
}
