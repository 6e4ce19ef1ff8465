//! Random Key Set
//!
//! Tracks resident keys for random eviction.

use std::collections::HashMap;

use rand::Rng;

// == Random Key Set ==
/// Key set supporting O(1) insert, remove and uniform random choice.
///
/// Keys live in a dense Vec; `positions` maps each key to its slot so removal
/// can swap the last key into the hole.
#[derive(Debug, Default)]
pub struct RandomKeySet {
    keys: Vec<String>,
    positions: HashMap<String, usize>,
}

impl RandomKeySet {
    // == Constructor ==
    /// Creates a new empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    // == Insert ==
    /// Adds a key. Returns false if it was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.positions.contains_key(key) {
            return false;
        }
        self.positions.insert(key.to_string(), self.keys.len());
        self.keys.push(key.to_string());
        true
    }

    // == Remove ==
    /// Removes a key. Returns false if it was not present.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(index) = self.positions.remove(key) else {
            return false;
        };
        self.keys.swap_remove(index);
        if let Some(moved) = self.keys.get(index) {
            self.positions.insert(moved.clone(), index);
        }
        true
    }

    // == Take Random ==
    /// Removes and returns a uniformly chosen key, or None when empty.
    pub fn take_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.keys.len());
        let key = self.keys[index].clone();
        self.remove(&key);
        Some(key)
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    // == Contains ==
    /// Checks if a key is being tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }
}
