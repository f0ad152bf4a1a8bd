//! Bounded approximate top-N counter
//!
//! Domain and client names are unbounded, so each bucket only tracks a fixed
//! number of them. Once the table is full a new name competes with the
//! least-counted entry: a name that arrives with fewer hits than the current
//! minimum is dropped. On a tie the new name replaces the oldest minimum entry,
//! so names seen once keep rotating and a name that recurs gets a chance to
//! climb. Counts are therefore lower bounds and ranking is approximate.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Clone, Debug)]
struct Slot {
    count: u64,
    /// insertion order, used to break ties between minimum entries
    seq: u64,
}

#[derive(Clone, Debug)]
pub struct TopN<K: Eq + Hash> {
    capacity: usize,
    next_seq: u64,
    slots: HashMap<K, Slot>,
}

impl<K> TopN<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> TopN<K> {
        TopN {
            capacity,
            next_seq: 0,
            slots: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<u64> {
        self.slots.get(key).map(|x| x.count)
    }

    /// Count one more occurrence of `key`
    pub fn add(&mut self, key: &K) {
        self.add_count(key, 1);
    }

    /// Add `count` occurrences of `key`, subject to the eviction policy
    pub fn add_count(&mut self, key: &K, count: u64) {
        if count == 0 || self.capacity == 0 {
            return;
        }

        if let Some(slot) = self.slots.get_mut(key) {
            slot.count += count;
            return;
        }

        if self.slots.len() >= self.capacity {
            let victim = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| (slot.count, slot.seq))
                .map(|(k, slot)| (k.clone(), slot.count));

            match victim {
                Some((_, min_count)) if count < min_count => return,
                Some((victim, _)) => {
                    self.slots.remove(&victim);
                }
                None => return,
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(key.clone(), Slot { count, seq });
    }

    /// Entries sorted by count, highest first
    pub fn sorted(&self) -> Vec<(K, u64)> {
        let mut entries: Vec<(&K, &Slot)> = self.slots.iter().collect();
        entries.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.1.seq.cmp(&b.1.seq)));
        entries
            .into_iter()
            .map(|(k, slot)| (k.clone(), slot.count))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> + '_ {
        self.slots.iter().map(|(k, slot)| (k, slot.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_below_capacity() {
        let mut top = TopN::new(10);
        top.add(&"a".to_string());
        top.add(&"a".to_string());
        top.add(&"b".to_string());

        assert_eq!(top.len(), 2);
        assert_eq!(top.get(&"a".to_string()), Some(2));
        assert_eq!(top.get(&"b".to_string()), Some(1));
        assert_eq!(top.sorted()[0], ("a".to_string(), 2));
    }

    #[test]
    fn test_new_name_dropped_below_minimum() {
        let mut top = TopN::new(2);
        top.add_count(&"a", 5);
        top.add_count(&"b", 3);
        top.add(&"c");

        assert_eq!(top.len(), 2);
        assert_eq!(top.get(&"c"), None);
        assert_eq!(top.get(&"b"), Some(3));
    }

    #[test]
    fn test_tie_replaces_oldest_minimum() {
        let mut top = TopN::new(2);
        top.add(&"a");
        top.add(&"b");
        top.add(&"c");

        assert_eq!(top.len(), 2);
        assert_eq!(top.get(&"a"), None);
        assert_eq!(top.get(&"b"), Some(1));
        assert_eq!(top.get(&"c"), Some(1));
    }

    #[test]
    fn test_recurring_name_survives() {
        let popular = "popular".to_string();
        let mut top = TopN::new(2);
        top.add(&popular);
        top.add(&popular);
        for i in 0..50 {
            top.add(&format!("noise{}", i));
        }

        assert_eq!(top.get(&popular), Some(2));
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn test_zero_capacity_tracks_nothing() {
        let mut top = TopN::new(0);
        top.add(&1u32);
        assert!(top.is_empty());
    }

    #[test]
    fn test_sorted_breaks_ties_by_insertion() {
        let mut top = TopN::new(5);
        top.add(&"x");
        top.add(&"y");
        top.add_count(&"z", 4);

        let sorted = top.sorted();
        assert_eq!(sorted, vec![("z", 4), ("x", 1), ("y", 1)]);
    }
}
