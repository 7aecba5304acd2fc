//! In-memory record cache
//!
//! Two maps kept in lockstep:
//! - every known record by id
//! - the ids of unspent records, partitioned by tag (the owning wallet)
//!
//! The partition stores ids only, so it can never hold a stale copy of a
//! record. Every mutation goes through `insert`, `remove` or
//! `rollback_to_height`, which maintain both maps together.
//! Locking is the owner's job; the cache itself is plain data.

use crate::rollback::RollbackSummary;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

/// A record with an id, an owning tag and height stamps
pub trait CachedRecord: Clone {
    type Id: Copy + Eq + Hash + Ord + Debug;
    type Tag: Copy + Eq + Hash + Debug;

    fn id(&self) -> Self::Id;
    fn tag(&self) -> Self::Tag;
    fn confirmed_height(&self) -> u32;
    /// 0 when unspent
    fn spent_height(&self) -> u32;

    fn is_spent(&self) -> bool {
        self.spent_height() > 0
    }

    /// Copy of the record with its spend cleared
    fn unspent(&self) -> Self;
}

#[derive(Debug, Clone)]
pub struct RecordCache<R: CachedRecord> {
    records: HashMap<R::Id, R>,
    unspent_by_tag: HashMap<R::Tag, BTreeSet<R::Id>>,
}

impl<R: CachedRecord> Default for RecordCache<R> {
    fn default() -> Self {
        Self { records: HashMap::new(), unspent_by_tag: HashMap::new() }
    }
}

impl<R: CachedRecord> RecordCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from a full table scan
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let mut cache = Self::new();
        for record in records {
            cache.insert(record);
        }
        cache
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.records.get(id)
    }

    pub fn contains_all<'a>(&self, ids: impl IntoIterator<Item = &'a R::Id>) -> bool
    where
        R::Id: 'a,
    {
        ids.into_iter().all(|id| self.records.contains_key(id))
    }

    pub fn records(&self) -> impl Iterator<Item = &R> {
        self.records.values()
    }

    /// Insert or overwrite. Returns the record previously stored under the id.
    pub fn insert(&mut self, record: R) -> Option<R> {
        let id = record.id();
        let previous = self.records.remove(&id);
        if let Some(old) = &previous {
            self.unindex(old);
        }
        if !record.is_spent() {
            self.unspent_by_tag.entry(record.tag()).or_default().insert(id);
        }
        self.records.insert(id, record);
        previous
    }

    pub fn remove(&mut self, id: &R::Id) -> Option<R> {
        let record = self.records.remove(id)?;
        self.unindex(&record);
        Some(record)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.unspent_by_tag.clear();
    }

    /// Unspent records for a tag, ordered by id
    pub fn unspent_for_tag(&self, tag: R::Tag) -> Vec<R> {
        self.unspent_by_tag
            .get(&tag)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn unspent_count(&self) -> usize {
        self.unspent_by_tag.values().map(BTreeSet::len).sum()
    }

    /// Forget everything above `height`: drop records confirmed above it and
    /// clear spends recorded above it.
    pub fn rollback_to_height(&mut self, height: u32) -> RollbackSummary {
        let mut summary = RollbackSummary::default();
        let affected: Vec<R::Id> = self
            .records
            .values()
            .filter(|r| r.confirmed_height() > height || r.spent_height() > height)
            .map(|r| r.id())
            .collect();

        for id in affected {
            let Some(record) = self.remove(&id) else { continue };
            if record.confirmed_height() > height {
                summary.removed += 1;
            } else {
                self.insert(record.unspent());
                summary.unspent += 1;
            }
        }
        summary
    }

    /// Ids whose cached record differs from `other`, in either direction
    pub fn divergent_ids(&self, other: &Self) -> Vec<R::Id>
    where
        R: PartialEq,
    {
        let mut ids: BTreeSet<R::Id> = BTreeSet::new();
        for (id, record) in &self.records {
            if other.records.get(id) != Some(record) {
                ids.insert(*id);
            }
        }
        for id in other.records.keys() {
            if !self.records.contains_key(id) {
                ids.insert(*id);
            }
        }
        ids.into_iter().collect()
    }

    /// Check that the partition is exactly the unspent projection of the
    /// record map.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (tag, ids) in &self.unspent_by_tag {
            if ids.is_empty() {
                return Err(format!("empty partition left for tag {:?}", tag));
            }
            for id in ids {
                match self.records.get(id) {
                    None => return Err(format!("partition {:?} holds unknown id {:?}", tag, id)),
                    Some(r) if r.is_spent() => {
                        return Err(format!("partition {:?} holds spent id {:?}", tag, id));
                    }
                    Some(r) if r.tag() != *tag => {
                        return Err(format!("id {:?} filed under {:?}, owned by {:?}", id, tag, r.tag()));
                    }
                    Some(_) => {}
                }
            }
        }
        for (id, record) in &self.records {
            let indexed = self
                .unspent_by_tag
                .get(&record.tag())
                .is_some_and(|ids| ids.contains(id));
            if indexed == record.is_spent() {
                return Err(format!("id {:?} spent={} indexed={}", id, record.is_spent(), indexed));
            }
        }
        Ok(())
    }

    fn unindex(&mut self, record: &R) {
        let tag = record.tag();
        if let Some(ids) = self.unspent_by_tag.get_mut(&tag) {
            ids.remove(&record.id());
            if ids.is_empty() {
                self.unspent_by_tag.remove(&tag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Entry {
        id: u8,
        tag: u8,
        confirmed: u32,
        spent: u32,
    }

    impl CachedRecord for Entry {
        type Id = u8;
        type Tag = u8;

        fn id(&self) -> u8 {
            self.id
        }
        fn tag(&self) -> u8 {
            self.tag
        }
        fn confirmed_height(&self) -> u32 {
            self.confirmed
        }
        fn spent_height(&self) -> u32 {
            self.spent
        }
        fn unspent(&self) -> Self {
            Self { spent: 0, ..self.clone() }
        }
    }

    fn entry(id: u8, tag: u8, confirmed: u32, spent: u32) -> Entry {
        Entry { id, tag, confirmed, spent }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(Entry),
        Remove(u8),
        Rollback(u32),
    }

    fn entry_strategy() -> impl Strategy<Value = Entry> {
        (0u8..16, 0u8..3, 1u32..40, prop::option::of(0u32..20)).prop_map(|(id, tag, confirmed, gap)| {
            entry(id, tag, confirmed, gap.map_or(0, |g| confirmed + g))
        })
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => entry_strategy().prop_map(Op::Insert),
            1 => (0u8..16).prop_map(Op::Remove),
            1 => (0u32..45).prop_map(Op::Rollback),
        ]
    }

    #[test]
    fn test_insert_moves_between_partitions() {
        let mut cache = RecordCache::new();
        cache.insert(entry(1, 1, 10, 0));
        assert_eq!(cache.unspent_for_tag(1).len(), 1);

        // Re-tag
        cache.insert(entry(1, 2, 10, 0));
        assert!(cache.unspent_for_tag(1).is_empty());
        assert_eq!(cache.unspent_for_tag(2), vec![entry(1, 2, 10, 0)]);

        // Spend
        cache.insert(entry(1, 2, 10, 12));
        assert!(cache.unspent_for_tag(2).is_empty());
        assert_eq!(cache.len(), 1);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut cache: RecordCache<Entry> = RecordCache::new();
        assert!(cache.remove(&9).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_rollback_reorg_scenario() {
        // A confirmed at 10, spent at 20; B confirmed at 12, unspent
        let mut cache = RecordCache::from_records([entry(0xA, 1, 10, 20), entry(0xB, 1, 12, 0)]);
        let summary = cache.rollback_to_height(15);
        assert_eq!(summary, RollbackSummary { removed: 0, unspent: 1 });
        let ids: Vec<u8> = cache.unspent_for_tag(1).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![0xA, 0xB]);

        let summary = cache.rollback_to_height(11);
        assert_eq!(summary, RollbackSummary { removed: 1, unspent: 0 });
        assert!(cache.get(&0xB).is_none());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_rollback_keeps_records_at_exact_height() {
        let mut cache = RecordCache::from_records([entry(1, 0, 15, 15)]);
        assert!(cache.rollback_to_height(15).is_empty());
        assert!(cache.get(&1).unwrap().is_spent());
    }

    #[test]
    fn test_divergent_ids() {
        let a = RecordCache::from_records([entry(1, 0, 5, 0), entry(2, 0, 5, 0)]);
        let b = RecordCache::from_records([entry(1, 0, 5, 7), entry(3, 0, 5, 0)]);
        assert_eq!(a.divergent_ids(&b), vec![1, 2, 3]);
        assert!(a.divergent_ids(&a.clone()).is_empty());
    }

    proptest! {
        #[test]
        fn prop_partition_matches_model(ops in prop::collection::vec(op_strategy(), 0..60)) {
            let mut cache = RecordCache::new();
            let mut model: HashMap<u8, Entry> = HashMap::new();

            for op in ops {
                match op {
                    Op::Insert(e) => {
                        model.insert(e.id, e.clone());
                        cache.insert(e);
                    }
                    Op::Remove(id) => {
                        model.remove(&id);
                        cache.remove(&id);
                    }
                    Op::Rollback(h) => {
                        model.retain(|_, e| e.confirmed <= h);
                        for e in model.values_mut() {
                            if e.spent > h {
                                e.spent = 0;
                            }
                        }
                        cache.rollback_to_height(h);
                    }
                }
                prop_assert_eq!(cache.check_invariants(), Ok(()));
            }

            prop_assert_eq!(cache.len(), model.len());
            for tag in 0u8..3 {
                let mut expected: Vec<Entry> = model
                    .values()
                    .filter(|e| e.tag == tag && e.spent == 0)
                    .cloned()
                    .collect();
                expected.sort_by_key(|e| e.id);
                prop_assert_eq!(cache.unspent_for_tag(tag), expected);
            }

            let rebuilt = RecordCache::from_records(model.into_values());
            prop_assert!(cache.divergent_ids(&rebuilt).is_empty());
        }

        #[test]
        fn prop_rollback_idempotent(
            entries in prop::collection::vec(entry_strategy(), 0..30),
            height in 0u32..45,
        ) {
            let mut cache = RecordCache::from_records(entries);
            cache.rollback_to_height(height);
            let once = cache.clone();
            prop_assert!(cache.rollback_to_height(height).is_empty());
            prop_assert!(cache.divergent_ids(&once).is_empty());
            for record in cache.records() {
                prop_assert!(record.confirmed <= height);
                prop_assert!(record.spent <= height);
            }
        }
    }
}
