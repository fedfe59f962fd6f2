// SPDX-FileCopyrightText: Copyright © 2024-2026 Resin Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! A bitmap indexed by solvable id, bound to a specific sack's pool size.

use fixedbitset::FixedBitSet;

use super::SolvableId;

#[derive(Debug, Clone)]
pub struct PackageSet {
    bits: FixedBitSet,
}

impl PackageSet {
    pub fn empty(capacity: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(capacity),
        }
    }

    pub fn full(capacity: usize) -> Self {
        let mut bits = FixedBitSet::with_capacity(capacity);
        bits.set_range(.., true);
        Self { bits }
    }

    pub fn add(&mut self, id: SolvableId) {
        self.grow_to_fit(id);
        self.bits.insert(id.0 as usize);
    }

    pub fn remove(&mut self, id: SolvableId) {
        if (id.0 as usize) < self.bits.len() {
            self.bits.set(id.0 as usize, false);
        }
    }

    pub fn test(&self, id: SolvableId) -> bool {
        self.bits.contains(id.0 as usize)
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = SolvableId> + '_ {
        self.bits.ones().map(|i| SolvableId(i as u32))
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut bits = self.bits.clone();
        bits.grow(other.bits.len().max(bits.len()));
        let mut other_grown = other.bits.clone();
        other_grown.grow(bits.len());
        bits.union_with(&other_grown);
        Self { bits }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut bits = self.bits.clone();
        let mut other_grown = other.bits.clone();
        let max_len = bits.len().max(other_grown.len());
        bits.grow(max_len);
        other_grown.grow(max_len);
        bits.intersect_with(&other_grown);
        Self { bits }
    }

    pub fn subtract(&self, other: &Self) -> Self {
        let mut bits = self.bits.clone();
        let mut other_grown = other.bits.clone();
        let max_len = bits.len().max(other_grown.len());
        bits.grow(max_len);
        other_grown.grow(max_len);
        bits.difference_with(&other_grown);
        Self { bits }
    }

    fn grow_to_fit(&mut self, id: SolvableId) {
        if id.0 as usize >= self.bits.len() {
            self.bits.grow(id.0 as usize + 1);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_test_count_remove() {
        let mut set = PackageSet::empty(4);
        set.add(SolvableId(1));
        set.add(SolvableId(3));
        assert!(set.test(SolvableId(1)));
        assert!(!set.test(SolvableId(2)));
        assert_eq!(set.count(), 2);
        set.remove(SolvableId(1));
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn iterate_ascending() {
        let mut set = PackageSet::empty(8);
        set.add(SolvableId(5));
        set.add(SolvableId(1));
        set.add(SolvableId(3));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![SolvableId(1), SolvableId(3), SolvableId(5)]);
    }

    #[test]
    fn set_algebra() {
        let mut a = PackageSet::empty(4);
        a.add(SolvableId(0));
        a.add(SolvableId(1));
        let mut b = PackageSet::empty(4);
        b.add(SolvableId(1));
        b.add(SolvableId(2));

        assert_eq!(a.union(&b).count(), 3);
        assert_eq!(a.intersect(&b).count(), 1);
        assert_eq!(a.subtract(&b).iter().collect::<Vec<_>>(), vec![SolvableId(0)]);
    }
}
