use std::fmt;

use bit_vec::BitVec;

/// A growable bitset whose set bits identify the base tables
/// contributing rows to a plan subtree. Operations tolerate operands of
/// different lengths.
#[derive(Clone, Default)]
pub struct TableBitset {
    bits: BitVec,
}

impl TableBitset {
    pub fn new() -> TableBitset {
        TableBitset { bits: BitVec::new() }
    }

    pub fn single(id: u32) -> TableBitset {
        let mut set = TableBitset::new();
        set.set(id);
        set
    }

    pub fn set(&mut self, id: u32) {
        let id = id as usize;
        if id >= self.bits.len() {
            self.bits.grow(id + 1 - self.bits.len(), false);
        }
        self.bits.set(id, true);
    }

    pub fn get(&self, id: u32) -> bool {
        self.bits.get(id as usize).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| !b)
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }

    pub fn ones(&self) -> Vec<u32> {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| *b)
            .map(|(i, _)| i as u32)
            .collect()
    }

    pub fn union_with(&mut self, other: &TableBitset) {
        for id in other.ones() {
            self.set(id);
        }
    }

    pub fn union(&self, other: &TableBitset) -> TableBitset {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    /// Every bit set here is also set in `other`.
    pub fn is_subset_of(&self, other: &TableBitset) -> bool {
        self.bits
            .iter()
            .enumerate()
            .all(|(i, b)| !b || other.bits.get(i).unwrap_or(false))
    }

    pub fn intersects(&self, other: &TableBitset) -> bool {
        self.bits
            .iter()
            .enumerate()
            .any(|(i, b)| b && other.bits.get(i).unwrap_or(false))
    }
}

impl PartialEq for TableBitset {
    fn eq(&self, other: &Self) -> bool {
        self.is_subset_of(other) && other.is_subset_of(self)
    }
}

impl Eq for TableBitset {}

impl fmt::Debug for TableBitset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.ones().iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subset_and_intersection() {
        let mut a = TableBitset::new();
        a.set(1);
        a.set(3);
        let mut b = TableBitset::new();
        b.set(1);
        b.set(3);
        b.set(7);
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert!(a.intersects(&b));
        assert!(!TableBitset::single(2).intersects(&a));
        // Empty set is a subset of everything.
        assert!(TableBitset::new().is_subset_of(&a));
    }

    #[test]
    fn test_union_and_eq() {
        let a = TableBitset::single(0);
        let b = TableBitset::single(9);
        let u = a.union(&b);
        assert_eq!(u.ones(), vec![0, 9]);
        assert_eq!(u.count(), 2);
        // Length-insensitive equality.
        let mut long = TableBitset::new();
        long.set(0);
        long.set(9);
        long.set(20);
        assert_ne!(u, long);
        let mut same = TableBitset::new();
        same.set(9);
        same.set(0);
        assert_eq!(u, same);
    }
}
