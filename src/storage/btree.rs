//! B+tree over the page manager.
//!
//! ```text
//! Level 0: leaves, level N: root (initially the root is a leaf).
//!
//! Meta page:  | level_num_of_root: u8 @0 | root_pgid: u32 @4 | tuple_num: u64 @8 |
//! Inner page: slots of { child: u32, strict_upper_bound: bytes },
//!             special = rightmost child: u32.
//! Leaf page:  slots of { key_len: u16, key, value },
//!             special = { prev_leaf: u32, next_leaf: u32 }.
//! ```
//!
//! Every key in the subtree of an inner slot is strictly less than the
//! slot's separator; the rightmost child holds the rest. Leaves form a
//! doubly linked list in key order. Value lengths are implied by the slot
//! size, key lengths by the slot header.

use log::debug;

use crate::storage::{
    page_manager::{PageId, PageManager, PlainPage, SortedPage},
    sorted_page::{KeyComparator, SlotCmp, SlotLayout},
};

const META_LEVEL_OFF: usize = 0;
const META_ROOT_OFF: usize = 4;
const META_TUPLE_NUM_OFF: usize = 8;

const INNER_SPECIAL_SIZE: usize = 4;
const LEAF_SPECIAL_SIZE: usize = 8;
const LEAF_PREV_OFF: usize = 0;
const LEAF_NEXT_OFF: usize = 4;

pub fn inner_slot_encode(child: PageId, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + key.len());
    out.extend_from_slice(&child.to_le_bytes());
    out.extend_from_slice(key);
    out
}

pub fn inner_slot_parse(slot: &[u8]) -> (PageId, &[u8]) {
    let child = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
    (child, &slot[4..])
}

pub fn leaf_slot_encode(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + key.len() + value.len());
    out.extend_from_slice(&(key.len() as u16).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    out
}

pub fn leaf_slot_parse(slot: &[u8]) -> (&[u8], &[u8]) {
    let key_len = u16::from_le_bytes([slot[0], slot[1]]) as usize;
    (&slot[2..2 + key_len], &slot[2 + key_len..])
}

/// An ordered key→value map. The key comparator is chosen at open time
/// (by the table's primary key type) and dispatched at every comparison.
pub struct BPlusTree {
    pgm: PageManager,
    meta_pgid: PageId,
    comp: KeyComparator,
}

impl BPlusTree {
    /// Allocate a meta page and an empty root leaf.
    pub fn create(pgm: &PageManager, comp: KeyComparator) -> BPlusTree {
        let meta = pgm.alloc_plain();
        let tree = BPlusTree {
            pgm: pgm.clone(),
            meta_pgid: meta.id(),
            comp,
        };
        let root = tree.alloc_leaf();
        meta.write(META_LEVEL_OFF, &[0u8]);
        meta.write_u32(META_ROOT_OFF, root.id());
        meta.write_u64(META_TUPLE_NUM_OFF, 0);
        tree
    }

    pub fn open(pgm: &PageManager, meta_pgid: PageId, comp: KeyComparator) -> BPlusTree {
        BPlusTree {
            pgm: pgm.clone(),
            meta_pgid,
            comp,
        }
    }

    pub fn meta_pgid(&self) -> PageId {
        self.meta_pgid
    }

    pub fn tuple_num(&self) -> u64 {
        self.meta_page().read_u64(META_TUPLE_NUM_OFF)
    }

    pub fn is_empty(&self) -> bool {
        self.tuple_num() == 0
    }

    /// Insert only if the key does not exist yet.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> bool {
        let (leaf_pgid, path) = self.descend(key);
        let leaf = self.get_leaf(leaf_pgid);
        if leaf.find(key).is_some() {
            return false;
        }
        let slot = leaf_slot_encode(key, value);
        let pos = leaf.lower_bound(key);
        if !leaf.insert_before(pos, &slot) {
            let right = self.alloc_leaf();
            if !leaf.split_insert(&right, &slot, pos) {
                panic!("tuple of {} bytes cannot fit in any page", slot.len());
            }
            self.finish_leaf_split(leaf, right, path);
        }
        self.inc_tuple_num(1);
        true
    }

    /// Update only if the key already exists.
    pub fn update(&self, key: &[u8], value: &[u8]) -> bool {
        let (leaf_pgid, path) = self.descend(key);
        let leaf = self.get_leaf(leaf_pgid);
        let idx = match leaf.find(key) {
            Some(i) => i,
            None => return false,
        };
        let slot = leaf_slot_encode(key, value);
        if !leaf.replace_slot(idx, &slot) {
            let right = self.alloc_leaf();
            if !leaf.split_replace(&right, &slot, idx) {
                panic!("tuple of {} bytes cannot fit in any page", slot.len());
            }
            self.finish_leaf_split(leaf, right, path);
        }
        true
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let (leaf_pgid, _) = self.descend(key);
        let leaf = self.get_leaf(leaf_pgid);
        let idx = leaf.find(key)?;
        let slot = leaf.slot(idx);
        Some(leaf_slot_parse(&slot).1.to_vec())
    }

    /// Atomic get + delete.
    pub fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        let value = self.get(key)?;
        let deleted = self.delete(key);
        assert!(deleted);
        Some(value)
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        let (leaf_pgid, path) = self.descend(key);
        {
            let leaf = self.get_leaf(leaf_pgid);
            match leaf.find(key) {
                Some(i) => leaf.delete_slot(i),
                None => return false,
            }
        }
        self.inc_tuple_num(-1);
        self.rebalance(leaf_pgid, 0, path);
        true
    }

    /// The maximum key, or None if the tree is empty.
    pub fn max_key(&self) -> Option<Vec<u8>> {
        let mut cur = self.root();
        let mut level = self.level_num();
        while level > 0 {
            let inner = self.get_inner(cur);
            cur = inner.read_special_u32(0);
            level -= 1;
        }
        let leaf = self.get_leaf(cur);
        let n = leaf.slot_num();
        if n == 0 {
            return None;
        }
        let slot = leaf.slot(n - 1);
        Some(leaf_slot_parse(&slot).0.to_vec())
    }

    pub fn begin(&self) -> BTreeIter {
        let mut cur = self.root();
        let mut level = self.level_num();
        while level > 0 {
            let inner = self.get_inner(cur);
            cur = if inner.is_empty() {
                inner.read_special_u32(0)
            } else {
                inner_slot_parse(&inner.slot(0)).0
            };
            level -= 1;
        }
        let mut iter = BTreeIter {
            pgm: self.pgm.clone(),
            cmp: self.leaf_cmp(),
            leaf: cur,
            idx: 0,
        };
        iter.normalize();
        iter
    }

    /// Iterator positioned at the first key >= `key`.
    pub fn lower_bound(&self, key: &[u8]) -> BTreeIter {
        let (leaf_pgid, _) = self.descend(key);
        let idx = self.get_leaf(leaf_pgid).lower_bound(key);
        let mut iter = BTreeIter {
            pgm: self.pgm.clone(),
            cmp: self.leaf_cmp(),
            leaf: leaf_pgid,
            idx,
        };
        iter.normalize();
        iter
    }

    /// Iterator positioned at the first key > `key`.
    pub fn upper_bound(&self, key: &[u8]) -> BTreeIter {
        let (leaf_pgid, _) = self.descend(key);
        let idx = self.get_leaf(leaf_pgid).upper_bound(key);
        let mut iter = BTreeIter {
            pgm: self.pgm.clone(),
            cmp: self.leaf_cmp(),
            leaf: leaf_pgid,
            idx,
        };
        iter.normalize();
        iter
    }

    /// Return every page of the tree (including the meta page) to the
    /// free list.
    pub fn destroy(self) {
        let root = self.root();
        let level = self.level_num();
        self.destroy_subtree(root, level);
        self.pgm.free(self.meta_pgid);
    }

    fn destroy_subtree(&self, pgid: PageId, level: u8) {
        if level > 0 {
            let children: Vec<PageId> = {
                let inner = self.get_inner(pgid);
                let mut v: Vec<PageId> = (0..inner.slot_num())
                    .map(|i| inner_slot_parse(&inner.slot(i)).0)
                    .collect();
                v.push(inner.read_special_u32(0));
                v
            };
            for child in children {
                self.destroy_subtree(child, level - 1);
            }
        }
        self.pgm.free(pgid);
    }

    fn meta_page(&self) -> PlainPage {
        self.pgm.get_plain(self.meta_pgid)
    }

    fn level_num(&self) -> u8 {
        self.meta_page().read(META_LEVEL_OFF, 1)[0]
    }

    fn set_level_num(&self, level: u8) {
        self.meta_page().write(META_LEVEL_OFF, &[level]);
    }

    fn root(&self) -> PageId {
        self.meta_page().read_u32(META_ROOT_OFF)
    }

    fn set_root(&self, root: PageId) {
        self.meta_page().write_u32(META_ROOT_OFF, root);
    }

    fn inc_tuple_num(&self, delta: i64) {
        let meta = self.meta_page();
        let num = meta.read_u64(META_TUPLE_NUM_OFF) as i64 + delta;
        assert!(num >= 0);
        meta.write_u64(META_TUPLE_NUM_OFF, num as u64);
    }

    fn inner_cmp(&self) -> SlotCmp {
        SlotCmp::new(SlotLayout::Inner, self.comp)
    }

    fn leaf_cmp(&self) -> SlotCmp {
        SlotCmp::new(SlotLayout::Leaf, self.comp)
    }

    fn get_inner(&self, pgid: PageId) -> SortedPage {
        self.pgm.get_sorted(pgid, self.inner_cmp())
    }

    fn get_leaf(&self, pgid: PageId) -> SortedPage {
        self.pgm.get_sorted(pgid, self.leaf_cmp())
    }

    fn alloc_inner(&self) -> SortedPage {
        let page = self.pgm.alloc_sorted(self.inner_cmp());
        page.init(INNER_SPECIAL_SIZE);
        page
    }

    fn alloc_leaf(&self) -> SortedPage {
        let page = self.pgm.alloc_sorted(self.leaf_cmp());
        page.init(LEAF_SPECIAL_SIZE);
        page.write_special_u32(LEAF_PREV_OFF, 0);
        page.write_special_u32(LEAF_NEXT_OFF, 0);
        page
    }

    fn child_at(&self, inner: &SortedPage, idx: u16) -> PageId {
        if idx == inner.slot_num() {
            inner.read_special_u32(0)
        } else {
            inner_slot_parse(&inner.slot(idx)).0
        }
    }

    // Walk from the root to the leaf responsible for `key`, recording
    // (inner page, chosen child index) pairs along the way. At each inner
    // node the leftmost slot whose separator > key is chosen, falling
    // back to the rightmost child.
    fn descend(&self, key: &[u8]) -> (PageId, Vec<(PageId, u16)>) {
        let mut path = Vec::new();
        let mut cur = self.root();
        let mut level = self.level_num();
        while level > 0 {
            let inner = self.get_inner(cur);
            let idx = inner.upper_bound(key);
            let child = self.child_at(&inner, idx);
            path.push((cur, idx));
            cur = child;
            level -= 1;
        }
        (cur, path)
    }

    // After a leaf split: wire the sibling links and push the separator
    // (the smallest key of the new right page) into the parent.
    fn finish_leaf_split(&self, leaf: SortedPage, right: SortedPage, path: Vec<(PageId, u16)>) {
        let old_next = leaf.read_special_u32(LEAF_NEXT_OFF);
        right.write_special_u32(LEAF_PREV_OFF, leaf.id());
        right.write_special_u32(LEAF_NEXT_OFF, old_next);
        leaf.write_special_u32(LEAF_NEXT_OFF, right.id());
        if old_next != 0 {
            let next = self.get_leaf(old_next);
            next.write_special_u32(LEAF_PREV_OFF, right.id());
        }
        let sep = {
            let first = right.slot(0);
            leaf_slot_parse(&first).0.to_vec()
        };
        let left_id = leaf.id();
        let right_id = right.id();
        drop(leaf);
        drop(right);
        self.insert_into_parent(path, left_id, sep, right_id);
    }

    // Insert the separator produced by a child split into the parent,
    // splitting inner nodes upward as needed. `left` keeps the keys below
    // `sep`, `right` takes over the old child's position.
    fn insert_into_parent(&self, mut path: Vec<(PageId, u16)>, left: PageId, sep: Vec<u8>, right: PageId) {
        let (parent_pgid, idx) = match path.pop() {
            None => {
                // The root split: raise the tree by one level.
                let root = self.alloc_inner();
                root.append_unchecked(&inner_slot_encode(left, &sep));
                root.write_special_u32(0, right);
                let root_id = root.id();
                drop(root);
                let level = self.level_num();
                self.set_root(root_id);
                self.set_level_num(level + 1);
                debug!("root split, new level {}", level + 1);
                return;
            }
            Some(top) => top,
        };

        let parent = self.get_inner(parent_pgid);
        // The entry that pointed to the split child keeps its upper bound
        // but now points to the right half.
        if idx == parent.slot_num() {
            parent.write_special_u32(0, right);
        } else {
            let old = parent.slot(idx);
            let (_, upper) = inner_slot_parse(&old);
            let ok = parent.replace_slot(idx, &inner_slot_encode(right, upper));
            assert!(ok);
        }
        let new_slot = inner_slot_encode(left, &sep);
        if parent.insert_before(idx, &new_slot) {
            return;
        }

        // Inner node overflow: split, then promote the middle separator
        // without duplicating it in either half.
        let new_right = self.alloc_inner();
        if !parent.split_insert(&new_right, &new_slot, idx) {
            panic!("separator of {} bytes cannot fit in any page", new_slot.len());
        }
        let old_special = parent.read_special_u32(0);
        new_right.write_special_u32(0, old_special);
        let (promo_child, promo_key) = {
            let first = new_right.slot(0);
            let (c, k) = inner_slot_parse(&first);
            (c, k.to_vec())
        };
        parent.write_special_u32(0, promo_child);
        new_right.delete_slot(0);
        assert!(new_right.slot_num() > 0);
        let l = parent.id();
        let r = new_right.id();
        drop(parent);
        drop(new_right);
        self.insert_into_parent(path, l, promo_key, r);
    }

    fn is_underfull(&self, page: &SortedPage) -> bool {
        page.used_space() * 2 < page.usable_space()
    }

    // Walk back up after a deletion, fixing under-filled nodes by
    // redistribution or merge, and collapsing the root when it becomes an
    // empty inner node.
    fn rebalance(&self, mut cur: PageId, mut level: u8, mut path: Vec<(PageId, u16)>) {
        loop {
            let (parent_pgid, idx) = match path.pop() {
                None => {
                    // `cur` is the root.
                    if level > 0 {
                        let (slots, child) = {
                            let root = self.get_inner(cur);
                            (root.slot_num(), root.read_special_u32(0))
                        };
                        if slots == 0 {
                            self.pgm.free(cur);
                            self.set_root(child);
                            self.set_level_num(level - 1);
                            debug!("root collapsed, new level {}", level - 1);
                        }
                    }
                    return;
                }
                Some(top) => top,
            };

            let under = {
                let cmp = if level == 0 {
                    self.leaf_cmp()
                } else {
                    self.inner_cmp()
                };
                let page = self.pgm.get_sorted(cur, cmp);
                self.is_underfull(&page)
            };
            if !under {
                return;
            }
            let merged = self.fix_underflow(cur, level, parent_pgid, idx, &path);
            if !merged {
                return;
            }
            cur = parent_pgid;
            level += 1;
        }
    }

    // Fix an under-filled node by borrowing from a same-parent sibling or
    // merging with it. Returns true when a merge removed a separator from
    // the parent (which may now be under-filled itself).
    fn fix_underflow(
        &self,
        cur: PageId,
        level: u8,
        parent_pgid: PageId,
        idx: u16,
        path_above: &[(PageId, u16)],
    ) -> bool {
        let parent = self.get_inner(parent_pgid);
        if parent.slot_num() == 0 {
            // Single-child transient root, handled by the root collapse.
            return false;
        }
        // Pair the node with its left sibling if it has one, else with
        // its right sibling. The separator between the pair is the slot
        // holding the left member's child pointer.
        let (sep_idx, cur_is_left) = if idx > 0 { (idx - 1, false) } else { (idx, true) };
        let (l_pgid, r_pgid) = if cur_is_left {
            (cur, self.child_at(&parent, idx + 1))
        } else {
            (self.child_at(&parent, idx - 1), cur)
        };
        let sep_key = {
            let slot = parent.slot(sep_idx);
            inner_slot_parse(&slot).1.to_vec()
        };

        let merged = if level == 0 {
            self.fix_leaf_pair(l_pgid, r_pgid, cur_is_left, &parent, sep_idx, path_above)
        } else {
            self.fix_inner_pair(l_pgid, r_pgid, cur_is_left, sep_key, &parent, sep_idx, path_above)
        };
        if merged {
            // Remove the separator and point the surviving entry at the
            // merged (left) page.
            parent.delete_slot(sep_idx);
            if sep_idx == parent.slot_num() {
                parent.write_special_u32(0, l_pgid);
            } else {
                let slot = parent.slot(sep_idx);
                let (c, upper) = inner_slot_parse(&slot);
                assert!(c == r_pgid);
                let ok = parent.replace_slot(sep_idx, &inner_slot_encode(l_pgid, upper));
                assert!(ok);
            }
        }
        merged
    }

    fn fix_leaf_pair(
        &self,
        l_pgid: PageId,
        r_pgid: PageId,
        cur_is_left: bool,
        parent: &SortedPage,
        sep_idx: u16,
        path_above: &[(PageId, u16)],
    ) -> bool {
        let left = self.get_leaf(l_pgid);
        let right = self.get_leaf(r_pgid);
        let half = left.usable_space() / 2;

        // Borrow boundary slots while the donor keeps at least half.
        loop {
            let (donor, receiver) = if cur_is_left { (&right, &left) } else { (&left, &right) };
            if receiver.used_space() >= half || donor.slot_num() <= 1 {
                break;
            }
            let boundary = if cur_is_left { 0 } else { donor.slot_num() - 1 };
            let slot = donor.slot(boundary);
            if donor.used_space() - slot.len() - 2 < half {
                break;
            }
            donor.delete_slot(boundary);
            if cur_is_left {
                let ok = receiver.insert_before(receiver.slot_num(), &slot);
                assert!(ok);
            } else {
                let ok = receiver.insert_before(0, &slot);
                assert!(ok);
            }
        }

        let receiver = if cur_is_left { &left } else { &right };
        if receiver.used_space() >= half {
            self.update_separator_to_right_min(&left, &right, parent, sep_idx, path_above);
            return false;
        }

        // The sibling has no spare: merge right into left if it fits.
        if left.used_space() + right.used_space() <= left.usable_space() {
            for slot in right.slots() {
                left.append_unchecked(&slot);
            }
            let right_next = right.read_special_u32(LEAF_NEXT_OFF);
            left.write_special_u32(LEAF_NEXT_OFF, right_next);
            if right_next != 0 {
                let next = self.get_leaf(right_next);
                next.write_special_u32(LEAF_PREV_OFF, l_pgid);
            }
            drop(right);
            self.pgm.free(r_pgid);
            return true;
        }

        // Merge does not fit: take boundary slots regardless of the
        // donor's occupancy until the node recovers.
        loop {
            let (donor, receiver) = if cur_is_left { (&right, &left) } else { (&left, &right) };
            if receiver.used_space() >= half || donor.slot_num() <= 1 {
                break;
            }
            let boundary = if cur_is_left { 0 } else { donor.slot_num() - 1 };
            let slot = donor.slot(boundary);
            donor.delete_slot(boundary);
            if cur_is_left {
                let ok = receiver.insert_before(receiver.slot_num(), &slot);
                assert!(ok);
            } else {
                let ok = receiver.insert_before(0, &slot);
                assert!(ok);
            }
        }
        self.update_separator_to_right_min(&left, &right, parent, sep_idx, path_above);
        false
    }

    // After leaf redistribution the separator between the pair is the
    // smallest key of the right page.
    fn update_separator_to_right_min(
        &self,
        left: &SortedPage,
        right: &SortedPage,
        parent: &SortedPage,
        sep_idx: u16,
        path_above: &[(PageId, u16)],
    ) {
        let sep = {
            let first = right.slot(0);
            leaf_slot_parse(&first).0.to_vec()
        };
        let slot = inner_slot_encode(left.id(), &sep);
        self.replace_separator(parent, sep_idx, &slot, path_above);
    }

    fn fix_inner_pair(
        &self,
        l_pgid: PageId,
        r_pgid: PageId,
        cur_is_left: bool,
        sep_key: Vec<u8>,
        parent: &SortedPage,
        sep_idx: u16,
        path_above: &[(PageId, u16)],
    ) -> bool {
        let left = self.get_inner(l_pgid);
        let right = self.get_inner(r_pgid);
        let half = left.usable_space() / 2;
        let mut cur_sep = sep_key;
        let mut rotated = false;

        // Rotate boundary children through the separator.
        loop {
            let (donor, receiver) = if cur_is_left { (&right, &left) } else { (&left, &right) };
            if receiver.used_space() >= half || donor.slot_num() <= 1 {
                break;
            }
            let boundary = if cur_is_left { 0 } else { donor.slot_num() - 1 };
            let slot = donor.slot(boundary);
            if donor.used_space() - slot.len() - 2 < half {
                break;
            }
            let (child, key) = inner_slot_parse(&slot);
            let (child, key) = (child, key.to_vec());
            if cur_is_left {
                // Right's first child moves under left's rightmost.
                let left_special = left.read_special_u32(0);
                let ok = left.insert_before(left.slot_num(), &inner_slot_encode(left_special, &cur_sep));
                assert!(ok);
                left.write_special_u32(0, child);
                right.delete_slot(0);
            } else {
                // Left's rightmost child moves in front of right.
                let left_special = left.read_special_u32(0);
                let ok = right.insert_before(0, &inner_slot_encode(left_special, &cur_sep));
                assert!(ok);
                left.write_special_u32(0, child);
                left.delete_slot(boundary);
            }
            cur_sep = key;
            rotated = true;
        }

        let receiver = if cur_is_left { &left } else { &right };
        if receiver.used_space() >= half {
            let slot = inner_slot_encode(l_pgid, &cur_sep);
            self.replace_separator(parent, sep_idx, &slot, path_above);
            return false;
        }

        // Merge: the separator comes down between the two halves.
        let sep_space = cur_sep.len() + 4 + 2;
        if left.used_space() + right.used_space() + sep_space <= left.usable_space() {
            let left_special = left.read_special_u32(0);
            left.append_unchecked(&inner_slot_encode(left_special, &cur_sep));
            for slot in right.slots() {
                left.append_unchecked(&slot);
            }
            left.write_special_u32(0, right.read_special_u32(0));
            drop(right);
            self.pgm.free(r_pgid);
            return true;
        }

        // Merge does not fit; the rotation above already moved what it
        // could, settle for the updated separator.
        let _ = rotated;
        let slot = inner_slot_encode(l_pgid, &cur_sep);
        self.replace_separator(parent, sep_idx, &slot, path_above);
        false
    }

    // Replace an inner slot, splitting the parent when the bigger
    // separator does not fit anymore.
    fn replace_separator(
        &self,
        parent: &SortedPage,
        sep_idx: u16,
        new_slot: &[u8],
        path_above: &[(PageId, u16)],
    ) {
        if parent.replace_slot(sep_idx, new_slot) {
            return;
        }
        let new_right = self.alloc_inner();
        if !parent.split_replace(&new_right, new_slot, sep_idx) {
            panic!("separator of {} bytes cannot fit in any page", new_slot.len());
        }
        let old_special = parent.read_special_u32(0);
        new_right.write_special_u32(0, old_special);
        let (promo_child, promo_key) = {
            let first = new_right.slot(0);
            let (c, k) = inner_slot_parse(&first);
            (c, k.to_vec())
        };
        parent.write_special_u32(0, promo_child);
        new_right.delete_slot(0);
        let l = parent.id();
        let r = new_right.id();
        drop(new_right);
        self.insert_into_parent(path_above.to_vec(), l, promo_key, r);
    }
}

/// Forward iterator over the leaves via the sibling links. A finished
/// iterator yields `None` indefinitely.
pub struct BTreeIter {
    pgm: PageManager,
    cmp: SlotCmp,
    // 0 means exhausted.
    leaf: PageId,
    idx: u16,
}

impl BTreeIter {
    pub fn cur(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.leaf == 0 {
            return None;
        }
        let page = self.pgm.get_sorted(self.leaf, self.cmp);
        let slot = page.slot(self.idx);
        let (key, value) = leaf_slot_parse(&slot);
        Some((key.to_vec(), value.to_vec()))
    }

    pub fn next(&mut self) {
        if self.leaf == 0 {
            return;
        }
        self.idx += 1;
        self.normalize();
    }

    // Skip forward to the next leaf that actually holds the current
    // position.
    fn normalize(&mut self) {
        while self.leaf != 0 {
            let page = self.pgm.get_sorted(self.leaf, self.cmp);
            if self.idx < page.slot_num() {
                return;
            }
            self.leaf = page.read_special_u32(LEAF_NEXT_OFF);
            self.idx = 0;
        }
    }
}
