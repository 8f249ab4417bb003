mod test_utils;

use rand::prelude::*;
use tempfile::TempDir;
use wren_db::storage::{
    btree::BPlusTree,
    page_manager::PageManager,
    sorted_page::KeyComparator,
};

fn int_key(v: i64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn value_of(v: i64) -> Vec<u8> {
    format!("value-{}", v).into_bytes()
}

fn new_tree(dir: &TempDir, name: &str) -> (PageManager, BPlusTree) {
    test_utils::setup();
    let pgm = PageManager::create(dir.path().join(name), 64).unwrap();
    let tree = BPlusTree::create(&pgm, KeyComparator::Integer);
    (pgm, tree)
}

#[test]
fn test_insert_and_get_sequential() {
    let dir = TempDir::new().unwrap();
    let (_pgm, tree) = new_tree(&dir, "btree.db");

    let n = 5000i64;
    for i in 0..n {
        assert!(tree.insert(&int_key(i), &value_of(i)), "insert {}", i);
    }
    assert_eq!(tree.tuple_num(), n as u64);
    for i in 0..n {
        assert_eq!(tree.get(&int_key(i)), Some(value_of(i)), "get {}", i);
    }
    assert_eq!(tree.get(&int_key(n)), None);
    assert_eq!(tree.max_key(), Some(int_key(n - 1)));
}

#[test]
fn test_insert_duplicate_returns_false() {
    let dir = TempDir::new().unwrap();
    let (_pgm, tree) = new_tree(&dir, "btree.db");

    assert!(tree.insert(&int_key(7), b"first"));
    assert!(!tree.insert(&int_key(7), b"second"));
    assert_eq!(tree.get(&int_key(7)), Some(b"first".to_vec()));
    assert_eq!(tree.tuple_num(), 1);
}

#[test]
fn test_random_inserts_iterate_in_order() {
    let dir = TempDir::new().unwrap();
    let (_pgm, tree) = new_tree(&dir, "btree.db");

    let mut rng = StdRng::seed_from_u64(42);
    let mut keys: Vec<i64> = (0..4000).map(|_| rng.gen_range(-1_000_000, 1_000_000)).collect();
    keys.sort_unstable();
    keys.dedup();
    let mut shuffled = keys.clone();
    shuffled.shuffle(&mut rng);

    for &k in &shuffled {
        assert!(tree.insert(&int_key(k), &value_of(k)));
    }
    assert_eq!(tree.tuple_num(), keys.len() as u64);

    let mut iter = tree.begin();
    let mut visited = Vec::new();
    while let Some((key, value)) = iter.cur() {
        let k = i64::from_le_bytes([
            key[0], key[1], key[2], key[3], key[4], key[5], key[6], key[7],
        ]);
        assert_eq!(value, value_of(k));
        visited.push(k);
        iter.next();
    }
    assert_eq!(visited, keys);
    // A finished iterator yields None indefinitely.
    iter.next();
    assert!(iter.cur().is_none());
}

#[test]
fn test_update() {
    let dir = TempDir::new().unwrap();
    let (_pgm, tree) = new_tree(&dir, "btree.db");

    assert!(!tree.update(&int_key(1), b"nothing to update"));
    for i in 0..1000 {
        tree.insert(&int_key(i), &value_of(i));
    }
    // Grow every value so that leaves must split on update.
    for i in 0..1000 {
        let big = vec![b'x'; 300];
        assert!(tree.update(&int_key(i), &big));
    }
    assert_eq!(tree.tuple_num(), 1000);
    for i in 0..1000 {
        assert_eq!(tree.get(&int_key(i)).unwrap().len(), 300);
    }
}

#[test]
fn test_delete_and_rebalance() {
    let dir = TempDir::new().unwrap();
    let (_pgm, tree) = new_tree(&dir, "btree.db");

    let n = 4000i64;
    for i in 0..n {
        tree.insert(&int_key(i), &value_of(i));
    }
    assert!(!tree.delete(&int_key(n + 5)));

    // Delete the even keys.
    for i in (0..n).step_by(2) {
        assert!(tree.delete(&int_key(i)), "delete {}", i);
    }
    assert_eq!(tree.tuple_num(), (n / 2) as u64);
    for i in 0..n {
        let got = tree.get(&int_key(i));
        if i % 2 == 0 {
            assert!(got.is_none(), "key {} should be gone", i);
        } else {
            assert_eq!(got, Some(value_of(i)));
        }
    }

    // Delete everything; the root should collapse back to a leaf.
    for i in (1..n).step_by(2) {
        assert!(tree.delete(&int_key(i)));
    }
    assert_eq!(tree.tuple_num(), 0);
    assert!(tree.is_empty());
    assert!(tree.max_key().is_none());
    assert!(tree.begin().cur().is_none());

    // The tree keeps working after total emptiness.
    assert!(tree.insert(&int_key(1), b"again"));
    assert_eq!(tree.get(&int_key(1)), Some(b"again".to_vec()));
}

#[test]
fn test_take() {
    let dir = TempDir::new().unwrap();
    let (_pgm, tree) = new_tree(&dir, "btree.db");

    tree.insert(&int_key(3), b"three");
    assert_eq!(tree.take(&int_key(3)), Some(b"three".to_vec()));
    assert_eq!(tree.take(&int_key(3)), None);
    assert_eq!(tree.tuple_num(), 0);
}

#[test]
fn test_lower_and_upper_bound() {
    let dir = TempDir::new().unwrap();
    let (_pgm, tree) = new_tree(&dir, "btree.db");

    for i in 0..500 {
        tree.insert(&int_key(i * 2), &value_of(i * 2));
    }

    // lower_bound stops at the first key >= the probe.
    let iter = tree.lower_bound(&int_key(41));
    assert_eq!(iter.cur().unwrap().0, int_key(42));
    let iter = tree.lower_bound(&int_key(42));
    assert_eq!(iter.cur().unwrap().0, int_key(42));
    // upper_bound stops at the first key > the probe.
    let iter = tree.upper_bound(&int_key(42));
    assert_eq!(iter.cur().unwrap().0, int_key(44));
    // Probes beyond the maximum are exhausted immediately.
    let iter = tree.lower_bound(&int_key(10_000));
    assert!(iter.cur().is_none());
}

#[test]
fn test_string_keys() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let pgm = PageManager::create(dir.path().join("btree.db"), 64).unwrap();
    let tree = BPlusTree::create(&pgm, KeyComparator::Bytes);

    let mut rng = StdRng::seed_from_u64(7);
    let mut keys: Vec<String> = (0..2000)
        .map(|i| format!("{:08}-{}", rng.gen_range(0, 100_000_000), i))
        .collect();
    for k in &keys {
        assert!(tree.insert(k.as_bytes(), k.to_uppercase().as_bytes()));
    }
    keys.sort();

    let mut iter = tree.begin();
    for expect in &keys {
        let (key, value) = iter.cur().unwrap();
        assert_eq!(key, expect.as_bytes());
        assert_eq!(value, expect.to_uppercase().as_bytes());
        iter.next();
    }
    assert!(iter.cur().is_none());
}

#[test]
fn test_reopen_preserves_content() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("btree.db");

    let meta_pgid;
    {
        let pgm = PageManager::create(&path, 64).unwrap();
        let tree = BPlusTree::create(&pgm, KeyComparator::Integer);
        meta_pgid = tree.meta_pgid();
        for i in 0..2000 {
            tree.insert(&int_key(i), &value_of(i));
        }
        // pgm (and its file) flushes on drop.
    }
    {
        let pgm = PageManager::open(&path, 64).unwrap();
        let tree = BPlusTree::open(&pgm, meta_pgid, KeyComparator::Integer);
        assert_eq!(tree.tuple_num(), 2000);
        for i in (0..2000).step_by(97) {
            assert_eq!(tree.get(&int_key(i)), Some(value_of(i)));
        }
    }
}

#[test]
fn test_destroy_returns_all_pages() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("btree.db");
    let pgm = PageManager::create(&path, 64).unwrap();

    let tree = BPlusTree::create(&pgm, KeyComparator::Integer);
    for i in 0..3000 {
        tree.insert(&int_key(i), &value_of(i));
    }
    assert!(pgm.page_num() > 2);
    tree.destroy();
    pgm.shrink_to_fit().unwrap();
    // Only the page-manager meta page and the super page remain.
    assert_eq!(pgm.page_num(), 2);
}
