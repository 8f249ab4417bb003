mod test_utils;

use rand::prelude::*;
use tempfile::TempDir;
use wren_db::storage::{
    blob::Blob,
    page_manager::{PageManager, PAGE_SIZE},
    schema::{ColumnSchema, TableSchema},
    table_storage::{RangeBound, TableStorage},
    tuple::{decode_row, encode_key, encode_row, Cell},
};

#[test]
fn test_page_manager_allocate_and_reuse() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let pgm = PageManager::create(dir.path().join("pages.db"), 16).unwrap();

    // Fresh file: meta + super.
    assert_eq!(pgm.page_num(), 2);
    let a = pgm.allocate();
    let b = pgm.allocate();
    assert!(a >= 2 && b >= 2 && a != b);
    assert_eq!(pgm.page_num(), 4);

    // Freed pages are handed out again without growing the file.
    pgm.free(a);
    let c = pgm.allocate();
    assert_eq!(c, a);
    assert_eq!(pgm.page_num(), 4);
}

#[test]
fn test_page_manager_rejects_missing_file() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let err = PageManager::open(dir.path().join("nope.db"), 16).unwrap_err();
    assert_eq!(err.kind(), wren_db::ErrorKind::Io);
}

#[test]
#[should_panic(expected = "double free")]
fn test_page_manager_double_free_is_fatal() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let pgm = PageManager::create(dir.path().join("pages.db"), 16).unwrap();
    let a = pgm.allocate();
    pgm.free(a);
    pgm.free(a);
}

#[test]
fn test_page_content_survives_eviction() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    // A tiny pool: the meta page plus two frames.
    let pgm = PageManager::create(dir.path().join("pages.db"), 3).unwrap();

    let mut ids = Vec::new();
    for i in 0..10u32 {
        let page = pgm.alloc_plain();
        page.write_u32(0, 0xBEEF_0000 + i);
        ids.push(page.id());
        // The handle drops here, making the frame evictable.
    }
    for (i, id) in ids.iter().enumerate() {
        let page = pgm.get_plain(*id);
        assert_eq!(page.read_u32(0), 0xBEEF_0000 + i as u32);
    }
}

#[test]
fn test_free_list_survives_reopen() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.db");

    let freed: Vec<u32>;
    {
        let pgm = PageManager::create(&path, 16).unwrap();
        let ids: Vec<u32> = (0..50).map(|_| pgm.allocate()).collect();
        freed = ids[10..30].to_vec();
        for &id in &freed {
            pgm.free(id);
        }
    }
    {
        let pgm = PageManager::open(&path, 16).unwrap();
        let page_num = pgm.page_num();
        // Allocations should reuse the freed pages rather than extend
        // the file.
        for _ in 0..freed.len() {
            let id = pgm.allocate();
            assert!(id < page_num, "allocated {} out of {}", id, page_num);
        }
    }
}

#[test]
fn test_blob_roundtrip() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let pgm = PageManager::create(dir.path().join("blob.db"), 32).unwrap();

    let blob = Blob::create(&pgm);
    assert_eq!(blob.read(), Vec::<u8>::new());

    let mut rng = StdRng::seed_from_u64(3);
    for &size in &[0usize, 1, 100, PAGE_SIZE - 12, PAGE_SIZE, 3 * PAGE_SIZE + 17, 64 * 1024] {
        let data: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
        blob.rewrite(&data);
        assert_eq!(blob.read(), data, "size {}", size);
        assert_eq!(blob.size(), size as u64);
    }
}

#[test]
fn test_blob_shrink_frees_tail_pages() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let pgm = PageManager::create(dir.path().join("blob.db"), 32).unwrap();

    let blob = Blob::create(&pgm);
    blob.rewrite(&vec![1u8; 10 * PAGE_SIZE]);
    let grown = pgm.page_num();
    blob.rewrite(&vec![2u8; 16]);
    assert_eq!(blob.read(), vec![2u8; 16]);

    // Rewriting large again must reuse the freed chain pages.
    blob.rewrite(&vec![3u8; 10 * PAGE_SIZE]);
    assert_eq!(pgm.page_num(), grown);

    blob.destroy();
    pgm.shrink_to_fit().unwrap();
    assert_eq!(pgm.page_num(), 2);
}

fn people_schema() -> TableSchema {
    TableSchema::new(
        "people",
        vec![
            ColumnSchema::int64("id"),
            ColumnSchema::varchar("name", 32),
            ColumnSchema::float64("score"),
        ],
        0,
        false,
        false,
        vec![],
    )
}

#[test]
fn test_table_storage_create_insert_reopen() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tables.db");

    {
        let mut storage = TableStorage::open(&path, true, 64).unwrap();
        let schema = people_schema();
        storage.create_table(&schema).unwrap();
        assert!(storage.create_table(&schema).is_err());

        for i in 0..100i64 {
            let row = vec![
                Cell::Int64(i),
                Cell::String(format!("p{}", i)),
                Cell::Float64(i as f64 / 2.0),
            ];
            let key = encode_key(&row[0], schema.primary_key()).unwrap();
            let bytes = encode_row(&schema, &row).unwrap();
            assert!(storage.insert("people", &key, &bytes).unwrap());
        }
        assert_eq!(storage.tuple_num("people").unwrap(), 100);
        assert_eq!(storage.ticks("people").unwrap(), 100);
        storage.flush_ticks();
    }

    {
        let mut storage = TableStorage::open(&path, false, 64).unwrap();
        let schema = storage.schema_of("people").unwrap().clone();
        assert_eq!(schema.columns().len(), 3);
        assert_eq!(storage.ticks("people").unwrap(), 100);

        let mut iter = storage.get_iterator("people").unwrap();
        let mut count = 0i64;
        while let Some((_, bytes)) = iter.next() {
            let row = decode_row(&schema, &bytes).unwrap();
            assert_eq!(row[0], Cell::Int64(count));
            assert_eq!(row[1], Cell::String(format!("p{}", count)));
            count += 1;
        }
        assert_eq!(count, 100);
    }
}

#[test]
fn test_table_storage_range_iterator() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let mut storage = TableStorage::open(dir.path().join("t.db"), true, 64).unwrap();
    let schema = people_schema();
    storage.create_table(&schema).unwrap();
    for i in 0..50i64 {
        let row = vec![
            Cell::Int64(i),
            Cell::String(format!("p{}", i)),
            Cell::Float64(0.0),
        ];
        let key = encode_key(&row[0], schema.primary_key()).unwrap();
        let bytes = encode_row(&schema, &row).unwrap();
        storage.insert("people", &key, &bytes).unwrap();
    }

    let key10 = encode_key(&Cell::Int64(10), schema.primary_key()).unwrap();
    let key20 = encode_key(&Cell::Int64(20), schema.primary_key()).unwrap();

    // [10, 20]
    let mut iter = storage
        .get_range_iterator(
            "people",
            RangeBound::inclusive(key10.clone()),
            RangeBound::inclusive(key20.clone()),
        )
        .unwrap();
    let mut seen = Vec::new();
    while let Some((_, bytes)) = iter.next() {
        seen.push(decode_row(&schema, &bytes).unwrap()[0].as_i64().unwrap());
    }
    assert_eq!(seen, (10..=20).collect::<Vec<_>>());

    // (10, 20)
    let mut iter = storage
        .get_range_iterator(
            "people",
            RangeBound::exclusive(key10),
            RangeBound::exclusive(key20),
        )
        .unwrap();
    let mut seen = Vec::new();
    while let Some((_, bytes)) = iter.next() {
        seen.push(decode_row(&schema, &bytes).unwrap()[0].as_i64().unwrap());
    }
    assert_eq!(seen, (11..=19).collect::<Vec<_>>());
}

#[test]
fn test_table_storage_drop_table() {
    test_utils::setup();
    let dir = TempDir::new().unwrap();
    let mut storage = TableStorage::open(dir.path().join("t.db"), true, 64).unwrap();
    storage.create_table(&people_schema()).unwrap();
    assert!(storage.db_schema().get("people").is_some());

    storage.drop_table("people").unwrap();
    assert!(storage.db_schema().get("people").is_none());
    assert!(storage.get_iterator("people").is_err());
    assert!(storage.drop_table("people").is_err());

    // Everything the table used is reclaimable.
    let pgm = storage.page_manager().clone();
    pgm.shrink_to_fit().unwrap();
    assert!(pgm.page_num() <= 4);
}
