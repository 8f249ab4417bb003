//! Named tables over one page file.
//!
//! A catalog B+tree rooted at the super page maps each table name to an
//! 8-byte pair `{ data_tree_meta: u32, schema_blob_head: u32 }`. The
//! schema blob carries the serialized `TableSchema` plus the table's
//! tick counter; the data tree is opened lazily on first use with a key
//! comparator chosen by the primary key type.

use std::{collections::HashMap, path::Path};

use log::debug;

use crate::{
    error::WrenError,
    storage::{
        blob::Blob,
        btree::{BPlusTree, BTreeIter},
        page_manager::{PageId, PageManager},
        schema::{DBSchema, FieldType, TableSchema},
        sorted_page::KeyComparator,
    },
};

// Offset in the super page where the catalog tree's meta page id lives.
const CATALOG_META_OFF: usize = 0;

pub fn comparator_for(pk_type: FieldType) -> KeyComparator {
    match pk_type {
        FieldType::Int32 | FieldType::Int64 => KeyComparator::Integer,
        FieldType::Float64 => KeyComparator::Float,
        FieldType::Char | FieldType::Varchar => KeyComparator::Bytes,
    }
}

/// A range endpoint: `(key, unbounded?, inclusive?)`.
#[derive(Debug, Clone)]
pub struct RangeBound {
    pub key: Vec<u8>,
    pub unbounded: bool,
    pub inclusive: bool,
}

impl RangeBound {
    pub fn unbounded() -> RangeBound {
        RangeBound {
            key: Vec::new(),
            unbounded: true,
            inclusive: false,
        }
    }

    pub fn inclusive(key: Vec<u8>) -> RangeBound {
        RangeBound {
            key,
            unbounded: false,
            inclusive: true,
        }
    }

    pub fn exclusive(key: Vec<u8>) -> RangeBound {
        RangeBound {
            key,
            unbounded: false,
            inclusive: false,
        }
    }
}

/// Cursor over a table's rows in primary key order.
pub struct TableIterator {
    iter: BTreeIter,
    comp: KeyComparator,
    end: RangeBound,
    finished: bool,
}

impl TableIterator {
    /// The next `(key, tuple)` pair, or None past the right bound.
    pub fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.finished {
            return None;
        }
        let (key, value) = match self.iter.cur() {
            Some(kv) => kv,
            None => {
                self.finished = true;
                return None;
            }
        };
        if !self.end.unbounded {
            let ord = self.comp.compare(&key, &self.end.key);
            let past = if self.end.inclusive {
                ord == std::cmp::Ordering::Greater
            } else {
                ord != std::cmp::Ordering::Less
            };
            if past {
                self.finished = true;
                return None;
            }
        }
        self.iter.next();
        Some((key, value))
    }
}

struct Table {
    data_meta: PageId,
    blob_head: PageId,
    ticks: u64,
    ticks_dirty: bool,
    tree: Option<BPlusTree>,
}

pub struct TableStorage {
    pgm: PageManager,
    catalog: BPlusTree,
    tables: HashMap<String, Table>,
    db_schema: DBSchema,
}

impl TableStorage {
    pub fn open<P: AsRef<Path>>(
        path: P,
        create_if_missing: bool,
        max_buf_pages: usize,
    ) -> Result<TableStorage, WrenError> {
        if !path.as_ref().exists() {
            if create_if_missing {
                return Self::create(path, max_buf_pages);
            }
            return Err(WrenError::io(&format!(
                "fail to open {:?}: not found",
                path.as_ref()
            )));
        }
        let pgm = PageManager::open(&path, max_buf_pages)?;
        let catalog_meta = pgm.get_plain(pgm.super_page_id()).read_u32(CATALOG_META_OFF);
        let catalog = BPlusTree::open(&pgm, catalog_meta, KeyComparator::Bytes);

        let mut tables = HashMap::new();
        let mut db_schema = DBSchema::new();
        let mut iter = catalog.begin();
        while let Some((name_bytes, value)) = iter.cur() {
            let name = String::from_utf8(name_bytes)
                .map_err(|_| WrenError::io("catalog key is not utf-8"))?;
            let (data_meta, blob_head) = parse_catalog_value(&value)?;
            let blob = Blob::open(&pgm, blob_head);
            let (schema, ticks) = TableSchema::decode(&blob.read()).map_err(|_| {
                WrenError::io(&format!("corrupted schema of table {}", name))
            })?;
            db_schema.add_table(schema);
            tables.insert(
                name,
                Table {
                    data_meta,
                    blob_head,
                    ticks,
                    ticks_dirty: false,
                    tree: None,
                },
            );
            iter.next();
        }
        Ok(TableStorage {
            pgm,
            catalog,
            tables,
            db_schema,
        })
    }

    fn create<P: AsRef<Path>>(path: P, max_buf_pages: usize) -> Result<TableStorage, WrenError> {
        let pgm = PageManager::create(&path, max_buf_pages)?;
        let catalog = BPlusTree::create(&pgm, KeyComparator::Bytes);
        pgm.get_plain(pgm.super_page_id())
            .write_u32(CATALOG_META_OFF, catalog.meta_pgid());
        Ok(TableStorage {
            pgm,
            catalog,
            tables: HashMap::new(),
            db_schema: DBSchema::new(),
        })
    }

    pub fn page_manager(&self) -> &PageManager {
        &self.pgm
    }

    pub fn db_schema(&self) -> &DBSchema {
        &self.db_schema
    }

    pub fn schema_of(&self, table_name: &str) -> Result<&TableSchema, WrenError> {
        self.db_schema
            .get(table_name)
            .ok_or_else(|| WrenError::storage(&format!("no such table: {}", table_name)))
    }

    pub fn create_table(&mut self, schema: &TableSchema) -> Result<(), WrenError> {
        let name = schema.name().to_string();
        if self.db_schema.find(&name).is_some() {
            return Err(WrenError::storage(&format!(
                "table {} already exists",
                name
            )));
        }
        let blob = Blob::create(&self.pgm);
        blob.rewrite(&schema.encode(0));
        let comp = comparator_for(schema.primary_key().field_type);
        let tree = BPlusTree::create(&self.pgm, comp);
        let value = encode_catalog_value(tree.meta_pgid(), blob.head_pgid());
        if !self.catalog.insert(name.as_bytes(), &value) {
            tree.destroy();
            blob.destroy();
            return Err(WrenError::storage(&format!(
                "table {} already exists",
                name
            )));
        }
        debug!("created table {}", name);
        self.tables.insert(
            name,
            Table {
                data_meta: tree.meta_pgid(),
                blob_head: blob.head_pgid(),
                ticks: 0,
                ticks_dirty: false,
                tree: Some(tree),
            },
        );
        self.db_schema.add_table(schema.clone());
        Ok(())
    }

    pub fn drop_table(&mut self, table_name: &str) -> Result<(), WrenError> {
        let value = match self.catalog.take(table_name.as_bytes()) {
            Some(v) => v,
            None => {
                return Err(WrenError::storage(&format!(
                    "no such table: {}",
                    table_name
                )))
            }
        };
        let (data_meta, blob_head) = parse_catalog_value(&value)?;
        let comp = comparator_for(self.schema_of(table_name)?.primary_key().field_type);
        let cached = self.tables.remove(table_name);
        let tree = match cached.and_then(|t| t.tree) {
            Some(tree) => tree,
            None => BPlusTree::open(&self.pgm, data_meta, comp),
        };
        tree.destroy();
        Blob::open(&self.pgm, blob_head).destroy();
        self.db_schema.remove_table(table_name);
        debug!("dropped table {}", table_name);
        Ok(())
    }

    pub fn get_iterator(&mut self, table_name: &str) -> Result<TableIterator, WrenError> {
        let comp = comparator_for(self.schema_of(table_name)?.primary_key().field_type);
        let tree = self.tree(table_name)?;
        Ok(TableIterator {
            iter: tree.begin(),
            comp,
            end: RangeBound::unbounded(),
            finished: false,
        })
    }

    pub fn get_range_iterator(
        &mut self,
        table_name: &str,
        left: RangeBound,
        right: RangeBound,
    ) -> Result<TableIterator, WrenError> {
        let comp = comparator_for(self.schema_of(table_name)?.primary_key().field_type);
        let tree = self.tree(table_name)?;
        let iter = if left.unbounded {
            tree.begin()
        } else if left.inclusive {
            tree.lower_bound(&left.key)
        } else {
            tree.upper_bound(&left.key)
        };
        Ok(TableIterator {
            iter,
            comp,
            end: right,
            finished: false,
        })
    }

    /// Insert a tuple. Returns false if the key already exists. A
    /// successful insert bumps the table's tick counter.
    pub fn insert(&mut self, table_name: &str, key: &[u8], value: &[u8]) -> Result<bool, WrenError> {
        let ok = self.tree(table_name)?.insert(key, value);
        if ok {
            let table = self.tables.get_mut(table_name).unwrap();
            table.ticks += 1;
            table.ticks_dirty = true;
        }
        Ok(ok)
    }

    /// Update a tuple. Returns false if the key does not exist.
    pub fn update(&mut self, table_name: &str, key: &[u8], value: &[u8]) -> Result<bool, WrenError> {
        Ok(self.tree(table_name)?.update(key, value))
    }

    /// Delete a tuple. Returns false if the key does not exist.
    pub fn delete(&mut self, table_name: &str, key: &[u8]) -> Result<bool, WrenError> {
        Ok(self.tree(table_name)?.delete(key))
    }

    pub fn take(&mut self, table_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, WrenError> {
        Ok(self.tree(table_name)?.take(key))
    }

    pub fn search(&mut self, table_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, WrenError> {
        Ok(self.tree(table_name)?.get(key))
    }

    pub fn tuple_num(&mut self, table_name: &str) -> Result<u64, WrenError> {
        Ok(self.tree(table_name)?.tuple_num())
    }

    pub fn max_key(&mut self, table_name: &str) -> Result<Option<Vec<u8>>, WrenError> {
        Ok(self.tree(table_name)?.max_key())
    }

    /// The table's monotonically increasing insert counter.
    pub fn ticks(&self, table_name: &str) -> Result<u64, WrenError> {
        self.tables
            .get(table_name)
            .map(|t| t.ticks)
            .ok_or_else(|| WrenError::storage(&format!("no such table: {}", table_name)))
    }

    /// Write dirty tick counters back into the schema blobs. Called by
    /// the database on a clean close.
    pub fn flush_ticks(&mut self) {
        let names: Vec<String> = self
            .tables
            .iter()
            .filter(|(_, t)| t.ticks_dirty)
            .map(|(n, _)| n.clone())
            .collect();
        for name in names {
            let schema = match self.db_schema.get(&name) {
                Some(s) => s.clone(),
                None => continue,
            };
            let table = self.tables.get_mut(&name).unwrap();
            Blob::open(&self.pgm, table.blob_head).rewrite(&schema.encode(table.ticks));
            table.ticks_dirty = false;
        }
    }

    fn tree(&mut self, table_name: &str) -> Result<&BPlusTree, WrenError> {
        let pk_type = self.schema_of(table_name)?.primary_key().field_type;
        let table = self
            .tables
            .get_mut(table_name)
            .ok_or_else(|| WrenError::storage(&format!("no such table: {}", table_name)))?;
        if table.tree.is_none() {
            table.tree = Some(BPlusTree::open(
                &self.pgm,
                table.data_meta,
                comparator_for(pk_type),
            ));
        }
        Ok(table.tree.as_ref().unwrap())
    }
}

fn encode_catalog_value(data_meta: PageId, blob_head: PageId) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&data_meta.to_le_bytes());
    out.extend_from_slice(&blob_head.to_le_bytes());
    out
}

fn parse_catalog_value(value: &[u8]) -> Result<(PageId, PageId), WrenError> {
    if value.len() != 8 {
        return Err(WrenError::io("corrupted catalog entry"));
    }
    let data = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    let blob = u32::from_le_bytes([value[4], value[5], value[6], value[7]]);
    Ok((data, blob))
}
