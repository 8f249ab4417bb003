//! The database facade: one page file, its table catalog, per-table
//! statistics, primary key generation, and the transaction machinery.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, RwLock},
};

use log::{debug, info};

use crate::{
    catalog::stat::{StatisticsBuilder, TableStatistics},
    error::WrenError,
    optimizer::OptimizerOptions,
    storage::{
        schema::{
            hidden_pk_name, ref_column_name, ref_table_name, ColumnSchema, DBSchema, FieldType,
            ForeignKeySchema, TableSchema,
        },
        table_storage::TableStorage,
        tuple::{decode_key, decode_row, encode_key, encode_row, Cell},
    },
    transaction::{LockManager, LockMode, Txn, TxnManager},
    types::Pod,
    utils::HandyRwLock,
};

#[derive(Debug, Clone)]
pub struct DbOptions {
    pub create_if_missing: bool,
    /// Size of the buffer pool in pages.
    pub max_buf_pages: usize,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            create_if_missing: true,
            max_buf_pages: 4096,
        }
    }
}

/// One column of a CREATE TABLE statement, as handed over by the
/// (external) parser.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub field_type: FieldType,
    pub size: u32,
    pub is_primary_key: bool,
    pub is_auto_gen: bool,
    /// `FOREIGN KEY REFERENCES table(column)`
    pub foreign_ref: Option<(String, String)>,
}

impl ColumnDef {
    pub fn new(name: &str, field_type: FieldType, size: u32) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            field_type,
            size,
            is_primary_key: false,
            is_auto_gen: false,
            foreign_ref: None,
        }
    }

    pub fn int32(name: &str) -> ColumnDef {
        Self::new(name, FieldType::Int32, 4)
    }

    pub fn int64(name: &str) -> ColumnDef {
        Self::new(name, FieldType::Int64, 8)
    }

    pub fn float64(name: &str) -> ColumnDef {
        Self::new(name, FieldType::Float64, 8)
    }

    pub fn char(name: &str, size: u32) -> ColumnDef {
        Self::new(name, FieldType::Char, size)
    }

    pub fn varchar(name: &str, size: u32) -> ColumnDef {
        Self::new(name, FieldType::Varchar, size)
    }

    pub fn primary_key(mut self) -> ColumnDef {
        self.is_primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> ColumnDef {
        self.is_auto_gen = true;
        self
    }

    pub fn references(mut self, table: &str, column: &str) -> ColumnDef {
        self.foreign_ref = Some((table.to_string(), column.to_string()));
        self
    }
}

/// Hands out auto-generated primary keys. Counters start at 1 for a
/// fresh table and are re-seeded at open from the persisted tick and the
/// maximum stored key.
pub struct PkGenerator {
    next: Mutex<HashMap<String, i64>>,
}

impl PkGenerator {
    fn new() -> PkGenerator {
        PkGenerator {
            next: Mutex::new(HashMap::new()),
        }
    }

    pub fn init(&self, table: &str, next: i64) {
        self.next.lock().unwrap().insert(table.to_string(), next);
    }

    pub fn generate(&self, table: &str) -> i64 {
        let mut map = self.next.lock().unwrap();
        let entry = map.entry(table.to_string()).or_insert(1);
        let value = *entry;
        *entry += 1;
        value
    }

    /// An explicit insert may outrun the counter; keep it ahead.
    pub fn observe(&self, table: &str, value: i64) {
        let mut map = self.next.lock().unwrap();
        let entry = map.entry(table.to_string()).or_insert(1);
        if value >= *entry {
            *entry = value + 1;
        }
    }

    fn remove(&self, table: &str) {
        self.next.lock().unwrap().remove(table);
    }
}

pub struct Database {
    storage: Pod<TableStorage>,
    txn_manager: Arc<TxnManager>,
    stats: RwLock<HashMap<String, Arc<TableStatistics>>>,
    pk_gen: Arc<PkGenerator>,
    optimizer_options: RwLock<OptimizerOptions>,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P, options: DbOptions) -> Result<Database, WrenError> {
        let storage = TableStorage::open(path, options.create_if_missing, options.max_buf_pages)?;
        let storage: Pod<TableStorage> = Arc::new(RwLock::new(storage));
        let txn_manager = Arc::new(TxnManager::new(Arc::clone(&storage)));
        let pk_gen = Arc::new(PkGenerator::new());

        // Seed the auto-increment counters from the persisted ticks and
        // the stored keys.
        {
            let mut storage = storage.wl();
            let tables: Vec<(String, bool)> = storage
                .db_schema()
                .tables()
                .iter()
                .map(|t| (t.name().to_string(), t.auto_gen_pk()))
                .collect();
            for (name, auto_gen) in tables {
                if !auto_gen {
                    continue;
                }
                let mut next = storage.ticks(&name)? as i64 + 1;
                if let Some(max_key) = storage.max_key(&name)? {
                    let schema = storage.schema_of(&name)?;
                    if let Ok(cell) = decode_key(schema.primary_key(), &max_key) {
                        if let Some(v) = cell.as_i64() {
                            next = next.max(v + 1);
                        }
                    }
                }
                pk_gen.init(&name, next);
            }
        }

        info!("database opened");
        Ok(Database {
            storage,
            txn_manager,
            stats: RwLock::new(HashMap::new()),
            pk_gen,
            optimizer_options: RwLock::new(OptimizerOptions::default()),
        })
    }

    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Database, WrenError> {
        Self::open(path, DbOptions::default())
    }

    /// Abort in-flight transactions, flush tick counters, and let the
    /// page manager write everything back.
    pub fn close(self) -> Result<(), WrenError> {
        self.txn_manager.abort_active()?;
        self.storage.wl().flush_ticks();
        info!("database closed");
        Ok(())
    }

    pub fn storage(&self) -> &Pod<TableStorage> {
        &self.storage
    }

    pub fn txn_manager(&self) -> &Arc<TxnManager> {
        &self.txn_manager
    }

    pub fn lock_manager(&self) -> &LockManager {
        self.txn_manager.lock_manager()
    }

    pub fn pk_generator(&self) -> &Arc<PkGenerator> {
        &self.pk_gen
    }

    pub fn begin(&self) -> Arc<Txn> {
        self.txn_manager.begin()
    }

    pub fn commit(&self, txn: &Arc<Txn>) {
        self.txn_manager.commit(txn)
    }

    pub fn abort(&self, txn: &Arc<Txn>) -> Result<(), WrenError> {
        self.txn_manager.abort(txn)
    }

    pub fn db_schema(&self) -> DBSchema {
        self.storage.rl().db_schema().clone()
    }

    pub fn table_schema(&self, name: &str) -> Result<TableSchema, WrenError> {
        Ok(self.storage.rl().schema_of(name)?.clone())
    }

    pub fn optimizer_options(&self) -> OptimizerOptions {
        self.optimizer_options.rl().clone()
    }

    pub fn set_optimizer_options(&self, options: OptimizerOptions) {
        *self.optimizer_options.wl() = options;
    }

    /// Create a table from column definitions. Declaring a primary key
    /// also creates the `__refcounts_of_<T>` companion; declaring none
    /// appends a hidden auto-increment int64 key.
    pub fn create_table(
        &self,
        txn: &Arc<Txn>,
        table_name: &str,
        defs: &[ColumnDef],
    ) -> Result<(), WrenError> {
        if self.storage.rl().db_schema().find(table_name).is_some() {
            return Err(WrenError::schema(&format!(
                "create table '{}' error: table exists",
                table_name
            )));
        }

        let mut columns: Vec<ColumnSchema> = Vec::with_capacity(defs.len());
        let mut foreign_keys: Vec<ForeignKeySchema> = Vec::new();
        let mut pk_index: Option<usize> = None;
        let mut auto_gen = false;
        for (i, def) in defs.iter().enumerate() {
            columns.push(ColumnSchema::new(&def.name, def.field_type, def.size));
            if def.is_primary_key {
                if pk_index.is_some() {
                    return Err(WrenError::schema(&format!(
                        "create table '{}' error: multiple primary keys",
                        table_name
                    )));
                }
                if def.is_auto_gen && !def.field_type.is_integer() {
                    return Err(WrenError::schema(
                        "auto_increment requires an integer primary key",
                    ));
                }
                pk_index = Some(i);
                auto_gen = def.is_auto_gen;
            }
            if let Some((ref_table, ref_column)) = &def.foreign_ref {
                let storage = self.storage.rl();
                let schema = storage.db_schema().get(ref_table).ok_or_else(|| {
                    WrenError::schema(&format!(
                        "foreign key error: referred table '{}' doesn't exist",
                        ref_table
                    ))
                })?;
                let pk = schema.primary_key();
                if &pk.name != ref_column {
                    return Err(WrenError::schema(&format!(
                        "foreign key error: referred table '{}' has no primary key named '{}'",
                        ref_table, ref_column
                    )));
                }
                if pk.field_type != def.field_type {
                    return Err(WrenError::schema(&format!(
                        "foreign key error: referred key '{}'.'{}' has a different type",
                        ref_table, ref_column
                    )));
                }
                if pk.size != def.size {
                    return Err(WrenError::schema(&format!(
                        "foreign key error: referred key '{}'.'{}' has a different size",
                        ref_table, ref_column
                    )));
                }
                foreign_keys.push(ForeignKeySchema {
                    column_index: i as u32,
                    ref_table: ref_table.clone(),
                    ref_column: ref_column.clone(),
                    column_name: def.name.clone(),
                    field_type: def.field_type,
                    size: def.size,
                });
            }
        }

        let (pk_index, hidden_pk) = match pk_index {
            Some(i) => {
                // The companion table counting references to this
                // table's primary keys: (refcount int64, pk).
                let companion = ref_table_name(table_name);
                if self.storage.rl().db_schema().find(&companion).is_some() {
                    return Err(WrenError::schema(&format!(
                        "create ref table '{}' error: table exists",
                        companion
                    )));
                }
                let pk_col = columns[i].clone();
                let companion_schema = TableSchema::new(
                    &companion,
                    vec![
                        ColumnSchema::int64(&ref_column_name(&pk_col.name)),
                        pk_col,
                    ],
                    1,
                    false,
                    false,
                    vec![],
                );
                self.lock_manager()
                    .acquire_table_lock(&companion, LockMode::X, txn)?;
                self.storage.wl().create_table(&companion_schema)?;
                (i, false)
            }
            None => {
                // No declared key: append a hidden auto-increment one.
                columns.push(ColumnSchema::int64(&hidden_pk_name()));
                auto_gen = true;
                (columns.len() - 1, true)
            }
        };

        let schema = TableSchema::new(
            table_name,
            columns,
            pk_index,
            auto_gen,
            hidden_pk,
            foreign_keys,
        );
        self.lock_manager()
            .acquire_table_lock(table_name, LockMode::X, txn)?;
        self.storage.wl().create_table(&schema)?;
        if auto_gen {
            self.pk_gen.init(table_name, 1);
        }
        debug!("created table {}", table_name);
        Ok(())
    }

    /// Drop a table. Refused while any of its primary keys is still
    /// referenced; outgoing references of the dropped table are
    /// decremented first.
    pub fn drop_table(&self, txn: &Arc<Txn>, table_name: &str) -> Result<(), WrenError> {
        let schema = match self.storage.rl().db_schema().get(table_name) {
            Some(s) => s.clone(),
            None => {
                return Err(WrenError::schema(&format!(
                    "drop table error: table '{}' doesn't exist",
                    table_name
                )))
            }
        };
        self.lock_manager()
            .acquire_table_lock(table_name, LockMode::X, txn)?;

        // Refuse while referenced.
        if !schema.hidden_pk() {
            let companion = ref_table_name(table_name);
            self.lock_manager()
                .acquire_table_lock(&companion, LockMode::X, txn)?;
            let companion_schema = self.table_schema(&companion)?;
            let mut iter = self.storage.wl().get_iterator(&companion)?;
            while let Some((_, bytes)) = iter.next() {
                let row = decode_row(&companion_schema, &bytes)?;
                if row[0].as_i64().unwrap_or(0) > 0 {
                    return Err(WrenError::schema(&format!(
                        "drop table error: exists reference to {}={} (refcount > 0)",
                        schema.primary_key().name,
                        row[1]
                    )));
                }
            }
        }

        // Give back this table's own references before it goes away.
        if !schema.foreign_keys().is_empty() {
            let mut iter = self.storage.wl().get_iterator(table_name)?;
            let mut rows = Vec::new();
            while let Some((_, bytes)) = iter.next() {
                rows.push(decode_row(&schema, &bytes)?);
            }
            for fk in schema.foreign_keys() {
                let companion = ref_table_name(&fk.ref_table);
                self.lock_manager()
                    .acquire_table_lock(&companion, LockMode::X, txn)?;
            }
            let mut storage = self.storage.wl();
            for row in &rows {
                for fk in schema.foreign_keys() {
                    let companion = ref_table_name(&fk.ref_table);
                    let companion_schema = storage.schema_of(&companion)?.clone();
                    let key = encode_key(
                        &row[fk.column_index as usize],
                        companion_schema.primary_key(),
                    )?;
                    if let Some(bytes) = storage.search(&companion, &key)? {
                        let mut rc_row = decode_row(&companion_schema, &bytes)?;
                        let count = rc_row[0].as_i64().unwrap_or(0) - 1;
                        if count <= 0 {
                            storage.delete(&companion, &key)?;
                        } else {
                            rc_row[0] = Cell::Int64(count);
                            let bytes = encode_row(&companion_schema, &rc_row)?;
                            storage.update(&companion, &key, &bytes)?;
                        }
                    }
                }
            }
        }

        let mut storage = self.storage.wl();
        if !schema.hidden_pk() {
            storage.drop_table(&ref_table_name(table_name))?;
        }
        storage.drop_table(table_name)?;
        drop(storage);
        self.pk_gen.remove(table_name);
        self.stats.wl().remove(table_name);
        self.stats.wl().remove(&ref_table_name(table_name));
        debug!("dropped table {}", table_name);
        Ok(())
    }

    /// Rebuild the statistics of a table with a full scan.
    pub fn analyze(&self, txn: &Arc<Txn>, table_name: &str) -> Result<(), WrenError> {
        let schema = self.table_schema(table_name)?;
        self.lock_manager()
            .acquire_table_lock(table_name, LockMode::S, txn)?;
        let mut builder = StatisticsBuilder::new(schema.columns().len());
        let mut iter = self.storage.wl().get_iterator(table_name)?;
        while let Some((_, bytes)) = iter.next() {
            let row = decode_row(&schema, &bytes)?;
            builder.add_row(&row);
        }
        let stat = Arc::new(builder.finish());
        info!(
            "analyzed table {}: {} tuples",
            table_name,
            stat.tuple_num()
        );
        self.stats.wl().insert(table_name.to_string(), stat);
        Ok(())
    }

    /// The statistics of a table, if ANALYZE has run. Readers keep using
    /// the object they hold even if a new ANALYZE replaces it.
    pub fn get_table_stat(&self, table_name: &str) -> Option<Arc<TableStatistics>> {
        self.stats.rl().get(table_name).cloned()
    }

    pub fn update_stats(&self, table_name: &str, stat: TableStatistics) {
        self.stats
            .wl()
            .insert(table_name.to_string(), Arc::new(stat));
    }
}
