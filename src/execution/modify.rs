//! The modifying executors. Each acquires an IX lock on its table at
//! init and an X lock on every touched tuple, pushes an undo record
//! before applying a change, and keeps the `__refcounts_of_*` companion
//! tables in sync with the foreign keys it creates or removes. All of
//! them return the affected row count as a single-row output.

use crate::{
    error::WrenError,
    execution::{
        executor::{BoxedExecutor, Executor},
        expr_eval::BoundExpr,
        ExecContext,
    },
    storage::{
        schema::{ref_table_name, ForeignKeySchema, TableSchema},
        tuple::{encode_key, encode_row, Cell, Row},
    },
    transaction::{LockMode, ModifyRecord, ModifyType},
    utils::HandyRwLock,
};

// The referenced primary key must exist; then its refcount goes up by
// one (the refcount row is created at 1 on first reference).
fn fk_increment(ctx: &ExecContext, fk: &ForeignKeySchema, cell: &Cell) -> Result<(), WrenError> {
    let companion = ref_table_name(&fk.ref_table);
    let (companion_schema, ref_pk) = {
        let storage = ctx.storage.rl();
        let companion_schema = storage.schema_of(&companion)?.clone();
        let ref_pk = storage.schema_of(&fk.ref_table)?.primary_key().clone();
        (companion_schema, ref_pk)
    };
    let cell = cell.coerce_to(&ref_pk)?;
    let key = encode_key(&cell, &ref_pk)?;

    // Hold the referenced row with a shared lock so it cannot disappear
    // under us.
    ctx.lock_table_at_least(&fk.ref_table, LockMode::IS)?;
    ctx.lock_tuple_at_least(&fk.ref_table, &key, LockMode::S)?;
    if ctx.storage.wl().search(&fk.ref_table, &key)?.is_none() {
        return Err(WrenError::schema(&format!(
            "foreign key error: {}.{} = {} does not exist",
            fk.ref_table, fk.ref_column, cell
        )));
    }

    ctx.lock_table_at_least(&companion, LockMode::IX)?;
    ctx.lock_tuple_at_least(&companion, &key, LockMode::X)?;
    let mut storage = ctx.storage.wl();
    match storage.search(&companion, &key)? {
        Some(old) => {
            let mut row = crate::storage::tuple::decode_row(&companion_schema, &old)?;
            let count = row[0].as_i64().unwrap_or(0) + 1;
            row[0] = Cell::Int64(count);
            let bytes = encode_row(&companion_schema, &row)?;
            ctx.txn.push_modify(ModifyRecord {
                modify_type: ModifyType::Update,
                table_name: companion.clone(),
                key: key.clone(),
                old_value: Some(old),
            });
            storage.update(&companion, &key, &bytes)?;
        }
        None => {
            let row = vec![Cell::Int64(1), cell];
            let bytes = encode_row(&companion_schema, &row)?;
            ctx.txn.push_modify(ModifyRecord {
                modify_type: ModifyType::Insert,
                table_name: companion.clone(),
                key: key.clone(),
                old_value: None,
            });
            storage.insert(&companion, &key, &bytes)?;
        }
    }
    Ok(())
}

fn fk_decrement(ctx: &ExecContext, fk: &ForeignKeySchema, cell: &Cell) -> Result<(), WrenError> {
    let companion = ref_table_name(&fk.ref_table);
    let companion_schema = ctx.storage.rl().schema_of(&companion)?.clone();
    let pk_col = companion_schema.primary_key().clone();
    let cell = cell.coerce_to(&pk_col)?;
    let key = encode_key(&cell, &pk_col)?;

    ctx.lock_table_at_least(&companion, LockMode::IX)?;
    ctx.lock_tuple_at_least(&companion, &key, LockMode::X)?;
    let mut storage = ctx.storage.wl();
    let old = match storage.search(&companion, &key)? {
        Some(old) => old,
        // Nothing to give back; the reference was never counted.
        None => return Ok(()),
    };
    let mut row = crate::storage::tuple::decode_row(&companion_schema, &old)?;
    let count = row[0].as_i64().unwrap_or(0) - 1;
    if count <= 0 {
        ctx.txn.push_modify(ModifyRecord {
            modify_type: ModifyType::Delete,
            table_name: companion.clone(),
            key: key.clone(),
            old_value: Some(old),
        });
        storage.delete(&companion, &key)?;
    } else {
        row[0] = Cell::Int64(count);
        let bytes = encode_row(&companion_schema, &row)?;
        ctx.txn.push_modify(ModifyRecord {
            modify_type: ModifyType::Update,
            table_name: companion.clone(),
            key: key.clone(),
            old_value: Some(old),
        });
        storage.update(&companion, &key, &bytes)?;
    }
    Ok(())
}

pub struct InsertExecutor {
    ctx: ExecContext,
    table_name: String,
    schema: TableSchema,
    child: BoxedExecutor,
    done: bool,
    rows_out: u64,
}

impl InsertExecutor {
    pub fn new(
        ctx: ExecContext,
        table_name: &str,
        schema: TableSchema,
        child: BoxedExecutor,
    ) -> InsertExecutor {
        InsertExecutor {
            ctx,
            table_name: table_name.to_string(),
            schema,
            child,
            done: false,
            rows_out: 0,
        }
    }

    // Normalize one incoming row: check arity against the visible
    // columns, coerce cells to the column types, and fill in the
    // (possibly hidden) auto-generated primary key.
    fn complete_row(&self, input: Row) -> Result<Row, WrenError> {
        let visible = self.schema.visible_column_num();
        if input.len() != visible {
            return Err(WrenError::schema(&format!(
                "insert into {}: expected {} values, got {}",
                self.table_name,
                visible,
                input.len()
            )));
        }
        let mut row = Vec::with_capacity(self.schema.columns().len());
        for (i, cell) in input.into_iter().enumerate() {
            row.push(cell.coerce_to(&self.schema.columns()[i])?);
        }
        if self.schema.hidden_pk() {
            let pk = self.ctx.pk_gen.generate(&self.table_name);
            row.push(Cell::Int64(pk));
        } else if self.schema.auto_gen_pk() {
            let pk_index = self.schema.pk_index();
            let provided = row[pk_index].as_i64().unwrap_or(0);
            if provided == 0 {
                let pk = self.ctx.pk_gen.generate(&self.table_name);
                row[pk_index] =
                    Cell::Int64(pk).coerce_to(&self.schema.columns()[pk_index])?;
            } else {
                self.ctx.pk_gen.observe(&self.table_name, provided);
            }
        }
        Ok(row)
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.ctx.lock_table_at_least(&self.table_name, LockMode::IX)?;
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        // Drain the source first: the insertions below may reshape the
        // very tree a `INSERT INTO t SELECT ... FROM t` is scanning.
        let mut inputs = Vec::new();
        while let Some(input) = self.child.next()? {
            inputs.push(input);
        }
        let mut count: i64 = 0;
        for input in inputs {
            let row = self.complete_row(input)?;
            let pk_col = self.schema.primary_key();
            let key = encode_key(&row[self.schema.pk_index()], pk_col)?;
            self.ctx.lock_tuple_at_least(&self.table_name, &key, LockMode::X)?;
            if self.ctx.storage.wl().search(&self.table_name, &key)?.is_some() {
                return Err(WrenError::schema(&format!(
                    "duplicate primary key {} in table {}",
                    row[self.schema.pk_index()],
                    self.table_name
                )));
            }
            for fk in self.schema.foreign_keys() {
                fk_increment(&self.ctx, fk, &row[fk.column_index as usize])?;
            }
            let bytes = encode_row(&self.schema, &row)?;
            self.ctx.txn.push_modify(ModifyRecord {
                modify_type: ModifyType::Insert,
                table_name: self.table_name.clone(),
                key: key.clone(),
                old_value: None,
            });
            let inserted = self.ctx.storage.wl().insert(&self.table_name, &key, &bytes)?;
            assert!(inserted, "insert raced despite the tuple lock");
            count += 1;
        }
        self.rows_out += 1;
        Ok(Some(vec![Cell::Int64(count)]))
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}

pub struct DeleteExecutor {
    ctx: ExecContext,
    table_name: String,
    schema: TableSchema,
    child: BoxedExecutor,
    done: bool,
    rows_out: u64,
}

impl DeleteExecutor {
    pub fn new(
        ctx: ExecContext,
        table_name: &str,
        schema: TableSchema,
        child: BoxedExecutor,
    ) -> DeleteExecutor {
        DeleteExecutor {
            ctx,
            table_name: table_name.to_string(),
            schema,
            child,
            done: false,
            rows_out: 0,
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.ctx.lock_table_at_least(&self.table_name, LockMode::IX)?;
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        // Materialize the victims before touching the tree under the
        // child's cursor.
        let mut rows = Vec::new();
        while let Some(row) = self.child.next()? {
            rows.push(row);
        }
        let mut count: i64 = 0;
        for row in rows {
            let key = encode_key(&row[self.schema.pk_index()], self.schema.primary_key())?;
            self.ctx.lock_tuple_at_least(&self.table_name, &key, LockMode::X)?;
            let old = encode_row(&self.schema, &row)?;
            self.ctx.txn.push_modify(ModifyRecord {
                modify_type: ModifyType::Delete,
                table_name: self.table_name.clone(),
                key: key.clone(),
                old_value: Some(old),
            });
            let deleted = self.ctx.storage.wl().delete(&self.table_name, &key)?;
            assert!(deleted, "delete raced despite the tuple lock");
            for fk in self.schema.foreign_keys() {
                fk_decrement(&self.ctx, fk, &row[fk.column_index as usize])?;
            }
            count += 1;
        }
        self.rows_out += 1;
        Ok(Some(vec![Cell::Int64(count)]))
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}

pub struct UpdateExecutor {
    ctx: ExecContext,
    table_name: String,
    schema: TableSchema,
    child: BoxedExecutor,
    // (logical column index, bound new-value expression)
    updates: Vec<(usize, BoundExpr)>,
    done: bool,
    rows_out: u64,
}

impl UpdateExecutor {
    pub fn new(
        ctx: ExecContext,
        table_name: &str,
        schema: TableSchema,
        child: BoxedExecutor,
        updates: Vec<(usize, BoundExpr)>,
    ) -> UpdateExecutor {
        UpdateExecutor {
            ctx,
            table_name: table_name.to_string(),
            schema,
            child,
            updates,
            done: false,
            rows_out: 0,
        }
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.ctx.lock_table_at_least(&self.table_name, LockMode::IX)?;
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        // Materialize before modifying under the child's cursor.
        let mut rows = Vec::new();
        while let Some(row) = self.child.next()? {
            rows.push(row);
        }
        let mut count: i64 = 0;
        for row in rows {
            let mut new_row = row.clone();
            for (idx, expr) in &self.updates {
                let value = expr.eval(&row)?;
                new_row[*idx] = value.coerce_to(&self.schema.columns()[*idx])?;
            }
            let pk_col = self.schema.primary_key();
            let old_key = encode_key(&row[self.schema.pk_index()], pk_col)?;
            let new_key = encode_key(&new_row[self.schema.pk_index()], pk_col)?;
            self.ctx.lock_tuple_at_least(&self.table_name, &old_key, LockMode::X)?;
            let old_bytes = encode_row(&self.schema, &row)?;
            let new_bytes = encode_row(&self.schema, &new_row)?;

            if new_key == old_key {
                self.ctx.txn.push_modify(ModifyRecord {
                    modify_type: ModifyType::Update,
                    table_name: self.table_name.clone(),
                    key: old_key.clone(),
                    old_value: Some(old_bytes),
                });
                let updated = self
                    .ctx
                    .storage
                    .wl()
                    .update(&self.table_name, &old_key, &new_bytes)?;
                assert!(updated, "update raced despite the tuple lock");
            } else {
                // The primary key changed: delete + insert.
                self.ctx.lock_tuple_at_least(&self.table_name, &new_key, LockMode::X)?;
                if self
                    .ctx
                    .storage
                    .wl()
                    .search(&self.table_name, &new_key)?
                    .is_some()
                {
                    return Err(WrenError::schema(&format!(
                        "duplicate primary key {} in table {}",
                        new_row[self.schema.pk_index()],
                        self.table_name
                    )));
                }
                self.ctx.txn.push_modify(ModifyRecord {
                    modify_type: ModifyType::Delete,
                    table_name: self.table_name.clone(),
                    key: old_key.clone(),
                    old_value: Some(old_bytes),
                });
                self.ctx.storage.wl().delete(&self.table_name, &old_key)?;
                self.ctx.txn.push_modify(ModifyRecord {
                    modify_type: ModifyType::Insert,
                    table_name: self.table_name.clone(),
                    key: new_key.clone(),
                    old_value: None,
                });
                self.ctx.storage.wl().insert(&self.table_name, &new_key, &new_bytes)?;
            }

            // Adjust refcounts for changed foreign key columns.
            for fk in self.schema.foreign_keys() {
                let idx = fk.column_index as usize;
                if row[idx] != new_row[idx] {
                    fk_increment(&self.ctx, fk, &new_row[idx])?;
                    fk_decrement(&self.ctx, fk, &row[idx])?;
                }
            }
            count += 1;
        }
        self.rows_out += 1;
        Ok(Some(vec![Cell::Int64(count)]))
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
