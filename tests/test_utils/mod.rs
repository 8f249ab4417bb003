//! Shared helpers for the integration tests: temp databases, plan
//! construction shortcuts, and logging setup.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use wren_db::{
    catalog::db::{ColumnDef, DbOptions},
    plan::{plan::scan_column_id, BinaryOp, Expr, PlanNode, PredicateVec, RetType},
    storage::tuple::{Cell, Row},
    transaction::Txn,
    Database,
};

pub fn setup() {
    wren_db::utils::init_log();
}

/// A database in a temp directory; everything is removed on drop.
pub struct TestDb {
    pub dir: TempDir,
    pub path: PathBuf,
    pub db: Option<Database>,
}

impl TestDb {
    pub fn new() -> TestDb {
        Self::with_buf_pages(256)
    }

    pub fn with_buf_pages(max_buf_pages: usize) -> TestDb {
        setup();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wren.db");
        let db = Database::open(
            &path,
            DbOptions {
                create_if_missing: true,
                max_buf_pages,
            },
        )
        .unwrap();
        TestDb {
            dir,
            path,
            db: Some(db),
        }
    }

    pub fn db(&self) -> &Database {
        self.db.as_ref().unwrap()
    }

    /// Close and reopen the same file, for durability checks.
    pub fn reopen(&mut self) {
        let db = self.db.take().unwrap();
        db.close().unwrap();
        self.db = Some(Database::open_default(&self.path).unwrap());
    }
}

/// Run `defs` through create-table in a fresh transaction.
pub fn create_table(db: &Database, name: &str, defs: &[ColumnDef]) {
    let txn = db.begin();
    db.create_table(&txn, name, defs).unwrap();
    db.commit(&txn);
}

/// A column-reference expression for a scan of `table` planned with the
/// given table id.
pub fn col(db: &Database, table: &str, table_id: u32, name: &str) -> Expr {
    let schema = db.table_schema(table).unwrap();
    let idx = schema
        .column_index(name)
        .unwrap_or_else(|| panic!("no column {} in {}", name, table));
    let c = &schema.columns()[idx];
    Expr::column(
        scan_column_id(table_id, idx),
        table_id,
        idx,
        table,
        name,
        RetType::of_field(c.field_type),
    )
}

pub fn int(v: i64) -> Expr {
    Expr::LiteralInt(v)
}

pub fn float(v: f64) -> Expr {
    Expr::LiteralFloat(v)
}

pub fn cmp(op: BinaryOp, l: Expr, r: Expr) -> Expr {
    Expr::binary(op, l, r)
}

pub fn scan(db: &Database, table: &str, table_id: u32, predicate: Option<Expr>) -> PlanNode {
    let schema = db.table_schema(table).unwrap();
    PlanNode::seq_scan(&schema, table_id, table, PredicateVec::create(predicate))
}

/// INSERT INTO table VALUES rows; returns the inserted row count.
pub fn insert_values(db: &Database, txn: &Arc<Txn>, table: &str, rows: Vec<Row>) -> i64 {
    let plan = PlanNode::insert(PlanNode::print(rows), table);
    let out = db.execute(&plan, txn).unwrap();
    out[0][0].as_i64().unwrap()
}

/// Insert rows in an auto-committed transaction.
pub fn insert_committed(db: &Database, table: &str, rows: Vec<Row>) -> i64 {
    let txn = db.begin();
    let n = insert_values(db, &txn, table, rows);
    db.commit(&txn);
    n
}

/// All rows of a table (visible columns only), in primary key order.
pub fn select_all(db: &Database, table: &str) -> Vec<Row> {
    let txn = db.begin();
    let rows = select_all_in(db, &txn, table);
    db.commit(&txn);
    rows
}

pub fn select_all_in(db: &Database, txn: &Arc<Txn>, table: &str) -> Vec<Row> {
    let schema = db.table_schema(table).unwrap();
    let visible = schema.visible_column_num();
    let plan = scan(db, table, 0, None);
    let rows = db.run_plan(&plan, txn).unwrap();
    rows.into_iter()
        .map(|row| row.into_iter().take(visible).collect())
        .collect()
}

pub fn i64_cell(v: i64) -> Cell {
    Cell::Int64(v)
}

pub fn f64_cell(v: f64) -> Cell {
    Cell::Float64(v)
}

pub fn str_cell(s: &str) -> Cell {
    Cell::String(s.to_string())
}
