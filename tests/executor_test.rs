mod test_utils;

use test_utils::*;
use wren_db::{
    catalog::db::ColumnDef,
    plan::{AggFunc, BinaryOp, CondExpr, Expr, PlanNode, PredicateVec},
    storage::tuple::Cell,
    ErrorKind,
};

// CREATE TABLE t(a int64 primary key, b float64);
// INSERT INTO t VALUES (1, 2.5), (2, 3.5);
// SELECT * FROM t ORDER BY a;
#[test]
fn test_basic_insert_select() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "t",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::float64("b"),
        ],
    );

    let txn = db.begin();
    let n = insert_values(
        db,
        &txn,
        "t",
        vec![
            vec![i64_cell(1), f64_cell(2.5)],
            vec![i64_cell(2), f64_cell(3.5)],
        ],
    );
    assert_eq!(n, 2);
    db.commit(&txn);

    let txn = db.begin();
    let plan = PlanNode::order_by(
        scan(db, "t", 0, None),
        vec![(col(db, "t", 0, "a"), true)],
    );
    let rows = db.execute(&plan, &txn).unwrap();
    db.commit(&txn);
    assert_eq!(
        rows,
        vec![
            vec![i64_cell(1), f64_cell(2.5)],
            vec![i64_cell(2), f64_cell(3.5)],
        ]
    );
}

// CREATE TABLE A(a int64 auto_increment primary key);
// CREATE TABLE B(a int64 foreign key references A(a));
// INSERT INTO A VALUES (0); INSERT INTO B VALUES (1);
// DROP TABLE A; -- refused: refcount > 0
#[test]
fn test_fk_refuses_drop() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "A",
        &[ColumnDef::int64("a").primary_key().auto_increment()],
    );
    create_table(db, "B", &[ColumnDef::int64("a").references("A", "a")]);

    // Inserting 0 into the auto-increment key generates 1.
    insert_committed(db, "A", vec![vec![i64_cell(0)]]);
    assert_eq!(select_all(db, "A"), vec![vec![i64_cell(1)]]);
    insert_committed(db, "B", vec![vec![i64_cell(1)]]);

    let txn = db.begin();
    let err = db.drop_table(&txn, "A").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(err.to_string().contains("refcount > 0"), "{}", err);
    db.abort(&txn).unwrap();

    // Referencing a missing key is refused too.
    let txn = db.begin();
    let plan = PlanNode::insert(PlanNode::print(vec![vec![i64_cell(42)]]), "B");
    let err = db.execute(&plan, &txn).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    db.abort(&txn).unwrap();

    // Dropping the referencing table releases the refcount; then A can
    // go.
    let txn = db.begin();
    db.drop_table(&txn, "B").unwrap();
    db.drop_table(&txn, "A").unwrap();
    db.commit(&txn);
    assert!(db.table_schema("A").is_err());
}

#[test]
fn test_duplicate_primary_key() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(db, "t", &[ColumnDef::int64("a").primary_key()]);
    insert_committed(db, "t", vec![vec![i64_cell(5)]]);

    let txn = db.begin();
    let plan = PlanNode::insert(PlanNode::print(vec![vec![i64_cell(5)]]), "t");
    let err = db.execute(&plan, &txn).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(err.to_string().contains("duplicate"), "{}", err);
    db.abort(&txn).unwrap();
    assert_eq!(select_all(db, "t").len(), 1);
}

#[test]
fn test_type_checks_on_insert() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "t",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::varchar("s", 4),
        ],
    );

    let txn = db.begin();
    // Wrong type.
    let plan = PlanNode::insert(
        PlanNode::print(vec![vec![i64_cell(1), i64_cell(2)]]),
        "t",
    );
    assert_eq!(db.execute(&plan, &txn).unwrap_err().kind(), ErrorKind::Schema);
    // Oversized string.
    let plan = PlanNode::insert(
        PlanNode::print(vec![vec![i64_cell(1), str_cell("too long")]]),
        "t",
    );
    assert_eq!(db.execute(&plan, &txn).unwrap_err().kind(), ErrorKind::Schema);
    // Wrong arity.
    let plan = PlanNode::insert(PlanNode::print(vec![vec![i64_cell(1)]]), "t");
    assert_eq!(db.execute(&plan, &txn).unwrap_err().kind(), ErrorKind::Schema);
    db.abort(&txn).unwrap();
}

#[test]
fn test_hidden_auto_pk() {
    let tdb = TestDb::new();
    let db = tdb.db();
    // No declared primary key: a hidden auto-increment one is added.
    create_table(db, "log", &[ColumnDef::varchar("msg", 32)]);
    let schema = db.table_schema("log").unwrap();
    assert!(schema.hidden_pk());
    assert_eq!(schema.visible_column_num(), 1);

    insert_committed(
        db,
        "log",
        vec![
            vec![str_cell("one")],
            vec![str_cell("two")],
            vec![str_cell("three")],
        ],
    );
    // Insertion order preserved by the hidden increasing key.
    assert_eq!(
        select_all(db, "log"),
        vec![
            vec![str_cell("one")],
            vec![str_cell("two")],
            vec![str_cell("three")],
        ]
    );
}

#[test]
fn test_joins_nested_loop_and_hash() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "users",
        &[
            ColumnDef::int64("id").primary_key(),
            ColumnDef::varchar("name", 16),
        ],
    );
    create_table(
        db,
        "orders",
        &[
            ColumnDef::int64("id").primary_key(),
            ColumnDef::int64("user_id"),
        ],
    );
    insert_committed(
        db,
        "users",
        vec![
            vec![i64_cell(1), str_cell("ann")],
            vec![i64_cell(2), str_cell("bob")],
        ],
    );
    insert_committed(
        db,
        "orders",
        vec![
            vec![i64_cell(10), i64_cell(1)],
            vec![i64_cell(11), i64_cell(2)],
            vec![i64_cell(12), i64_cell(1)],
        ],
    );

    let join_pred = PredicateVec::from_conds(vec![CondExpr::new(
        BinaryOp::Eq,
        col(db, "users", 0, "id"),
        col(db, "orders", 1, "user_id"),
    )]);
    let plan = PlanNode::join(
        scan(db, "users", 0, None),
        scan(db, "orders", 1, None),
        join_pred,
    );

    // The optimizer may flip build and probe, so compare the joins as
    // (order id, user name) pairs.
    let pairs = |rows: &[Vec<Cell>]| -> Vec<(i64, String)> {
        let mut v: Vec<(i64, String)> = rows
            .iter()
            .map(|r| {
                let order_id = r
                    .iter()
                    .filter_map(|c| c.as_i64())
                    .find(|v| *v >= 10)
                    .unwrap();
                let name = r
                    .iter()
                    .find_map(|c| c.as_str().map(|s| s.to_string()))
                    .unwrap();
                (order_id, name)
            })
            .collect();
        v.sort();
        v
    };

    // Nested loop, unoptimized.
    let txn = db.begin();
    let nl_rows = db.run_plan(&plan, &txn).unwrap();
    db.commit(&txn);
    let expected = vec![
        (10, "ann".to_string()),
        (11, "bob".to_string()),
        (12, "ann".to_string()),
    ];
    assert_eq!(pairs(&nl_rows), expected);

    // The optimizer turns it into a hash join; results agree.
    let txn = db.begin();
    let hash_rows = db.execute(&plan, &txn).unwrap();
    db.commit(&txn);
    assert_eq!(pairs(&hash_rows), expected);
}

#[test]
fn test_aggregate_group_by_having() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "sales",
        &[
            ColumnDef::int64("id").primary_key(),
            ColumnDef::varchar("region", 8),
            ColumnDef::int64("amount"),
        ],
    );
    insert_committed(
        db,
        "sales",
        vec![
            vec![i64_cell(1), str_cell("east"), i64_cell(10)],
            vec![i64_cell(2), str_cell("west"), i64_cell(20)],
            vec![i64_cell(3), str_cell("east"), i64_cell(30)],
            vec![i64_cell(4), str_cell("west"), i64_cell(5)],
            vec![i64_cell(5), str_cell("north"), i64_cell(7)],
        ],
    );

    let region = || col(db, "sales", 0, "region");
    let amount = || col(db, "sales", 0, "amount");
    let plan = PlanNode::aggregate(
        scan(db, "sales", 0, None),
        vec![region()],
        vec![
            (region(), "region".to_string()),
            (Expr::aggregate(AggFunc::Sum, Some(amount())), "total".to_string()),
            (Expr::aggregate(AggFunc::CountAll, None), "n".to_string()),
            (Expr::aggregate(AggFunc::Min, Some(amount())), "lo".to_string()),
            (Expr::aggregate(AggFunc::Max, Some(amount())), "hi".to_string()),
            (Expr::aggregate(AggFunc::Avg, Some(amount())), "avg".to_string()),
        ],
        // HAVING sum(amount) > 10
        PredicateVec::from_conds(vec![CondExpr::new(
            BinaryOp::Gt,
            Expr::aggregate(AggFunc::Sum, Some(amount())),
            Expr::LiteralInt(10),
        )]),
        9000,
    );

    let txn = db.begin();
    let rows = db.execute(&plan, &txn).unwrap();
    db.commit(&txn);

    // Groups arrive in first-seen order; "north" (sum 7) is filtered
    // out by HAVING.
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0],
        vec![
            str_cell("east"),
            i64_cell(40),
            i64_cell(2),
            i64_cell(10),
            i64_cell(30),
            f64_cell(20.0),
        ]
    );
    assert_eq!(
        rows[1],
        vec![
            str_cell("west"),
            i64_cell(25),
            i64_cell(2),
            i64_cell(5),
            i64_cell(20),
            f64_cell(12.5),
        ]
    );
}

#[test]
fn test_distinct_limit_offset_order_desc() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "t",
        &[
            ColumnDef::int64("id").primary_key(),
            ColumnDef::int64("v"),
        ],
    );
    insert_committed(
        db,
        "t",
        vec![
            vec![i64_cell(1), i64_cell(3)],
            vec![i64_cell(2), i64_cell(1)],
            vec![i64_cell(3), i64_cell(3)],
            vec![i64_cell(4), i64_cell(2)],
            vec![i64_cell(5), i64_cell(1)],
        ],
    );

    // SELECT DISTINCT v FROM t ORDER BY v DESC LIMIT 2 OFFSET 1
    let project = PlanNode::project(
        scan(db, "t", 0, None),
        vec![(col(db, "t", 0, "v"), "v".to_string())],
        7000,
    );
    let distinct = PlanNode::distinct(project);
    let order = PlanNode::order_by(
        distinct,
        vec![(
            Expr::column(7000, 0, 1, "", "v", wren_db::plan::RetType::Int),
            false,
        )],
    );
    let plan = PlanNode::limit(order, 2, 1);

    let txn = db.begin();
    let rows = db.execute(&plan, &txn).unwrap();
    db.commit(&txn);
    assert_eq!(rows, vec![vec![i64_cell(2)], vec![i64_cell(1)]]);
}

#[test]
fn test_update_changes_primary_key() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "t",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("b"),
        ],
    );
    insert_committed(db, "t", vec![vec![i64_cell(1), i64_cell(10)]]);

    // UPDATE t SET a = 5 WHERE a = 1
    let txn = db.begin();
    let plan = PlanNode::update(
        scan(
            db,
            "t",
            0,
            Some(cmp(BinaryOp::Eq, col(db, "t", 0, "a"), int(1))),
        ),
        "t",
        vec![(0, int(5))],
    );
    let out = db.execute(&plan, &txn).unwrap();
    assert_eq!(out[0][0], i64_cell(1));
    db.commit(&txn);

    assert_eq!(select_all(db, "t"), vec![vec![i64_cell(5), i64_cell(10)]]);
}

#[test]
fn test_insert_from_select() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "src",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("b"),
        ],
    );
    create_table(
        db,
        "dst",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("b"),
        ],
    );
    insert_committed(
        db,
        "src",
        vec![
            vec![i64_cell(1), i64_cell(100)],
            vec![i64_cell(2), i64_cell(200)],
        ],
    );

    let txn = db.begin();
    let plan = PlanNode::insert(scan(db, "src", 0, None), "dst");
    let out = db.execute(&plan, &txn).unwrap();
    assert_eq!(out[0][0], i64_cell(2));
    db.commit(&txn);
    assert_eq!(select_all(db, "dst"), select_all(db, "src"));
}

#[test]
fn test_range_scan_plan() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(db, "t", &[ColumnDef::int64("a").primary_key()]);
    insert_committed(db, "t", (0..20).map(|i| vec![i64_cell(i)]).collect());

    let schema = db.table_schema("t").unwrap();
    // a in (5, 12]
    let plan = PlanNode::range_scan(
        &schema,
        0,
        "t",
        Some((Cell::Int64(5), false)),
        Some((Cell::Int64(12), true)),
        PredicateVec::new(),
    );
    let txn = db.begin();
    let rows = db.run_plan(&plan, &txn).unwrap();
    db.commit(&txn);
    let got: Vec<i64> = rows.iter().map(|r| r[0].as_i64().unwrap()).collect();
    assert_eq!(got, (6..=12).collect::<Vec<_>>());
}

#[test]
fn test_durability_across_reopen() {
    let mut tdb = TestDb::new();
    create_table(
        tdb.db(),
        "t",
        &[
            ColumnDef::int64("a").primary_key().auto_increment(),
            ColumnDef::varchar("s", 16),
        ],
    );
    insert_committed(
        tdb.db(),
        "t",
        vec![
            vec![i64_cell(0), str_cell("first")],
            vec![i64_cell(0), str_cell("second")],
        ],
    );

    tdb.reopen();

    let db = tdb.db();
    assert_eq!(
        select_all(db, "t"),
        vec![
            vec![i64_cell(1), str_cell("first")],
            vec![i64_cell(2), str_cell("second")],
        ]
    );
    // The auto-increment key continues after reopen.
    insert_committed(db, "t", vec![vec![i64_cell(0), str_cell("third")]]);
    assert_eq!(
        select_all(db, "t")[2],
        vec![i64_cell(3), str_cell("third")]
    );
}

#[test]
fn test_analyze_builds_statistics() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "t",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("bucket"),
        ],
    );
    insert_committed(
        db,
        "t",
        (0..500)
            .map(|i| vec![i64_cell(i), i64_cell(i % 10)])
            .collect(),
    );

    assert!(db.get_table_stat("t").is_none());
    let txn = db.begin();
    db.analyze(&txn, "t").unwrap();
    db.commit(&txn);

    let stat = db.get_table_stat("t").unwrap();
    assert_eq!(stat.tuple_num(), 500);
    assert_eq!(stat.min(0), &i64_cell(0));
    assert_eq!(stat.max(0), &i64_cell(499));
    // The key column is all-distinct, the bucket column has 10 values.
    assert!(stat.distinct_rate(0) > 0.9);
    assert!(stat.distinct_rate(1) < 0.1);
    // Count-min never underestimates.
    let mut bytes = Vec::new();
    i64_cell(3).hash_bytes(&mut bytes);
    assert!(stat.count_min(1).freq(&bytes) >= 50.0);
}
