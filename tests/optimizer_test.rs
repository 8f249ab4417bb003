mod test_utils;

use test_utils::*;
use wren_db::{
    catalog::db::ColumnDef,
    catalog::stat::{CountMinSketch, TableStatistics},
    optimizer::{CostBasedOptimizer, LogicalOptimizer, OptimizerOptions},
    plan::{BinaryOp, CondExpr, Expr, PlanContent, PlanNode, PredicateVec},
    storage::tuple::Cell,
    Database,
};

fn scan_table<'a>(node: &'a PlanNode) -> Option<&'a str> {
    match &node.content {
        PlanContent::SeqScan { table_name, .. } => Some(table_name),
        PlanContent::RangeScan { table_name, .. } => Some(table_name),
        _ => None,
    }
}

#[test]
fn test_filter_pushes_through_project_into_scan() {
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

    let project = PlanNode::project(
        scan(db, "t", 0, None),
        vec![(col(db, "t", 0, "b"), "b".to_string())],
        500,
    );
    // Filter on the projection's output column.
    let filter_pred = PredicateVec::from_conds(vec![CondExpr::new(
        BinaryOp::Eq,
        Expr::column(500, 0, 1, "", "b", wren_db::plan::RetType::Int),
        Expr::LiteralInt(1),
    )]);
    let plan = PlanNode::filter(project, filter_pred);

    let optimized = LogicalOptimizer::optimize(plan, db);
    // Project on top, the predicate absorbed into the scan below.
    assert!(matches!(optimized.content, PlanContent::Project { .. }));
    match &optimized.ch.as_ref().unwrap().content {
        PlanContent::SeqScan { predicate, .. } => {
            assert_eq!(predicate.len(), 1);
            assert_eq!(predicate.to_string(), "t.b = 1");
        }
        other => panic!("expected SeqScan below Project, got {}", other.type_name()),
    }
}

#[test]
fn test_filter_commutes_with_order_and_distinct() {
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

    let order = PlanNode::order_by(
        PlanNode::distinct(scan(db, "t", 0, None)),
        vec![(col(db, "t", 0, "b"), true)],
    );
    let plan = PlanNode::filter(
        order,
        PredicateVec::from_conds(vec![CondExpr::new(
            BinaryOp::Gt,
            col(db, "t", 0, "b"),
            Expr::LiteralInt(3),
        )]),
    );

    let optimized = LogicalOptimizer::optimize(plan, db);
    assert!(matches!(optimized.content, PlanContent::Order { .. }));
    let distinct = optimized.ch.as_ref().unwrap();
    assert!(matches!(distinct.content, PlanContent::Distinct));
    // The filter sank all the way into the scan.
    match &distinct.ch.as_ref().unwrap().content {
        PlanContent::SeqScan { predicate, .. } => assert_eq!(predicate.len(), 1),
        other => panic!("expected SeqScan, got {}", other.type_name()),
    }
}

#[test]
fn test_join_predicates_split_and_hash_conversion() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "l",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("b"),
        ],
    );
    create_table(
        db,
        "r",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("b"),
        ],
    );

    let pred = PredicateVec::from_conds(vec![
        // The join key.
        CondExpr::new(BinaryOp::Eq, col(db, "l", 0, "a"), col(db, "r", 1, "a")),
        // Left-only and right-only conjuncts, one written reversed.
        CondExpr::new(BinaryOp::Gt, col(db, "l", 0, "b"), Expr::LiteralInt(5)),
        CondExpr::new(BinaryOp::Lt, Expr::LiteralInt(3), col(db, "r", 1, "b")),
    ]);
    let plan = PlanNode::join(scan(db, "l", 0, None), scan(db, "r", 1, None), pred);

    let optimized = LogicalOptimizer::optimize(plan, db);
    match &optimized.content {
        PlanContent::HashJoin {
            left_hash_exprs,
            right_hash_exprs,
            predicate,
        } => {
            assert_eq!(left_hash_exprs.len(), 1);
            assert_eq!(right_hash_exprs.len(), 1);
            assert_eq!(left_hash_exprs[0].to_string(), "l.a");
            assert_eq!(right_hash_exprs[0].to_string(), "r.a");
            assert!(predicate.is_empty(), "residual: {}", predicate);
        }
        other => panic!("expected HashJoin, got {}", other.type_name()),
    }
    // The single-side conjuncts moved into the scans.
    let children = vec![
        (optimized.ch.as_ref().unwrap(), "l"),
        (optimized.ch2.as_ref().unwrap(), "r"),
    ];
    for (child, table) in children {
        match &child.content {
            PlanContent::SeqScan {
                table_name,
                predicate,
                ..
            } => {
                assert_eq!(table_name.as_str(), table);
                assert_eq!(predicate.len(), 1, "predicate of {}: {}", table, predicate);
            }
            other => panic!("expected SeqScan, got {}", other.type_name()),
        }
    }
}

#[test]
fn test_derive_range_scan_from_pk_predicates() {
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

    // a > 3 AND a <= 7 AND b <> 0
    let pred = Expr::binary(
        BinaryOp::And,
        Expr::binary(
            BinaryOp::And,
            cmp(BinaryOp::Gt, col(db, "t", 0, "a"), int(3)),
            cmp(BinaryOp::Le, col(db, "t", 0, "a"), int(7)),
        ),
        cmp(BinaryOp::Ne, col(db, "t", 0, "b"), int(0)),
    );
    let plan = scan(db, "t", 0, Some(pred));
    let optimized = LogicalOptimizer::optimize(plan, db);
    match &optimized.content {
        PlanContent::RangeScan {
            range_l,
            range_r,
            predicate,
            ..
        } => {
            assert_eq!(range_l, &Some((Cell::Int64(3), false)));
            assert_eq!(range_r, &Some((Cell::Int64(7), true)));
            // The non-key conjunct stays as the residual predicate.
            assert_eq!(predicate.len(), 1);
        }
        other => panic!("expected RangeScan, got {}", other.type_name()),
    }

    // Equality pins both ends.
    let plan = scan(db, "t", 0, Some(cmp(BinaryOp::Eq, col(db, "t", 0, "a"), int(5))));
    let optimized = LogicalOptimizer::optimize(plan, db);
    match &optimized.content {
        PlanContent::RangeScan { range_l, range_r, .. } => {
            assert_eq!(range_l, &Some((Cell::Int64(5), true)));
            assert_eq!(range_r, &Some((Cell::Int64(5), true)));
        }
        other => panic!("expected RangeScan, got {}", other.type_name()),
    }
}

fn int_stats(tuple_num: u64, columns: usize) -> TableStatistics {
    TableStatistics::new(
        tuple_num,
        vec![Cell::Int64(tuple_num as i64); columns],
        vec![Cell::Int64(0); columns],
        vec![1.0; columns],
        (0..columns).map(|_| CountMinSketch::default()).collect(),
    )
}

fn join_order_plan(db: &Database) -> PlanNode {
    // (t1 join t2 on t1.a = t2.a) join t3 on t2.b = t3.b
    let inner = PlanNode::join(
        scan(db, "t1", 0, None),
        scan(db, "t2", 1, None),
        PredicateVec::from_conds(vec![CondExpr::new(
            BinaryOp::Eq,
            col(db, "t1", 0, "a"),
            col(db, "t2", 1, "a"),
        )]),
    );
    PlanNode::join(
        inner,
        scan(db, "t3", 2, None),
        PredicateVec::from_conds(vec![CondExpr::new(
            BinaryOp::Eq,
            col(db, "t2", 1, "b"),
            col(db, "t3", 2, "b"),
        )]),
    )
}

// Sizes 1e6 / 1e3 / 1e6 with all-distinct join keys: the DP must put
// the small table on the build side of the first hash join and join t3
// last.
#[test]
fn test_join_order_enumeration() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(db, "t1", &[ColumnDef::int64("a").primary_key()]);
    create_table(
        db,
        "t2",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("b"),
        ],
    );
    create_table(db, "t3", &[ColumnDef::int64("b").primary_key()]);
    db.update_stats("t1", int_stats(1_000_000, 1));
    db.update_stats("t2", int_stats(1_000, 2));
    db.update_stats("t3", int_stats(1_000_000, 1));

    let plan = LogicalOptimizer::optimize(join_order_plan(db), db);
    let optimized = CostBasedOptimizer::optimize(plan, db);

    // ((t2 ⋈ t1) ⋈ t3): build sides first.
    match &optimized.content {
        PlanContent::HashJoin { .. } => {}
        other => panic!("expected HashJoin at the root, got {}", other.type_name()),
    }
    let outer_build = optimized.ch.as_ref().unwrap();
    let outer_probe = optimized.ch2.as_ref().unwrap();
    assert_eq!(scan_table(outer_probe), Some("t3"), "t3 must be probed last");
    match &outer_build.content {
        PlanContent::HashJoin { .. } => {}
        other => panic!("expected inner HashJoin, got {}", other.type_name()),
    }
    assert_eq!(
        scan_table(outer_build.ch.as_ref().unwrap()),
        Some("t2"),
        "the small table drives the first hash join"
    );
    assert_eq!(scan_table(outer_build.ch2.as_ref().unwrap()), Some("t1"));
}

#[test]
fn test_cardinality_hints_override_estimates() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(db, "t1", &[ColumnDef::int64("a").primary_key()]);
    create_table(
        db,
        "t2",
        &[
            ColumnDef::int64("a").primary_key(),
            ColumnDef::int64("b"),
        ],
    );
    create_table(db, "t3", &[ColumnDef::int64("b").primary_key()]);
    db.update_stats("t1", int_stats(1_000_000, 1));
    db.update_stats("t2", int_stats(1_000, 2));
    db.update_stats("t3", int_stats(1_000_000, 1));

    // Claim that t1 is actually tiny; it should become the innermost
    // build side.
    let mut options = OptimizerOptions::default();
    options.true_cardinality_hints = Some(vec![(vec!["t1".to_string()], 1.0)]);
    db.set_optimizer_options(options);

    let plan = LogicalOptimizer::optimize(join_order_plan(db), db);
    let optimized = CostBasedOptimizer::optimize(plan, db);

    let inner = optimized.ch.as_ref().unwrap();
    match &inner.content {
        PlanContent::HashJoin { .. } => {}
        other => panic!("expected inner HashJoin, got {}", other.type_name()),
    }
    assert_eq!(
        scan_table(inner.ch.as_ref().unwrap()),
        Some("t1"),
        "the hinted-tiny table must build first"
    );
}

#[test]
fn test_plan_display_names_operators() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(db, "t", &[ColumnDef::int64("a").primary_key()]);
    let plan = PlanNode::limit(
        PlanNode::order_by(scan(db, "t", 0, None), vec![(col(db, "t", 0, "a"), true)]),
        10,
        0,
    );
    let text = plan.to_string();
    assert!(text.contains("Limit"), "{}", text);
    assert!(text.contains("Order"), "{}", text);
    assert!(text.contains("SeqScan [table: t]"), "{}", text);
}
