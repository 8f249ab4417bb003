mod test_utils;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rand::prelude::*;
use test_utils::*;
use wren_db::{
    catalog::db::ColumnDef,
    plan::{BinaryOp, Expr, PlanNode},
    storage::tuple::Cell,
    transaction::{LockMode, TxnState},
    ErrorKind,
};

#[test]
fn test_2pl_and_lock_protocol_violations() {
    let tdb = TestDb::new();
    let db = tdb.db();
    let lm = db.lock_manager();

    // An aborted transaction gets no new locks.
    let t1 = db.begin();
    db.abort(&t1).unwrap();
    let err = lm.acquire_table_lock("t", LockMode::S, &t1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBehavior);

    // Releasing moves the txn into shrinking; 2PL rejects new locks.
    let t2 = db.begin();
    lm.acquire_table_lock("t", LockMode::S, &t2).unwrap();
    lm.release_table_lock("t", LockMode::S, &t2).unwrap();
    assert_eq!(t2.state(), TxnState::Shrinking);
    let err = lm.acquire_table_lock("t2", LockMode::S, &t2).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBehavior);

    // A tuple lock requires a covering table lock.
    let t3 = db.begin();
    let err = lm
        .acquire_tuple_lock("t", b"key", LockMode::X, &t3)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBehavior);
    lm.acquire_table_lock("t", LockMode::IS, &t3).unwrap();
    // IS is not enough for an exclusive tuple lock.
    let err = lm
        .acquire_tuple_lock("t", b"key", LockMode::X, &t3)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBehavior);
    lm.acquire_tuple_lock("t", b"key", LockMode::S, &t3).unwrap();
    // Intention modes are never valid on tuples.
    let err = lm
        .acquire_tuple_lock("t", b"key2", LockMode::IX, &t3)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBehavior);
    db.commit(&t3);
    assert_eq!(t3.held_table_mode("t"), None);
    assert_eq!(t3.held_tuple_mode("t", b"key"), None);
}

// Early tuple-lock release: the 2PL transition and the queue wake-up,
// mirroring the table-lock release coverage above.
#[test]
fn test_release_tuple_lock() {
    let tdb = TestDb::new();
    let db = tdb.db();
    let lm = db.lock_manager();

    let t1 = db.begin();
    lm.acquire_table_lock("t", LockMode::IS, &t1).unwrap();
    lm.acquire_tuple_lock("t", b"key", LockMode::S, &t1).unwrap();
    // Releasing a tuple lock that is not held is a protocol violation.
    let err = lm
        .release_tuple_lock("t", b"other", LockMode::S, &t1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBehavior);
    assert_eq!(t1.state(), TxnState::Growing);

    lm.release_tuple_lock("t", b"key", LockMode::S, &t1).unwrap();
    assert_eq!(t1.held_tuple_mode("t", b"key"), None);
    assert_eq!(t1.state(), TxnState::Shrinking);
    // 2PL: after the release no new lock may be taken.
    let err = lm.acquire_table_lock("t2", LockMode::IS, &t1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBehavior);
    db.commit(&t1);

    // Releasing the tuple lock wakes the waiters on its queue.
    let waiter = db.begin();
    let holder = db.begin();
    assert!(waiter.id() < holder.id());
    lm.acquire_table_lock("u", LockMode::IX, &holder).unwrap();
    lm.acquire_tuple_lock("u", b"row", LockMode::X, &holder).unwrap();
    lm.acquire_table_lock("u", LockMode::IS, &waiter).unwrap();

    let granted = AtomicUsize::new(0);
    crossbeam::scope(|s| {
        let waiter = &waiter;
        let granted = &granted;
        s.spawn(move |_| {
            // Older than the exclusive holder, so it waits instead of
            // dying.
            lm.acquire_tuple_lock("u", b"row", LockMode::S, waiter)
                .unwrap();
            granted.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(granted.load(Ordering::SeqCst), 0);
        lm.release_tuple_lock("u", b"row", LockMode::X, &holder).unwrap();
    })
    .unwrap();
    assert_eq!(granted.load(Ordering::SeqCst), 1);
    assert_eq!(waiter.held_tuple_mode("u", b"row"), Some(LockMode::S));
    assert_eq!(holder.state(), TxnState::Shrinking);
    db.commit(&waiter);
    db.commit(&holder);
}

#[test]
fn test_invalid_upgrades_rejected() {
    let tdb = TestDb::new();
    let db = tdb.db();
    let lm = db.lock_manager();

    let cases: Vec<(LockMode, Vec<LockMode>)> = vec![
        (LockMode::S, vec![LockMode::IS, LockMode::IX]),
        (LockMode::IX, vec![LockMode::IS, LockMode::S]),
        (
            LockMode::SIX,
            vec![LockMode::IS, LockMode::S, LockMode::IX],
        ),
        (
            LockMode::X,
            vec![LockMode::IS, LockMode::S, LockMode::IX, LockMode::SIX],
        ),
    ];
    for (held, requests) in cases {
        for req in requests {
            let txn = db.begin();
            lm.acquire_table_lock("t", held, &txn).unwrap();
            let err = lm.acquire_table_lock("t", req, &txn).unwrap_err();
            assert_eq!(
                err.kind(),
                ErrorKind::InvalidBehavior,
                "{} -> {} must be invalid",
                held,
                req
            );
            db.abort(&txn).unwrap();
        }
    }

    // Valid upgrades go through when uncontended.
    let txn = db.begin();
    lm.acquire_table_lock("t", LockMode::S, &txn).unwrap();
    lm.acquire_table_lock("t", LockMode::X, &txn).unwrap();
    assert_eq!(txn.held_table_mode("t"), Some(LockMode::X));
    db.commit(&txn);
}

// Scenario: three txns hold S; one upgrades and waits, a second
// upgrader is aborted with MultiUpgrade; once the remaining S goes
// away the queue head gets its X.
#[test]
fn test_multi_upgrade() {
    let tdb = TestDb::new();
    let db = tdb.db();
    let lm = db.lock_manager();

    let t0 = db.begin();
    let t1 = db.begin();
    let t2 = db.begin();
    lm.acquire_table_lock("t", LockMode::S, &t0).unwrap();
    lm.acquire_table_lock("t", LockMode::S, &t1).unwrap();
    lm.acquire_table_lock("t", LockMode::S, &t2).unwrap();

    crossbeam::scope(|s| {
        let t1_ref = &t1;
        let upgrader = s.spawn(move |_| {
            lm.acquire_table_lock("t", LockMode::X, t1_ref).unwrap();
        });
        std::thread::sleep(Duration::from_millis(50));

        // The second upgrader on the same queue must abort.
        let err = lm.acquire_table_lock("t", LockMode::X, &t2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MultiUpgrade);
        db.abort(&t2).unwrap();

        // The last shared holder leaves; the upgrader is granted.
        lm.release_table_lock("t", LockMode::S, &t0).unwrap();
        upgrader.join().unwrap();
        assert_eq!(t1.held_table_mode("t"), Some(LockMode::X));
    })
    .unwrap();

    db.commit(&t1);
    assert_eq!(t1.held_table_mode("t"), None);
}

// Scenario: the older T0 holds X on t2 and wants t1; the younger T1
// holds X on t1 and wants t2. T1 dies, T0 proceeds and commits.
#[test]
fn test_wait_die() {
    let tdb = TestDb::new();
    let db = tdb.db();
    let lm = db.lock_manager();

    create_table(db, "t1", &[ColumnDef::int64("a").primary_key()]);
    create_table(db, "t2", &[ColumnDef::int64("a").primary_key()]);

    let t0 = db.begin();
    let t1 = db.begin();
    assert!(t0.id() < t1.id());

    lm.acquire_table_lock("t2", LockMode::X, &t0).unwrap();
    lm.acquire_table_lock("t1", LockMode::X, &t1).unwrap();

    crossbeam::scope(|s| {
        let t0_ref = &t0;
        let older = s.spawn(move |_| {
            // Older than the holder: waits until t1 aborts.
            lm.acquire_table_lock("t1", LockMode::X, t0_ref).unwrap();
            let txn = t0_ref;
            assert_eq!(insert_values(db, txn, "t1", vec![vec![Cell::Int64(1)]]), 1);
            assert_eq!(insert_values(db, txn, "t2", vec![vec![Cell::Int64(2)]]), 1);
        });
        std::thread::sleep(Duration::from_millis(100));

        // Younger than the conflicting holder: dies.
        let err = lm.acquire_table_lock("t2", LockMode::X, &t1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlockAbort);
        db.abort(&t1).unwrap();

        older.join().unwrap();
    })
    .unwrap();
    db.commit(&t0);

    assert_eq!(select_all(db, "t1"), vec![vec![Cell::Int64(1)]]);
    assert_eq!(select_all(db, "t2"), vec![vec![Cell::Int64(2)]]);
}

// Waiters are granted in arrival order once the exclusive holder
// leaves.
#[test]
fn test_fifo_grant_order() {
    let tdb = TestDb::new();
    let db = tdb.db();
    let lm = db.lock_manager();

    // Waiters are older than the holder so that wait-die lets them
    // queue up.
    let w0 = db.begin();
    let w1 = db.begin();
    let holder = db.begin();
    lm.acquire_table_lock("t", LockMode::X, &holder).unwrap();

    let order = AtomicUsize::new(0);
    crossbeam::scope(|s| {
        let order = &order;
        let w0 = &w0;
        let w1 = &w1;
        s.spawn(move |_| {
            lm.acquire_table_lock("t", LockMode::S, w0).unwrap();
            let at = order.fetch_add(1, Ordering::SeqCst);
            assert_eq!(at, 0, "the first waiter must be granted first");
        });
        std::thread::sleep(Duration::from_millis(50));
        s.spawn(move |_| {
            // Incompatible with the S ahead of it, so it must come
            // second even though it arrives while both are waiting.
            lm.acquire_table_lock("t", LockMode::X, w1).unwrap();
            let at = order.fetch_add(1, Ordering::SeqCst);
            assert_eq!(at, 1, "the second waiter must not overtake");
        });
        std::thread::sleep(Duration::from_millis(50));

        lm.release_table_lock("t", LockMode::X, &holder).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // The S waiter got its lock; the X waiter still waits for it.
        assert_eq!(order.load(Ordering::SeqCst), 1);
        lm.release_table_lock("t", LockMode::S, &w0).unwrap();
    })
    .unwrap();
    assert_eq!(order.load(Ordering::SeqCst), 2);
    db.commit(&w0);
    db.commit(&w1);
    db.commit(&holder);
}

#[test]
fn test_abort_replays_undo_log() {
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
    insert_committed(
        db,
        "t",
        vec![
            vec![Cell::Int64(1), Cell::Int64(10)],
            vec![Cell::Int64(2), Cell::Int64(20)],
        ],
    );

    let txn = db.begin();
    // Insert a row, rewrite another, delete a third.
    insert_values(db, &txn, "t", vec![vec![Cell::Int64(3), Cell::Int64(30)]]);
    let b_idx = db.table_schema("t").unwrap().column_index("b").unwrap();
    let update = PlanNode::update(
        scan(
            db,
            "t",
            0,
            Some(cmp(BinaryOp::Eq, col(db, "t", 0, "a"), int(1))),
        ),
        "t",
        vec![(b_idx, int(99))],
    );
    db.execute(&update, &txn).unwrap();
    let delete = PlanNode::delete(
        scan(
            db,
            "t",
            0,
            Some(cmp(BinaryOp::Eq, col(db, "t", 0, "a"), int(2))),
        ),
        "t",
    );
    db.execute(&delete, &txn).unwrap();

    // The txn sees its own effects.
    let rows = select_all_in(db, &txn, "t");
    assert_eq!(
        rows,
        vec![
            vec![Cell::Int64(1), Cell::Int64(99)],
            vec![Cell::Int64(3), Cell::Int64(30)],
        ]
    );

    db.abort(&txn).unwrap();

    // Everything is back.
    assert_eq!(
        select_all(db, "t"),
        vec![
            vec![Cell::Int64(1), Cell::Int64(10)],
            vec![Cell::Int64(2), Cell::Int64(20)],
        ]
    );
}

// Ten concurrent transfers of 1 from A to B; with 2PL + wait-die and
// retries the balances stay consistent.
#[test]
fn test_transfer_money() {
    let tdb = TestDb::new();
    let db = tdb.db();
    create_table(
        db,
        "accounts",
        &[
            ColumnDef::varchar("name", 10).primary_key(),
            ColumnDef::int64("balance"),
        ],
    );
    insert_committed(
        db,
        "accounts",
        vec![
            vec![str_cell("A"), Cell::Int64(100)],
            vec![str_cell("B"), Cell::Int64(100)],
        ],
    );

    let balance_idx = db
        .table_schema("accounts")
        .unwrap()
        .column_index("balance")
        .unwrap();
    let transfer_plan = |who: &str, delta: i64| -> PlanNode {
        PlanNode::update(
            scan(
                db,
                "accounts",
                0,
                Some(cmp(
                    BinaryOp::Eq,
                    col(db, "accounts", 0, "name"),
                    Expr::LiteralString(who.to_string()),
                )),
            ),
            "accounts",
            vec![(
                balance_idx,
                cmp(BinaryOp::Add, col(db, "accounts", 0, "balance"), int(delta)),
            )],
        )
    };
    let withdraw = transfer_plan("A", -1);
    let deposit = transfer_plan("B", 1);

    crossbeam::scope(|s| {
        for worker in 0..10 {
            let withdraw = withdraw.clone();
            let deposit = deposit.clone();
            s.spawn(move |_| {
                let mut rng = StdRng::seed_from_u64(worker);
                loop {
                    let txn = db.begin();
                    let result = db
                        .execute(&withdraw, &txn)
                        .and_then(|_| db.execute(&deposit, &txn));
                    match result {
                        Ok(_) => {
                            db.commit(&txn);
                            return;
                        }
                        Err(e) if e.is_txn_abort() => {
                            db.abort(&txn).unwrap();
                            std::thread::sleep(Duration::from_millis(rng.gen_range(1, 20)));
                        }
                        Err(e) => panic!("transfer failed: {}", e),
                    }
                }
            });
        }
    })
    .unwrap();

    let rows = select_all(db, "accounts");
    assert_eq!(
        rows,
        vec![
            vec![str_cell("A"), Cell::Int64(90)],
            vec![str_cell("B"), Cell::Int64(110)],
        ]
    );
}
