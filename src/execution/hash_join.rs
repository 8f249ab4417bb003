use std::collections::HashMap;

use crate::{
    error::WrenError,
    execution::{
        executor::{BoxedExecutor, Executor},
        expr_eval::{eval_all, hash_key_bytes, BoundExpr},
    },
    plan::RetType,
    storage::tuple::Row,
};

/// Hash join. `init` drains the build (left) side into a multimap keyed
/// by the concatenated hash expressions; `next` probes with each right
/// row and emits every match that also satisfies the residual
/// predicate, in probe-then-match order.
pub struct HashJoinExecutor {
    build: BoxedExecutor,
    probe: BoxedExecutor,
    build_exprs: Vec<BoundExpr>,
    probe_exprs: Vec<BoundExpr>,
    /// Promoted type per key pair, so 1 (int) and 1.0 (float) collide
    /// when a key mixes the two.
    key_types: Vec<RetType>,
    // Bound over the concatenated (build ++ probe) schema.
    predicate: Vec<BoundExpr>,
    table: HashMap<Vec<u8>, Vec<Row>>,
    cur_probe: Option<(Row, Vec<u8>)>,
    match_idx: usize,
    rows_out: u64,
}

impl HashJoinExecutor {
    pub fn new(
        build: BoxedExecutor,
        probe: BoxedExecutor,
        build_exprs: Vec<BoundExpr>,
        probe_exprs: Vec<BoundExpr>,
        key_types: Vec<RetType>,
        predicate: Vec<BoundExpr>,
    ) -> HashJoinExecutor {
        HashJoinExecutor {
            build,
            probe,
            build_exprs,
            probe_exprs,
            key_types,
            predicate,
            table: HashMap::new(),
            cur_probe: None,
            match_idx: 0,
            rows_out: 0,
        }
    }

}

fn key_of(
    row: &[crate::storage::tuple::Cell],
    exprs: &[BoundExpr],
    key_types: &[RetType],
) -> Result<Vec<u8>, WrenError> {
    let mut key = Vec::new();
    for (e, ty) in exprs.iter().zip(key_types.iter()) {
        let cell = e.eval(row)?;
        hash_key_bytes(&cell, *ty, &mut key)?;
    }
    Ok(key)
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.build.init()?;
        self.probe.init()?;
        self.table.clear();
        self.cur_probe = None;
        self.match_idx = 0;
        // The build side is consumed to completion before any probe row.
        while let Some(row) = self.build.next()? {
            let key = key_of(&row, &self.build_exprs, &self.key_types)?;
            self.table.entry(key).or_insert_with(Vec::new).push(row);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        loop {
            if let Some((probe_row, key)) = &self.cur_probe {
                if let Some(matches) = self.table.get(key) {
                    while self.match_idx < matches.len() {
                        let mut combined = matches[self.match_idx].clone();
                        combined.extend(probe_row.iter().cloned());
                        self.match_idx += 1;
                        if eval_all(&self.predicate, &combined)? {
                            self.rows_out += 1;
                            return Ok(Some(combined));
                        }
                    }
                }
                self.cur_probe = None;
            }
            match self.probe.next()? {
                Some(row) => {
                    let key = key_of(&row, &self.probe_exprs, &self.key_types)?;
                    self.cur_probe = Some((row, key));
                    self.match_idx = 0;
                }
                None => return Ok(None),
            }
        }
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
