//! Single-pass hash aggregation keyed by the group-by expressions.
//! Supports sum, min, max, avg, count and count(*); the HAVING
//! predicate is applied after aggregation. Groups are emitted in
//! first-seen order.

use std::collections::HashMap;

use crate::{
    error::WrenError,
    execution::{
        executor::{BoxedExecutor, Executor},
        expr_eval::{self, truthy, BoundExpr},
    },
    plan::{AggFunc, Expr, OutputSchema, PredicateVec, RetType},
    storage::tuple::{Cell, Row},
};

struct AggSpec {
    func: AggFunc,
    arg: Option<BoundExpr>,
    arg_ret: RetType,
}

#[derive(Clone)]
enum AggState {
    SumInt(i64),
    SumFloat(f64),
    Min(Option<Cell>),
    Max(Option<Cell>),
    Count(i64),
    Avg { sum: f64, count: i64 },
}

impl AggState {
    fn new(spec: &AggSpec) -> AggState {
        match spec.func {
            AggFunc::Sum => {
                if spec.arg_ret == RetType::Float {
                    AggState::SumFloat(0.0)
                } else {
                    AggState::SumInt(0)
                }
            }
            AggFunc::Min => AggState::Min(None),
            AggFunc::Max => AggState::Max(None),
            AggFunc::Count | AggFunc::CountAll => AggState::Count(0),
            AggFunc::Avg => AggState::Avg { sum: 0.0, count: 0 },
        }
    }

    fn update(&mut self, cell: Option<Cell>) -> Result<(), WrenError> {
        match self {
            AggState::SumInt(acc) => {
                let v = cell
                    .and_then(|c| c.as_i64())
                    .ok_or_else(|| WrenError::schema("sum over a non-integer value"))?;
                *acc = acc.wrapping_add(v);
            }
            AggState::SumFloat(acc) => {
                let v = cell
                    .and_then(|c| c.as_f64())
                    .ok_or_else(|| WrenError::schema("sum over a non-numeric value"))?;
                *acc += v;
            }
            AggState::Min(acc) => {
                let cell = cell.ok_or_else(|| WrenError::schema("min without an argument"))?;
                match acc {
                    Some(prev) if *prev <= cell => {}
                    _ => *acc = Some(cell),
                }
            }
            AggState::Max(acc) => {
                let cell = cell.ok_or_else(|| WrenError::schema("max without an argument"))?;
                match acc {
                    Some(prev) if *prev >= cell => {}
                    _ => *acc = Some(cell),
                }
            }
            AggState::Count(acc) => *acc += 1,
            AggState::Avg { sum, count } => {
                let v = cell
                    .and_then(|c| c.as_f64())
                    .ok_or_else(|| WrenError::schema("avg over a non-numeric value"))?;
                *sum += v;
                *count += 1;
            }
        }
        Ok(())
    }

    fn finalize(self) -> Cell {
        match self {
            AggState::SumInt(v) => Cell::Int64(v),
            AggState::SumFloat(v) => Cell::Float64(v),
            AggState::Min(v) | AggState::Max(v) => v.unwrap_or(Cell::Int64(0)),
            AggState::Count(v) => Cell::Int64(v),
            AggState::Avg { sum, count } => {
                if count == 0 {
                    Cell::Float64(0.0)
                } else {
                    Cell::Float64(sum / count as f64)
                }
            }
        }
    }
}

struct Group {
    first_row: Row,
    states: Vec<AggState>,
}

pub struct AggregateExecutor {
    child: BoxedExecutor,
    group_exprs: Vec<BoundExpr>,
    output_exprs: Vec<BoundExpr>,
    having: Vec<BoundExpr>,
    aggs: Vec<AggSpec>,
    results: Vec<Row>,
    idx: usize,
    rows_out: u64,
}

impl AggregateExecutor {
    pub fn build(
        child: BoxedExecutor,
        child_schema: &OutputSchema,
        group_by_exprs: &[Expr],
        output_exprs: &[Expr],
        group_predicate: &PredicateVec,
    ) -> Result<AggregateExecutor, WrenError> {
        let mut aggs = Vec::new();
        let group_exprs = group_by_exprs
            .iter()
            .map(|e| expr_eval::bind(e, child_schema))
            .collect::<Result<Vec<_>, _>>()?;
        let output_exprs = output_exprs
            .iter()
            .map(|e| bind_agg(e, child_schema, &mut aggs))
            .collect::<Result<Vec<_>, _>>()?;
        let having = group_predicate
            .elements()
            .iter()
            .map(|e| bind_agg(&e.expr.to_expr(), child_schema, &mut aggs))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AggregateExecutor {
            child,
            group_exprs,
            output_exprs,
            having,
            aggs,
            results: Vec::new(),
            idx: 0,
            rows_out: 0,
        })
    }
}

// Bind an expression that may contain aggregate calls: each call gets a
// state slot and becomes an `AggRef`.
fn bind_agg(
    expr: &Expr,
    child_schema: &OutputSchema,
    aggs: &mut Vec<AggSpec>,
) -> Result<BoundExpr, WrenError> {
    match expr {
        Expr::Aggregate { func, arg, .. } => {
            let (bound_arg, arg_ret) = match arg {
                Some(arg) => (
                    Some(expr_eval::bind(arg, child_schema)?),
                    arg.ret_type(),
                ),
                None => (None, RetType::Int),
            };
            aggs.push(AggSpec {
                func: *func,
                arg: bound_arg,
                arg_ret,
            });
            Ok(BoundExpr::AggRef(aggs.len() - 1))
        }
        Expr::Binary {
            op, left, right, ..
        } => Ok(BoundExpr::Binary {
            op: *op,
            left: Box::new(bind_agg(left, child_schema, aggs)?),
            right: Box::new(bind_agg(right, child_schema, aggs)?),
        }),
        other => expr_eval::bind(other, child_schema),
    }
}

impl Executor for AggregateExecutor {
    fn init(&mut self) -> Result<(), WrenError> {
        self.child.init()?;
        self.results.clear();
        self.idx = 0;

        let mut order: Vec<Vec<u8>> = Vec::new();
        let mut groups: HashMap<Vec<u8>, Group> = HashMap::new();
        while let Some(row) = self.child.next()? {
            let mut key = Vec::new();
            for e in &self.group_exprs {
                e.eval(&row)?.hash_bytes(&mut key);
            }
            if !groups.contains_key(&key) {
                order.push(key.clone());
                groups.insert(
                    key.clone(),
                    Group {
                        first_row: row.clone(),
                        states: self.aggs.iter().map(AggState::new).collect(),
                    },
                );
            }
            let group = groups.get_mut(&key).unwrap();
            for (spec, state) in self.aggs.iter().zip(group.states.iter_mut()) {
                let arg = match &spec.arg {
                    Some(e) => Some(e.eval(&row)?),
                    None => None,
                };
                state.update(arg)?;
            }
        }

        // A global aggregate over empty input still yields one row.
        if groups.is_empty() && self.group_exprs.is_empty() {
            order.push(Vec::new());
            groups.insert(
                Vec::new(),
                Group {
                    first_row: Vec::new(),
                    states: self.aggs.iter().map(AggState::new).collect(),
                },
            );
        }

        for key in order {
            let group = groups.remove(&key).unwrap();
            let agg_values: Vec<Cell> = group.states.into_iter().map(AggState::finalize).collect();
            let mut pass = true;
            for e in &self.having {
                if !truthy(&e.eval_with_aggs(&group.first_row, &agg_values)?) {
                    pass = false;
                    break;
                }
            }
            if !pass {
                continue;
            }
            let mut out = Vec::with_capacity(self.output_exprs.len());
            for e in &self.output_exprs {
                out.push(e.eval_with_aggs(&group.first_row, &agg_values)?);
            }
            self.results.push(out);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Row>, WrenError> {
        if self.idx >= self.results.len() {
            return Ok(None);
        }
        let row = self.results[self.idx].clone();
        self.idx += 1;
        self.rows_out += 1;
        Ok(Some(row))
    }

    fn total_output_size(&self) -> u64 {
        self.rows_out
    }
}
