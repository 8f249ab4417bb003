//! Cardinality estimation from per-column sketches.
//!
//! Columns are assumed uniformly distributed and independent: point
//! predicates use the Count-Min frequency, range predicates linearly
//! interpolate between the column's min and max, everything else is
//! selectivity 1. Equi-join output is `|L|·|R| / max(ndv_l, ndv_r)` per
//! key pair.

use crate::{
    catalog::stat::TableStatistics,
    plan::{BinaryOp, Expr, OutputSchema, PredicateVec},
    storage::{schema::TableSchema, tuple::Cell},
};

/// Estimated size and per-column distinct rates for a group of tables.
#[derive(Debug, Clone)]
pub struct Summary {
    pub size: f64,
    /// (output column id, ndv / size)
    pub distinct_rate: Vec<(u32, f64)>,
}

impl Summary {
    pub fn rate_of(&self, col_id: u32) -> Option<f64> {
        self.distinct_rate
            .iter()
            .find(|(id, _)| *id == col_id)
            .map(|(_, r)| *r)
    }
}

// `column op constant` (possibly mirrored): the logical column index
// and the constant cell.
fn point_shape(
    table_schema: &TableSchema,
    left: &Expr,
    right: &Expr,
    op: BinaryOp,
) -> Option<(usize, BinaryOp, Cell)> {
    let (column, literal, op) = match (left, right) {
        (col @ Expr::ColumnRef { .. }, lit) if lit.is_constant() => (col, lit, op),
        (lit, col @ Expr::ColumnRef { .. }) if lit.is_constant() => (col, lit, mirror(op)),
        _ => return None,
    };
    let column_index = match column {
        Expr::ColumnRef { column_index, .. } => *column_index,
        _ => return None,
    };
    let cell = match literal {
        Expr::LiteralInt(v) => Cell::Int64(*v),
        Expr::LiteralFloat(v) => Cell::Float64(*v),
        Expr::LiteralString(s) => Cell::String(s.clone()),
        _ => return None,
    };
    if column_index >= table_schema.columns().len() {
        return None;
    }
    Some((column_index, op, cell))
}

fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

/// Selectivity of `col op cell` against the column's statistics.
pub fn predicate_selectivity(
    stat: &TableStatistics,
    column_index: usize,
    op: BinaryOp,
    cell: &Cell,
) -> f64 {
    match op {
        BinaryOp::Eq => {
            let mut bytes = Vec::new();
            cell.hash_bytes(&mut bytes);
            let freq = stat.count_min(column_index).freq(&bytes);
            if stat.tuple_num() == 0 {
                0.0
            } else {
                (freq / stat.tuple_num() as f64).min(1.0)
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (min, max, v) = match (
                stat.min(column_index).as_f64(),
                stat.max(column_index).as_f64(),
                cell.as_f64(),
            ) {
                (Some(min), Some(max), Some(v)) => (min, max, v),
                // Strings fall back to no information.
                _ => return 1.0,
            };
            if max <= min {
                return 1.0;
            }
            let frac = ((v - min) / (max - min)).max(0.0).min(1.0);
            match op {
                BinaryOp::Lt | BinaryOp::Le => frac,
                _ => 1.0 - frac,
            }
        }
        _ => 1.0,
    }
}

/// Estimate the output of a base-table scan under a conjunctive
/// predicate. `fallback_tuple_num` is used when the table was never
/// analyzed; its columns then count as all-distinct.
pub fn estimate_table(
    leaf_schema: &OutputSchema,
    table_schema: &TableSchema,
    predicate: &PredicateVec,
    stat: Option<&TableStatistics>,
    fallback_tuple_num: u64,
) -> Summary {
    let tuple_num = stat.map(|s| s.tuple_num()).unwrap_or(fallback_tuple_num);
    let mut size = tuple_num as f64;

    if let Some(stat) = stat {
        for element in predicate.elements() {
            let shape = point_shape(
                table_schema,
                &element.expr.left,
                &element.expr.right,
                element.expr.op,
            );
            let sel = match shape {
                Some((column_index, op, cell)) => {
                    let cell = cell
                        .coerce_to(&table_schema.columns()[column_index])
                        .unwrap_or(cell);
                    predicate_selectivity(stat, column_index, op, &cell)
                }
                None => 1.0,
            };
            size *= sel;
        }
    }

    // A scan's output columns line up with the table's logical columns.
    let mut distinct_rate = Vec::with_capacity(leaf_schema.size());
    for (i, col) in leaf_schema.cols().iter().enumerate() {
        let rate = match stat {
            Some(stat) if i < table_schema.columns().len() => stat.distinct_rate(i),
            _ => 1.0,
        };
        distinct_rate.push((col.id, rate));
    }
    Summary {
        size,
        distinct_rate,
    }
}

/// Join size under equality keys: each pair divides the cross product
/// by the larger number of distinct values. Key columns that are not
/// bare column references count as all-distinct.
pub fn estimate_join_eq(
    keys: &[(Option<u32>, Option<u32>)],
    build: &Summary,
    probe: &Summary,
) -> Summary {
    let mut size = build.size * probe.size;
    for (bk, pk) in keys {
        let ndv_b = bk
            .and_then(|id| build.rate_of(id))
            .unwrap_or(1.0)
            .max(0.0)
            * build.size;
        let ndv_p = pk
            .and_then(|id| probe.rate_of(id))
            .unwrap_or(1.0)
            .max(0.0)
            * probe.size;
        size /= ndv_b.max(ndv_p).max(1.0);
    }

    let out_size = size.max(1.0);
    let mut distinct_rate = Vec::new();
    for summary in &[build, probe] {
        for (id, rate) in &summary.distinct_rate {
            let ndv = rate * summary.size;
            distinct_rate.push((*id, (ndv / out_size).min(1.0)));
        }
    }
    Summary {
        size,
        distinct_rate,
    }
}
