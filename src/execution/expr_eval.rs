//! Expression compilation and evaluation. Column references are
//! resolved to row positions against the input operator's output schema
//! once, at executor build time.

use crate::{
    error::WrenError,
    plan::{BinaryOp, Expr, OutputSchema, PredicateVec, RetType},
    storage::tuple::Cell,
};

#[derive(Debug, Clone)]
pub enum BoundExpr {
    /// Row position of a resolved column reference.
    Slot(usize),
    LiteralInt(i64),
    LiteralFloat(f64),
    LiteralString(String),
    Binary {
        op: BinaryOp,
        left: Box<BoundExpr>,
        right: Box<BoundExpr>,
    },
    /// Index into the aggregate-value array; produced only by the
    /// aggregate executor's binder.
    AggRef(usize),
}

pub fn bind(expr: &Expr, schema: &OutputSchema) -> Result<BoundExpr, WrenError> {
    match expr {
        Expr::ColumnRef {
            id,
            table_name,
            column_name,
            ..
        } => match schema.find_by_id(*id) {
            Some(i) => Ok(BoundExpr::Slot(i)),
            None => Err(WrenError::schema(&format!(
                "unknown column {}.{} (id {})",
                table_name, column_name, id
            ))),
        },
        Expr::LiteralInt(v) => Ok(BoundExpr::LiteralInt(*v)),
        Expr::LiteralFloat(v) => Ok(BoundExpr::LiteralFloat(*v)),
        Expr::LiteralString(s) => Ok(BoundExpr::LiteralString(s.clone())),
        Expr::Binary {
            op, left, right, ..
        } => Ok(BoundExpr::Binary {
            op: *op,
            left: Box::new(bind(left, schema)?),
            right: Box::new(bind(right, schema)?),
        }),
        Expr::Aggregate { .. } => Err(WrenError::schema(
            "aggregate call outside an aggregation context",
        )),
    }
}

pub fn bind_predicate(
    predicate: &PredicateVec,
    schema: &OutputSchema,
) -> Result<Vec<BoundExpr>, WrenError> {
    predicate
        .elements()
        .iter()
        .map(|e| bind(&e.expr.to_expr(), schema))
        .collect()
}

pub fn truthy(cell: &Cell) -> bool {
    match cell {
        Cell::Int32(v) => *v != 0,
        Cell::Int64(v) => *v != 0,
        Cell::Float64(v) => *v != 0.0,
        Cell::String(s) => !s.is_empty(),
    }
}

pub fn eval_all(exprs: &[BoundExpr], row: &[Cell]) -> Result<bool, WrenError> {
    for e in exprs {
        if !truthy(&e.eval(row)?) {
            return Ok(false);
        }
    }
    Ok(true)
}

impl BoundExpr {
    pub fn eval(&self, row: &[Cell]) -> Result<Cell, WrenError> {
        self.eval_with_aggs(row, &[])
    }

    pub fn eval_with_aggs(&self, row: &[Cell], aggs: &[Cell]) -> Result<Cell, WrenError> {
        match self {
            BoundExpr::Slot(i) => row
                .get(*i)
                .cloned()
                .ok_or_else(|| WrenError::schema(&format!("row has no column {}", i))),
            BoundExpr::LiteralInt(v) => Ok(Cell::Int64(*v)),
            BoundExpr::LiteralFloat(v) => Ok(Cell::Float64(*v)),
            BoundExpr::LiteralString(s) => Ok(Cell::String(s.clone())),
            BoundExpr::AggRef(i) => aggs
                .get(*i)
                .cloned()
                .ok_or_else(|| WrenError::schema("aggregate value out of range")),
            BoundExpr::Binary { op, left, right } => {
                let l = left.eval_with_aggs(row, aggs)?;
                let r = right.eval_with_aggs(row, aggs)?;
                eval_binary(*op, &l, &r)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, l: &Cell, r: &Cell) -> Result<Cell, WrenError> {
    match op {
        BinaryOp::And => Ok(Cell::Int64((truthy(l) && truthy(r)) as i64)),
        BinaryOp::Or => Ok(Cell::Int64((truthy(l) || truthy(r)) as i64)),
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = l.partial_cmp(r).ok_or_else(|| {
                WrenError::schema(&format!("cannot compare {:?} with {:?}", l, r))
            })?;
            let pass = match op {
                BinaryOp::Eq => ord == std::cmp::Ordering::Equal,
                BinaryOp::Ne => ord != std::cmp::Ordering::Equal,
                BinaryOp::Lt => ord == std::cmp::Ordering::Less,
                BinaryOp::Le => ord != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ord == std::cmp::Ordering::Greater,
                BinaryOp::Ge => ord != std::cmp::Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Cell::Int64(pass as i64))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arith(op, l, r)
        }
    }
}

// Integer arithmetic stays integral; any float operand promotes the
// whole expression to float64.
fn arith(op: BinaryOp, l: &Cell, r: &Cell) -> Result<Cell, WrenError> {
    let float = matches!(l, Cell::Float64(_)) || matches!(r, Cell::Float64(_));
    if float {
        let (a, b) = match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(WrenError::schema(&format!(
                    "arithmetic on non-numeric operands {:?}, {:?}",
                    l, r
                )))
            }
        };
        let v = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(WrenError::schema("division by zero"));
                }
                a / b
            }
            BinaryOp::Mod => {
                if b == 0.0 {
                    return Err(WrenError::schema("division by zero"));
                }
                a % b
            }
            _ => unreachable!(),
        };
        return Ok(Cell::Float64(v));
    }
    let (a, b) = match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(WrenError::schema(&format!(
                "arithmetic on non-numeric operands {:?}, {:?}",
                l, r
            )))
        }
    };
    let v = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div => {
            if b == 0 {
                return Err(WrenError::schema("division by zero"));
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(WrenError::schema("division by zero"));
            }
            a % b
        }
        _ => unreachable!(),
    };
    Ok(Cell::Int64(v))
}

/// The promoted key type of a hash-key pair: mixing int and float
/// compares as float, so both sides must encode alike.
pub fn promoted_key_type(l: RetType, r: RetType) -> Result<RetType, WrenError> {
    match (l, r) {
        (RetType::String, RetType::String) => Ok(RetType::String),
        (RetType::String, _) | (_, RetType::String) => Err(WrenError::schema(
            "cannot join a string column with a numeric column",
        )),
        (RetType::Float, _) | (_, RetType::Float) => Ok(RetType::Float),
        _ => Ok(RetType::Int),
    }
}

/// Canonical key bytes for hashing a cell under a promoted type.
pub fn hash_key_bytes(cell: &Cell, ty: RetType, out: &mut Vec<u8>) -> Result<(), WrenError> {
    match ty {
        RetType::Float => match cell.as_f64() {
            Some(v) => {
                out.extend_from_slice(&v.to_bits().to_le_bytes());
                Ok(())
            }
            None => Err(WrenError::schema("non-numeric value in a float key")),
        },
        _ => {
            cell.hash_bytes(out);
            Ok(())
        }
    }
}
