//! The expression tree the planner hands to the rewriter, optimizer and
//! executors. Parsing is outside this crate; callers construct these
//! nodes directly.

use std::fmt;

use crate::{
    plan::{bitset::TableBitset, output_schema::OutputSchema},
    storage::schema::FieldType,
};

/// Logical value types. Every `FieldType` maps to one of these:
/// INT32/INT64 -> Int, FLOAT64 -> Float, CHAR/VARCHAR -> String.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetType {
    Int,
    Float,
    String,
}

impl RetType {
    pub fn of_field(t: FieldType) -> RetType {
        match t {
            FieldType::Int32 | FieldType::Int64 => RetType::Int,
            FieldType::Float64 => RetType::Float,
            FieldType::Char | FieldType::Varchar => RetType::String,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Min,
    Max,
    Avg,
    Count,
    CountAll,
}

#[derive(Debug, Clone)]
pub enum Expr {
    /// A reference to an output column of the node below, by stable id.
    ColumnRef {
        id: u32,
        /// Which base table the column originates from.
        table_id: u32,
        /// Index of the column in its base table's logical schema.
        /// Meaningless for derived columns.
        column_index: usize,
        table_name: String,
        column_name: String,
        ret: RetType,
    },
    LiteralInt(i64),
    LiteralFloat(f64),
    LiteralString(String),
    Binary {
        op: BinaryOp,
        ret: RetType,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// An aggregate call; only valid inside Aggregate output/having
    /// expressions.
    Aggregate {
        func: AggFunc,
        arg: Option<Box<Expr>>,
        ret: RetType,
    },
}

impl Expr {
    pub fn column(
        id: u32,
        table_id: u32,
        column_index: usize,
        table_name: &str,
        column_name: &str,
        ret: RetType,
    ) -> Expr {
        Expr::ColumnRef {
            id,
            table_id,
            column_index,
            table_name: table_name.to_string(),
            column_name: column_name.to_string(),
            ret,
        }
    }

    /// Build a binary expression, inferring the result type with the
    /// engine's promotion rules.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let ret = if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
            RetType::Int
        } else if left.ret_type() == RetType::Float || right.ret_type() == RetType::Float {
            RetType::Float
        } else {
            RetType::Int
        };
        Expr::Binary {
            op,
            ret,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn aggregate(func: AggFunc, arg: Option<Expr>) -> Expr {
        let ret = match func {
            AggFunc::Count | AggFunc::CountAll => RetType::Int,
            AggFunc::Avg => RetType::Float,
            AggFunc::Sum | AggFunc::Min | AggFunc::Max => {
                arg.as_ref().map(|a| a.ret_type()).unwrap_or(RetType::Int)
            }
        };
        Expr::Aggregate {
            func,
            arg: arg.map(Box::new),
            ret,
        }
    }

    pub fn ret_type(&self) -> RetType {
        match self {
            Expr::ColumnRef { ret, .. } => *ret,
            Expr::LiteralInt(_) => RetType::Int,
            Expr::LiteralFloat(_) => RetType::Float,
            Expr::LiteralString(_) => RetType::String,
            Expr::Binary { ret, .. } => *ret,
            Expr::Aggregate { ret, .. } => *ret,
        }
    }

    /// The set of base tables this expression reads from.
    pub fn table_bitset(&self) -> TableBitset {
        let mut bits = TableBitset::new();
        self.collect_tables(&mut bits);
        bits
    }

    fn collect_tables(&self, bits: &mut TableBitset) {
        match self {
            Expr::ColumnRef { table_id, .. } => bits.set(*table_id),
            Expr::Binary { left, right, .. } => {
                left.collect_tables(bits);
                right.collect_tables(bits);
            }
            Expr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.collect_tables(bits);
                }
            }
            _ => {}
        }
    }

    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            _ => false,
        }
    }

    /// Is this a constant (no column references)?
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::ColumnRef { .. } => false,
            Expr::LiteralInt(_) | Expr::LiteralFloat(_) | Expr::LiteralString(_) => true,
            Expr::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            Expr::Aggregate { .. } => false,
        }
    }

    /// If this is a bare column reference, its id.
    pub fn as_column_id(&self) -> Option<u32> {
        match self {
            Expr::ColumnRef { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Substitute column references by position: a reference to output
    /// column `i` of `input_schema` is replaced by `input_exprs[i]`.
    /// Used to push predicates through Project and Aggregate.
    pub fn substitute(&self, input_exprs: &[Expr], input_schema: &OutputSchema) -> Expr {
        match self {
            Expr::ColumnRef { id, .. } => match input_schema.find_by_id(*id) {
                Some(i) => input_exprs[i].clone(),
                None => self.clone(),
            },
            Expr::Binary {
                op,
                ret,
                left,
                right,
            } => Expr::Binary {
                op: *op,
                ret: *ret,
                left: Box::new(left.substitute(input_exprs, input_schema)),
                right: Box::new(right.substitute(input_exprs, input_schema)),
            },
            Expr::Aggregate { func, arg, ret } => Expr::Aggregate {
                func: *func,
                arg: arg
                    .as_ref()
                    .map(|a| Box::new(a.substitute(input_exprs, input_schema))),
                ret: *ret,
            },
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::ColumnRef {
                table_name,
                column_name,
                ..
            } => {
                if table_name.is_empty() {
                    write!(f, "{}", column_name)
                } else {
                    write!(f, "{}.{}", table_name, column_name)
                }
            }
            Expr::LiteralInt(v) => write!(f, "{}", v),
            Expr::LiteralFloat(v) => write!(f, "{}", v),
            Expr::LiteralString(s) => write!(f, "'{}'", s),
            Expr::Binary {
                op, left, right, ..
            } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Aggregate { func, arg, .. } => {
                let name = match func {
                    AggFunc::Sum => "sum",
                    AggFunc::Min => "min",
                    AggFunc::Max => "max",
                    AggFunc::Avg => "avg",
                    AggFunc::Count => "count",
                    AggFunc::CountAll => "count(*)",
                };
                match arg {
                    Some(arg) => write!(f, "{}({})", name, arg),
                    None => write!(f, "{}", name),
                }
            }
        }
    }
}
