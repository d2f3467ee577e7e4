// SPDX-License-Identifier: MIT

//! Abstract Syntax Tree for condition expressions

use std::fmt;

/// A condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Comparison expression: left op right
    Compare {
        left: String,
        op: CompareOp,
        right: Literal,
    },
    /// Logical AND
    And(Box<Expression>, Box<Expression>),
    /// Logical OR
    Or(Box<Expression>, Box<Expression>),
    /// Logical NOT
    Not(Box<Expression>),
    /// Literal true
    True,
    /// Literal false
    False,
}

/// Comparison operators
#[derive(Debug, Clone, PartialEq)]
pub enum CompareOp {
    /// ==
    Eq,
    /// !=
    NotEq,
    /// >
    Gt,
    /// >=
    Gte,
    /// <
    Lt,
    /// <=
    Lte,
    /// contains (for strings and arrays)
    Contains,
}

/// Literal values in expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl Expression {
    /// `path == <bool>`
    pub fn is(path: impl Into<String>, value: bool) -> Self {
        Expression::Compare {
            left: path.into(),
            op: CompareOp::Eq,
            right: Literal::Boolean(value),
        }
    }

    pub fn and(self, other: Expression) -> Self {
        Expression::And(Box::new(self), Box::new(other))
    }

    /// Whether the expression can only hold when `path == true`.
    ///
    /// Used to recognise edges guarded by a decision's own retry flag.
    pub fn requires_true(&self, path: &str) -> bool {
        match self {
            Expression::Compare {
                left,
                op: CompareOp::Eq,
                right: Literal::Boolean(true),
            } => left == path,
            Expression::Compare {
                left,
                op: CompareOp::NotEq,
                right: Literal::Boolean(false),
            } => left == path,
            Expression::And(a, b) => a.requires_true(path) || b.requires_true(path),
            Expression::Or(a, b) => a.requires_true(path) && b.requires_true(path),
            Expression::False => true,
            _ => false,
        }
    }

    /// Every state path the expression reads
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Expression::Compare { left, .. } => vec![left.as_str()],
            Expression::And(a, b) | Expression::Or(a, b) => {
                let mut paths = a.paths();
                paths.extend(b.paths());
                paths
            }
            Expression::Not(inner) => inner.paths(),
            Expression::True | Expression::False => vec![],
        }
    }

    fn is_compound(&self) -> bool {
        matches!(self, Expression::And(..) | Expression::Or(..))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Compare { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expression::And(a, b) => {
                write_operand(f, a)?;
                write!(f, " and ")?;
                write_operand(f, b)
            }
            Expression::Or(a, b) => {
                write_operand(f, a)?;
                write!(f, " or ")?;
                write_operand(f, b)
            }
            Expression::Not(inner) => {
                write!(f, "not ")?;
                write_operand(f, inner)
            }
            Expression::True => write!(f, "true"),
            Expression::False => write!(f, "false"),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expression) -> fmt::Result {
    if expr.is_compound() {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::NotEq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
            CompareOp::Contains => write!(f, "contains"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) if s.contains('\'') => write!(f, "\"{}\"", s),
            Literal::String(s) => write!(f, "'{}'", s),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}
