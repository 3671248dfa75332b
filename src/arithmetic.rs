//! Operator table and minimal parenthesization for `+ - * /` chains.
//!
//! The parser builds an [`Arith`] tree for every arithmetic operand and lowers
//! it into a flat composite of typed leaves and opaque text. Grouping that the
//! operator table makes redundant is dropped during lowering, so rendering the
//! composite yields the canonical text.

use crate::ast::{CompositeBuilder, Expression};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
        }
    }

    /// Binding strength; all operators are left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            ArithmeticOp::Add | ArithmeticOp::Sub => 1,
            ArithmeticOp::Mul | ArithmeticOp::Div => 2,
        }
    }

    pub fn is_additive(self) -> bool {
        self.precedence() == 1
    }

    pub fn is_multiplicative(self) -> bool {
        self.precedence() == 2
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Whether a binary child with operator `child` must keep its parentheses
/// when it is the `side` operand of `parent`.
pub fn needs_parens(parent: ArithmeticOp, child: ArithmeticOp, side: Side) -> bool {
    let additive_under_multiplicative = parent.is_multiplicative() && child.is_additive();
    match side {
        Side::Left => child == ArithmeticOp::Div || additive_under_multiplicative,
        Side::Right => {
            child == ArithmeticOp::Div
                || parent == ArithmeticOp::Sub
                || parent == ArithmeticOp::Div
                || additive_under_multiplicative
        }
    }
}

/// Arithmetic operand as parsed, before lowering.
#[derive(Debug, Clone)]
pub(crate) enum Arith {
    /// A typed sub-expression (path, function, parameter, case...).
    Leaf(Expression),
    /// Canonical literal text.
    Literal(String),
    Negate(Box<Arith>),
    Binary(ArithmeticOp, Box<Arith>, Box<Arith>),
}

impl Arith {
    pub(crate) fn binary(op: ArithmeticOp, left: Arith, right: Arith) -> Self {
        Arith::Binary(op, Box::new(left), Box::new(right))
    }

    /// Sign inversion; a double inversion cancels out.
    pub(crate) fn negate(inner: Arith) -> Self {
        match inner {
            Arith::Negate(x) => *x,
            other => Arith::Negate(Box::new(other)),
        }
    }

    pub(crate) fn is_binary(&self) -> bool {
        matches!(self, Arith::Binary(..))
    }

    /// Whether the written form starts with `-`.
    fn leads_with_minus(&self) -> bool {
        match self {
            Arith::Negate(_) => true,
            Arith::Literal(text) => text.starts_with('-'),
            Arith::Leaf(expr) => leaf_leads_with_minus(expr),
            Arith::Binary(_, left, _) => left.leads_with_minus(),
        }
    }

    /// Lowers into a single expression; a lone leaf comes back unchanged.
    pub(crate) fn lower(self) -> Expression {
        let mut builder = CompositeBuilder::default();
        self.write(&mut builder);
        builder.finish()
    }

    pub(crate) fn write(self, out: &mut CompositeBuilder) {
        match self {
            Arith::Leaf(expr) => out.push(expr),
            Arith::Literal(text) => out.push_text(&text),
            Arith::Negate(inner) => {
                out.push_text("-");
                if inner.is_binary() || inner.leads_with_minus() {
                    out.push_text("(");
                    inner.write(out);
                    out.push_text(")");
                } else {
                    inner.write(out);
                }
            }
            Arith::Binary(op, left, right) => {
                write_operand(op, *left, Side::Left, out);
                out.push_text(" ");
                out.push_text(op.symbol());
                out.push_text(" ");
                write_operand(op, *right, Side::Right, out);
            }
        }
    }
}

fn leaf_leads_with_minus(expr: &Expression) -> bool {
    match expr {
        Expression::Opaque(o) => o.text().starts_with('-'),
        Expression::Composite(c) => c.parts().first().is_some_and(leaf_leads_with_minus),
        _ => false,
    }
}

fn write_operand(parent: ArithmeticOp, operand: Arith, side: Side, out: &mut CompositeBuilder) {
    let wrap = match &operand {
        Arith::Binary(child, _, _) => needs_parens(parent, *child, side),
        _ => false,
    };
    if wrap {
        out.push_text("(");
        operand.write(out);
        out.push_text(")");
    } else {
        operand.write(out);
    }
}
