//! Canonical text via `fmt::Display`.
//!
//! Arithmetic grouping is settled when composites are built, so rendering is
//! a plain walk: keywords and function names upper-case, `, ` between
//! arguments, single spaces around operators.

use crate::ast::{
    Comparison, Expression, FunctionExpression, PathElement, PathExpression, Predicate, Quantifier, TreatExpression,
    WhenClause,
};
use std::fmt;

/// Canonical text of `expr`.
pub fn render(expr: &Expression) -> String {
    expr.to_string()
}

fn comma_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn is_niladic(name: &str) -> bool {
    matches!(name, "CURRENT_DATE" | "CURRENT_TIME" | "CURRENT_TIMESTAMP")
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements().iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match element {
                PathElement::Property(name) => f.write_str(name)?,
                PathElement::Array { base, index } => write!(f, "{base}[{index}]")?,
                PathElement::Function(func) => write!(f, "{func}")?,
                PathElement::Treat(treat) => write!(f, "{treat}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for FunctionExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() && is_niladic(&self.name) {
            return f.write_str(&self.name);
        }
        write!(f, "{}(", self.name)?;
        comma_list(f, &self.args)?;
        f.write_str(")")
    }
}

impl fmt::Display for TreatExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TREAT({} AS {})", self.path, self.type_name)
    }
}

fn write_when_clauses(f: &mut fmt::Formatter<'_>, clauses: &[WhenClause]) -> fmt::Result {
    for clause in clauses {
        write!(f, " WHEN {} THEN {}", clause.condition, clause.result)?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Path(p) => write!(f, "{p}"),
            Expression::Function(func) => write!(f, "{func}"),
            Expression::Aggregate(agg) => {
                write!(f, "{}(", agg.name)?;
                if agg.distinct {
                    f.write_str("DISTINCT ")?;
                }
                write!(f, "{})", agg.arg)
            }
            Expression::Parameter(p) => write!(f, ":{}", p.name),
            Expression::Composite(c) => {
                for part in c.parts() {
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Expression::Opaque(o) => f.write_str(o.text()),
            Expression::GeneralCase(case) => {
                f.write_str("CASE")?;
                write_when_clauses(f, &case.when_clauses)?;
                write!(f, " ELSE {} END", case.else_result)
            }
            Expression::SimpleCase(case) => {
                write!(f, "CASE {}", case.operand)?;
                write_when_clauses(f, &case.when_clauses)?;
                write!(f, " ELSE {} END", case.else_result)
            }
            Expression::Predicate(p) => write!(f, "{p}"),
            Expression::Treat(t) => write!(f, "{t}"),
        }
    }
}

fn not_kw(negated: bool) -> &'static str {
    if negated {
        "NOT "
    } else {
        ""
    }
}

fn write_comparison(f: &mut fmt::Formatter<'_>, cmp: &Comparison, op: &str) -> fmt::Result {
    write!(f, "{} {} ", cmp.left, op)?;
    let keyword = match cmp.quantifier {
        Quantifier::None => return write!(f, "{}", cmp.right),
        Quantifier::Any => "ANY",
        Quantifier::All => "ALL",
    };
    match cmp.right.as_ref() {
        Expression::Path(_) | Expression::Parameter(_) => write!(f, "{} {}", keyword, cmp.right),
        other => write!(f, "{}({})", keyword, other),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(c) => write_comparison(f, c, if c.negated { "<>" } else { "=" }),
            Predicate::Gt(c) => write_comparison(f, c, if c.negated { "<=" } else { ">" }),
            Predicate::Ge(c) => write_comparison(f, c, if c.negated { "<" } else { ">=" }),
            Predicate::Lt(c) => write_comparison(f, c, if c.negated { ">=" } else { "<" }),
            Predicate::Le(c) => write_comparison(f, c, if c.negated { ">" } else { "<=" }),
            Predicate::Between { operand, low, high, negated } => {
                write!(f, "{} {}BETWEEN {} AND {}", operand, not_kw(*negated), low, high)
            }
            Predicate::Like { operand, pattern, escape, negated } => {
                write!(f, "{} {}LIKE {}", operand, not_kw(*negated), pattern)?;
                if let Some(e) = escape {
                    write!(f, " ESCAPE {e}")?;
                }
                Ok(())
            }
            Predicate::In { operand, items, negated } => {
                write!(f, "{} {}IN ", operand, not_kw(*negated))?;
                match items.as_slice() {
                    [Expression::Parameter(p)] if p.collection_valued => write!(f, ":{}", p.name),
                    _ => {
                        f.write_str("(")?;
                        comma_list(f, items)?;
                        f.write_str(")")
                    }
                }
            }
            Predicate::IsNull { operand, negated } => write!(f, "{} IS {}NULL", operand, not_kw(*negated)),
            Predicate::IsEmpty { operand, negated } => write!(f, "{} IS {}EMPTY", operand, not_kw(*negated)),
            Predicate::MemberOf { element, collection, negated } => {
                write!(f, "{} {}MEMBER OF {}", element, not_kw(*negated), collection)
            }
            Predicate::And(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    match item {
                        Predicate::Or(_) => write!(f, "({item})")?,
                        _ => write!(f, "{item}")?,
                    }
                }
                Ok(())
            }
            Predicate::Or(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Predicate::Not(inner) => write!(f, "NOT({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FunctionExpression, ParameterExpression};

    fn path(parts: &[&str]) -> Expression {
        Expression::Path(PathExpression::of(parts).unwrap())
    }

    #[test]
    fn functions_and_niladic_functions() {
        let f = Expression::Function(FunctionExpression::new("COALESCE", vec![path(&["a"]), Expression::opaque("0")]));
        assert_eq!(render(&f), "COALESCE(a, 0)");
        let now = Expression::Function(FunctionExpression::new("CURRENT_TIMESTAMP", vec![]));
        assert_eq!(render(&now), "CURRENT_TIMESTAMP");
        let empty = Expression::Function(FunctionExpression::new("RANDOM", vec![]));
        assert_eq!(render(&empty), "RANDOM()");
    }

    #[test]
    fn array_elements() {
        let p = PathExpression::new(vec![
            PathElement::Array {
                base: "versions".into(),
                index: Box::new(Expression::Parameter(ParameterExpression::new("i"))),
            },
            PathElement::Property("date".into()),
        ])
        .unwrap();
        assert_eq!(Expression::Path(p).to_string(), "versions[:i].date");
    }

    #[test]
    fn rooted_paths() {
        let key = FunctionExpression::new("KEY", vec![path(&["map"])]);
        let p = PathExpression::new(vec![PathElement::Function(key), PathElement::Property("id".into())]).unwrap();
        assert_eq!(p.to_string(), "KEY(map).id");

        let treat = TreatExpression::new(PathExpression::of(&["d"]).unwrap(), "GoodDocument");
        assert_eq!(Expression::Treat(treat.clone()).to_string(), "TREAT(d AS GoodDocument)");
        let p = PathExpression::new(vec![PathElement::Treat(treat), PathElement::Property("name".into())]).unwrap();
        assert_eq!(p.to_string(), "TREAT(d AS GoodDocument).name");
    }

    #[test]
    fn negated_comparisons_flip_the_operator() {
        let negated = || {
            let mut cmp = Comparison::new(path(&["a"]), Expression::opaque("1"));
            cmp.negated = true;
            cmp
        };
        assert_eq!(Predicate::Eq(negated()).to_string(), "a <> 1");
        assert_eq!(Predicate::Gt(negated()).to_string(), "a <= 1");
        assert_eq!(Predicate::Ge(negated()).to_string(), "a < 1");
        assert_eq!(Predicate::Lt(negated()).to_string(), "a >= 1");
        assert_eq!(Predicate::Le(negated()).to_string(), "a > 1");
    }

    #[test]
    fn or_inside_and_is_grouped() {
        let gt = |a: &str, b: &str| Predicate::Gt(Comparison::new(path(&[a]), path(&[b])));
        let p = Predicate::And(vec![Predicate::Or(vec![gt("a", "b"), gt("c", "d")]), gt("e", "f")]);
        assert_eq!(p.to_string(), "(a > b OR c > d) AND e > f");
    }

    #[test]
    fn quantified_operands() {
        let mut cmp = Comparison::new(path(&["a"]), path(&["sub"]));
        cmp.quantifier = Quantifier::All;
        assert_eq!(Predicate::Lt(cmp.clone()).to_string(), "a < ALL sub");
        cmp.right = Box::new(Expression::opaque("1"));
        cmp.quantifier = Quantifier::Any;
        assert_eq!(Predicate::Eq(cmp).to_string(), "a = ANY(1)");
    }
}
