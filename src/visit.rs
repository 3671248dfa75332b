use crate::ast::{Expression, PathElement, PathExpression, Predicate};

/// A node reached during [`Expression::walk`].
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Expression(&'a Expression),
    Predicate(&'a Predicate),
    /// A path that is not itself an expression node, such as a TREAT operand.
    Path(&'a PathExpression),
}

impl Expression {
    /// Pre-order visit of this expression and everything below it, including
    /// array indices, case branches and predicate operands.
    pub fn walk<'a, F>(&'a self, visit: &mut F)
    where
        F: FnMut(Node<'a>),
    {
        visit(Node::Expression(self));
        match self {
            Expression::Path(p) => walk_path(p, visit),
            Expression::Function(func) => func.args.iter().for_each(|a| a.walk(visit)),
            Expression::Aggregate(agg) => walk_path(&agg.arg, visit),
            Expression::Parameter(_) | Expression::Opaque(_) => {}
            Expression::Composite(c) => c.parts().iter().for_each(|p| p.walk(visit)),
            Expression::GeneralCase(case) => {
                for clause in &case.when_clauses {
                    clause.condition.walk(visit);
                    clause.result.walk(visit);
                }
                case.else_result.walk(visit);
            }
            Expression::SimpleCase(case) => {
                case.operand.walk(visit);
                for clause in &case.when_clauses {
                    clause.condition.walk(visit);
                    clause.result.walk(visit);
                }
                case.else_result.walk(visit);
            }
            Expression::Predicate(p) => walk_predicate(p, visit),
            Expression::Treat(t) => {
                visit(Node::Path(&t.path));
                walk_path(&t.path, visit);
            }
        }
    }

    /// Every path in the tree, outermost first. Paths nested in array
    /// indices, path roots and TREAT operands are included.
    pub fn paths(&self) -> Vec<&PathExpression> {
        let mut out = Vec::new();
        self.walk(&mut |node| match node {
            Node::Expression(Expression::Path(p)) | Node::Path(p) => out.push(p),
            _ => {}
        });
        out
    }

    /// Distinct parameter names in order of first appearance.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.walk(&mut |node| {
            if let Node::Expression(Expression::Parameter(p)) = node {
                if !out.contains(&p.name) {
                    out.push(p.name.clone());
                }
            }
        });
        out
    }
}

fn walk_path<'a, F: FnMut(Node<'a>)>(path: &'a PathExpression, visit: &mut F) {
    for element in path.elements() {
        match element {
            PathElement::Property(_) => {}
            PathElement::Array { index, .. } => index.walk(visit),
            PathElement::Function(func) => func.args.iter().for_each(|a| a.walk(visit)),
            PathElement::Treat(treat) => {
                visit(Node::Path(&treat.path));
                walk_path(&treat.path, visit);
            }
        }
    }
}

fn walk_predicate<'a, F: FnMut(Node<'a>)>(predicate: &'a Predicate, visit: &mut F) {
    visit(Node::Predicate(predicate));
    match predicate {
        Predicate::Eq(c) | Predicate::Gt(c) | Predicate::Ge(c) | Predicate::Lt(c) | Predicate::Le(c) => {
            c.left.walk(visit);
            c.right.walk(visit);
        }
        Predicate::Between { operand, low, high, .. } => {
            operand.walk(visit);
            low.walk(visit);
            high.walk(visit);
        }
        Predicate::Like { operand, pattern, escape, .. } => {
            operand.walk(visit);
            pattern.walk(visit);
            if let Some(e) = escape {
                e.walk(visit);
            }
        }
        Predicate::In { operand, items, .. } => {
            operand.walk(visit);
            items.iter().for_each(|i| i.walk(visit));
        }
        Predicate::IsNull { operand, .. } | Predicate::IsEmpty { operand, .. } => operand.walk(visit),
        Predicate::MemberOf { element, collection, .. } => {
            element.walk(visit);
            collection.walk(visit);
        }
        Predicate::And(items) | Predicate::Or(items) => {
            items.iter().for_each(|p| walk_predicate(p, visit));
        }
        Predicate::Not(inner) => walk_predicate(inner, visit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_expression, EntryPoint, ParseFlags};

    #[test]
    fn collects_paths_and_parameters() {
        let expr = parse_expression(
            "CASE WHEN d.age > :min AND d.name LIKE :pattern THEN d.versions[:min].id ELSE 0 END",
            EntryPoint::Simple,
            ParseFlags::default(),
        )
        .unwrap();
        let paths: Vec<String> = expr.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["d.age", "d.name", "d.versions[:min].id"]);
        assert_eq!(expr.parameter_names(), vec!["min".to_string(), "pattern".to_string()]);
    }

    #[test]
    fn paths_include_roots_and_treat_operands() {
        let expr =
            parse_expression("KEY(d.map).id + TREAT(d.owner AS Employee).salary", EntryPoint::Simple, ParseFlags::default())
                .unwrap();
        let paths: Vec<String> = expr.paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["KEY(d.map).id", "d.map", "TREAT(d.owner AS Employee).salary", "d.owner"]);
    }

    #[test]
    fn walk_visits_predicates() {
        let expr = parse_expression("NOT(a IS NULL) OR b = 1", EntryPoint::Boolean, ParseFlags::default()).unwrap();
        let mut predicates = 0;
        expr.walk(&mut |node| {
            if let Node::Predicate(_) = node {
                predicates += 1;
            }
        });
        // Or, Not, IsNull, Eq
        assert_eq!(predicates, 4);
    }
}
