use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Root of the syntax tree.
///
/// Every node is immutable once the parser hands it out. Equality and hashing
/// are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    Path(PathExpression),
    Function(FunctionExpression),
    Aggregate(AggregateExpression),
    Parameter(ParameterExpression),
    Composite(CompositeExpression),
    Opaque(OpaqueFragment),
    GeneralCase(GeneralCaseExpression),
    SimpleCase(SimpleCaseExpression),
    Predicate(Predicate),
    /// A bare `TREAT(path AS Type)`; only join paths produce it.
    Treat(TreatExpression),
}

/// A dotted, optionally bracket-indexed attribute chain.
///
/// `used_in_collection_function` is derived from the parse context and is not
/// part of the node's identity: two paths with the same elements are equal
/// regardless of the flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathExpression {
    elements: Vec<PathElement>,
    used_in_collection_function: bool,
}

impl PathExpression {
    /// Builds a path; returns `None` for an empty element list or when a
    /// root element (`KEY(..)`, `TREAT(..)`) appears after the first position.
    pub fn new(elements: Vec<PathElement>) -> Option<Self> {
        if elements.is_empty() || elements.iter().skip(1).any(PathElement::is_root) {
            return None;
        }
        Some(Self { elements, used_in_collection_function: false })
    }

    /// Shorthand for a path made only of property elements.
    pub fn of<S: AsRef<str>>(properties: &[S]) -> Option<Self> {
        Self::new(
            properties
                .iter()
                .map(|p| PathElement::Property(p.as_ref().to_string()))
                .collect(),
        )
    }

    /// The same path, marked as the direct argument of a collection
    /// cardinality function such as `SIZE`.
    pub fn for_collection_function(mut self) -> Self {
        self.used_in_collection_function = true;
        self
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    pub(crate) fn into_elements(self) -> Vec<PathElement> {
        self.elements
    }

    pub fn is_used_in_collection_function(&self) -> bool {
        self.used_in_collection_function
    }

    /// True when every element is a plain property (no array index).
    pub fn is_simple(&self) -> bool {
        self.elements.iter().all(|e| matches!(e, PathElement::Property(_)))
    }
}

impl PartialEq for PathExpression {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl Eq for PathExpression {}

impl Hash for PathExpression {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.elements.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathElement {
    Property(String),
    Array { base: String, index: Box<Expression> },
    /// `KEY(..)` or `VALUE(..)` dereferenced by the rest of the path.
    Function(FunctionExpression),
    /// `TREAT(.. AS Type)` dereferenced by the rest of the path.
    Treat(TreatExpression),
}

impl PathElement {
    /// Root elements may only start a path.
    pub fn is_root(&self) -> bool {
        matches!(self, PathElement::Function(_) | PathElement::Treat(_))
    }
}

/// Downcast of a path to a subtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreatExpression {
    pub path: PathExpression,
    pub type_name: String,
}

impl TreatExpression {
    pub fn new<T: Into<String>>(path: PathExpression, type_name: T) -> Self {
        Self { path, type_name: type_name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionExpression {
    pub name: String,
    pub args: Vec<Expression>,
}

impl FunctionExpression {
    pub fn new<N: Into<String>>(name: N, args: Vec<Expression>) -> Self {
        Self { name: name.into(), args }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateExpression {
    pub name: String,
    pub distinct: bool,
    pub arg: PathExpression,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterExpression {
    pub name: String,
    /// Set for the unparenthesized right side of `IN :param`.
    pub collection_valued: bool,
}

impl ParameterExpression {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self { name: name.into(), collection_valued: false }
    }
}

/// Typed fragments interleaved with opaque text runs.
///
/// Always holds at least two parts and never two adjacent opaque fragments;
/// construct it through [`CompositeExpression::from_parts`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeExpression {
    parts: Vec<Expression>,
}

impl CompositeExpression {
    /// Normalizes `parts`: nested composites are spliced in, adjacent opaque
    /// runs are merged, and a single remaining part is returned unwrapped.
    pub fn from_parts(parts: Vec<Expression>) -> Expression {
        let mut builder = CompositeBuilder::default();
        for part in parts {
            builder.push(part);
        }
        builder.finish()
    }

    pub fn parts(&self) -> &[Expression] {
        &self.parts
    }
}

/// Verbatim text the grammar does not structure further in its context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueFragment(pub String);

impl OpaqueFragment {
    pub fn text(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WhenClause {
    pub condition: Box<Expression>,
    pub result: Box<Expression>,
}

impl WhenClause {
    pub fn new(condition: Expression, result: Expression) -> Self {
        Self { condition: Box::new(condition), result: Box::new(result) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeneralCaseExpression {
    pub when_clauses: Vec<WhenClause>,
    pub else_result: Box<Expression>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleCaseExpression {
    pub operand: Box<Expression>,
    pub when_clauses: Vec<WhenClause>,
    pub else_result: Box<Expression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantifier {
    None,
    Any,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Comparison {
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    pub quantifier: Quantifier,
    pub negated: bool,
}

impl Comparison {
    pub fn new(left: Expression, right: Expression) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            quantifier: Quantifier::None,
            negated: false,
        }
    }
}

/// Typed boolean conditions, produced only in predicate contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Predicate {
    Eq(Comparison),
    Gt(Comparison),
    Ge(Comparison),
    Lt(Comparison),
    Le(Comparison),
    Between {
        operand: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    Like {
        operand: Box<Expression>,
        pattern: Box<Expression>,
        escape: Option<Box<Expression>>,
        negated: bool,
    },
    In {
        operand: Box<Expression>,
        items: Vec<Expression>,
        negated: bool,
    },
    IsNull {
        operand: Box<Expression>,
        negated: bool,
    },
    IsEmpty {
        operand: Box<Expression>,
        negated: bool,
    },
    MemberOf {
        element: Box<Expression>,
        collection: Box<Expression>,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl From<Predicate> for Expression {
    fn from(p: Predicate) -> Self {
        Expression::Predicate(p)
    }
}

impl From<PathExpression> for Expression {
    fn from(p: PathExpression) -> Self {
        Expression::Path(p)
    }
}

impl From<FunctionExpression> for Expression {
    fn from(f: FunctionExpression) -> Self {
        Expression::Function(f)
    }
}

impl From<TreatExpression> for Expression {
    fn from(t: TreatExpression) -> Self {
        Expression::Treat(t)
    }
}

impl From<ParameterExpression> for Expression {
    fn from(p: ParameterExpression) -> Self {
        Expression::Parameter(p)
    }
}

impl Expression {
    pub fn opaque<S: Into<String>>(text: S) -> Self {
        Expression::Opaque(OpaqueFragment(text.into()))
    }

    pub fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Expression::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_predicate(&self) -> Option<&Predicate> {
        match self {
            Expression::Predicate(p) => Some(p),
            _ => None,
        }
    }
}

/// Accumulates composite parts, merging adjacent text runs.
#[derive(Default)]
pub(crate) struct CompositeBuilder {
    parts: Vec<Expression>,
    pending: String,
}

impl CompositeBuilder {
    pub(crate) fn push_text(&mut self, text: &str) {
        self.pending.push_str(text);
    }

    pub(crate) fn push(&mut self, part: Expression) {
        match part {
            Expression::Opaque(OpaqueFragment(text)) => self.pending.push_str(&text),
            Expression::Composite(c) => {
                for p in c.parts {
                    self.push(p);
                }
            }
            other => {
                self.flush();
                self.parts.push(other);
            }
        }
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let text = std::mem::take(&mut self.pending);
            self.parts.push(Expression::Opaque(OpaqueFragment(text)));
        }
    }

    pub(crate) fn finish(mut self) -> Expression {
        self.flush();
        match self.parts.len() {
            0 => Expression::Opaque(OpaqueFragment(String::new())),
            1 => self.parts.pop().unwrap_or_else(|| Expression::opaque("")),
            _ => Expression::Composite(CompositeExpression { parts: self.parts }),
        }
    }
}
