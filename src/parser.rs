use crate::arithmetic::{Arith, ArithmeticOp};
use crate::ast::{
    AggregateExpression, Comparison, CompositeBuilder, CompositeExpression, Expression, FunctionExpression,
    GeneralCaseExpression, ParameterExpression, PathElement, PathExpression, Predicate, Quantifier,
    SimpleCaseExpression, TreatExpression, WhenClause,
};
use crate::error::SyntaxError;
use crate::lexer::{LexError, Lexer, Token};
use crate::macros::MacroRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Start production of a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryPoint {
    #[serde(rename = "simple")]
    Simple,
    #[serde(rename = "subquery")]
    SimpleSubquery,
    #[serde(rename = "order-by")]
    OrderBy,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "path")]
    Path,
    #[serde(rename = "in-item")]
    InItem,
    #[serde(rename = "join")]
    Join,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 7] = [
        EntryPoint::Simple,
        EntryPoint::SimpleSubquery,
        EntryPoint::OrderBy,
        EntryPoint::Boolean,
        EntryPoint::Path,
        EntryPoint::InItem,
        EntryPoint::Join,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EntryPoint::Simple => "simple",
            EntryPoint::SimpleSubquery => "subquery",
            EntryPoint::OrderBy => "order-by",
            EntryPoint::Boolean => "boolean",
            EntryPoint::Path => "path",
            EntryPoint::InItem => "in-item",
            EntryPoint::Join => "join",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-controlled grammar switches. Part of the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParseFlags {
    pub allow_case_when: bool,
    pub allow_quantified_predicates: bool,
}

impl Default for ParseFlags {
    fn default() -> Self {
        Self { allow_case_when: true, allow_quantified_predicates: false }
    }
}

impl ParseFlags {
    pub fn with_case_when(mut self, allow: bool) -> Self {
        self.allow_case_when = allow;
        self
    }

    pub fn with_quantified_predicates(mut self, allow: bool) -> Self {
        self.allow_quantified_predicates = allow;
        self
    }
}

pub const DEFAULT_AGGREGATES: [&str; 5] = ["AVG", "COUNT", "MAX", "MIN", "SUM"];

/// Grammar configuration shared by all parses of a factory.
#[derive(Clone)]
pub struct ParserConfig {
    aggregates: HashSet<String>,
    macros: Option<Arc<MacroRegistry>>,
}

impl ParserConfig {
    pub fn new<I, S>(aggregates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            aggregates: aggregates.into_iter().map(|a| a.as_ref().to_uppercase()).collect(),
            macros: None,
        }
    }

    pub fn with_macros(mut self, macros: Arc<MacroRegistry>) -> Self {
        self.macros = Some(macros);
        self
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregates.contains(&name.to_uppercase())
    }

    pub fn macros(&self) -> Option<&Arc<MacroRegistry>> {
        self.macros.as_ref()
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self::new(DEFAULT_AGGREGATES)
    }
}

/// Result of a parse together with what the cache needs to know about it.
#[derive(Debug, Clone)]
pub struct Parsed {
    pub expression: Expression,
    /// Upper-cased names of the macros expanded during the parse.
    pub macros_used: Vec<String>,
    /// False when an expanded macro opted out of caching.
    pub cacheable: bool,
}

/// Parses `input` under the default grammar configuration.
pub fn parse_expression(input: &str, entry: EntryPoint, flags: ParseFlags) -> Result<Expression, SyntaxError> {
    let config = ParserConfig::default();
    parse_with_config(input, entry, flags, &config).map(|p| p.expression)
}

pub fn parse_with_config(
    input: &str,
    entry: EntryPoint,
    flags: ParseFlags,
    config: &ParserConfig,
) -> Result<Parsed, SyntaxError> {
    let mut parser = Parser::new(input, entry, config)?;
    let ctx = Context {
        allow_case_when: flags.allow_case_when,
        allow_quantified: flags.allow_quantified_predicates,
        in_subquery: entry == EntryPoint::SimpleSubquery,
    };
    let expression = parser.parse(ctx)?;
    Ok(Parsed {
        expression,
        macros_used: parser.macros_used,
        cacheable: parser.cacheable,
    })
}

#[derive(Debug, Clone, Copy)]
struct Context {
    allow_case_when: bool,
    allow_quantified: bool,
    in_subquery: bool,
}

/// Words that can never start a path.
const RESERVED: [&str; 15] = [
    "AND", "OR", "NOT", "WHEN", "THEN", "ELSE", "END", "IN", "LIKE", "BETWEEN", "IS", "MEMBER", "OF", "ESCAPE",
    "DISTINCT",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

const NILADIC_FUNCTIONS: [&str; 3] = ["CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP"];

/// Deepest nesting of groups, calls, CASE, signs and NOTs a parse accepts.
pub const MAX_DEPTH: usize = 64;

#[derive(Clone)]
struct Parser<'a> {
    input: &'a str,
    entry: EntryPoint,
    config: &'a ParserConfig,
    lexer: Lexer<'a>,
    lookahead: Token,
    look_pos: usize,
    macros_used: Vec<String>,
    cacheable: bool,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, entry: EntryPoint, config: &'a ParserConfig) -> Result<Self, SyntaxError> {
        let mut parser = Self {
            input,
            entry,
            config,
            lexer: Lexer::new(input),
            lookahead: Token::Eof,
            look_pos: 0,
            macros_used: Vec::new(),
            cacheable: true,
            depth: 0,
        };
        parser.bump()?;
        Ok(parser)
    }

    fn lex_error(&self, e: LexError) -> SyntaxError {
        SyntaxError::new(self.input, self.entry, e.message, Some(e.position))
    }

    fn bump(&mut self) -> Result<(), SyntaxError> {
        self.lookahead = match self.lexer.next_token() {
            Ok(tok) => tok,
            Err(e) => return Err(self.lex_error(e)),
        };
        self.look_pos = self.lexer.last_start();
        Ok(())
    }

    /// The token after the lookahead. Lexical errors are left for `bump` to report.
    fn peek_next(&self) -> Token {
        let mut lexer = self.lexer.clone();
        lexer.next_token().unwrap_or(Token::Eof)
    }

    fn error(&self, msg: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.input, self.entry, msg, Some(self.look_pos))
    }

    fn err_here<T>(&self, msg: impl Into<String>) -> Result<T, SyntaxError> {
        Err(self.error(msg))
    }

    fn unexpected<T>(&self) -> Result<T, SyntaxError> {
        match &self.lookahead {
            Token::Eof => self.err_here("unexpected end of input"),
            tok => self.err_here(format!("unexpected '{}'", tok)),
        }
    }

    fn expect(&mut self, tok: Token, what: &str) -> Result<(), SyntaxError> {
        if self.lookahead == tok {
            self.bump()
        } else {
            self.err_here(format!("expected {}", what))
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.lookahead.is_keyword(keyword)
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), SyntaxError> {
        if self.at_keyword(keyword) {
            self.bump()
        } else {
            self.err_here(format!("expected {}", keyword))
        }
    }

    /// Runs `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, SyntaxError>) -> Result<T, SyntaxError> {
        if self.depth >= MAX_DEPTH {
            return self.err_here("expression nested too deeply");
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expect_eof(&mut self) -> Result<(), SyntaxError> {
        match self.lookahead {
            Token::Eof => Ok(()),
            _ => self.unexpected(),
        }
    }

    fn parse(&mut self, ctx: Context) -> Result<Expression, SyntaxError> {
        let expr = match self.entry {
            EntryPoint::Simple | EntryPoint::SimpleSubquery => self.parse_simple(ctx)?,
            EntryPoint::OrderBy | EntryPoint::Path => Expression::Path(self.parse_path()?),
            EntryPoint::Boolean => Expression::Predicate(self.parse_or(ctx)?),
            EntryPoint::InItem => self.parse_in_item()?,
            EntryPoint::Join => self.parse_join()?,
        };
        self.expect_eof()?;
        Ok(expr)
    }

    // ---- simple expressions ----

    fn parse_simple(&mut self, ctx: Context) -> Result<Expression, SyntaxError> {
        let operand = self.parse_additive(ctx)?;
        if !self.at_predicate_tail() {
            if matches!(
                self.lookahead,
                Token::Eq | Token::NotEq | Token::Less | Token::Le | Token::Greater | Token::Ge
            ) {
                return self.err_here("comparisons are only allowed in predicates");
            }
            return Ok(operand.lower());
        }
        let mut out = CompositeBuilder::default();
        operand.write(&mut out);
        self.parse_opaque_tail(ctx, &mut out)?;
        Ok(out.finish())
    }

    fn at_predicate_tail(&self) -> bool {
        ["NOT", "IN", "LIKE", "BETWEEN", "IS", "MEMBER"].iter().any(|k| self.at_keyword(k))
    }

    /// Captures a predicate tail as opaque text around typed operands.
    fn parse_opaque_tail(&mut self, ctx: Context, out: &mut CompositeBuilder) -> Result<(), SyntaxError> {
        if self.at_keyword("IS") {
            self.bump()?;
            out.push_text(" IS");
            if self.at_keyword("NOT") {
                self.bump()?;
                out.push_text(" NOT");
            }
            if self.at_keyword("NULL") {
                out.push_text(" NULL");
            } else if self.at_keyword("EMPTY") {
                out.push_text(" EMPTY");
            } else {
                return self.err_here("expected NULL or EMPTY");
            }
            return self.bump();
        }
        if self.at_keyword("NOT") {
            self.bump()?;
            out.push_text(" NOT");
        }
        if self.at_keyword("MEMBER") {
            return self.err_here("MEMBER OF is only allowed in predicates");
        }
        if self.at_keyword("IN") {
            self.bump()?;
            out.push_text(" IN ");
            match self.lookahead.clone() {
                Token::Parameter(name) => {
                    self.bump()?;
                    out.push(Expression::Parameter(ParameterExpression { name, collection_valued: true }));
                }
                Token::LParen => {
                    self.bump()?;
                    out.push_text("(");
                    loop {
                        out.push(self.parse_scalar(ctx)?);
                        match self.lookahead {
                            Token::Comma => {
                                self.bump()?;
                                out.push_text(", ");
                            }
                            Token::RParen => break,
                            _ => return self.err_here("expected ',' or ')' in IN list"),
                        }
                    }
                    self.bump()?;
                    out.push_text(")");
                }
                _ => return self.err_here("expected '(' or a parameter after IN"),
            }
        } else if self.at_keyword("LIKE") {
            self.bump()?;
            out.push_text(" LIKE ");
            out.push(self.parse_scalar(ctx)?);
            if self.at_keyword("ESCAPE") {
                self.bump()?;
                out.push_text(" ESCAPE ");
                out.push(self.parse_scalar(ctx)?);
            }
        } else if self.at_keyword("BETWEEN") {
            self.bump()?;
            out.push_text(" BETWEEN ");
            out.push(self.parse_scalar(ctx)?);
            self.expect_keyword("AND")?;
            out.push_text(" AND ");
            out.push(self.parse_scalar(ctx)?);
        } else {
            return self.err_here("expected IN, LIKE or BETWEEN");
        }
        Ok(())
    }

    /// An arithmetic operand lowered to its final shape.
    fn parse_scalar(&mut self, ctx: Context) -> Result<Expression, SyntaxError> {
        Ok(self.parse_additive(ctx)?.lower())
    }

    fn parse_additive(&mut self, ctx: Context) -> Result<Arith, SyntaxError> {
        self.nested(|p| p.parse_additive_chain(ctx))
    }

    fn parse_additive_chain(&mut self, ctx: Context) -> Result<Arith, SyntaxError> {
        let mut node = self.parse_multiplicative(ctx)?;
        loop {
            let op = match self.lookahead {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Sub,
                _ => break,
            };
            self.bump()?;
            let rhs = self.parse_multiplicative(ctx)?;
            node = Arith::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_multiplicative(&mut self, ctx: Context) -> Result<Arith, SyntaxError> {
        let mut node = self.parse_unary(ctx)?;
        loop {
            let op = match self.lookahead {
                Token::Star => ArithmeticOp::Mul,
                Token::Slash => ArithmeticOp::Div,
                _ => break,
            };
            self.bump()?;
            let rhs = self.parse_unary(ctx)?;
            node = Arith::binary(op, node, rhs);
        }
        Ok(node)
    }

    fn parse_unary(&mut self, ctx: Context) -> Result<Arith, SyntaxError> {
        match self.lookahead {
            Token::Minus => {
                self.bump()?;
                let inner = self.nested(|p| p.parse_unary(ctx))?;
                Ok(Arith::negate(inner))
            }
            Token::Plus => {
                self.bump()?;
                self.nested(|p| p.parse_unary(ctx))
            }
            _ => self.parse_primary(ctx),
        }
    }

    fn parse_primary(&mut self, ctx: Context) -> Result<Arith, SyntaxError> {
        match self.lookahead.clone() {
            Token::LParen => {
                self.bump()?;
                let inner = self.parse_additive(ctx)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Parameter(name) => {
                self.bump()?;
                Ok(Arith::Leaf(Expression::Parameter(ParameterExpression::new(name))))
            }
            Token::Identifier(word) => {
                if word.eq_ignore_ascii_case("NULL") {
                    self.bump()?;
                    return Ok(Arith::Literal("NULL".to_string()));
                }
                if word.eq_ignore_ascii_case("CASE") {
                    return Ok(Arith::Leaf(self.parse_case(ctx)?));
                }
                let upper = word.to_uppercase();
                if is_reserved(&word) {
                    return self.err_here(format!("unexpected keyword {}", upper));
                }
                if self.peek_next() == Token::LParen {
                    self.bump()?;
                    return self.parse_call(word, ctx);
                }
                if NILADIC_FUNCTIONS.contains(&upper.as_str()) && self.peek_next() != Token::Dot {
                    self.bump()?;
                    return Ok(Arith::Leaf(Expression::Function(FunctionExpression::new(upper, vec![]))));
                }
                self.bump()?;
                Ok(Arith::Leaf(Expression::Path(self.parse_path_tail(word, true)?)))
            }
            tok => match tok.literal_text() {
                Some(text) => {
                    self.bump()?;
                    Ok(Arith::Literal(text))
                }
                None => self.unexpected(),
            },
        }
    }

    // ---- paths ----

    /// A bare path: no functions except a TREAT root, no arithmetic.
    fn parse_path(&mut self) -> Result<PathExpression, SyntaxError> {
        match self.lookahead.clone() {
            Token::Identifier(word) if !is_reserved(&word) => {
                if self.peek_next() == Token::LParen {
                    if word.eq_ignore_ascii_case("TREAT") {
                        self.bump()?;
                        return self.parse_treat_path();
                    }
                    return self.err_here(format!("functions are not allowed in {} expressions", self.entry));
                }
                self.bump()?;
                self.parse_path_tail(word, true)
            }
            _ => self.err_here("expected a path"),
        }
    }

    /// Continues a path whose first identifier was already consumed.
    fn parse_path_tail(&mut self, first: String, allow_index: bool) -> Result<PathExpression, SyntaxError> {
        let mut elements = Vec::new();
        let mut name = first;
        loop {
            if allow_index && self.lookahead == Token::LBracket {
                self.bump()?;
                let index = self.parse_index()?;
                elements.push(PathElement::Array { base: name, index: Box::new(index) });
            } else {
                elements.push(PathElement::Property(name));
            }
            if self.lookahead != Token::Dot {
                break;
            }
            self.bump()?;
            name = match self.lookahead.clone() {
                Token::Identifier(s) => s,
                _ => return self.err_here("expected an identifier after '.'"),
            };
            self.bump()?;
        }
        PathExpression::new(elements).ok_or_else(|| self.error("expected a path"))
    }

    /// Lookahead is `.` after a root element such as `KEY(m)` or `TREAT(..)`.
    fn parse_dereference(&mut self, root: PathElement) -> Result<PathExpression, SyntaxError> {
        self.expect(Token::Dot, "'.'")?;
        let name = match self.lookahead.clone() {
            Token::Identifier(s) => s,
            _ => return self.err_here("expected an identifier after '.'"),
        };
        self.bump()?;
        let mut elements = vec![root];
        elements.extend(self.parse_path_tail(name, true)?.into_elements());
        PathExpression::new(elements).ok_or_else(|| self.error("expected a path"))
    }

    /// `TREAT` consumed; lookahead is `(`.
    fn parse_treat(&mut self) -> Result<TreatExpression, SyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let path = self.parse_path()?;
        self.expect_keyword("AS")?;
        let mut type_name = match self.lookahead.clone() {
            Token::Identifier(s) if !is_reserved(&s) => s,
            _ => return self.err_here("expected a type name after AS"),
        };
        self.bump()?;
        while self.lookahead == Token::Dot {
            self.bump()?;
            match self.lookahead.clone() {
                Token::Identifier(s) => {
                    type_name.push('.');
                    type_name.push_str(&s);
                }
                _ => return self.err_here("expected an identifier after '.'"),
            }
            self.bump()?;
        }
        self.expect(Token::RParen, "')'")?;
        Ok(TreatExpression::new(path, type_name))
    }

    /// A TREAT that must be dereferenced, as in `TREAT(d AS Sub).name`.
    fn parse_treat_path(&mut self) -> Result<PathExpression, SyntaxError> {
        let treat = self.parse_treat()?;
        if self.lookahead != Token::Dot {
            return self.err_here("TREAT must be followed by an attribute");
        }
        self.parse_dereference(PathElement::Treat(treat))
    }

    /// A join target: a path, or a bare TREAT of one.
    fn parse_join(&mut self) -> Result<Expression, SyntaxError> {
        let is_treat = matches!(&self.lookahead, Token::Identifier(w) if w.eq_ignore_ascii_case("TREAT"))
            && self.peek_next() == Token::LParen;
        if !is_treat {
            return Ok(Expression::Path(self.parse_path()?));
        }
        self.bump()?;
        let treat = self.parse_treat()?;
        if self.lookahead == Token::Dot {
            return Ok(Expression::Path(self.parse_dereference(PathElement::Treat(treat))?));
        }
        Ok(Expression::Treat(treat))
    }

    /// `[` already consumed. Accepts a dotted path, a parameter or one literal.
    fn parse_index(&mut self) -> Result<Expression, SyntaxError> {
        let index = match self.lookahead.clone() {
            Token::Parameter(name) => {
                self.bump()?;
                if self.lookahead != Token::RBracket {
                    return self.err_here("an array index parameter must be followed by ']'");
                }
                Expression::Parameter(ParameterExpression::new(name))
            }
            Token::Identifier(word) if !is_reserved(&word) => {
                self.bump()?;
                Expression::Path(self.parse_path_tail(word, false)?)
            }
            tok => match tok.literal_text() {
                Some(text) => {
                    self.bump()?;
                    Expression::opaque(text)
                }
                None => return self.err_here("invalid array index"),
            },
        };
        self.expect(Token::RBracket, "']'")?;
        Ok(index)
    }

    fn parse_in_item(&mut self) -> Result<Expression, SyntaxError> {
        match self.lookahead.clone() {
            Token::Parameter(name) => {
                self.bump()?;
                Ok(Expression::Parameter(ParameterExpression::new(name)))
            }
            Token::Minus => {
                self.bump()?;
                match self.lookahead.clone() {
                    Token::Number(n) => {
                        self.bump()?;
                        Ok(Expression::opaque(format!("-{}", n)))
                    }
                    _ => self.err_here("expected a number after '-'"),
                }
            }
            Token::Identifier(word) if word.eq_ignore_ascii_case("NULL") => {
                self.bump()?;
                Ok(Expression::opaque("NULL"))
            }
            tok => match tok.literal_text() {
                Some(text) => {
                    self.bump()?;
                    Ok(Expression::opaque(text))
                }
                None => self.err_here("expected a parameter or a literal"),
            },
        }
    }

    // ---- functions ----

    /// Function name consumed; lookahead is `(`.
    fn parse_call(&mut self, name: String, ctx: Context) -> Result<Arith, SyntaxError> {
        let upper = name.to_uppercase();
        if let Some(macros) = self.config.macros().cloned() {
            if let Some(function) = macros.get(&upper) {
                let pos = self.look_pos;
                let args = self.parse_arguments(ctx)?;
                let expanded = macros
                    .expand(&upper, args)
                    .map_err(|e| e.attach(self.input, self.entry, pos))?;
                if !function.supports_caching() {
                    self.cacheable = false;
                }
                if !self.macros_used.contains(&upper) {
                    self.macros_used.push(upper);
                }
                return Ok(Arith::Leaf(expanded));
            }
        }
        let expr = match upper.as_str() {
            "ENUM" | "ENTITY" => {
                self.bump()?;
                let mut text = format!("{}(", upper);
                let path = self.parse_path()?;
                if !path.is_simple() {
                    return self.err_here(format!("{} expects a dotted name", upper));
                }
                for (i, element) in path.elements().iter().enumerate() {
                    if let PathElement::Property(p) = element {
                        if i > 0 {
                            text.push('.');
                        }
                        text.push_str(p);
                    }
                }
                text.push(')');
                self.expect(Token::RParen, "')'")?;
                return Ok(Arith::Literal(text));
            }
            "TYPE" => {
                self.bump()?;
                let arg = match self.lookahead.clone() {
                    Token::Parameter(p) => {
                        self.bump()?;
                        Expression::Parameter(ParameterExpression::new(p))
                    }
                    _ => Expression::Path(self.parse_path()?),
                };
                self.expect(Token::RParen, "')'")?;
                Expression::Function(FunctionExpression::new(upper, vec![arg]))
            }
            "KEY" | "VALUE" | "ENTRY" => {
                let path = self.parse_path_argument()?;
                let function = FunctionExpression::new(upper, vec![Expression::Path(path)]);
                if self.lookahead == Token::Dot && function.name != "ENTRY" {
                    Expression::Path(self.parse_dereference(PathElement::Function(function))?)
                } else {
                    Expression::Function(function)
                }
            }
            "TREAT" => Expression::Path(self.parse_treat_path()?),
            "OUTER" => {
                if !ctx.in_subquery {
                    return self.err_here("OUTER is only allowed in subquery expressions");
                }
                let path = self.parse_path_argument()?;
                Expression::Function(FunctionExpression::new(upper, vec![Expression::Path(path)]))
            }
            "SIZE" => {
                let path = self.parse_path_argument()?.for_collection_function();
                Expression::Function(FunctionExpression::new(upper, vec![Expression::Path(path)]))
            }
            "FUNCTION" => {
                self.bump()?;
                let target = match self.lookahead.clone() {
                    tok @ Token::String { .. } => tok.literal_text().unwrap_or_default(),
                    _ => return self.err_here("FUNCTION expects a quoted function name"),
                };
                self.bump()?;
                let mut args = vec![Expression::opaque(target)];
                while self.lookahead == Token::Comma {
                    self.bump()?;
                    args.push(self.parse_scalar(ctx)?);
                }
                self.expect(Token::RParen, "')'")?;
                Expression::Function(FunctionExpression::new(upper, args))
            }
            _ if self.config.is_aggregate(&upper) => self.parse_aggregate(upper, ctx)?,
            _ => {
                let args = self.parse_arguments(ctx)?;
                Expression::Function(FunctionExpression::new(upper, args))
            }
        };
        Ok(Arith::Leaf(expr))
    }

    fn parse_aggregate(&mut self, name: String, ctx: Context) -> Result<Expression, SyntaxError> {
        self.bump()?;
        if name == "COUNT" && self.lookahead == Token::Star {
            self.bump()?;
            self.expect(Token::RParen, "')'")?;
            return Ok(Expression::Function(FunctionExpression::new(name, vec![Expression::opaque("*")])));
        }
        let distinct = if self.at_keyword("DISTINCT") {
            self.bump()?;
            true
        } else {
            false
        };
        let mut args = vec![self.parse_scalar(ctx)?];
        while self.lookahead == Token::Comma {
            self.bump()?;
            args.push(self.parse_scalar(ctx)?);
        }
        self.expect(Token::RParen, "')'")?;
        if args.len() == 1 {
            if let Expression::Path(path) = &args[0] {
                return Ok(Expression::Aggregate(AggregateExpression { name, distinct, arg: path.clone() }));
            }
        }
        if distinct {
            let first = CompositeExpression::from_parts(vec![Expression::opaque("DISTINCT "), args.remove(0)]);
            args.insert(0, first);
        }
        Ok(Expression::Function(FunctionExpression::new(name, args)))
    }

    fn parse_path_argument(&mut self) -> Result<PathExpression, SyntaxError> {
        self.bump()?;
        let path = self.parse_path()?;
        self.expect(Token::RParen, "')'")?;
        Ok(path)
    }

    fn parse_arguments(&mut self, ctx: Context) -> Result<Vec<Expression>, SyntaxError> {
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.lookahead == Token::RParen {
            self.bump()?;
            return Ok(args);
        }
        loop {
            args.push(self.parse_scalar(ctx)?);
            match self.lookahead {
                Token::Comma => self.bump()?,
                Token::RParen => {
                    self.bump()?;
                    return Ok(args);
                }
                _ => return self.err_here("expected ',' or ')' in argument list"),
            }
        }
    }

    // ---- CASE ----

    fn parse_case(&mut self, ctx: Context) -> Result<Expression, SyntaxError> {
        if !ctx.allow_case_when {
            return self.err_here("CASE expressions are not allowed here");
        }
        self.nested(|p| p.parse_case_body(ctx))
    }

    fn parse_case_body(&mut self, ctx: Context) -> Result<Expression, SyntaxError> {
        self.bump()?;
        let operand = if self.at_keyword("WHEN") { None } else { Some(self.parse_scalar(ctx)?) };
        let mut when_clauses = Vec::new();
        while self.at_keyword("WHEN") {
            self.bump()?;
            let condition = if operand.is_some() {
                self.parse_scalar(ctx)?
            } else {
                Expression::Predicate(self.parse_or(ctx)?)
            };
            self.expect_keyword("THEN")?;
            let result = self.parse_scalar(ctx)?;
            when_clauses.push(WhenClause::new(condition, result));
        }
        if when_clauses.is_empty() {
            return self.err_here("CASE requires at least one WHEN clause");
        }
        self.expect_keyword("ELSE")?;
        let else_result = Box::new(self.parse_scalar(ctx)?);
        self.expect_keyword("END")?;
        Ok(match operand {
            Some(operand) => Expression::SimpleCase(SimpleCaseExpression {
                operand: Box::new(operand),
                when_clauses,
                else_result,
            }),
            None => Expression::GeneralCase(GeneralCaseExpression { when_clauses, else_result }),
        })
    }

    // ---- predicates ----

    fn parse_or(&mut self, ctx: Context) -> Result<Predicate, SyntaxError> {
        self.nested(|p| p.parse_or_chain(ctx))
    }

    fn parse_or_chain(&mut self, ctx: Context) -> Result<Predicate, SyntaxError> {
        let mut items = vec![self.parse_and(ctx)?];
        while self.at_keyword("OR") {
            self.bump()?;
            items.push(self.parse_and(ctx)?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Predicate::Or(items) })
    }

    fn parse_and(&mut self, ctx: Context) -> Result<Predicate, SyntaxError> {
        let mut items = vec![self.parse_not(ctx)?];
        while self.at_keyword("AND") {
            self.bump()?;
            items.push(self.parse_not(ctx)?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Predicate::And(items) })
    }

    fn parse_not(&mut self, ctx: Context) -> Result<Predicate, SyntaxError> {
        if self.at_keyword("NOT") {
            self.bump()?;
            let inner = self.nested(|p| p.parse_not(ctx))?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_predicate_primary(ctx)
    }

    fn parse_predicate_primary(&mut self, ctx: Context) -> Result<Predicate, SyntaxError> {
        if self.lookahead == Token::LParen {
            // `(a > b)` groups a predicate, `(a + b) > c` groups an operand.
            let snapshot = self.clone();
            self.bump()?;
            let grouped = self
                .parse_or(ctx)
                .and_then(|p| self.expect(Token::RParen, "')'").map(|_| p));
            match grouped {
                Ok(p) => return Ok(p),
                Err(_) => *self = snapshot,
            }
        }
        self.parse_condition(ctx)
    }

    fn parse_condition(&mut self, ctx: Context) -> Result<Predicate, SyntaxError> {
        let left = self.parse_scalar(ctx)?;
        let comparison = match self.lookahead {
            Token::Eq | Token::NotEq => Some(Predicate::Eq as fn(Comparison) -> Predicate),
            Token::Greater => Some(Predicate::Gt as fn(Comparison) -> Predicate),
            Token::Ge => Some(Predicate::Ge as fn(Comparison) -> Predicate),
            Token::Less => Some(Predicate::Lt as fn(Comparison) -> Predicate),
            Token::Le => Some(Predicate::Le as fn(Comparison) -> Predicate),
            _ => None,
        };
        if let Some(make) = comparison {
            let negated = self.lookahead == Token::NotEq;
            self.bump()?;
            let quantifier = self.parse_quantifier(ctx)?;
            let right = self.parse_scalar(ctx)?;
            return Ok(make(Comparison {
                left: Box::new(left),
                right: Box::new(right),
                quantifier,
                negated,
            }));
        }

        let operand = Box::new(left);
        if self.at_keyword("IS") {
            self.bump()?;
            let negated = self.at_keyword("NOT");
            if negated {
                self.bump()?;
            }
            if self.at_keyword("NULL") {
                self.bump()?;
                return Ok(Predicate::IsNull { operand, negated });
            }
            if self.at_keyword("EMPTY") {
                self.bump()?;
                return Ok(Predicate::IsEmpty { operand, negated });
            }
            return self.err_here("expected NULL or EMPTY");
        }

        let negated = self.at_keyword("NOT");
        if negated {
            self.bump()?;
        }
        if self.at_keyword("IN") {
            self.bump()?;
            let items = match self.lookahead.clone() {
                Token::Parameter(name) => {
                    self.bump()?;
                    vec![Expression::Parameter(ParameterExpression { name, collection_valued: true })]
                }
                Token::LParen => {
                    self.bump()?;
                    let mut items = vec![self.parse_scalar(ctx)?];
                    while self.lookahead == Token::Comma {
                        self.bump()?;
                        items.push(self.parse_scalar(ctx)?);
                    }
                    self.expect(Token::RParen, "')'")?;
                    items
                }
                _ => return self.err_here("expected '(' or a parameter after IN"),
            };
            return Ok(Predicate::In { operand, items, negated });
        }
        if self.at_keyword("LIKE") {
            self.bump()?;
            let pattern = Box::new(self.parse_scalar(ctx)?);
            let escape = if self.at_keyword("ESCAPE") {
                self.bump()?;
                Some(Box::new(self.parse_scalar(ctx)?))
            } else {
                None
            };
            return Ok(Predicate::Like { operand, pattern, escape, negated });
        }
        if self.at_keyword("BETWEEN") {
            self.bump()?;
            let low = Box::new(self.parse_scalar(ctx)?);
            self.expect_keyword("AND")?;
            let high = Box::new(self.parse_scalar(ctx)?);
            return Ok(Predicate::Between { operand, low, high, negated });
        }
        if self.at_keyword("MEMBER") {
            self.bump()?;
            if self.at_keyword("OF") {
                self.bump()?;
            }
            let collection = Box::new(self.parse_scalar(ctx)?);
            return Ok(Predicate::MemberOf { element: operand, collection, negated });
        }
        if negated {
            return self.err_here("expected IN, LIKE, BETWEEN or MEMBER OF after NOT");
        }
        self.err_here("expected a predicate")
    }

    /// ANY, SOME and ALL act as quantifiers only when an operand follows.
    fn parse_quantifier(&mut self, ctx: Context) -> Result<Quantifier, SyntaxError> {
        let quantifier = if self.at_keyword("ANY") || self.at_keyword("SOME") {
            Quantifier::Any
        } else if self.at_keyword("ALL") {
            Quantifier::All
        } else {
            return Ok(Quantifier::None);
        };
        match self.peek_next() {
            Token::LParen | Token::Parameter(_) => {}
            Token::Identifier(word) if !is_reserved(&word) => {}
            _ => return Ok(Quantifier::None),
        }
        if !ctx.allow_quantified {
            return self.err_here("quantified predicates are not allowed here");
        }
        self.bump()?;
        Ok(quantifier)
    }
}
