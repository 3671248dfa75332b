use crate::ast::Expression;
use crate::error::SyntaxError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// A function-like macro expanded at parse time.
///
/// When the parser meets `NAME(args...)` and `NAME` is registered, the
/// arguments are parsed as simple expressions and handed to [`apply`]; its
/// result replaces the call in the tree.
///
/// # Example
/// ```rust
/// use jpql_expr::macros::MacroFunction;
/// use jpql_expr::{Expression, FunctionExpression, SyntaxError};
///
/// struct Upper;
///
/// impl MacroFunction for Upper {
///     fn name(&self) -> &str { "SHOUT" }
///     fn min_args(&self) -> usize { 1 }
///     fn max_args(&self) -> Option<usize> { Some(1) }
///
///     fn apply(&self, args: Vec<Expression>) -> Result<Expression, SyntaxError> {
///         Ok(Expression::Function(FunctionExpression::new("UPPER", args)))
///     }
/// }
/// ```
///
/// [`apply`]: MacroFunction::apply
pub trait MacroFunction: Send + Sync {
    /// Case-insensitive call name.
    fn name(&self) -> &str;

    fn min_args(&self) -> usize;

    /// `None` means unlimited.
    fn max_args(&self) -> Option<usize>;

    fn apply(&self, args: Vec<Expression>) -> Result<Expression, SyntaxError>;

    /// Results of parses that used a non-cacheable macro are never stored.
    fn supports_caching(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MacroError {
    #[error("macro name cannot be empty")]
    EmptyName,
    #[error("macro {0}: min_args cannot be greater than max_args")]
    InvalidArity(String),
}

/// Concurrent macro table keyed by upper-cased name.
///
/// Every change bumps a generation counter so that cached parse results
/// depending on macros can tell when they went stale.
pub struct MacroRegistry {
    macros: DashMap<String, Arc<dyn MacroFunction>>,
    generation: AtomicU64,
}

impl MacroRegistry {
    pub fn new() -> Self {
        Self {
            macros: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn register(&self, function: Box<dyn MacroFunction>) -> Result<(), MacroError> {
        let name = function.name().to_uppercase();
        if name.is_empty() {
            return Err(MacroError::EmptyName);
        }
        if function.min_args() > function.max_args().unwrap_or(usize::MAX) {
            return Err(MacroError::InvalidArity(name));
        }
        log::debug!("registering macro {}", name);
        self.macros.insert(name, Arc::from(function));
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.macros.remove(&name.to_uppercase()).is_some();
        if removed {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MacroFunction>> {
        self.macros.get(&name.to_uppercase()).map(|m| Arc::clone(m.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(&name.to_uppercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.macros.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Checks the arity and expands the call.
    pub fn expand(&self, name: &str, args: Vec<Expression>) -> Result<Expression, SyntaxError> {
        let function = self
            .get(name)
            .ok_or_else(|| SyntaxError::detached(format!("unknown macro {}", name)))?;
        let count = args.len();
        if count < function.min_args() {
            return Err(SyntaxError::detached(format!(
                "{} expects at least {} arguments, got {}",
                name.to_uppercase(),
                function.min_args(),
                count
            )));
        }
        if let Some(max) = function.max_args() {
            if count > max {
                return Err(SyntaxError::detached(format!(
                    "{} expects at most {} arguments, got {}",
                    name.to_uppercase(),
                    max,
                    count
                )));
            }
        }
        function.apply(args)
    }
}

impl Default for MacroRegistry {
    fn default() -> Self {
        Self::new()
    }
}
