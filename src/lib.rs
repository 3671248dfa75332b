pub mod arithmetic;
pub mod ast;
pub mod cache;
pub mod config;
pub mod error;
pub mod factory;
pub mod lexer;
pub mod macros;
pub mod parser;
pub mod render;
pub mod visit;

pub use arithmetic::ArithmeticOp;
pub use ast::{
    AggregateExpression, Comparison, CompositeExpression, Expression, FunctionExpression, GeneralCaseExpression,
    OpaqueFragment, ParameterExpression, PathElement, PathExpression, Predicate, Quantifier, SimpleCaseExpression,
    TreatExpression, WhenClause,
};
pub use cache::{CacheStats, ParseCache};
pub use config::FactoryConfig;
pub use error::{ConfigError, SyntaxError};
pub use factory::{CachingExpressionFactory, ExpressionFactory, ExpressionParser};
pub use macros::{MacroError, MacroFunction, MacroRegistry};
pub use parser::{EntryPoint, ParseFlags};
pub use render::render;

// Process-wide caching factory, configured from the environment on first use
lazy_static::lazy_static! {
    static ref DEFAULT_FACTORY: CachingExpressionFactory = {
        let config = FactoryConfig::from_env().unwrap_or_else(|e| {
            log::warn!("ignoring environment configuration: {}", e);
            FactoryConfig::default()
        });
        CachingExpressionFactory::new(config)
    };
}

/// Parses `text` under `entry` with default flags through the shared cache.
pub fn parse(text: &str, entry: EntryPoint) -> Result<Expression, SyntaxError> {
    parse_with(text, entry, ParseFlags::default())
}

pub fn parse_with(text: &str, entry: EntryPoint, flags: ParseFlags) -> Result<Expression, SyntaxError> {
    DEFAULT_FACTORY.parse(text, entry, flags)
}

/// The factory behind [`parse`] and [`parse_with`].
pub fn default_factory() -> &'static CachingExpressionFactory {
    &*DEFAULT_FACTORY
}

/// Register a macro with the shared factory
pub fn register_macro(function: Box<dyn MacroFunction>) -> Result<(), MacroError> {
    DEFAULT_FACTORY.macros().register(function)
}

pub fn unregister_macro(name: &str) -> bool {
    DEFAULT_FACTORY.macros().unregister(name)
}

pub fn list_macros() -> Vec<String> {
    DEFAULT_FACTORY.macros().names()
}

pub fn cache_stats() -> CacheStats {
    DEFAULT_FACTORY.cache_stats()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_shared_factory() {
        for text in ["a.b + 1", "SIZE(d.contacts)", "COUNT(DISTINCT d.id)", "CASE WHEN a > 1 THEN b ELSE c END"] {
            assert_eq!(render(&parse(text, EntryPoint::Simple).unwrap()), text);
        }
    }

    #[test]
    fn repeated_parses_are_equal() {
        let a = parse("d.versions[:i].name", EntryPoint::Simple).unwrap();
        let b = parse("d.versions[:i].name", EntryPoint::Simple).unwrap();
        assert_eq!(a, b);
    }
}
