use crate::ast::{Expression, PathExpression, Predicate};
use crate::cache::{CacheKey, CacheStats, ParseCache};
use crate::config::FactoryConfig;
use crate::error::SyntaxError;
use crate::macros::MacroRegistry;
use crate::parser::{parse_with_config, EntryPoint, ParseFlags, Parsed, ParserConfig};
use std::sync::Arc;

/// Entry-point front door shared by the plain and the caching factory.
///
/// Implementors provide [`ExpressionParser::parse`]; the `create_*` methods
/// pick the entry point and narrow the result type.
pub trait ExpressionParser {
    fn parse(&self, text: &str, entry: EntryPoint, flags: ParseFlags) -> Result<Expression, SyntaxError>;

    fn create_simple_expression(&self, text: &str, allow_case_when: bool) -> Result<Expression, SyntaxError> {
        self.parse(text, EntryPoint::Simple, ParseFlags::default().with_case_when(allow_case_when))
    }

    fn create_subquery_expression(&self, text: &str) -> Result<Expression, SyntaxError> {
        self.parse(text, EntryPoint::SimpleSubquery, ParseFlags::default())
    }

    fn create_order_by_expression(&self, text: &str) -> Result<Expression, SyntaxError> {
        self.parse(text, EntryPoint::OrderBy, ParseFlags::default())
    }

    fn create_boolean_expression(&self, text: &str, allow_quantified: bool) -> Result<Predicate, SyntaxError> {
        let flags = ParseFlags::default().with_quantified_predicates(allow_quantified);
        match self.parse(text, EntryPoint::Boolean, flags)? {
            Expression::Predicate(p) => Ok(p),
            _ => Err(SyntaxError::new(text, EntryPoint::Boolean, "expected a predicate", None)),
        }
    }

    fn create_path_expression(&self, text: &str) -> Result<PathExpression, SyntaxError> {
        match self.parse(text, EntryPoint::Path, ParseFlags::default())? {
            Expression::Path(p) => Ok(p),
            _ => Err(SyntaxError::new(text, EntryPoint::Path, "expected a path", None)),
        }
    }

    /// A join target: a path or a bare `TREAT(path AS Type)`.
    fn create_join_expression(&self, text: &str) -> Result<Expression, SyntaxError> {
        self.parse(text, EntryPoint::Join, ParseFlags::default())
    }

    fn create_in_item_expression(&self, text: &str) -> Result<Expression, SyntaxError> {
        self.parse(text, EntryPoint::InItem, ParseFlags::default())
    }

    /// Parses every item; fails on the first invalid one.
    fn create_in_item_expressions<S: AsRef<str>>(&self, items: &[S]) -> Result<Vec<Expression>, SyntaxError>
    where
        Self: Sized,
    {
        items.iter().map(|item| self.create_in_item_expression(item.as_ref())).collect()
    }
}

/// Uncached parser bound to a configuration and a macro registry.
pub struct ExpressionFactory {
    config: FactoryConfig,
    parser_config: ParserConfig,
    macros: Arc<MacroRegistry>,
}

impl ExpressionFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self::with_macros(config, Arc::new(MacroRegistry::new()))
    }

    pub fn with_macros(config: FactoryConfig, macros: Arc<MacroRegistry>) -> Self {
        let parser_config = ParserConfig::new(&config.aggregate_functions).with_macros(Arc::clone(&macros));
        Self { config, parser_config, macros }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn macros(&self) -> &Arc<MacroRegistry> {
        &self.macros
    }

    pub(crate) fn parse_detailed(&self, text: &str, entry: EntryPoint, flags: ParseFlags) -> Result<Parsed, SyntaxError> {
        log::debug!("parsing {} expression '{}'", entry, text);
        let parsed = parse_with_config(text, entry, flags, &self.parser_config);
        match &parsed {
            Ok(p) if !p.macros_used.is_empty() => log::debug!("expanded macros {:?} in '{}'", p.macros_used, text),
            Ok(_) => {}
            Err(e) => log::debug!("{}", e),
        }
        parsed
    }
}

impl Default for ExpressionFactory {
    fn default() -> Self {
        Self::new(FactoryConfig::default())
    }
}

impl ExpressionParser for ExpressionFactory {
    fn parse(&self, text: &str, entry: EntryPoint, flags: ParseFlags) -> Result<Expression, SyntaxError> {
        self.parse_detailed(text, entry, flags).map(|p| p.expression)
    }
}

/// [`ExpressionFactory`] behind a [`ParseCache`].
///
/// Each call returns a tree owned by the caller; repeated calls with the same
/// text, entry point and flags return equal trees.
pub struct CachingExpressionFactory {
    inner: ExpressionFactory,
    cache: ParseCache,
}

impl CachingExpressionFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self::wrap(ExpressionFactory::new(config))
    }

    pub fn wrap(inner: ExpressionFactory) -> Self {
        let cache = ParseCache::with_limit(inner.config().max_cache_entries);
        Self { inner, cache }
    }

    pub fn inner(&self) -> &ExpressionFactory {
        &self.inner
    }

    pub fn macros(&self) -> &Arc<MacroRegistry> {
        self.inner.macros()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for CachingExpressionFactory {
    fn default() -> Self {
        Self::new(FactoryConfig::default())
    }
}

impl ExpressionParser for CachingExpressionFactory {
    fn parse(&self, text: &str, entry: EntryPoint, flags: ParseFlags) -> Result<Expression, SyntaxError> {
        if !self.inner.config().cache_enabled {
            return self.inner.parse(text, entry, flags);
        }
        let key = CacheKey { text: text.to_string(), entry, flags };
        let generation = self.inner.macros().generation();
        self.cache.get_or_parse(key, generation, || self.inner.parse_detailed(text, entry, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_helpers() {
        let factory = ExpressionFactory::default();
        assert_eq!(factory.create_path_expression("a.b").unwrap().to_string(), "a.b");
        assert!(factory.create_path_expression("a.b + 1").is_err());
        assert!(matches!(factory.create_boolean_expression("a = 1", false).unwrap(), Predicate::Eq(_)));
        let items = factory.create_in_item_expressions(&[":p", "1", "'x'"]).unwrap();
        assert_eq!(items.len(), 3);
        assert!(factory.create_in_item_expressions(&["a.b"]).is_err());
        assert!(matches!(factory.create_join_expression("TREAT(d.people AS Employee)").unwrap(), Expression::Treat(_)));
        assert!(factory.create_path_expression("TREAT(d.people AS Employee)").is_err());
    }

    #[test]
    fn configured_aggregates() {
        let factory = ExpressionFactory::new(FactoryConfig {
            aggregate_functions: vec!["MEDIAN".into()],
            ..FactoryConfig::default()
        });
        assert!(matches!(factory.create_simple_expression("median(a.b)", true).unwrap(), Expression::Aggregate(_)));
        assert!(matches!(factory.create_simple_expression("SUM(a.b)", true).unwrap(), Expression::Function(_)));
    }

    #[test]
    fn disabled_cache_never_stores() {
        let factory = CachingExpressionFactory::new(FactoryConfig { cache_enabled: false, ..FactoryConfig::default() });
        factory.create_simple_expression("a.b", true).unwrap();
        factory.create_simple_expression("a.b", true).unwrap();
        assert_eq!(factory.cache_stats(), CacheStats::default());
    }
}
