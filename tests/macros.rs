use jpql_expr::macros::MacroFunction;
use jpql_expr::{
    render, CachingExpressionFactory, EntryPoint, Expression, ExpressionFactory, ExpressionParser, FactoryConfig,
    FunctionExpression, MacroError, MacroRegistry, ParseFlags, SyntaxError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rewrites `name(args)` into a call of `target`.
struct Prefixed {
    name: &'static str,
    target: &'static str,
}

impl MacroFunction for Prefixed {
    fn name(&self) -> &str {
        self.name
    }

    fn min_args(&self) -> usize {
        1
    }

    fn max_args(&self) -> Option<usize> {
        Some(2)
    }

    fn apply(&self, args: Vec<Expression>) -> Result<Expression, SyntaxError> {
        Ok(Expression::Function(FunctionExpression::new(self.target, args)))
    }
}

/// Counts its expansions and refuses to be cached.
struct Volatile {
    calls: Arc<AtomicUsize>,
}

impl MacroFunction for Volatile {
    fn name(&self) -> &str {
        "NOW_TAG"
    }

    fn min_args(&self) -> usize {
        0
    }

    fn max_args(&self) -> Option<usize> {
        Some(0)
    }

    fn apply(&self, _args: Vec<Expression>) -> Result<Expression, SyntaxError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Expression::opaque(format!("'tag-{}'", n)))
    }

    fn supports_caching(&self) -> bool {
        false
    }
}

fn shout() -> Box<dyn MacroFunction> {
    Box::new(Prefixed { name: "shout", target: "UPPER" })
}

#[test]
fn macros_expand_during_parsing() {
    let factory = ExpressionFactory::default();
    factory.macros().register(shout()).unwrap();
    let expr = factory.create_simple_expression("Shout(d.name) + 1", true).unwrap();
    assert_eq!(render(&expr), "UPPER(d.name) + 1");
}

#[test]
fn arity_errors_point_at_the_call() {
    let factory = ExpressionFactory::default();
    factory.macros().register(shout()).unwrap();

    let err = factory.create_simple_expression("SHOUT()", true).unwrap_err();
    assert_eq!(err.expression, "SHOUT()");
    assert_eq!(err.entry_point, EntryPoint::Simple);
    assert!(err.message.contains("at least 1"), "{}", err.message);
    assert_eq!(err.position, Some(5));

    let err = factory.create_simple_expression("a + SHOUT(a, b, c)", true).unwrap_err();
    assert!(err.message.contains("at most 2"), "{}", err.message);
    assert_eq!(err.position, Some(9));
}

#[test]
fn invalid_definitions_are_rejected() {
    let registry = MacroRegistry::new();
    assert_eq!(registry.register(Box::new(Prefixed { name: "", target: "X" })), Err(MacroError::EmptyName));
    assert!(registry.is_empty());
}

#[test]
fn changing_macros_invalidates_cached_results() {
    let macros = Arc::new(MacroRegistry::new());
    let factory = CachingExpressionFactory::wrap(ExpressionFactory::with_macros(FactoryConfig::default(), Arc::clone(&macros)));
    macros.register(shout()).unwrap();

    let first = factory.create_simple_expression("SHOUT(a.b)", true).unwrap();
    assert_eq!(render(&first), "UPPER(a.b)");
    assert_eq!(render(&factory.create_simple_expression("SHOUT(a.b)", true).unwrap()), "UPPER(a.b)");
    assert_eq!(factory.cache_stats().hits, 1);

    macros.register(Box::new(Prefixed { name: "SHOUT", target: "LOWER" })).unwrap();
    assert_eq!(render(&factory.create_simple_expression("SHOUT(a.b)", true).unwrap()), "LOWER(a.b)");

    assert!(macros.unregister("shout"));
    let plain = factory.create_simple_expression("SHOUT(a.b)", true).unwrap();
    assert_eq!(render(&plain), "SHOUT(a.b)");
}

#[test]
fn results_without_macros_survive_registry_changes() {
    let factory = CachingExpressionFactory::default();
    factory.create_simple_expression("a.b", true).unwrap();
    factory.macros().register(shout()).unwrap();
    factory.create_simple_expression("a.b", true).unwrap();
    assert_eq!(factory.cache_stats().hits, 1);
}

#[test]
fn non_cacheable_macros_expand_on_every_parse() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = CachingExpressionFactory::default();
    factory.macros().register(Box::new(Volatile { calls: Arc::clone(&calls) })).unwrap();

    let a = factory.parse("now_tag()", EntryPoint::Simple, ParseFlags::default()).unwrap();
    let b = factory.parse("now_tag()", EntryPoint::Simple, ParseFlags::default()).unwrap();
    assert_eq!(render(&a), "'tag-0'");
    assert_eq!(render(&b), "'tag-1'");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(factory.cache_stats().entries, 0);
}

#[test]
fn macros_are_listed_by_upper_case_name() {
    let registry = MacroRegistry::new();
    registry.register(shout()).unwrap();
    registry.register(Box::new(Prefixed { name: "Alpha", target: "A" })).unwrap();
    assert_eq!(registry.names(), vec!["ALPHA".to_string(), "SHOUT".to_string()]);
    assert!(registry.contains("alpha"));
}
