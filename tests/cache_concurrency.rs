use jpql_expr::{
    CachingExpressionFactory, EntryPoint, Expression, ExpressionFactory, ExpressionParser, FactoryConfig, ParseFlags,
    PathExpression,
};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;

const WORKLOAD: &[(&str, EntryPoint)] = &[
    ("d.owner.name", EntryPoint::Simple),
    ("1 * (1 - 1)", EntryPoint::Simple),
    ("SIZE(d.contacts)", EntryPoint::Simple),
    ("d.versions[:index].date", EntryPoint::Simple),
    ("CASE WHEN d.age > 18 THEN 'adult' ELSE 'minor' END", EntryPoint::Simple),
    ("OUTER(d.owner)", EntryPoint::SimpleSubquery),
    ("NOT(NOT(a > b)) AND d.age BETWEEN 1 AND 10", EntryPoint::Boolean),
    ("x.a MEMBER OF y.a", EntryPoint::Boolean),
];

fn expected() -> Vec<Expression> {
    let plain = ExpressionFactory::default();
    WORKLOAD.iter().map(|(text, entry)| plain.parse(text, *entry, ParseFlags::default()).unwrap()).collect()
}

#[test]
fn repeated_parses_are_equal_but_independent() {
    let factory = CachingExpressionFactory::default();
    let first = factory.create_simple_expression("COALESCE(d.age, SIZE(d.contacts))", true).unwrap();
    let mut second = factory.create_simple_expression("COALESCE(d.age, SIZE(d.contacts))", true).unwrap();
    assert_eq!(first, second);

    match &mut second {
        Expression::Function(f) => {
            f.name = "NULLIF".to_string();
            f.args.pop();
        }
        other => panic!("expected function, got {:?}", other),
    }
    let third = factory.create_simple_expression("COALESCE(d.age, SIZE(d.contacts))", true).unwrap();
    assert_eq!(first, third);
    assert_ne!(second, third);
    assert_eq!(third.to_string(), "COALESCE(d.age, SIZE(d.contacts))");

    let stats = factory.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.entries, 1);
}

#[test]
fn hits_keep_the_collection_flag() {
    let factory = CachingExpressionFactory::default();
    let size_arg = |expr: &Expression| match expr {
        Expression::Function(f) => f.args[0].as_path().map(|p| p.is_used_in_collection_function()),
        _ => None,
    };

    let miss = factory.create_simple_expression("SIZE(d.contacts)", true).unwrap();
    let mut hit = factory.create_simple_expression("SIZE(d.contacts)", true).unwrap();
    assert_eq!(size_arg(&miss), Some(true));
    assert_eq!(size_arg(&hit), Some(true));

    if let Expression::Function(f) = &mut hit {
        let plain = PathExpression::of(&["d", "contacts"]).unwrap();
        f.args[0] = Expression::Path(plain);
    }
    assert_eq!(size_arg(&hit), Some(false));

    let again = factory.create_simple_expression("SIZE(d.contacts)", true).unwrap();
    assert_eq!(size_arg(&again), Some(true));
    assert_eq!(factory.cache_stats().hits, 2);
}

#[test]
fn flags_and_entry_points_are_part_of_the_key() {
    let factory = CachingExpressionFactory::default();
    factory.parse("a.b", EntryPoint::Simple, ParseFlags::default()).unwrap();
    factory.parse("a.b", EntryPoint::Path, ParseFlags::default()).unwrap();
    factory.parse("a.b", EntryPoint::Simple, ParseFlags::default().with_case_when(false)).unwrap();
    assert_eq!(factory.cache_stats().entries, 3);
    assert_eq!(factory.cache_stats().hits, 0);
}

#[test]
fn case_gating_is_not_bypassed_by_the_cache() {
    let factory = CachingExpressionFactory::default();
    let text = "CASE WHEN a > 1 THEN 1 ELSE 2 END";
    assert!(factory.create_simple_expression(text, true).is_ok());
    assert!(factory.create_simple_expression(text, false).is_err());
}

#[test]
fn errors_are_reported_every_time() {
    let factory = CachingExpressionFactory::default();
    for _ in 0..3 {
        assert!(factory.create_simple_expression("a.b +", true).is_err());
    }
    assert_eq!(factory.cache_stats().entries, 0);
    assert_eq!(factory.cache_stats().misses, 3);
}

#[test]
fn bounded_cache_still_parses() {
    let factory = CachingExpressionFactory::new(FactoryConfig { max_cache_entries: Some(2), ..FactoryConfig::default() });
    for text in ["a", "b", "c", "d"] {
        assert!(factory.create_simple_expression(text, true).is_ok());
    }
    assert_eq!(factory.cache_stats().entries, 2);
    factory.clear_cache();
    assert_eq!(factory.cache_stats().entries, 0);
}

#[test]
fn concurrent_parses_match_single_threaded_results() {
    let num_threads = 8;
    let iterations = 200;
    let factory = Arc::new(CachingExpressionFactory::default());
    let expected = Arc::new(expected());
    let barrier = Arc::new(Barrier::new(num_threads));
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let factory = Arc::clone(&factory);
            let expected = Arc::clone(&expected);
            let barrier = Arc::clone(&barrier);
            let tx = tx.clone();
            thread::spawn(move || {
                barrier.wait();
                let mut mismatches = 0;
                for i in 0..iterations {
                    let idx = (thread_id + i) % WORKLOAD.len();
                    let (text, entry) = WORKLOAD[idx];
                    match factory.parse(text, entry, ParseFlags::default()) {
                        Ok(expr) if expr == expected[idx] => {}
                        _ => mismatches += 1,
                    }
                }
                tx.send((thread_id, mismatches)).unwrap();
            })
        })
        .collect();
    drop(tx);

    for handle in handles {
        handle.join().expect("worker panicked");
    }
    let results: Vec<(usize, usize)> = rx.iter().collect();
    assert_eq!(results.len(), num_threads);
    for (thread_id, mismatches) in results {
        assert_eq!(mismatches, 0, "thread {} saw mismatched results", thread_id);
    }

    let stats = factory.cache_stats();
    assert_eq!(stats.entries, WORKLOAD.len());
    assert_eq!(stats.hits + stats.misses, (num_threads * iterations) as u64);
    assert!(stats.misses >= WORKLOAD.len() as u64);
    assert!(stats.hit_rate() > 50.0);
}
