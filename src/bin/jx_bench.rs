use jpql_expr::{CachingExpressionFactory, EntryPoint, ExpressionFactory, ExpressionParser, FactoryConfig, ParseFlags};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const WORKLOAD: &[(&str, EntryPoint)] = &[
    ("d.owner.name", EntryPoint::Simple),
    ("age + 1", EntryPoint::Simple),
    ("1 * (1 - 1)", EntryPoint::Simple),
    ("SIZE(d.contacts)", EntryPoint::Simple),
    ("COUNT(DISTINCT d.id)", EntryPoint::Simple),
    ("d.versions[:index].date", EntryPoint::Simple),
    ("CASE WHEN d.age > 18 THEN 'adult' ELSE 'minor' END", EntryPoint::Simple),
    ("d.name LIKE :pattern ESCAPE '!'", EntryPoint::Simple),
    ("OUTER(d.owner)", EntryPoint::SimpleSubquery),
    ("d.owner.name", EntryPoint::OrderBy),
    ("NOT(NOT(a > b)) AND d.age BETWEEN 1 AND 10", EntryPoint::Boolean),
    ("x.a MEMBER OF y.a OR x.b IS NOT EMPTY", EntryPoint::Boolean),
    ("TYPE(d) = TYPE(e)", EntryPoint::Boolean),
];

fn usage() {
    println!("Usage: jx_bench [threads] [iterations]");
    println!();
    println!("  threads      Worker threads (default: number of CPUs)");
    println!("  iterations   Parses per thread (default: 10000)");
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage();
        return;
    }

    let mut num_threads: usize = num_cpus::get();
    let mut iterations: usize = 10_000;
    if let Some(t) = args.first() {
        match t.parse::<usize>() {
            Ok(n) if n > 0 => num_threads = n,
            _ => {
                eprintln!("Error: invalid thread count '{}'", t);
                std::process::exit(1);
            }
        }
    }
    if let Some(n) = args.get(1) {
        match n.parse::<usize>() {
            Ok(n) if n > 0 => iterations = n,
            _ => {
                eprintln!("Error: invalid iteration count '{}'", n);
                std::process::exit(1);
            }
        }
    }

    // Reference results from a plain, single-threaded parse.
    let plain = ExpressionFactory::default();
    let flags = ParseFlags::default();
    let mut expected = Vec::with_capacity(WORKLOAD.len());
    for (text, entry) in WORKLOAD {
        match plain.parse(text, *entry, flags) {
            Ok(expr) => expected.push(expr),
            Err(e) => {
                eprintln!("Error: workload item does not parse: {}", e);
                std::process::exit(1);
            }
        }
    }
    let expected = Arc::new(expected);

    println!("jx_bench");
    println!("========");
    println!("  threads:     {}", num_threads);
    println!("  iterations:  {} per thread", iterations);
    println!("  workload:    {} expressions", WORKLOAD.len());
    println!();

    let factory = Arc::new(CachingExpressionFactory::new(FactoryConfig::default()));
    let mismatches = Arc::new(AtomicU64::new(0));
    let failures = Arc::new(AtomicU64::new(0));
    let pool = threadpool::ThreadPool::new(num_threads);
    let start = Instant::now();

    for worker in 0..num_threads {
        let factory = Arc::clone(&factory);
        let expected = Arc::clone(&expected);
        let mismatches = Arc::clone(&mismatches);
        let failures = Arc::clone(&failures);
        pool.execute(move || {
            for i in 0..iterations {
                let idx = (worker + i) % WORKLOAD.len();
                let (text, entry) = WORKLOAD[idx];
                match factory.parse(text, entry, flags) {
                    Ok(expr) if expr == expected[idx] => {}
                    Ok(_) => {
                        mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        log::error!("{}", e);
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        });
    }
    pool.join();

    let elapsed = start.elapsed();
    let total = (num_threads * iterations) as f64;
    let stats = factory.cache_stats();
    println!("Results:");
    println!("  elapsed:     {:.2} ms", elapsed.as_secs_f64() * 1000.0);
    println!("  throughput:  {:.0} parses/s", total / elapsed.as_secs_f64().max(f64::EPSILON));
    println!("  cache:       {} hits, {} misses, {:.2}% hit rate", stats.hits, stats.misses, stats.hit_rate());
    println!("  entries:     {}", stats.entries);

    let mismatches = mismatches.load(Ordering::Relaxed);
    let failures = failures.load(Ordering::Relaxed) + pool.panic_count() as u64;
    if mismatches > 0 || failures > 0 {
        eprintln!("Error: {} mismatched and {} failed parses", mismatches, failures);
        std::process::exit(2);
    }
    println!("  all results matched the single-threaded parse");
}
