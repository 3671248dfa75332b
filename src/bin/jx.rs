use jpql_expr::{render, CachingExpressionFactory, EntryPoint, Expression, ExpressionParser, FactoryConfig, ParseFlags};
use serde_json::json;
use std::time::Instant;

fn usage() {
    eprintln!("Usage: jx \"expression\" [options]");
    eprintln!("       jx --file PATH [options]");
    eprintln!("");
    eprintln!("Options:");
    eprintln!("  --entry NAME     simple (default), subquery, order-by, boolean, path, in-item, join");
    eprintln!("  --no-case-when   Reject CASE expressions");
    eprintln!("  --quantified     Allow ANY/SOME/ALL in comparisons");
    eprintln!("  --ast            Print the syntax tree as JSON");
    eprintln!("  --output-json    Output canonical text, entry point and timing as JSON");
    eprintln!("  --file PATH      Parse one expression per non-empty line of PATH");
    eprintln!("  --config PATH    Load factory settings from a JSON file");
    eprintln!("");
    eprintln!("Examples:");
    eprintln!("  jx \"1 + (1 - 1)\"");
    eprintln!("  jx \"NOT(NOT(a > b))\" --entry boolean --ast");
    eprintln!("  jx \"d.age > ALL d.limits\" --entry boolean --quantified --output-json");
}

struct Options {
    expressions: Vec<String>,
    entry: EntryPoint,
    flags: ParseFlags,
    ast: bool,
    output_json: bool,
    config: FactoryConfig,
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn next_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(v) => v.as_str(),
        None => fail(&format!("{} requires an argument", flag)),
    }
}

fn parse_args(args: &[String]) -> Options {
    let mut expressions = Vec::new();
    let mut entry = EntryPoint::Simple;
    let mut flags = ParseFlags::default();
    let mut ast = false;
    let mut output_json = false;
    let mut config = None;
    let mut i = 0;

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--entry" => {
                let name = next_value(args, i, arg);
                entry = EntryPoint::from_name(name).unwrap_or_else(|| fail(&format!("unknown entry point '{}'", name)));
                i += 1;
            }
            "--no-case-when" => flags = flags.with_case_when(false),
            "--quantified" => flags = flags.with_quantified_predicates(true),
            "--ast" => ast = true,
            "--output-json" => output_json = true,
            "--file" => {
                let path = next_value(args, i, arg);
                let text = std::fs::read_to_string(path)
                    .unwrap_or_else(|e| fail(&format!("could not read {}: {}", path, e)));
                expressions.extend(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from));
                i += 1;
            }
            "--config" => {
                let path = next_value(args, i, arg);
                config = Some(FactoryConfig::from_file(path).unwrap_or_else(|e| fail(&e.to_string())));
                i += 1;
            }
            _ if arg.starts_with("--") => fail(&format!("unknown option {}", arg)),
            _ => expressions.push(arg.to_string()),
        }
        i += 1;
    }

    let config = match config {
        Some(c) => c,
        None => FactoryConfig::from_env().unwrap_or_else(|e| fail(&e.to_string())),
    };
    Options { expressions, entry, flags, ast, output_json, config }
}

fn format_json_output(text: &str, expr: &Expression, entry: EntryPoint, execution_time_ms: f64) -> serde_json::Value {
    json!({
        "input": text,
        "canonical": render(expr),
        "entry_point": entry.name(),
        "execution_time": format!("{:.3} ms", execution_time_ms)
    })
}

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        std::process::exit(1);
    }

    let options = parse_args(&args);
    if options.expressions.is_empty() {
        usage();
        std::process::exit(1);
    }

    let factory = CachingExpressionFactory::new(options.config.clone());
    let mut failed = false;

    for text in &options.expressions {
        let start_time = Instant::now();
        let result = factory.parse(text, options.entry, options.flags);
        let execution_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(expr) => {
                if options.ast {
                    match serde_json::to_string_pretty(&expr) {
                        Ok(s) => println!("{}", s),
                        Err(e) => fail(&e.to_string()),
                    }
                } else if options.output_json {
                    let output = format_json_output(text, &expr, options.entry, execution_time_ms);
                    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string()));
                } else {
                    println!("{}", render(&expr));
                }
            }
            Err(e) => {
                if options.output_json {
                    let output = json!({
                        "input": text,
                        "entry_point": options.entry.name(),
                        "error": e.message,
                        "position": e.position,
                    });
                    println!("{}", serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string()));
                }
                eprintln!("Error: {}", e);
                failed = true;
            }
        }
    }

    let stats = factory.cache_stats();
    log::debug!(
        "cache: {} hits, {} misses, {:.1}% hit rate",
        stats.hits,
        stats.misses,
        stats.hit_rate()
    );

    if failed {
        std::process::exit(2);
    }
}
