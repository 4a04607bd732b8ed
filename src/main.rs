use anyhow::{bail, Context, Result};
use std::env;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use dept_registry::{
    load_budget_text, load_csv, AutoApproval, BatchRunner, CheckpointStore, ConsoleApproval,
    MatchResolver, MatchResult, Observation, ReconcileJob, Registry, SafeUpdateManager,
};

fn main() -> Result<()> {
    init_logging()?;

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("dedup") => run_dedup(&args[2..]),
        Some("resolve") => run_resolve(&args[2..]),
        Some("run") => run_batch(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("dept-registry {}", dept_registry::VERSION);
    println!();
    println!("Usage:");
    println!("  dept-registry dedup   <registry.json>");
    println!("  dept-registry resolve <registry.json> <raw name>");
    println!("  dept-registry run     <registry.json> <input.csv|input.txt> <checkpoint-dir>");
    println!("                        [--auto [min-score]] [--year <fiscal year>]");
    println!();
    println!("Set DEPT_REGISTRY_LOG=<file> to append the run log to a file.");
}

/// Leveled log stream; DEPT_REGISTRY_LOG tees it to an append-only file.
fn init_logging() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if let Ok(log_path) = env::var("DEPT_REGISTRY_LOG") {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("open log file {}", log_path))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

/// Scan the registry for near-duplicate records.
fn run_dedup(args: &[String]) -> Result<()> {
    let [registry_path] = args else {
        bail!("usage: dept-registry dedup <registry.json>");
    };

    let registry = Registry::load(Path::new(registry_path))?;
    println!("🔍 Scanning {} records for near-duplicates...", registry.len());

    let resolver = MatchResolver::new();
    let findings = resolver.find_registry_duplicates(&registry);

    if findings.is_empty() {
        println!("✓ No near-duplicates found");
        return Ok(());
    }

    for finding in &findings {
        if let MatchResult::Ambiguous { raw_name, candidates } = finding {
            println!("\n⚠️  '{}' is ambiguous:", raw_name);
            for candidate in candidates {
                println!("    {:.2}  {}", candidate.score, candidate.canonical_name);
            }
        }
    }
    println!("\n{} record(s) need manual review", findings.len());
    Ok(())
}

/// Resolve a single raw name (dry run, no mutation).
fn run_resolve(args: &[String]) -> Result<()> {
    let [registry_path, raw_name] = args else {
        bail!("usage: dept-registry resolve <registry.json> <raw name>");
    };

    let registry = Registry::load(Path::new(registry_path))?;
    let resolver = MatchResolver::new();

    match resolver.resolve(raw_name, &registry) {
        MatchResult::Matched(candidate) => {
            println!(
                "✓ Matched [{}] {:.2}  {}",
                candidate.tier.as_str(),
                candidate.score,
                candidate.canonical_name
            );
            println!("  {}", candidate.reason);
        }
        MatchResult::Ambiguous { candidates, .. } => {
            println!("⚠️  Ambiguous ({} candidates over threshold):", candidates.len());
            for candidate in candidates {
                println!("    {:.2}  {}", candidate.score, candidate.canonical_name);
            }
        }
        MatchResult::Unmatched { .. } => {
            println!("✗ Unmatched");
        }
    }
    Ok(())
}

/// Full pipeline: resolve → diff → approve → apply, with checkpoints.
fn run_batch(args: &[String]) -> Result<()> {
    if args.len() < 3 {
        bail!("usage: dept-registry run <registry.json> <input> <checkpoint-dir> [--auto [min-score]] [--year <fy>]");
    }

    let registry_path = Path::new(&args[0]);
    let input_path = Path::new(&args[1]);
    let checkpoint_dir = Path::new(&args[2]);

    let mut auto: Option<f64> = None;
    let mut year = "2023-24".to_string();
    let mut rest = args[3..].iter().peekable();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--auto" => {
                auto = Some(0.95);
                if let Some(score) = rest.peek().and_then(|v| v.parse::<f64>().ok()) {
                    auto = Some(score);
                    rest.next();
                }
            }
            "--year" => {
                year = rest
                    .next()
                    .context("--year requires a value, e.g. --year 2023-24")?
                    .clone();
            }
            other => bail!("unknown option: {}", other),
        }
    }

    // 1. Load registry
    println!("📂 Loading registry...");
    let mut registry = Registry::load(registry_path)?;
    println!("✓ {} canonical records", registry.len());

    // 2. Load observations
    let observations = load_observations(input_path, &year)?;
    println!("✓ {} observations from {}", observations.len(), input_path.display());

    // 3. Run
    let digest = registry.digest()?;
    let runner = BatchRunner::new(CheckpointStore::new(checkpoint_dir)?);
    let resolver = MatchResolver::new();
    let updater = SafeUpdateManager::new(registry_path);

    let report = match auto {
        Some(min_score) => {
            println!("🤖 Auto-approving changes at score >= {:.2}\n", min_score);
            let mut approval = AutoApproval::with_min_score(min_score);
            let mut job = ReconcileJob::new(resolver, updater, &mut approval);
            runner.run(&digest, &observations, |obs| job.handle(&mut registry, obs))?
        }
        None => {
            println!("👤 Interactive review: answer y/n for each proposed change\n");
            let mut approval = ConsoleApproval::new();
            let mut job = ReconcileJob::new(resolver, updater, &mut approval);
            runner.run(&digest, &observations, |obs| job.handle(&mut registry, obs))?
        }
    };

    // 4. Summary
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ {}", report.summary());
    Ok(())
}

fn load_observations(input_path: &Path, year: &str) -> Result<Vec<Observation>> {
    let is_csv = input_path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let observations = if is_csv {
        load_csv(input_path, year)?
    } else {
        load_budget_text(input_path, year)?
    };

    if observations.is_empty() {
        bail!("no observations found in {}", input_path.display());
    }
    Ok(observations)
}
