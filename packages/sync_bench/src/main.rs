#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Command-line entry point for the synchronization benchmarks.
//!
//! Results are printed as tables on stdout and written as CSV files into the output directory.
//! Diagnostics go to stderr through `tracing`, filtered by `RUST_LOG` (default `info`).
//!
//! This module is excluded from mutation testing because it only wires the library to the
//! terminal and the file system.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use argh::FromArgs;
use sync_bench::config::BenchConfig;
use sync_bench::philosophers::{Dinner, DinnerOutcome, Strategy, benchmark_strategies};
use sync_bench::primitives::Primitive;
use sync_bench::{
    BenchmarkResult, ContentionOutcome, Result, ResultLog, compare_primitives, extended_sweep,
    measure, micros, scalability,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

/// Benchmarks synchronization primitives and dining-philosophers strategies under contention.
#[derive(FromArgs)]
struct Args {
    /// TOML file with benchmark parameters; built-in defaults apply to anything it omits
    #[argh(option)]
    config: Option<PathBuf>,

    /// directory that receives the CSV result files (default: current directory)
    #[argh(option, default = "PathBuf::from(\".\")")]
    output_dir: PathBuf,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Primitives(PrimitivesArgs),
    Scalability(ScalabilityArgs),
    Extended(ExtendedArgs),
    Philosophers(PhilosophersArgs),
    Dinner(DinnerArgs),
    All(AllArgs),
}

/// compare primitives at one thread and iteration count
#[derive(FromArgs)]
#[argh(subcommand, name = "primitives")]
struct PrimitivesArgs {
    /// worker threads
    #[argh(option)]
    threads: Option<usize>,

    /// increments per worker
    #[argh(option)]
    iterations: Option<u64>,

    /// primitive to include (mutex, semaphore, barrier, spin-lock, spin-wait, monitor); repeatable
    #[argh(option)]
    primitive: Vec<Primitive>,
}

/// measure how one primitive scales with the thread count
#[derive(FromArgs)]
#[argh(subcommand, name = "scalability")]
struct ScalabilityArgs {
    /// primitive under test
    #[argh(option)]
    primitive: Option<Primitive>,

    /// thread count to measure; repeatable
    #[argh(option)]
    threads: Vec<usize>,

    /// increments per worker
    #[argh(option)]
    iterations: Option<u64>,
}

/// run every primitive over the grid of thread and iteration counts
#[derive(FromArgs)]
#[argh(subcommand, name = "extended")]
struct ExtendedArgs {}

/// run a single dinner and print its report
#[derive(FromArgs)]
#[argh(subcommand, name = "philosophers")]
struct PhilosophersArgs {
    /// number of philosophers
    #[argh(option)]
    count: Option<usize>,

    /// fork acquisition strategy (ordered-lock, semaphore-gated, alternating, try-lock, arbitrator)
    #[argh(option)]
    strategy: Option<Strategy>,

    /// meals per philosopher
    #[argh(option)]
    cycles: Option<u32>,

    /// milliseconds before the dinner is reported as not completed
    #[argh(option)]
    timeout_ms: Option<u64>,
}

/// run a dinner for every configured philosopher count and strategy
#[derive(FromArgs)]
#[argh(subcommand, name = "dinner")]
struct DinnerArgs {
    /// meals per philosopher
    #[argh(option)]
    cycles: Option<u32>,

    /// milliseconds before a dinner is reported as not completed
    #[argh(option)]
    timeout_ms: Option<u64>,
}

/// run the primitive, extended and dinner benchmarks and combine their results
#[derive(FromArgs)]
#[argh(subcommand, name = "all")]
struct AllArgs {}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    init_tracing();

    let args: Args = argh::from_env();

    match execute(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(anomalies) => {
            warn!(anomalies, "benchmark finished with anomalies");
            ExitCode::FAILURE
        }
        Err(error) => {
            error!(%error, "benchmark failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg_attr(test, mutants::skip)]
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // Fails only if a subscriber is already installed.
    drop(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init(),
    );
}

/// Runs the selected command and returns how many anomalies (runs with lost updates and
/// dinners that did not complete) it observed.
fn execute(args: &Args) -> Result<usize> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::load(path)?,
        None => BenchConfig::default(),
    };

    let mut session = Session::new(&args.output_dir);

    match &args.command {
        Command::Primitives(overrides) => {
            apply_primitives(&mut config, overrides);
            config.validate()?;
            session.primitives(&config)?;
        }
        Command::Scalability(overrides) => {
            apply_scalability(&mut config, overrides);
            config.validate()?;
            session.scalability(&config)?;
        }
        Command::Extended(_) => {
            session.extended(&config)?;
        }
        Command::Philosophers(overrides) => {
            apply_philosophers(&mut config, overrides);
            config.validate()?;
            session.single_dinner(&config)?;
        }
        Command::Dinner(overrides) => {
            apply_dinner(&mut config, overrides);
            config.validate()?;
            session.dinner(&config)?;
        }
        Command::All(_) => {
            let (combined, elapsed) = measure(|| -> Result<ResultLog> {
                let mut combined = session.primitives(&config)?;
                combined.extend(session.extended(&config)?);
                combined.extend(session.dinner(&config)?);
                Ok(combined)
            });

            session.save(&combined?, "all_benchmark_results.csv")?;
            info!(elapsed_s = elapsed.as_secs_f64(), "all benchmarks finished");
        }
    }

    Ok(session.anomalies)
}

fn apply_primitives(config: &mut BenchConfig, overrides: &PrimitivesArgs) {
    if let Some(threads) = overrides.threads {
        config.primitives.threads = threads;
    }

    if let Some(iterations) = overrides.iterations {
        config.primitives.iterations = iterations;
    }

    if !overrides.primitive.is_empty() {
        config.primitives.primitives.clone_from(&overrides.primitive);
    }
}

fn apply_scalability(config: &mut BenchConfig, overrides: &ScalabilityArgs) {
    if let Some(primitive) = overrides.primitive {
        config.scalability.primitive = primitive;
    }

    if !overrides.threads.is_empty() {
        config.scalability.threads.clone_from(&overrides.threads);
    }

    if let Some(iterations) = overrides.iterations {
        config.scalability.iterations = iterations;
    }
}

fn apply_philosophers(config: &mut BenchConfig, overrides: &PhilosophersArgs) {
    if let Some(count) = overrides.count {
        config.philosophers.counts = vec![count];
    }

    if let Some(strategy) = overrides.strategy {
        config.philosophers.strategies = vec![strategy];
    }

    apply_dinner(
        config,
        &DinnerArgs {
            cycles: overrides.cycles,
            timeout_ms: overrides.timeout_ms,
        },
    );
}

fn apply_dinner(config: &mut BenchConfig, overrides: &DinnerArgs) {
    if let Some(cycles) = overrides.cycles {
        config.philosophers.cycles = cycles;
    }

    if let Some(timeout_ms) = overrides.timeout_ms {
        config.philosophers.timeout_ms = timeout_ms;
    }
}

/// Where results go and what went wrong while producing them.
struct Session<'a> {
    output_dir: &'a Path,
    anomalies: usize,
}

impl<'a> Session<'a> {
    fn new(output_dir: &'a Path) -> Self {
        Self {
            output_dir,
            anomalies: 0,
        }
    }

    fn primitives(&mut self, config: &BenchConfig) -> Result<ResultLog> {
        let settings = &config.primitives;

        let outcomes =
            compare_primitives(settings.threads, settings.iterations, &settings.primitives)?;
        let log = self.collect_contention(&outcomes);

        print_results(
            &format!(
                "Primitive comparison ({} threads x {} iterations)",
                settings.threads, settings.iterations
            ),
            &log,
        );
        print_statistics(&log);

        self.save(&log, "primitives_benchmark.csv")?;
        Ok(log)
    }

    fn scalability(&mut self, config: &BenchConfig) -> Result<ResultLog> {
        let settings = &config.scalability;

        let report = scalability(settings.primitive, &settings.threads, settings.iterations)?;

        println!();
        println!(
            "Scalability of {} ({} iterations per thread)",
            settings.primitive, settings.iterations
        );
        println!("{:<10} {:>16} {:>10}", "Threads", "Time (us)", "Speedup");
        println!("{}", "-".repeat(38));

        for point in report.points() {
            let outcome = point.outcome();
            self.check_contention(outcome);

            let speedup = point
                .speedup()
                .map_or_else(|| "n/a".to_owned(), |speedup| format!("{speedup:.2}x"));

            println!(
                "{:<10} {:>16.2} {speedup:>10}",
                outcome.scenario().threads(),
                micros(outcome.elapsed())
            );
        }

        let log = report.to_results().collect::<ResultLog>();
        self.save(&log, "scalability_benchmark.csv")?;
        Ok(log)
    }

    fn extended(&mut self, config: &BenchConfig) -> Result<ResultLog> {
        let settings = &config.extended;

        let outcomes = extended_sweep(
            &settings.primitives,
            &settings.threads,
            &settings.iterations,
        )?;
        let log = self.collect_contention(&outcomes);

        print_results("Extended primitive grid", &log);
        print_statistics(&log);

        self.save(&log, "extended_benchmark.csv")?;
        Ok(log)
    }

    fn single_dinner(&mut self, config: &BenchConfig) -> Result<()> {
        let settings = &config.philosophers;

        let strategy = *settings
            .strategies
            .first()
            .expect("validated configuration has at least one strategy");

        let dinner = Dinner::new(settings.dinner(first_count(config), strategy)?)?;
        let outcome = dinner.run();

        println!();
        println!("{}", dinner.config().label());

        match &outcome {
            DinnerOutcome::Completed(report) => {
                println!("Completed in {:.2} us", micros(report.elapsed()));
                println!("Meals per philosopher: {:?}", report.meals());
                println!("Uses per fork: {:?}", report.fork_uses());
                println!(
                    "Most philosophers hungry or eating at once: {}",
                    report.peak_active()
                );
            }
            DinnerOutcome::TimedOut(stalled) => {
                self.anomalies = self.anomalies.wrapping_add(1);

                println!(
                    "Did not complete: stopped after {:.2} us ({:?})",
                    micros(stalled.waited()),
                    stalled.cause()
                );
                println!("Meals per philosopher: {:?}", stalled.meals());
                let states = stalled
                    .states()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("States when stopped: {states}");
            }
        }

        Ok(())
    }

    fn dinner(&mut self, config: &BenchConfig) -> Result<ResultLog> {
        let settings = &config.philosophers;

        // Count and strategy are replaced per dinner, the template only carries the rest.
        let template = settings.dinner(first_count(config), Strategy::OrderedLock)?;
        let runs = benchmark_strategies(&settings.counts, &settings.strategies, &template)?;

        let mut log = ResultLog::new();

        println!();
        println!("Dining philosophers ({} meals each)", settings.cycles);
        println!("{:<40} {:>16}", "Dinner", "Time (us)");
        println!("{}", "-".repeat(57));

        for run in &runs {
            if let Some(result) = run.outcome().to_result() {
                println!("{:<40} {:>16.2}", run.label(), result.duration_micros());
                log.push(result);
            } else {
                self.anomalies = self.anomalies.wrapping_add(1);
                println!("{:<40} {:>16}", run.label(), "did not complete");
            }
        }

        print_statistics(&log);

        self.save(&log, "philosophers_benchmark.csv")?;
        Ok(log)
    }

    fn collect_contention(&mut self, outcomes: &[ContentionOutcome]) -> ResultLog {
        outcomes
            .iter()
            .map(|outcome| {
                self.check_contention(outcome);
                outcome.to_result()
            })
            .collect()
    }

    fn check_contention(&mut self, outcome: &ContentionOutcome) {
        if !outcome.is_consistent() {
            self.anomalies = self.anomalies.wrapping_add(1);
        }
    }

    fn save(&self, log: &ResultLog, file_name: &str) -> Result<()> {
        let path = self.output_dir.join(file_name);
        log.save_csv(&path)?;

        println!("Saved {} results to {}", log.len(), path.display());
        Ok(())
    }
}

fn first_count(config: &BenchConfig) -> usize {
    *config
        .philosophers
        .counts
        .first()
        .expect("validated configuration has at least one philosopher count")
}

fn print_results(title: &str, log: &ResultLog) {
    println!();
    println!("{title}");
    println!("{:<28} {:>16}", "Name", "Time (us)");
    println!("{}", "-".repeat(45));

    for result in log {
        print_row(result);
    }
}

fn print_row(result: &BenchmarkResult) {
    println!("{:<28} {:>16.2}", result.name(), result.duration_micros());
}

fn print_statistics(log: &ResultLog) {
    let Some(statistics) = log.statistics() else {
        return;
    };

    println!();
    println!("Mean:    {:>12.2} us", statistics.mean_micros());
    println!("Std dev: {:>12.2} us", statistics.std_dev_micros());
    println!(
        "Fastest: {:>12.2} us ({})",
        statistics.fastest().duration_micros(),
        statistics.fastest().name()
    );
    println!(
        "Slowest: {:>12.2} us ({})",
        statistics.slowest().duration_micros(),
        statistics.slowest().name()
    );

    if let Some(spread) = statistics.spread_percent() {
        println!("Spread:  {spread:>12.2} %");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["sync_bench"], args).unwrap()
    }

    #[test]
    fn primitive_overrides_replace_config_values() {
        let args = parse(&[
            "primitives",
            "--threads",
            "2",
            "--primitive",
            "mutex",
            "--primitive",
            "spin-lock",
        ]);

        let Command::Primitives(overrides) = &args.command else {
            panic!("parsed the wrong subcommand");
        };

        let mut config = BenchConfig::default();
        apply_primitives(&mut config, overrides);

        assert_eq!(config.primitives.threads, 2);
        assert_eq!(config.primitives.iterations, 1000);
        assert_eq!(
            config.primitives.primitives,
            [Primitive::Mutex, Primitive::SpinLock]
        );
    }

    #[test]
    fn philosophers_overrides_narrow_to_one_dinner() {
        let args = parse(&[
            "philosophers",
            "--count",
            "7",
            "--strategy",
            "try-lock",
            "--timeout-ms",
            "500",
        ]);

        let Command::Philosophers(overrides) = &args.command else {
            panic!("parsed the wrong subcommand");
        };

        let mut config = BenchConfig::default();
        apply_philosophers(&mut config, overrides);

        assert_eq!(config.philosophers.counts, [7]);
        assert_eq!(config.philosophers.strategies, [Strategy::TryLock]);
        assert_eq!(
            config.philosophers.dinner(7, Strategy::TryLock).unwrap().timeout(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let result = Args::from_args(&["sync_bench"], &["philosophers", "--strategy", "waiter"]);

        assert!(result.is_err());
    }

    #[test]
    fn primitives_session_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig::default();
        config.primitives.threads = 2;
        config.primitives.iterations = 10;

        let mut session = Session::new(dir.path());
        let log = session.primitives(&config).unwrap();

        assert_eq!(session.anomalies, 0);
        assert_eq!(log.len(), Primitive::ALL.len());

        let written = std::fs::read_to_string(dir.path().join("primitives_benchmark.csv")).unwrap();
        assert!(written.starts_with("name,duration_microseconds\n"));
        assert!(written.contains("Mutex_2t_10i,"));
    }

    #[test]
    fn timed_out_dinner_counts_as_anomaly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig::default();
        config.philosophers.counts = vec![3];
        config.philosophers.strategies = vec![Strategy::OrderedLock];
        config.philosophers.cycles = 10_000;
        config.philosophers.eat_min_micros = 1000;
        config.philosophers.eat_max_micros = 1000;
        config.philosophers.timeout_ms = 5;

        let mut session = Session::new(dir.path());
        let log = session.dinner(&config).unwrap();

        assert!(log.is_empty());
        assert_eq!(session.anomalies, 1);
    }
}
