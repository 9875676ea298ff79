//! Benchmark suite configuration, loadable from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) describes the standard
//! suite. A file only needs to name what it changes:
//!
//! ```toml
//! [primitives]
//! threads = 8
//!
//! [philosophers]
//! counts = [5, 7]
//! strategies = ["ordered-lock", "try-lock"]
//! timeout_ms = 2000
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::philosophers::{DinnerConfig, PauseRange, Strategy};
use crate::primitives::Primitive;
use crate::{Error, Result, Scenario};

/// Parameters of every benchmark suite.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct BenchConfig {
    /// The side-by-side comparison of primitives.
    pub primitives: PrimitivesConfig,

    /// The thread-count scaling run of a single primitive.
    pub scalability: ScalabilityConfig,

    /// The grid over thread and iteration counts.
    pub extended: ExtendedConfig,

    /// The dining-philosophers runs.
    pub philosophers: PhilosophersConfig,
}

/// Parameters of the primitive comparison.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct PrimitivesConfig {
    /// Worker threads contending for the counter.
    pub threads: usize,

    /// Increments per worker.
    pub iterations: u64,

    /// Primitives to compare, in report order.
    pub primitives: Vec<Primitive>,
}

impl Default for PrimitivesConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 1000,
            primitives: Primitive::ALL.to_vec(),
        }
    }
}

/// Parameters of the scalability run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct ScalabilityConfig {
    /// The primitive under test.
    pub primitive: Primitive,

    /// Thread counts to measure. Speedup is relative to the first.
    pub threads: Vec<usize>,

    /// Per thread, so the total work grows with the thread count.
    pub iterations: u64,
}

impl Default for ScalabilityConfig {
    fn default() -> Self {
        Self {
            primitive: Primitive::Mutex,
            threads: vec![1, 2, 4, 8],
            iterations: 1000,
        }
    }
}

/// Parameters of the extended grid.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct ExtendedConfig {
    /// Primitives measured at every grid point.
    pub primitives: Vec<Primitive>,

    /// Thread counts of the grid.
    pub threads: Vec<usize>,

    /// Per-thread iteration counts of the grid.
    pub iterations: Vec<u64>,
}

impl Default for ExtendedConfig {
    fn default() -> Self {
        Self {
            primitives: vec![
                Primitive::Mutex,
                Primitive::Semaphore,
                Primitive::Barrier,
                Primitive::SpinLock,
            ],
            threads: vec![2, 4, 8],
            iterations: vec![100, 500, 1000],
        }
    }
}

/// Parameters of the dining-philosophers runs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
#[non_exhaustive]
pub struct PhilosophersConfig {
    /// Table sizes for the strategy benchmark. The single-dinner command uses the first.
    pub counts: Vec<usize>,

    /// Strategies for the strategy benchmark. The single-dinner command uses the first.
    pub strategies: Vec<Strategy>,

    /// Meals per philosopher.
    pub cycles: u32,

    /// Bounds of the eating time drawn for each meal.
    pub eat_min_micros: u64,
    /// See `eat_min_micros`.
    pub eat_max_micros: u64,

    /// Bounds of the thinking time drawn between meals.
    pub think_min_micros: u64,
    /// See `think_min_micros`.
    pub think_max_micros: u64,

    /// How long one dinner may take before it is reported as timed out.
    pub timeout_ms: u64,
}

impl Default for PhilosophersConfig {
    fn default() -> Self {
        Self {
            counts: vec![5, 10, 20],
            strategies: Strategy::ALL.to_vec(),
            cycles: DinnerConfig::DEFAULT_CYCLES,
            eat_min_micros: 10,
            eat_max_micros: 50,
            think_min_micros: 10,
            think_max_micros: 50,
            timeout_ms: 60_000,
        }
    }
}

impl PhilosophersConfig {
    /// A dinner configuration carrying everything but the table size and strategy, which come
    /// from `philosophers` and `strategy`.
    pub fn dinner(&self, philosophers: usize, strategy: Strategy) -> Result<DinnerConfig> {
        let config = DinnerConfig::new(philosophers, strategy)
            .with_cycles(self.cycles)
            .with_eat(PauseRange::from_micros(
                self.eat_min_micros,
                self.eat_max_micros,
            )?)
            .with_think(PauseRange::from_micros(
                self.think_min_micros,
                self.think_max_micros,
            )?)
            .with_timeout(Duration::from_millis(self.timeout_ms));

        config.validate()?;
        Ok(config)
    }
}

impl BenchConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;

        let config: Self = toml::from_str(&contents).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;

        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parses and validates TOML configuration text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|source| Error::ConfigFile {
            path: "<inline>".into(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Checks every suite so that no benchmark starts with parameters that would be rejected
    /// halfway through the run.
    pub fn validate(&self) -> Result<()> {
        let primitives = &self.primitives;
        require_non_empty("primitives.primitives", &primitives.primitives)?;
        Scenario::new(Primitive::Mutex, primitives.threads, primitives.iterations)?;

        let scalability = &self.scalability;
        require_non_empty("scalability.threads", &scalability.threads)?;
        for &threads in &scalability.threads {
            Scenario::new(scalability.primitive, threads, scalability.iterations)?;
        }

        let extended = &self.extended;
        require_non_empty("extended.primitives", &extended.primitives)?;
        require_non_empty("extended.threads", &extended.threads)?;
        require_non_empty("extended.iterations", &extended.iterations)?;
        for &threads in &extended.threads {
            for &iterations in &extended.iterations {
                Scenario::new(Primitive::Mutex, threads, iterations)?;
            }
        }

        let philosophers = &self.philosophers;
        require_non_empty("philosophers.counts", &philosophers.counts)?;
        require_non_empty("philosophers.strategies", &philosophers.strategies)?;
        for &count in &philosophers.counts {
            philosophers.dinner(count, Strategy::OrderedLock)?;
        }

        Ok(())
    }
}

fn require_non_empty<T>(parameter: &'static str, values: &[T]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::invalid(parameter, "must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_describe_standard_suite() {
        let config = BenchConfig::default();

        assert_eq!(config.primitives.threads, 4);
        assert_eq!(config.primitives.iterations, 1000);
        assert_eq!(config.scalability.threads, [1, 2, 4, 8]);
        assert_eq!(config.scalability.primitive, Primitive::Mutex);
        assert_eq!(config.extended.threads, [2, 4, 8]);
        assert_eq!(config.extended.iterations, [100, 500, 1000]);
        assert_eq!(config.philosophers.counts, [5, 10, 20]);
        assert_eq!(config.philosophers.cycles, 100);

        config.validate().unwrap();
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(BenchConfig::from_toml_str("").unwrap(), BenchConfig::default());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = BenchConfig::from_toml_str(
            r#"
            [primitives]
            threads = 8
            primitives = ["mutex", "spin-lock"]

            [philosophers]
            strategies = ["try-lock"]
            timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.primitives.threads, 8);
        assert_eq!(config.primitives.iterations, 1000);
        assert_eq!(
            config.primitives.primitives,
            [Primitive::Mutex, Primitive::SpinLock]
        );
        assert_eq!(config.philosophers.strategies, [Strategy::TryLock]);

        let dinner = config.philosophers.dinner(5, Strategy::TryLock).unwrap();
        assert_eq!(dinner.timeout(), Duration::from_millis(250));
        assert_eq!(dinner.cycles(), 100);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = BenchConfig::from_toml_str("[primitives]\nthreds = 8\n");

        assert!(matches!(result, Err(Error::ConfigFile { .. })));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for document in [
            "[primitives]\nthreads = 0\n",
            "[primitives]\nthreads = 100000\n",
            "[philosophers]\ncounts = [5000]\n",
            "[scalability]\nthreads = []\n",
            "[extended]\niterations = [100, 0]\n",
            "[philosophers]\ncounts = [5, 1]\n",
            "[philosophers]\ncycles = 0\n",
            "[philosophers]\neat_min_micros = 100\neat_max_micros = 10\n",
            "[philosophers]\ntimeout_ms = 0\n",
        ] {
            let result = BenchConfig::from_toml_str(document);

            assert!(
                matches!(result, Err(Error::InvalidConfiguration { .. })),
                "{document:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scalability]\nprimitive = \"semaphore\"").unwrap();

        let config = BenchConfig::load(file.path()).unwrap();

        assert_eq!(config.scalability.primitive, Primitive::Semaphore);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();

        let result = BenchConfig::load(dir.path().join("absent.toml"));

        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[primitives\n").unwrap();

        let error = BenchConfig::load(file.path()).unwrap_err();

        assert!(
            error
                .to_string()
                .contains(&file.path().display().to_string())
        );
    }
}
