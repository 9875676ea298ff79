//! Collection, summary statistics and CSV export of benchmark results.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::{Result, micros};

/// A single named timing, the unit of exchange between benchmarks and the exporter.
///
/// The name identifies the primitive or strategy together with its parameters. The duration
/// is always expressed in microseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BenchmarkResult {
    name: String,

    #[serde(rename = "duration_microseconds")]
    duration_micros: f64,
}

impl BenchmarkResult {
    /// Creates a result from a label and a duration in microseconds.
    #[must_use]
    pub fn new(name: impl Into<String>, duration_micros: f64) -> Self {
        Self {
            name: name.into(),
            duration_micros,
        }
    }

    /// Creates a result from a label and a measured duration.
    #[must_use]
    pub fn from_duration(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, micros(duration))
    }

    /// The label identifying what was measured.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The measured duration in microseconds.
    #[must_use]
    pub fn duration_micros(&self) -> f64 {
        self.duration_micros
    }
}

/// Accumulates results in completion order and exports them unchanged.
#[derive(Clone, Debug, Default)]
pub struct ResultLog {
    results: Vec<BenchmarkResult>,
}

impl ResultLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a result.
    pub fn push(&mut self, result: BenchmarkResult) {
        self.results.push(result);
    }

    /// Number of results in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the log holds no results.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterates over the results in the order they were recorded.
    pub fn iter(&self) -> std::slice::Iter<'_, BenchmarkResult> {
        self.results.iter()
    }

    /// Summary statistics over all results, or `None` if the log is empty.
    #[must_use]
    pub fn statistics(&self) -> Option<Statistics> {
        Statistics::from_results(&self.results)
    }

    /// Writes every result as a CSV row, preceded by the `name,duration_microseconds` header.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        for result in &self.results {
            csv_writer.serialize(result)?;
        }

        // An empty log still gets a header, which the serializer only emits with the first row.
        if self.results.is_empty() {
            csv_writer.write_record(["name", "duration_microseconds"])?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Writes the log to a CSV file, replacing any existing file at `path`.
    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = io::BufWriter::new(File::create(path)?);

        self.write_csv(file)?;

        debug!(path = %path.display(), rows = self.results.len(), "saved results");
        Ok(())
    }
}

impl Extend<BenchmarkResult> for ResultLog {
    fn extend<T: IntoIterator<Item = BenchmarkResult>>(&mut self, iter: T) {
        self.results.extend(iter);
    }
}

impl FromIterator<BenchmarkResult> for ResultLog {
    fn from_iter<T: IntoIterator<Item = BenchmarkResult>>(iter: T) -> Self {
        Self {
            results: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ResultLog {
    type Item = BenchmarkResult;
    type IntoIter = std::vec::IntoIter<BenchmarkResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultLog {
    type Item = &'a BenchmarkResult;
    type IntoIter = std::slice::Iter<'a, BenchmarkResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

/// Descriptive statistics over a set of results.
#[derive(Clone, Debug, PartialEq)]
pub struct Statistics {
    count: usize,
    mean_micros: f64,
    std_dev_micros: f64,
    fastest: BenchmarkResult,
    slowest: BenchmarkResult,
}

impl Statistics {
    fn from_results(results: &[BenchmarkResult]) -> Option<Self> {
        let first = results.first()?;

        let mut fastest = first;
        let mut slowest = first;
        let mut sum = 0.0;

        for result in results {
            sum += result.duration_micros;

            if result.duration_micros < fastest.duration_micros {
                fastest = result;
            }

            if result.duration_micros > slowest.duration_micros {
                slowest = result;
            }
        }

        #[expect(
            clippy::cast_precision_loss,
            reason = "result counts are far below the f64 mantissa limit"
        )]
        let count = results.len() as f64;

        let mean = sum / count;
        let variance = results
            .iter()
            .map(|r| (r.duration_micros - mean).powi(2))
            .sum::<f64>()
            / count;

        Some(Self {
            count: results.len(),
            mean_micros: mean,
            std_dev_micros: variance.sqrt(),
            fastest: fastest.clone(),
            slowest: slowest.clone(),
        })
    }

    /// Number of results summarized.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Arithmetic mean duration in microseconds.
    #[must_use]
    pub fn mean_micros(&self) -> f64 {
        self.mean_micros
    }

    /// Population standard deviation in microseconds.
    #[must_use]
    pub fn std_dev_micros(&self) -> f64 {
        self.std_dev_micros
    }

    /// The result with the shortest duration. Ties go to the earliest recorded.
    #[must_use]
    pub fn fastest(&self) -> &BenchmarkResult {
        &self.fastest
    }

    /// The result with the longest duration. Ties go to the earliest recorded.
    #[must_use]
    pub fn slowest(&self) -> &BenchmarkResult {
        &self.slowest
    }

    /// Difference between the slowest and the fastest duration, in microseconds.
    #[must_use]
    pub fn spread_micros(&self) -> f64 {
        self.slowest.duration_micros - self.fastest.duration_micros
    }

    /// The spread as a percentage of the fastest duration.
    ///
    /// Returns `None` when the fastest duration is zero.
    #[must_use]
    pub fn spread_percent(&self) -> Option<f64> {
        (self.fastest.duration_micros > 0.0)
            .then(|| self.spread_micros() / self.fastest.duration_micros * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn sample_log() -> ResultLog {
        [
            BenchmarkResult::new("Mutex_4t_1000i", 200.0),
            BenchmarkResult::new("SpinLock_4t_1000i", 100.0),
            BenchmarkResult::new("Semaphore_4t_1000i", 300.0),
        ]
        .into_iter()
        .collect()
    }

    static_assertions::assert_impl_all!(BenchmarkResult: Send, Sync);
    static_assertions::assert_impl_all!(ResultLog: Send, Sync);

    #[test]
    fn from_duration_uses_microseconds() {
        let result = BenchmarkResult::from_duration("x", Duration::from_millis(5));

        assert_eq!(result.name(), "x");
        assert!(close(result.duration_micros(), 5000.0));
    }

    #[test]
    fn log_preserves_completion_order() {
        let log = sample_log();

        let names: Vec<_> = log.iter().map(BenchmarkResult::name).collect();
        assert_eq!(
            names,
            ["Mutex_4t_1000i", "SpinLock_4t_1000i", "Semaphore_4t_1000i"]
        );
        assert_eq!(log.len(), 3);
        assert!(!log.is_empty());
    }

    #[test]
    fn statistics_of_empty_log_is_none() {
        assert!(ResultLog::new().statistics().is_none());
    }

    #[test]
    fn statistics_summarize_results() {
        let stats = sample_log().statistics().unwrap();

        assert_eq!(stats.count(), 3);
        assert!(close(stats.mean_micros(), 200.0));
        // Population variance of (-100, 0, 100) is 20000 / 3.
        assert!(close(stats.std_dev_micros(), (20_000.0_f64 / 3.0).sqrt()));
        assert_eq!(stats.fastest().name(), "SpinLock_4t_1000i");
        assert_eq!(stats.slowest().name(), "Semaphore_4t_1000i");
        assert!(close(stats.spread_micros(), 200.0));
        assert!(close(stats.spread_percent().unwrap(), 200.0));
    }

    #[test]
    fn spread_percent_undefined_for_zero_fastest() {
        let log: ResultLog = [BenchmarkResult::new("a", 0.0), BenchmarkResult::new("b", 5.0)]
            .into_iter()
            .collect();

        assert!(log.statistics().unwrap().spread_percent().is_none());
    }

    #[test]
    fn csv_has_header_and_rows_in_order() {
        let mut buffer = Vec::new();
        sample_log().write_csv(&mut buffer).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(
            lines,
            [
                "name,duration_microseconds",
                "Mutex_4t_1000i,200.0",
                "SpinLock_4t_1000i,100.0",
                "Semaphore_4t_1000i,300.0",
            ]
        );
    }

    #[test]
    fn csv_of_empty_log_is_header_only() {
        let mut buffer = Vec::new();
        ResultLog::new().write_csv(&mut buffer).unwrap();

        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "name,duration_microseconds\n"
        );
    }

    #[test]
    fn save_csv_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        sample_log().save_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("name,duration_microseconds\n"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn save_csv_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("results.csv");

        let result = sample_log().save_csv(&path);

        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
