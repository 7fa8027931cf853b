//! Usage summary extraction: reduce a parsed sample series to peak memory
//! above baseline and total run time, ready for plotting.
//!
//! The baseline is the `mem_used` reading at the earliest sample, taken to be
//! what the OS was using before the workload started.

use crate::compress::{self, LoadError, WriteError};
use crate::config::{RusageConfig, StageArgs};
use crate::free_log::SampleSeries;
use crate::run_dir::{self, RunDir};
use crate::timestamp::{self, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Counter the summary is computed from.
pub const USED_COUNTER: &str = "mem_used";

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamUsage {
    /// Peak `mem_used` minus the baseline.
    pub max_bytes_used: u64,
    pub max_gib_used: f64,
    /// `mem_used` minus the baseline at every sample. Negative when usage
    /// dips below the starting reading.
    pub used_over_time: BTreeMap<Timestamp, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTime {
    pub human: String,
    pub seconds: f64,
}

/// The plot artifact written to `plot.data/resource_usage.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub ram: RamUsage,
    pub run_time: RunTime,
}

/// Compute the summary for a sample series. An empty series is an error.
pub fn summarize(samples: &SampleSeries) -> Result<UsageSummary, SummaryError> {
    let used = samples
        .iter()
        .map(|(ts, record)| match record.get(USED_COUNTER) {
            Some(&bytes) => Ok((*ts, bytes)),
            None => Err(SummaryError::MissingCounter {
                timestamp: *ts,
                counter: USED_COUNTER,
            }),
        })
        .collect::<Result<BTreeMap<Timestamp, u64>, SummaryError>>()?;

    let (Some((&first, _)), Some((&last, _))) = (used.first_key_value(), used.last_key_value())
    else {
        return Err(SummaryError::NoSamples);
    };

    Ok(UsageSummary {
        ram: ram_usage(&used),
        run_time: run_time(first, last),
    })
}

fn ram_usage(used: &BTreeMap<Timestamp, u64>) -> RamUsage {
    let baseline = used.values().next().copied().unwrap_or(0);
    let peak = used.values().copied().max().unwrap_or(baseline);
    let max_bytes_used = peak - baseline;

    RamUsage {
        max_bytes_used,
        max_gib_used: max_bytes_used as f64 / BYTES_PER_GIB,
        used_over_time: used
            .iter()
            .map(|(ts, &bytes)| (*ts, bytes as i64 - baseline as i64))
            .collect(),
    }
}

fn run_time(first: Timestamp, last: Timestamp) -> RunTime {
    let span = first.span_to(last);
    RunTime {
        human: timestamp::format_duration(span),
        seconds: timestamp::span_seconds(span),
    }
}

/// Load the run's parsed sample series and write its usage summary.
///
/// Returns `Ok(None)` after logging a warning when no parsed series exists;
/// nothing is written in that case.
pub fn extract_resource_usage_plot_data(
    args: &StageArgs,
    config: &RusageConfig,
) -> Result<Option<UsageSummary>, ExtractError> {
    let run = RunDir::new(&args.prefix, &config.files);
    let parsed = run.parsed();

    let Some(input) = run_dir::resolve_input(&parsed) else {
        tracing::warn!(
            path = %run_dir::compressed_variant(&parsed).display(),
            "unable to find resource usage data"
        );
        return Ok(None);
    };

    let samples: SampleSeries = compress::load_json(&input).map_err(ExtractError::Load)?;
    tracing::debug!(path = %input.display(), samples = samples.len(), "loaded parsed resource usage");

    let summary = summarize(&samples).map_err(|source| ExtractError::Summary {
        path: input.clone(),
        source,
    })?;

    let output = run.summary();
    compress::dump_json(&summary, &output, config.storage.compress_level)
        .map_err(ExtractError::Write)?;
    tracing::info!(
        path = %output.display(),
        max_gib_used = summary.ram.max_gib_used,
        run_time = %summary.run_time.human,
        "wrote resource usage summary"
    );

    Ok(Some(summary))
}

/// Why a sample series cannot be summarized.
#[derive(Debug)]
pub enum SummaryError {
    /// The series holds no samples; there is no baseline to subtract.
    NoSamples,
    MissingCounter {
        timestamp: Timestamp,
        counter: &'static str,
    },
}

impl std::fmt::Display for SummaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryError::NoSamples => write!(f, "no samples"),
            SummaryError::MissingCounter { timestamp, counter } => {
                write!(f, "sample at {timestamp} has no {counter} counter")
            }
        }
    }
}

impl std::error::Error for SummaryError {}

/// Errors that stop summary extraction.
#[derive(Debug)]
pub enum ExtractError {
    Load(LoadError),
    /// The series loaded from `path` cannot be summarized.
    Summary { path: PathBuf, source: SummaryError },
    Write(WriteError),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Load(e) => write!(f, "failed to load parsed data: {e}"),
            ExtractError::Summary { path, source } => {
                write!(f, "cannot summarize {}: {source}", path.display())
            }
            ExtractError::Write(e) => write!(f, "failed to write usage summary: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Load(e) => Some(e),
            ExtractError::Summary { source, .. } => Some(source),
            ExtractError::Write(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free_log::{self, MemoryRecord};
    use crate::test_logs::capture_logs;
    use serde_json::Value;
    use std::path::Path;
    use tempfile::TempDir;

    fn used_record(used: u64) -> MemoryRecord {
        [
            ("mem_total".to_string(), 10_000),
            (USED_COUNTER.to_string(), used),
        ]
        .into_iter()
        .collect()
    }

    fn series(points: &[(f64, u64)]) -> SampleSeries {
        points
            .iter()
            .map(|&(ts, used)| (Timestamp::from_secs(ts), used_record(used)))
            .collect()
    }

    fn args(dir: &Path) -> StageArgs {
        StageArgs {
            prefix: dir.to_path_buf(),
        }
    }

    #[test]
    fn baseline_is_subtracted() {
        let summary = summarize(&series(&[(10.0, 100), (20.0, 150), (30.0, 120)])).unwrap();
        assert_eq!(summary.ram.max_bytes_used, 50);

        let over_time: Vec<(f64, i64)> = summary
            .ram
            .used_over_time
            .iter()
            .map(|(ts, v)| (ts.as_secs(), *v))
            .collect();
        assert_eq!(over_time, vec![(10.0, 0), (20.0, 50), (30.0, 20)]);
    }

    #[test]
    fn baseline_uses_earliest_timestamp_not_first_inserted() {
        let mut samples = SampleSeries::new();
        samples.insert(Timestamp::from_secs(50.0), used_record(300));
        samples.insert(Timestamp::from_secs(5.0), used_record(200));

        let summary = summarize(&samples).unwrap();
        assert_eq!(summary.ram.max_bytes_used, 100);
        assert_eq!(summary.ram.used_over_time[&Timestamp::from_secs(5.0)], 0);
    }

    #[test]
    fn usage_below_baseline_goes_negative() {
        let summary = summarize(&series(&[(0.0, 500), (1.0, 300)])).unwrap();
        assert_eq!(summary.ram.max_bytes_used, 0);
        assert_eq!(summary.ram.used_over_time[&Timestamp::from_secs(1.0)], -200);
    }

    #[test]
    fn one_gib_exactly() {
        let summary = summarize(&series(&[(0.0, 0), (1.0, 1_073_741_824)])).unwrap();
        assert_eq!(summary.ram.max_bytes_used, 1_073_741_824);
        assert_eq!(summary.ram.max_gib_used, 1.0);
    }

    #[test]
    fn run_time_one_hour_one_minute_one_second() {
        let t0 = 1_704_067_200.0;
        let summary = summarize(&series(&[(t0, 1), (t0 + 3661.0, 2)])).unwrap();
        assert_eq!(summary.run_time.seconds, 3661.0);
        assert_eq!(summary.run_time.human, "1:01:01");
    }

    #[test]
    fn run_time_across_days() {
        let summary = summarize(&series(&[(0.0, 1), (2.0 * 86_400.0 + 30.0, 2)])).unwrap();
        assert_eq!(summary.run_time.seconds, 172_830.0);
        assert_eq!(summary.run_time.human, "2 days, 0:00:30");
    }

    #[test]
    fn single_sample_has_zero_run_time() {
        let summary = summarize(&series(&[(42.0, 7)])).unwrap();
        assert_eq!(summary.ram.max_bytes_used, 0);
        assert_eq!(summary.run_time.seconds, 0.0);
        assert_eq!(summary.run_time.human, "0:00:00");
    }

    #[test]
    fn empty_series_fails_fast() {
        let err = summarize(&SampleSeries::new()).unwrap_err();
        assert!(matches!(err, SummaryError::NoSamples));
    }

    #[test]
    fn missing_used_counter_is_fatal() {
        let mut samples = series(&[(0.0, 1)]);
        samples.insert(
            Timestamp::from_secs(5.0),
            [("mem_total".to_string(), 10)].into_iter().collect(),
        );
        let err = summarize(&samples).unwrap_err();
        assert!(matches!(err, SummaryError::MissingCounter { .. }));
        assert!(err.to_string().contains("5.0"));
    }

    #[test]
    fn summary_json_shape() {
        let summary = summarize(&series(&[(0.0, 100), (60.0, 150)])).unwrap();
        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["ram"]["max_bytes_used"], 50);
        assert_eq!(v["ram"]["used_over_time"]["60.0"], 50);
        assert_eq!(v["run_time"]["human"], "0:01:00");
        assert_eq!(v["run_time"]["seconds"], 60.0);
    }

    #[test]
    fn stage_reads_string_keys_and_writes_summary() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("free.json"),
            r#"{"1704067200.0": {"mem_total": 1000, "mem_used": 400},
                "1704067260.0": {"mem_total": 1000, "mem_used": 450}}"#,
        )
        .unwrap();

        let summary = extract_resource_usage_plot_data(&args(dir.path()), &RusageConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(summary.ram.max_bytes_used, 50);

        let written = dir.path().join("plot.data").join("resource_usage.json");
        let v: Value = serde_json::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
        assert_eq!(v["ram"]["used_over_time"]["1704067260.0"], 50);
        assert_eq!(v["run_time"]["seconds"], 60.0);
    }

    #[test]
    fn stage_missing_input_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-run");

        let (result, logs) = capture_logs(|| {
            extract_resource_usage_plot_data(&args(&missing), &RusageConfig::default()).unwrap()
        });
        assert!(result.is_none());
        assert!(!missing.join("plot.data").exists());
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("unable to find resource usage data"), "{logs}");
        assert!(logs.contains("free.json.xz"), "{logs}");
    }

    #[test]
    fn stage_empty_series_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("free.json"), "{}").unwrap();

        let err = extract_resource_usage_plot_data(&args(dir.path()), &RusageConfig::default())
            .unwrap_err();
        match &err {
            ExtractError::Summary { path, source } => {
                assert_eq!(path, &dir.path().join("free.json"));
                assert!(matches!(source, SummaryError::NoSamples));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("free.json"));
        assert!(!dir.path().join("plot.data").exists());
    }

    #[test]
    fn parse_then_extract_end_to_end() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("free.log"),
            "\
Mon Jan 01 00:00:00 UTC 2024
             total        used        free
Mem:         1000         400         600
Mon Jan 01 00:01:00 UTC 2024
Mem:         1000         450         550
",
        )
        .unwrap();
        let config = RusageConfig::default();

        assert!(free_log::parse_resource_usage_logs(&args(dir.path()), &config).unwrap());
        let summary = extract_resource_usage_plot_data(&args(dir.path()), &config)
            .unwrap()
            .unwrap();

        assert_eq!(summary.ram.max_bytes_used, 50);
        assert_eq!(summary.run_time.seconds, 60.0);
        assert_eq!(summary.run_time.human, "0:01:00");
        assert!(dir.path().join("plot.data/resource_usage.json").exists());
    }

    #[test]
    fn extract_is_idempotent() {
        let dir = TempDir::new().unwrap();
        compress::dump_json(&series(&[(0.0, 10), (5.0, 30)]), &dir.path().join("free.json.xz"), 6)
            .unwrap();
        let config = RusageConfig::default();

        let first = extract_resource_usage_plot_data(&args(dir.path()), &config).unwrap();
        let second = extract_resource_usage_plot_data(&args(dir.path()), &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn stage_reads_xz_series() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("free.json.xz");
        compress::dump_json(&series(&[(0.0, 100), (60.0, 175)]), &path, 6).unwrap();

        let summary = extract_resource_usage_plot_data(&args(dir.path()), &RusageConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(summary.ram.max_bytes_used, 75);
        assert_eq!(summary.run_time.human, "0:01:00");
    }

    #[test]
    fn written_summary_loads_back() {
        let dir = TempDir::new().unwrap();
        compress::dump_json(
            &series(&[(1_704_067_200.0, 1_000), (1_704_067_260.0, 536_871_912)]),
            &dir.path().join("free.json"),
            6,
        )
        .unwrap();

        let summary = extract_resource_usage_plot_data(&args(dir.path()), &RusageConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(summary.ram.max_gib_used, 0.5);

        let loaded: UsageSummary =
            compress::load_json(&dir.path().join("plot.data/resource_usage.json")).unwrap();
        assert_eq!(loaded, summary);
        assert_eq!(
            loaded.ram.used_over_time[&Timestamp::from_secs(1_704_067_260.0)],
            536_870_912
        );
    }
}
