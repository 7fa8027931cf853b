/// Memory log parsing: turn the interleaved `date` / `free` output of a
/// simulation run into a timestamp-keyed series of memory counters.
use crate::compress;
use crate::config::{RusageConfig, StageArgs};
use crate::run_dir::{self, RunDir};
use crate::timestamp::{self, DateLineError, Timestamp};
use std::collections::BTreeMap;
use std::io::BufRead;

/// Counter name (`mem_total`, `mem_used`, ...) to byte count.
pub type MemoryRecord = BTreeMap<String, u64>;

/// One record per sample timestamp.
pub type SampleSeries = BTreeMap<Timestamp, MemoryRecord>;

/// Marker of a `free` data row.
const DATA_LABEL: &str = "Mem:";
/// Column that identifies the `free` header row.
const HEADER_KEYWORD: &str = "total";
const COUNTER_PREFIX: &str = "mem_";

/// Structural kind of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    /// `date` output: the only line shape with exactly two ':'.
    Timestamp,
    /// `free` column names, recognized only until the first one is captured.
    Header,
    /// `Mem:` row with the counter values.
    Data,
    Other,
}

fn classify(line: &str, header_captured: bool) -> LineKind {
    if line.matches(':').count() == 2 {
        LineKind::Timestamp
    } else if line.contains(HEADER_KEYWORD) && !header_captured {
        LineKind::Header
    } else if line.contains(DATA_LABEL) {
        LineKind::Data
    } else {
        LineKind::Other
    }
}

/// Line-at-a-time parser state.
///
/// The header is captured once and reused for every later data row; a
/// changed header mid-file goes unnoticed. When several data rows fall under
/// the same timestamp only the first is kept and the rest are dropped, so a
/// sample always reflects the reading taken right after its `date` stamp.
#[derive(Debug, Default)]
pub struct FreeLogParser {
    last_ts: Option<Timestamp>,
    header: Option<Vec<String>>,
    samples: SampleSeries,
    line_no: usize,
    dropped: usize,
}

impl FreeLogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one line of the log.
    pub fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        self.line_no += 1;
        match classify(line, self.header.is_some()) {
            LineKind::Timestamp => {
                let ts = timestamp::parse_date_line(line).map_err(|source| {
                    ParseError::BadTimestamp {
                        line_no: self.line_no,
                        line: line.trim().to_string(),
                        source,
                    }
                })?;
                self.last_ts = Some(ts);
            }
            LineKind::Header => {
                let columns: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                tracing::debug!(line_no = self.line_no, ?columns, "captured memory header");
                self.header = Some(columns);
            }
            LineKind::Data => {
                let record = self.data_record(line)?;
                let ts = self.last_ts.ok_or(ParseError::DataBeforeTimestamp {
                    line_no: self.line_no,
                })?;
                if self.samples.contains_key(&ts) {
                    self.dropped += 1;
                    tracing::debug!(line_no = self.line_no, %ts, "dropping repeated sample for timestamp");
                } else {
                    self.samples.insert(ts, record);
                }
            }
            LineKind::Other => {}
        }
        Ok(())
    }

    fn data_record(&self, line: &str) -> Result<MemoryRecord, ParseError> {
        let header = self.header.as_ref().ok_or(ParseError::DataBeforeHeader {
            line_no: self.line_no,
        })?;

        let values = line
            .split_whitespace()
            .skip(1)
            .map(|token| {
                token.parse::<u64>().map_err(|_| ParseError::BadCount {
                    line_no: self.line_no,
                    token: token.to_string(),
                })
            })
            .collect::<Result<Vec<u64>, ParseError>>()?;

        if values.len() > header.len() {
            return Err(ParseError::TooManyValues {
                line_no: self.line_no,
                values: values.len(),
                columns: header.len(),
            });
        }

        Ok(header
            .iter()
            .zip(values)
            .map(|(column, value)| (format!("{COUNTER_PREFIX}{column}"), value))
            .collect())
    }

    /// Number of data rows discarded because their timestamp was already taken.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn finish(self) -> SampleSeries {
        self.samples
    }
}

/// Parse a whole log from `reader`.
pub fn parse_reader<R: BufRead>(reader: R) -> Result<SampleSeries, ParseError> {
    let mut parser = FreeLogParser::new();
    for line in reader.lines() {
        let line = line.map_err(ParseError::Io)?;
        parser.feed(&line)?;
    }
    if parser.dropped() > 0 {
        tracing::debug!(dropped = parser.dropped(), "ignored data rows with repeated timestamps");
    }
    Ok(parser.finish())
}

/// Parse the run's memory log and write the sample series next to it.
///
/// Returns `Ok(false)` after logging a warning when the log is missing or
/// holds no samples; nothing is written in that case.
pub fn parse_resource_usage_logs(
    args: &StageArgs,
    config: &RusageConfig,
) -> Result<bool, ParseError> {
    let run = RunDir::new(&args.prefix, &config.files);
    let log_path = run.free_log();

    let Some(input) = run_dir::resolve_input(&log_path) else {
        tracing::warn!(
            path = %run_dir::compressed_variant(&log_path).display(),
            "unable to find resource usage data"
        );
        return Ok(false);
    };

    let reader = compress::open_readable(&input).map_err(ParseError::Io)?;
    let samples = parse_reader(reader)?;

    if samples.is_empty() {
        tracing::warn!(path = %input.display(), "unable to parse resource data");
        return Ok(false);
    }

    let output = run.parsed_output(config.storage.compress_parsed);
    compress::dump_json(&samples, &output, config.storage.compress_level)
        .map_err(ParseError::Write)?;
    for stale in compress::remove_stale_variants(&output) {
        tracing::info!(path = %stale.display(), "removed parsed data left by an earlier run");
    }

    tracing::info!(
        path = %output.display(),
        samples = samples.len(),
        "wrote parsed resource usage"
    );
    Ok(true)
}

/// Errors that stop a log parse.
#[derive(Debug)]
pub enum ParseError {
    Io(std::io::Error),
    /// A line shaped like a timestamp that does not parse as one.
    BadTimestamp {
        line_no: usize,
        line: String,
        source: DateLineError,
    },
    DataBeforeHeader {
        line_no: usize,
    },
    DataBeforeTimestamp {
        line_no: usize,
    },
    BadCount {
        line_no: usize,
        token: String,
    },
    TooManyValues {
        line_no: usize,
        values: usize,
        columns: usize,
    },
    Write(compress::WriteError),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Io(e) => write!(f, "I/O error reading memory log: {e}"),
            ParseError::BadTimestamp {
                line_no,
                line,
                source,
            } => write!(f, "malformed log: line {line_no}: bad timestamp {line:?}: {source}"),
            ParseError::DataBeforeHeader { line_no } => {
                write!(f, "malformed log: line {line_no}: data before header")
            }
            ParseError::DataBeforeTimestamp { line_no } => {
                write!(f, "malformed log: line {line_no}: data before timestamp")
            }
            ParseError::BadCount { line_no, token } => {
                write!(f, "malformed log: line {line_no}: {token:?} is not a byte count")
            }
            ParseError::TooManyValues {
                line_no,
                values,
                columns,
            } => write!(
                f,
                "malformed log: line {line_no}: {values} values for {columns} header columns"
            ),
            ParseError::Write(e) => write!(f, "failed to write parsed data: {e}"),
        }
    }
}

impl std::error::Error for ParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParseError::Io(e) => Some(e),
            ParseError::BadTimestamp { source, .. } => Some(source),
            ParseError::Write(e) => Some(e),
            _ => None,
        }
    }
}
