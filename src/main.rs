mod compress;
mod config;
mod free_log;
mod run_dir;
#[cfg(test)]
mod test_logs;
mod timestamp;
mod usage;

use clap::{Parser, Subcommand};
use config::{RusageConfig, StageArgs};
use run_dir::RunDir;
use std::path::PathBuf;
use std::process::ExitCode;

/// Turn the periodic memory snapshots of a simulation run into a
/// timestamped series, then summarize peak usage and run time for plotting.
#[derive(Parser, Debug)]
#[command(name = "rusage", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "rusage.toml", global = true)]
    config: PathBuf,

    /// Extra logging (per-line parser decisions, loaded artifacts)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors (ignored with --verbose)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse free.log into the timestamped sample series
    Parse(StageArgs),
    /// Summarize the parsed series into plot.data/resource_usage.json
    Extract(StageArgs),
    /// Parse, then extract if parsing produced data
    All(StageArgs),
    /// Print the input and output paths for a run, don't process anything
    Paths(StageArgs),
}

/// Exit status when the run has no usable resource data.
const EXIT_NO_DATA: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match RusageConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "resource usage processing failed");
            ExitCode::FAILURE
        }
    }
}

fn run(command: &Command, config: &RusageConfig) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match command {
        Command::Parse(args) => {
            if free_log::parse_resource_usage_logs(args, config)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(EXIT_NO_DATA))
            }
        }
        Command::Extract(args) => {
            extract(args, config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::All(args) => {
            if !free_log::parse_resource_usage_logs(args, config)? {
                return Ok(ExitCode::from(EXIT_NO_DATA));
            }
            extract(args, config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Paths(args) => {
            print_paths(args, config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn extract(args: &StageArgs, config: &RusageConfig) -> Result<(), usage::ExtractError> {
    if let Some(summary) = usage::extract_resource_usage_plot_data(args, config)? {
        println!(
            "peak memory above baseline: {:.3} GiB ({} bytes), run time: {} ({} s)",
            summary.ram.max_gib_used,
            summary.ram.max_bytes_used,
            summary.run_time.human,
            summary.run_time.seconds
        );
    }
    Ok(())
}

fn print_paths(args: &StageArgs, config: &RusageConfig) {
    let run = RunDir::new(&args.prefix, &config.files);
    let show = |path: PathBuf| match run_dir::resolve_input(&path) {
        Some(found) => format!("{} (found)", found.display()),
        None => format!("{} (missing)", path.display()),
    };

    println!("prefix:  {}", run.root().display());
    println!("log:     {}", show(run.free_log()));
    println!("parsed:  {}", show(run.parsed()));
    println!(
        "writes:  {}",
        run.parsed_output(config.storage.compress_parsed).display()
    );
    println!("summary: {}", run.summary().display());
}
