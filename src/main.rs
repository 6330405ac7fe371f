use std::{io::Write, process::ExitCode, sync::Arc, time::Duration};

use clap::{error::ErrorKind, Parser};
use line_watch::{StopCondition, Watcher};
use tracing::error;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "2 arguments are required, the directory to watch and a file pattern, \
example: line-watch \"/data/file folder\" *.txt";

/// Watches a directory and reports created, modified and deleted text files
/// with their line counts.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory to watch; empty means the current directory
    directory: String,

    /// File name pattern, e.g. `*.txt`; empty means `*.txt`
    pattern: String,

    /// Seconds between polls
    #[arg(long, default_value_t = 10.0)]
    interval: f64,

    /// Also print the files found by the first poll
    #[arg(long)]
    report_baseline: bool,

    /// Log more (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print().ok();
            return ExitCode::SUCCESS;
        }
        Err(_) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
    };

    init_logging(args.verbose);

    if !(args.interval.is_finite() && args.interval > 0.0) {
        println!("--interval must be a positive number of seconds");
        return ExitCode::FAILURE;
    }

    let watcher = match Watcher::new(&args.directory, &args.pattern) {
        Ok(w) => w
            .check_duration(Duration::from_secs_f64(args.interval))
            .report_baseline(args.report_baseline),
        Err(e) => {
            error!("{e}");
            println!("{e}");
            return ExitCode::FAILURE;
        }
    };

    println!(
        "Watching {} for {}",
        watcher.directory().display(),
        watcher.pattern()
    );

    Arc::new(watcher).run(StopCondition::Forever, |report| {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{report}").ok();
        stdout.flush().ok();
    });

    ExitCode::SUCCESS
}
