//! CLI entrypoint for the boundlibc verification harness.

use std::path::PathBuf;

use boundlibc_harness::policy_matrix::{self, HarnessError, default_cases, run_matrix};
use boundlibc_harness::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use clap::{Parser, Subcommand};

/// Verification tooling for boundlibc.
#[derive(Debug, Parser)]
#[command(name = "boundlibc-harness")]
#[command(about = "Verification harness for the boundlibc bounds-check policy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the bounds-check level of this process and print it as JSON.
    Probe {
        /// Number of threads resolving the level at the same time.
        #[arg(long, default_value_t = 1)]
        threads: usize,
    },
    /// Run the policy matrix in child processes.
    Matrix {
        /// Threads per child probe.
        #[arg(long, default_value_t = 8)]
        threads: usize,
        /// Structured JSONL log path (if omitted, logs go to stdout).
        #[arg(long)]
        log: Option<PathBuf>,
        /// Output path for the JSON matrix report.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Run identifier used in trace ids.
        #[arg(long, default_value = "local")]
        run_id: String,
    },
}

fn run_matrix_command(
    threads: usize,
    log: Option<PathBuf>,
    output: Option<PathBuf>,
    run_id: &str,
) -> Result<bool, HarnessError> {
    let exe = std::env::current_exe()?;
    let mut emitter = match &log {
        Some(path) => LogEmitter::to_file(path, "policy_matrix", run_id)?,
        None => LogEmitter::to_stdout("policy_matrix", run_id),
    };
    emitter.emit(LogLevel::Info, "matrix_start")?;

    let report = run_matrix(&exe, &default_cases(), threads);
    for case in &report.cases {
        let (level, outcome) = if case.passed {
            (LogLevel::Info, Outcome::Pass)
        } else if case.error.is_some() {
            (LogLevel::Error, Outcome::Error)
        } else {
            (LogLevel::Error, Outcome::Fail)
        };
        let mut entry = LogEntry::new("", level, "case_result")
            .with_case(&case.name)
            .with_symbol("memcpy")
            .with_outcome(outcome)
            .with_duration_ms(case.duration_ms)
            .with_details(serde_json::json!({
                "expected": case.expected.as_str(),
                "threads_agreed": case.threads_agreed,
                "error": case.error,
            }));
        if let Some(observed) = case.observed {
            entry = entry.with_bounds_level(observed.as_str());
        }
        emitter.emit_entry(entry)?;
    }

    let summary = LogEntry::new("", LogLevel::Info, "matrix_end")
        .with_outcome(if report.all_passed() {
            Outcome::Pass
        } else {
            Outcome::Fail
        })
        .with_details(serde_json::json!({
            "passed": report.passed,
            "failed": report.failed,
        }));
    emitter.emit_entry(summary)?;
    emitter.flush()?;

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }
    Ok(report.all_passed())
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Probe { threads } => {
            // Nothing may resolve the policy before this point.
            let report = policy_matrix::probe(threads);
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(err) => {
                    eprintln!("probe: {err}");
                    std::process::exit(2);
                }
            }
        }
        Command::Matrix {
            threads,
            log,
            output,
            run_id,
        } => match run_matrix_command(threads, log, output, &run_id) {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(err) => {
                eprintln!("matrix: {err}");
                std::process::exit(2);
            }
        },
    }
}
