// SPDX-License-Identifier: AGPL-3.0

//! tracecov - instruction and method coverage from EVM debugger traces
//!
//! Replays a recorded session (deployments and calls with their debugger
//! traces) against compiled artifacts and reports per-contract coverage.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use regex::Regex;
use std::fs;
use std::io;
use std::time::Instant;
use tracecov_build::load_artifacts;
use tracecov_config::Config;
use tracecov_coverage::{generate_report, ArtifactCoverage, CoverageReport, CoverageSession};
use tracecov_exceptions::CoverageException;
use tracecov_traces::render_call_tree;

mod replay;
mod report;

use replay::{load_session, RecordedTransaction, ReplayProvider};
use report::{Exitcode, MainResult, ReplayTally};

fn main() -> Result<()> {
    let result = _main()?;
    std::process::exit(result.exitcode)
}

fn _main() -> Result<MainResult> {
    let start_time = Instant::now();

    let config = tracecov_config::load(Config::parse())?;

    if config.version {
        println!("tracecov version {}", env!("CARGO_PKG_VERSION"));
        return Ok(MainResult::empty(Exitcode::Pass));
    }

    tracecov_logs::init(config.verbose);

    let glob = config.resolved_artifacts_glob();
    let library = match load_artifacts(&glob) {
        Ok(library) => library,
        Err(e) => {
            eprintln!("{}", format!("{:#}", e).red());
            return Ok(MainResult::empty(Exitcode::NothingProcessed));
        }
    };
    println!(
        "{} {} artifacts from {}",
        "Loaded".green(),
        library.len(),
        glob.cyan()
    );

    let Some(session_path) = config.resolved_session() else {
        eprintln!("{}", "No session to replay: pass --session <file>".red());
        return Ok(MainResult::empty(Exitcode::NothingProcessed));
    };
    let (provider, transactions) = load_session(&session_path)?;
    println!(
        "{} {} transactions from {}",
        "Replaying".green(),
        transactions.len(),
        session_path.display().to_string().cyan()
    );

    let mut session = CoverageSession::new(provider, library);
    let tally = replay_all(&mut session, &transactions, &config);

    let mut report = generate_report(&session.library, &session.accumulator)?;
    let contract_regex = make_contract_regex(&config)?;
    report
        .artifacts
        .retain(|artifact| contract_regex.is_match(&artifact.name));

    print_report(&report);
    print_summary(transactions.len(), &tally, &report, start_time);

    if let Some(json_path) = &config.json_output {
        let json_str = serde_json::to_string_pretty(&report)?;
        fs::write(json_path, json_str)
            .with_context(|| format!("Failed to write {}", json_path.display()))?;
        println!("JSON output written to: {}", json_path.display());
    }

    if let Some(lcov_path) = &config.lcov_output {
        fs::write(lcov_path, report.to_lcov())
            .with_context(|| format!("Failed to write {}", lcov_path.display()))?;
        println!("LCOV output written to: {}", lcov_path.display());
    }

    let result = MainResult {
        exitcode: MainResult::exitcode_for(transactions.len(), &tally) as i32,
        total_transactions: transactions.len(),
        total_rejected: tally.rejected,
        total_failed: tally.failed,
        total_reported: report.artifacts.len(),
        duration: start_time.elapsed(),
    };
    if result.has_rejections() {
        eprintln!(
            "{}",
            format!(
                "{} of {} traces were rejected as unbalanced",
                result.total_rejected, result.total_transactions
            )
            .red()
        );
    }
    if result.total_failed > 0 {
        eprintln!(
            "{}",
            format!(
                "{} of {} transactions could not be replayed",
                result.total_failed, result.total_transactions
            )
            .red()
        );
    }
    Ok(result)
}

/// Replays every transaction in order.
///
/// A failing transaction is logged and counted; the rest of the session is
/// still replayed.
fn replay_all(
    session: &mut CoverageSession<ReplayProvider>,
    transactions: &[RecordedTransaction],
    config: &Config,
) -> ReplayTally {
    let mut tally = ReplayTally::default();
    for tx in transactions {
        match replay_transaction(session, tx, config) {
            Ok(()) => {}
            Err(e) if is_unbalanced(&e) => {
                tally.rejected += 1;
                tracecov_logs::error(&format!("{}: trace rejected: {:#}", tx.hash, e), true);
            }
            Err(e) => {
                tally.failed += 1;
                tracecov_logs::warn(&format!("{}: skipped: {:#}", tx.hash, e), false);
            }
        }
    }
    tally
}

/// Feeds one recorded transaction through the session hooks
fn replay_transaction(
    session: &mut CoverageSession<ReplayProvider>,
    tx: &RecordedTransaction,
    config: &Config,
) -> Result<()> {
    let input = tx.input_bytes()?;
    session.on_message_call(tx.from, tx.to, &input);

    match tx.to {
        None => {
            let created = session.on_contract_creation(&tx.hash, &tx.creation_code())?;
            if config.verbose >= 1 {
                match created {
                    Some(address) => println!("  {} {}", "Deployed".dimmed(), address),
                    None => println!("  {} {}", "Failed deployment".yellow(), tx.hash),
                }
            }
        }
        Some(to) => {
            let tree = session.on_transaction(&tx.hash, to)?;
            if config.debug {
                println!("{} {}", "Trace:".cyan(), tx.hash);
                render_call_tree(&tree, &session.library.address_names(), &mut io::stdout())?;
            }
        }
    }
    Ok(())
}

fn is_unbalanced(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<CoverageException>(),
        Some(CoverageException::UnbalancedTrace(_))
    )
}

fn make_contract_regex(config: &Config) -> Result<Regex> {
    let pattern = if config.match_contract.is_empty() {
        ".*"
    } else {
        config.match_contract.as_str()
    };
    Regex::new(pattern).with_context(|| format!("Invalid --match-contract '{}'", pattern))
}

fn colored_percent(percent: f64) -> String {
    let text = format!("{:.2}%", percent);
    if percent >= 80.0 {
        text.green().to_string()
    } else if percent >= 50.0 {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}

fn print_artifact(artifact: &ArtifactCoverage) {
    let addresses: Vec<String> = artifact.addresses.iter().map(|a| a.to_string()).collect();
    println!(
        "\n{} {}",
        artifact.name.cyan().bold(),
        addresses.join(", ").dimmed()
    );
    println!(
        "  runtime   {}/{} instructions ({})",
        artifact.runtime.used,
        artifact.runtime.total,
        colored_percent(artifact.runtime.percent)
    );
    println!(
        "  creation  {}/{} instructions ({})",
        artifact.creation.used,
        artifact.creation.total,
        colored_percent(artifact.creation.percent)
    );
    println!(
        "  methods   {}/{} called ({})",
        artifact.methods.called,
        artifact.methods.total,
        colored_percent(artifact.methods.percent)
    );
    for (signature, count) in &artifact.function_calls {
        let count = if *count == 0 {
            count.to_string().red()
        } else {
            count.to_string().normal()
        };
        println!("    {} {}", signature, count);
    }
    if artifact.unknown_program_counters > 0 {
        println!(
            "  {} {} executed program counters outside the disassembly",
            "warning:".yellow(),
            artifact.unknown_program_counters
        );
    }
}

fn print_report(report: &CoverageReport) {
    for artifact in &report.artifacts {
        print_artifact(artifact);
    }
}

fn print_summary(
    total_transactions: usize,
    tally: &ReplayTally,
    report: &CoverageReport,
    start_time: Instant,
) {
    println!(
        "\n{} {} transactions, {} {}, {} {}, {} contracts covered ({}ms)",
        "Summary:".yellow().bold(),
        total_transactions,
        tally.rejected.to_string().red(),
        "rejected".red(),
        tally.failed.to_string().yellow(),
        "failed".yellow(),
        report.artifacts.len(),
        start_time.elapsed().as_millis()
    );
}
