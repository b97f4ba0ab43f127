use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use library::config::{config_path_from_env, load_or_create_config};
use library::{CancelToken, Library, RunMode, RunReport, RunStatus};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: reconcile add|update [--verbose] [--config PATH] [--json]";

struct Args {
    mode: RunMode,
    verbose: bool,
    json: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut mode = None;
    let mut verbose = false;
    let mut json = false;
    let mut config = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "add" => mode = Some(RunMode::Add),
            "update" => mode = Some(RunMode::Full),
            "--verbose" | "-v" => verbose = true,
            "--json" => json = true,
            "--config" => {
                let value = args.next().ok_or("--config needs a path")?;
                config = Some(PathBuf::from(value));
            }
            other => return Err(format!("unexpected argument {:?}", other)),
        }
    }

    Ok(Args {
        mode: mode.ok_or("missing mode")?,
        verbose,
        json,
        config,
    })
}

fn print_report(report: &RunReport) {
    println!(
        "{:?}: {} created, {} updated, {} relocated, {} touched, {} unchanged, {} deleted",
        report.status,
        report.created,
        report.updated,
        report.relocated,
        report.touched,
        report.unchanged,
        report.deleted
    );
    println!(
        "Regrouped {} tracks, {} art changes",
        report.recollated, report.art_changes
    );
    if !report.skipped.is_empty() {
        println!("Skipped {} files:", report.skipped.len());
        for skipped in &report.skipped {
            println!("  {} ({:?}): {}", skipped.relpath, skipped.reason, skipped.detail);
        }
    }
}

fn run(args: &Args) -> Result<RunReport, Box<dyn std::error::Error>> {
    let config_path = args.config.clone().unwrap_or_else(config_path_from_env);
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Wrote default config to {:?}", config_path);
    }

    let library = Library::open(&config, &config_path)?;
    let stats_before = library.catalog().stats()?;
    info!(
        "Catalog holds {} artists, {} albums, {} tracks",
        stats_before.artists, stats_before.albums, stats_before.tracks
    );

    let report = library.reconcile(args.mode, &CancelToken::new())?;
    Ok(report)
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };

    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let report = match run(&args) {
        Ok(report) => report,
        Err(err) => {
            error!("Reconcile failed: {}", err);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                error!("Could not encode report: {}", err);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_report(&report);
    }

    match report.status {
        RunStatus::Failed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
