use std::path::PathBuf;

use anyhow::Result;

use {
    switchyard_config::{Severity, SwitchyardConfig, validate},
    switchyard_lanes::LaneConfig,
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

pub fn lanes(config: &SwitchyardConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.lanes)?);
        return Ok(());
    }

    if config.lanes.is_empty() {
        println!("No lanes configured.");
        return Ok(());
    }

    println!(
        "{BOLD}{:<16} {:<10} {:>11} {:>10} {:>9}{RESET}",
        "LANE", "MODE", "CONCURRENCY", "WINDOW", "MAX BATCH"
    );
    for (name, settings) in &config.lanes {
        let lane = LaneConfig::from(settings);
        let window = if lane.admission_mode.is_windowed() {
            format!("{}ms", lane.collect_window.as_millis())
        } else {
            "-".to_string()
        };
        println!(
            "{:<16} {:<10} {:>11} {:>10} {:>9}",
            name,
            lane.admission_mode.to_string(),
            lane.concurrency_limit,
            window,
            lane.max_batch_size
        );
    }
    Ok(())
}

pub fn check(config: &SwitchyardConfig, path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let mut result = validate(config);
    result.config_path = path;

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let (color, label) = match d.severity {
            Severity::Error => (RED, "error"),
            Severity::Warning => (YELLOW, "warning"),
            Severity::Info => (CYAN, "info"),
        };

        let location = if d.path.is_empty() {
            String::new()
        } else {
            format!(" {}:", d.path)
        };
        eprintln!("  {BOLD}{color}{label}{RESET} [{}]{location} {}", d.category, d.message);
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}
