use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use resmask::{Driver, ResourceConfig};

pub(crate) fn command_scan(apk: &Path, config: &Path, json: bool, workdir: &Path) -> Result<i32> {
    let config = ResourceConfig::from_path(config)
        .with_context(|| format!("can't load configuration {:?}", config))?;
    let driver = Driver::with_workdir(config, workdir)?;

    let report = driver
        .scan_apk(apk)
        .with_context(|| format!("can't scan {:?}", apk))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    println!(
        "{} {} xml file(s), {} candidate(s)",
        "scanned".green().bold(),
        report.files.len(),
        report.results.len()
    );

    for result in &report.results {
        println!(
            "  {:<18} {} {} -> {:?}",
            format!("{:?}", result.semantic_type).cyan(),
            result.file,
            result.location.dimmed(),
            result.original_value
        );
    }

    for warning in &report.warnings {
        println!("  {} {}", "skipped".yellow(), warning);
    }

    Ok(0)
}
