use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use resmask::{Driver, ResourceConfig};

pub(crate) fn command_validate(
    apk: &Path,
    config: Option<&Path>,
    json: bool,
    workdir: &Path,
) -> Result<i32> {
    let config = match config {
        Some(path) => ResourceConfig::from_path(path)
            .with_context(|| format!("can't load configuration {:?}", path))?,
        None => ResourceConfig::default(),
    };
    let driver = Driver::with_workdir(config, workdir)?;

    let report = driver
        .validate_apk(apk)
        .with_context(|| format!("can't validate {:?}", apk))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if report.ok { 0 } else { 1 });
    }

    if report.ok {
        println!("{} {:?}", "valid".green().bold(), apk);
    } else {
        println!("{} {:?}", "invalid".red().bold(), apk);
    }

    for cycle in &report.cycles {
        println!("  {} {}", "cycle".red(), cycle.join(" -> "));
    }
    for class in &report.missing_classes {
        println!("  {} {}", "missing".red(), class);
    }
    for message in &report.messages {
        println!("  {} {}", "note".yellow(), message);
    }

    Ok(if report.ok { 0 } else { 1 })
}
