use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use log::info;

use resmask::{Driver, ResourceConfig};

pub(crate) fn command_process(
    apk: &Path,
    config: &Path,
    no_auto_sign: bool,
    json: bool,
    workdir: &Path,
) -> Result<i32> {
    let config = ResourceConfig::from_path(config)
        .with_context(|| format!("can't load configuration {:?}", config))?;
    let driver = Driver::with_workdir(config, workdir)?;

    let auto_sign_override = no_auto_sign.then_some(false);
    let result = driver
        .process_apk(apk, auto_sign_override)
        .with_context(|| format!("can't process {:?}", apk))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(if result.success { 0 } else { 1 });
    }

    if result.success {
        println!(
            "{} {} ({} file(s) modified, {} string(s) replaced, {} package rename(s))",
            "done".green().bold(),
            result.apk,
            result.files_modified,
            result.strings_replaced,
            result.package_renames
        );
        if result.pool_downgrades > 0 {
            println!(
                "  {} {} string pool(s) downgraded to utf-16",
                "note".yellow(),
                result.pool_downgrades
            );
        }
        if result.signed {
            info!("output aligned and signed");
        }
        Ok(0)
    } else {
        println!(
            "{} {} (rolled back: {})",
            "failed".red().bold(),
            result.error.as_deref().unwrap_or("unknown error"),
            result.rolled_back
        );
        Ok(1)
    }
}
