use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::{command_process, command_scan, command_validate};

mod commands;

#[derive(Parser)]
#[command(name = "resmask", version, about, arg_required_else_help(true))]
struct Cli {
    #[command(subcommand)]
    commands: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate class/package rewrite candidates without modifying anything
    Scan {
        #[arg(required = true)]
        apk: PathBuf,

        /// YAML configuration with mappings and own prefixes
        #[arg(short, long)]
        config: PathBuf,

        /// Print the raw report as JSON
        #[arg(long)]
        json: bool,

        /// Directory for snapshots and the audit log
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Rewrite the APK's resources according to the configured mappings
    ProcessApk {
        #[arg(required = true)]
        apk: PathBuf,

        #[arg(short, long)]
        config: PathBuf,

        /// Skip the external zipalign/apksigner invocation
        #[arg(long)]
        no_auto_sign: bool,

        /// Print the processing result as JSON
        #[arg(long)]
        json: bool,

        /// Directory for snapshots and the audit log
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Check mapping consistency and resource structure
    Validate {
        #[arg(required = true)]
        apk: PathBuf,

        /// Optional configuration; without it only structure is checked
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the validation report as JSON
        #[arg(long)]
        json: bool,

        /// Directory for snapshots and the audit log
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match &cli.commands {
        Some(Commands::Scan {
            apk,
            config,
            json,
            workdir,
        }) => command_scan(apk, config, *json, workdir),
        Some(Commands::ProcessApk {
            apk,
            config,
            no_auto_sign,
            json,
            workdir,
        }) => command_process(apk, config, *no_auto_sign, *json, workdir),
        Some(Commands::Validate {
            apk,
            config,
            json,
            workdir,
        }) => command_validate(apk, config.as_deref(), *json, workdir),
        None => Ok(0),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(1);
        }
    }
}
