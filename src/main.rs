use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{
    Cleanup, Criterion, DeferredNow, Duplicate, FileSpec, Logger, LoggerHandle, Naming, Record,
};
use log::*;
use std::{ops::Deref, panic, path::Path};

mod commandline;
mod config;
mod daemon;
mod mqtt;

use commandline::{CliArgs, CliCommands};

const LOG_BASENAME: &str = "axpert_monitor";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

fn log_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    write!(
        w,
        "{} | {:<5} | {}",
        now.now().format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.args()
    )
}

fn logging_init(loglevel: LevelFilter, log_dir: Option<&Path>) -> Result<LoggerHandle> {
    let logger = Logger::try_with_env_or_str(loglevel.as_str())
        .with_context(|| "Cannot init logging")?
        .format(log_format);
    let logger = match log_dir {
        Some(log_dir) => logger
            .log_to_file(
                FileSpec::default()
                    .directory(log_dir)
                    .basename(LOG_BASENAME),
            )
            .duplicate_to_stdout(Duplicate::All)
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            ),
        None => logger.log_to_stdout(),
    };
    let log_handle = logger.start().with_context(|| "Cannot start logging")?;

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    Ok(log_handle)
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let log_dir = (!args.no_log_file).then_some(args.log_dir.as_path());
    let _log_handle = logging_init(args.verbose.log_level_filter(), log_dir)?;

    let overrides = args.overrides();

    match args.command {
        CliCommands::Query { unit } => {
            let config = daemon::load_config(&args.config, &overrides);
            let reading = daemon::query_unit(&config, unit)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&reading).with_context(|| "Cannot serialize reading")?
            );
        }
        CliCommands::Once => {
            let config = daemon::load_config(&args.config, &overrides);
            let cycle = daemon::poll_cycle(&config)?;
            daemon::print_cycle(&config, &cycle)?;
        }
        CliCommands::Daemon { output } => {
            daemon::run(&args.config, &overrides, output)?;
        }
    }

    Ok(())
}
