mod commandline;
mod daemon;
mod mqtt;

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

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
    log_handle
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let listener = evtvbms_lib::udp::UdpListener::bind(args.port)
        .with_context(|| format!("Cannot bind UDP port {}", args.port))?;
    listener
        .set_timeout(args.timeout)
        .with_context(|| "Cannot set socket read timeout")?;

    match args.command {
        commandline::CliCommands::Dump => daemon::dump(listener)?,
        commandline::CliCommands::Daemon { ref output, .. } => {
            let windows = args.command.windows();
            daemon::run(
                listener,
                &args.name,
                args.pack_config(),
                windows,
                output.clone(),
            )?;
        }
    }

    Ok(())
}
