//! Logging setup shared by the daemon and its binaries.
//!
//! All forge processes log to **stderr**: stdout belongs to the JSON-RPC
//! protocol stream, so nothing here may ever touch it.

use std::io::stderr;

use colored::Colorize;
use fern::Dispatch;
use log::{Level, LevelFilter, SetLoggerError};
use time::macros::format_description;
use time::OffsetDateTime;

/// Logging flags for forge binaries. Verbosity stacks: `-v` turns on
/// debug records, `-vv` trace; `--quiet` drops everything below errors.
#[derive(Debug, Default, clap::Args)]
#[clap(next_help_heading = "Logging")]
pub struct LoggingArgs {
    /// More output per occurrence (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[clap(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Prefix each record with the module that produced it
    #[clap(long)]
    log_targets: bool,
}

impl LoggingArgs {
    /// The level filter these flags select.
    pub fn level_filter(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Info,
                1 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    /// Install the root logger. Returns false if one was already set.
    pub fn init_root_logger(&self) -> bool {
        self.create_logger().apply().is_ok()
    }

    /// Install a root logger with an explicit filter.
    pub fn try_init_root_logger_with(filter: LevelFilter) -> Result<(), SetLoggerError> {
        dispatch(filter, false).apply()
    }

    /// The fern dispatch these flags describe, not yet applied.
    pub fn create_logger(&self) -> Dispatch {
        dispatch(self.level_filter(), self.log_targets)
    }
}

/// Records at info and below stay terse; once debug records are flowing a
/// timestamp gets prepended so interleaved task output can be correlated.
fn dispatch(filter: LevelFilter, log_targets: bool) -> Dispatch {
    let timestamped = filter >= LevelFilter::Debug;
    Dispatch::new()
        .format(move |out, message, record| {
            let target = if log_targets {
                format!("({}) ", record.target())
            } else {
                String::new()
            };
            if timestamped {
                let format = format_description!("[hour]:[minute]:[second].[subsecond digits:3]");
                out.finish(format_args!(
                    "[{}] {}{}{}",
                    OffsetDateTime::now_utc().format(&format).unwrap_or_default(),
                    level_tag(record.level()),
                    target,
                    message
                ))
            } else {
                out.finish(format_args!("{}{}{}", level_tag(record.level()), target, message))
            }
        })
        .level(filter)
        .chain(stderr())
}

fn level_tag(level: Level) -> String {
    match level {
        Level::Error => format!("{}: ", "error".red().bold()),
        Level::Warn => format!("{}: ", "warn".yellow().bold()),
        Level::Info => String::new(),
        Level::Debug => format!("{}: ", "debug".cyan()),
        Level::Trace => format!("{}: ", "trace".dimmed()),
    }
}
