//! `forged` — the forge daemon. Speaks newline-delimited JSON-RPC 2.0 on
//! stdin/stdout; logs land on stderr (the supervisor points that at
//! `~/.forge/daemon.log`).

use std::io::{stdin, stdout};

use clap::Parser;
use forge_core::logging::LoggingArgs;
use forge_core::plugins::PluginRegistry;
use forge_daemon::Daemon;

#[derive(Debug, Parser)]
#[clap(about = "The forge build daemon")]
struct DaemonArgs {
    #[clap(flatten)]
    log_level: LoggingArgs,
}

fn main() -> std::io::Result<()> {
    let args = DaemonArgs::parse();
    args.log_level.init_root_logger();

    // language-ecosystem inferrers register here when linked in
    let registry = PluginRegistry::new();

    let daemon = Daemon::new(registry);
    daemon.run(stdin().lock(), stdout())
}
