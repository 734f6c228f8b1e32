mod cli;
mod commands;

use std::process;

use clap::Parser;
use cli::Cli;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();

    // Initialize tracing based on --debug flag (or "debug" in the config)
    let debug = cli.global.debug_requested();
    match &cli.global.log_dir {
        Some(dir) => {
            if let Err(e) = netvol::init_logging_for(dir, debug) {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        None => {
            tracing_subscriber::registry()
                .with(netvol::default_filter(debug))
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let result = match cli.command {
        cli::Commands::Create(args) => commands::create::execute(args, &cli.global),
        cli::Commands::List(args) => commands::list::execute(args, &cli.global),
        cli::Commands::Inspect(args) => commands::inspect::execute(args, &cli.global),
        cli::Commands::Rm(args) => commands::rm::execute(args, &cli.global),
        cli::Commands::Path(args) => commands::path::execute(args, &cli.global),
        cli::Commands::Mount(args) => commands::mount::execute(args, &cli.global),
        cli::Commands::Unmount(args) => commands::unmount::execute(args, &cli.global),
        cli::Commands::Capabilities(args) => commands::capabilities::execute(args, &cli.global),
    };

    if let Err(error) = result {
        eprintln!("Error: {}", error);
        process::exit(1);
    }
}
