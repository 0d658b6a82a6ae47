//! `zeus-msg`: queue autonomous agent messages for Zeus delivery.

use clap::Parser;

mod commands;
mod util;

use commands::Cli;

fn main() {
    zeus_core::logging::init();

    let cli = Cli::parse();
    if let Err(e) = commands::run(cli) {
        eprintln!("zeus-msg: {e:#}");
        std::process::exit(1);
    }
}
