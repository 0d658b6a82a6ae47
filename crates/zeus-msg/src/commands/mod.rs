//! CLI surface.

use clap::{Parser, Subcommand};

pub mod send;

#[derive(Parser, Debug)]
#[command(
    name = "zeus-msg",
    about = "Queue autonomous agent messages for Zeus delivery",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue one outbound message
    Send(send::SendArgs),
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Send(args) => send::execute(args),
    }
}
