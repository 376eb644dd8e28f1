//! `fleetlift` — the control-surface CLI. Talks to the same
//! `TransformRun`/`TransformGroupRun` CRDs the `fleetlift-operator`
//! reconcilers own, using a plain clap-derive shape (`#[derive(Parser)]`
//! top-level struct, `#[derive(Subcommand)]` enum, `#[tokio::main]` entry
//! point) with no TUI or installer flow.

mod cli;
mod commands;
mod k8s;
mod output;
mod state;

use clap::Parser;

use cli::Cli;
use commands::Exit;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    let exit = match commands::dispatch(args.command).await {
        Ok(exit) => exit,
        Err(e) => {
            output::error(&e.to_string());
            Exit::General
        }
    };

    std::process::exit(exit as i32);
}
