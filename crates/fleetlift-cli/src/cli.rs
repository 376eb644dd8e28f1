//! Argument grammar for the control surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetlift", version, about = "Durable task-execution engine for automated code transformations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start a workflow from a task file and record its id.
    Run { task_file: PathBuf },
    /// List known workflows.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show a workflow's current phase.
    Status { id: Option<String> },
    /// Show a workflow's terminal result.
    Result { id: Option<String> },
    /// Show collected reports (report mode).
    Reports {
        id: Option<String>,
        #[arg(short = 'o', long, default_value = "table")]
        output: String,
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        frontmatter_only: bool,
    },
    /// Approve the pending checkpoint.
    Approve { id: Option<String> },
    /// Reject the pending checkpoint.
    Reject { id: Option<String> },
    /// Cancel a running workflow.
    Cancel { id: Option<String> },
    /// Redirect the agent with a new prompt at the current checkpoint.
    Steer {
        id: Option<String>,
        #[arg(long)]
        prompt: String,
    },
    /// Resume a paused multi-group dispatcher.
    Continue {
        id: Option<String>,
        #[arg(long)]
        skip_remaining: bool,
    },
    /// Show the working diff.
    Diff {
        id: Option<String>,
        #[arg(long)]
        full: bool,
        #[arg(long)]
        file: Option<String>,
    },
    /// Show verifier output.
    Logs {
        id: Option<String>,
        #[arg(long)]
        verifier: Option<usize>,
    },
}
