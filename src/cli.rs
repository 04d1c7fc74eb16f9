//! Argv surface for the `flowctl` binary (`spec.md` §6 "CLI"). A thin adapter:
//! this module has no knowledge of `WorkflowGraph`, providers, or MCP — it
//! only turns `std::env::args()` into a [`Cli`] value for `main` to act on.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flowctl")]
#[command(about = "Composes AI providers and MCP tool servers into declarative pipelines")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding providers.yaml / servers.yaml (or config.yaml).
    #[arg(long, global = true, default_value = "config")]
    pub config: PathBuf,

    /// error|warn|info|step|debug|verbose. Overrides workflow `logging:` and `--verbose`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Shorthand for `--log-level verbose`.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Disable ANSI color in human-readable output.
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow.
    Run {
        /// Workflow name, resolved to `<dir>/<name>.yaml` under the workflow directory.
        #[arg(long)]
        workflow: String,

        /// Directory the named workflow (and any child workflows it references) lives in.
        #[arg(long, default_value = ".")]
        workflows_dir: PathBuf,

        /// Seeds `{{input}}`. Reads stdin if omitted.
        #[arg(long)]
        input_data: Option<String>,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long, value_delimiter = ',')]
        servers: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        skills: Vec<String>,

        /// Only execute steps reachable from (and including) this step name.
        #[arg(long)]
        start_from: Option<String>,

        /// Stop after this step name completes; later steps are skipped.
        #[arg(long)]
        end_at: Option<String>,
    },

    /// Print the workflow catalog as JSON.
    ListWorkflows {
        #[arg(long, default_value = ".")]
        workflows_dir: PathBuf,
    },

    /// Publish the workflow catalog as an MCP tool server over stdio.
    Serve {
        /// Directory of workflows to expose, one MCP tool per `*.yaml` file.
        workflows_dir: PathBuf,
    },
}
