use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one task through the pipeline and print the final report
    Run {
        /// The user task, in natural language
        task: String,

        /// Repository to operate on (defaults to the enclosing git repo)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Branch to base all work on (defaults to the current branch)
        #[arg(long)]
        base_branch: Option<String>,

        /// Explicit job id instead of the generated one
        #[arg(long)]
        job_id: Option<String>,

        /// Push the result branch to origin after a successful merge
        #[arg(long)]
        push: bool,

        /// Run the analyze + refactor pair before planning
        #[arg(long)]
        prefactor: bool,
    },

    /// Serve the dashboard API (HTTP snapshot + WebSocket stream)
    Serve {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// State-store file to serve from
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Poll task sources and run each task through the pipeline
    Dispatch {
        /// Seed task(s) for the built-in queue source (repeatable)
        #[arg(long = "task")]
        tasks: Vec<String>,

        /// Exit once every source is empty instead of polling forever
        #[arg(long)]
        once: bool,

        /// Poll interval between empty passes, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}
