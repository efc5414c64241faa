//! `cml` — hook entry points and operational scripts for the conversational
//! memory layer (spec.md §6). A single binary, subcommands dispatched via
//! `clap`.

mod hooks;
mod ops;
mod worker;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cml")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hook and operational entry points for the conversational memory layer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hook entry points, invoked with a JSON object on stdin.
    #[command(subcommand)]
    Hook(HookCommands),
    /// Operational scripts for backlog inspection/repair.
    #[command(subcommand)]
    Ops(OpsCommands),
    /// Replication feed (C10).
    #[command(subcommand)]
    Replicate(ReplicateCommands),
    /// Background worker process (C3 outbox drain + C5 consolidation).
    #[command(subcommand)]
    Worker(WorkerCommands),
}

#[derive(Subcommand)]
enum HookCommands {
    /// Reads `{session_id, prompt, cwd}`, appends the prompt, retrieves
    /// relevant memories, writes `{context}`.
    UserPromptSubmit,
    /// Reads `{session_id, tool_name, tool_input, tool_output, tool_error?,
    /// started_at, ended_at}`, appends a tool-observation event, writes `{}`.
    PostToolUse,
}

#[derive(Subcommand)]
enum OpsCommands {
    /// Prints `{totalEvents, inEventsNotLeveledCount, outboxPendingCount, outboxFailedCount}`.
    ReportSyncGap,
    /// Prints `{leveledInserted, recoveredProcessingOutbox}`.
    FixSyncGap,
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Runs the outbox/vector worker and consolidation worker until killed.
    Run,
}

#[derive(Subcommand)]
enum ReplicateCommands {
    /// One pull round from `peer_db_path`, printing `{inserted, skipped}`.
    Pull {
        peer_db_path: std::path::PathBuf,
        #[arg(long, default_value_t = 0)]
        cursor: i64,
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Hook(HookCommands::UserPromptSubmit) => hooks::user_prompt_submit(),
        Commands::Hook(HookCommands::PostToolUse) => hooks::post_tool_use(),
        Commands::Ops(OpsCommands::ReportSyncGap) => ops::report_sync_gap(),
        Commands::Ops(OpsCommands::FixSyncGap) => ops::fix_sync_gap(),
        Commands::Replicate(ReplicateCommands::Pull { peer_db_path, cursor, limit }) => {
            ops::replicate_pull(&peer_db_path, cursor, limit)
        }
        Commands::Worker(WorkerCommands::Run) => worker::run().await,
    };

    std::process::exit(exit_code);
}
