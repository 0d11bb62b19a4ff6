use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "equipment-telemetry",
    version,
    about = "Synthetic equipment telemetry writer and threshold alerting reader"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate and write one reading per interval until Ctrl-C.
    Ingest,
    /// Refresh and render the latest window every refresh interval.
    Dashboard(RenderArgs),
    /// Ingest and dashboard side by side in one process.
    Run(RenderArgs),
    /// Create the readings table and its index if missing.
    InitSchema,
    /// One refresh cycle, printed once.
    Snapshot(RenderArgs),
}

#[derive(Args)]
pub struct RenderArgs {
    /// Emit JSON documents on stdout instead of log lines.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
