use crate::demo::{run_demo, run_ledger_report, DemoArgs, LedgerReportArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use escrow_engine::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Escrow Engine",
    about = "Run and demonstrate the consulting escrow engine from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect a persisted escrow ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
    /// Walk a funded engagement and a disputed engagement through the engine
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Print dashboard totals or a CSV audit export for a ledger file
    Report(LedgerReportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON file of accepted proposals; demo proposals are used when omitted
    #[arg(long)]
    pub(crate) proposals: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Ledger {
            command: LedgerCommand::Report(args),
        } => run_ledger_report(args),
        Command::Demo(args) => run_demo(args),
    }
}
