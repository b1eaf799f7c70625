use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use taxref_sync::app::{CancelFlag, RunOptions, SyncApp};
use taxref_sync::audit::AuditLog;
use taxref_sync::config::{ConfigLoader, ResolvedConfig};
use taxref_sync::error::SyncError;
use taxref_sync::kb::KbHttpClient;
use taxref_sync::output::JsonOutput;
use taxref_sync::report::{SourceRecordLoader, read_report};
use taxref_sync::resolver::ResolutionStrategy;

#[derive(Parser)]
#[command(name = "taxref-sync")]
#[command(about = "Sync genome assembly accessions onto taxon records in a knowledge base")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the sync batch")]
    Run(RunArgs),
    #[command(about = "Validate the input report without touching the remote store")]
    Check(CheckArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    audit_log: Option<PathBuf>,

    #[arg(long)]
    strategy: Option<ResolutionStrategy>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    fast_run: bool,

    #[arg(long)]
    check_references: bool,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    input: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(sync) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(sync));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::MissingConfig
        | SyncError::ConfigRead(_)
        | SyncError::ConfigParse(_)
        | SyncError::ConfigValue(_)
        | SyncError::ReportRead(_)
        | SyncError::ReportRow { .. } => 2,
        SyncError::KbHttp(_)
        | SyncError::KbStatus { .. }
        | SyncError::Auth(_)
        | SyncError::IndexBuild(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_sync(args),
        Commands::Check(args) => run_check(args),
    }
}

fn run_sync(args: RunArgs) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    let input = input_path(&config, args.input.as_ref())?;

    let rows = read_report(&input, &config.columns).into_diagnostic()?;
    let (records, stats) = SourceRecordLoader::load(&rows, &config.status_filter);
    tracing::info!(
        total = stats.total_rows,
        loaded = stats.loaded,
        ambiguous = stats.ambiguous_keys,
        "report loaded"
    );

    let kb = KbHttpClient::new(&config.kb_base_url).into_diagnostic()?;
    let app = SyncApp::new(&kb, &config);
    let options = RunOptions {
        dry_run: args.dry_run,
        fast_run: args.fast_run,
        check_references: args.check_references,
    };
    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    // First Ctrl-C requests a stop between records; the audit log is flushed
    // before exit.
    let _ = ctrlc::set_handler(move || handler_flag.cancel());

    let summary = match args.audit_log {
        Some(path) => {
            let mut audit = AuditLog::open(&path).into_diagnostic()?;
            app.run(&records, options, &mut audit, &cancel)
                .into_diagnostic()?
        }
        None => {
            let mut audit = AuditLog::new(std::io::stderr());
            app.run(&records, options, &mut audit, &cancel)
                .into_diagnostic()?
        }
    };

    JsonOutput::print_summary(&summary).into_diagnostic()?;
    Ok(())
}

fn run_check(args: CheckArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    let input = input_path(&config, args.input.as_ref())?;

    let rows = read_report(&input, &config.columns).into_diagnostic()?;
    let (_, stats) = SourceRecordLoader::load(&rows, &config.status_filter);
    JsonOutput::print_check(&stats).into_diagnostic()?;
    Ok(())
}

fn input_path(config: &ResolvedConfig, cli_input: Option<&PathBuf>) -> miette::Result<PathBuf> {
    cli_input
        .cloned()
        .or_else(|| config.input.clone())
        .ok_or_else(|| miette::Report::msg("no input report given (use --input or set it in config)"))
}
