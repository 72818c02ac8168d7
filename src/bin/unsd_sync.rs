use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use unsd_sync::app::{self, App, PipelineOptions, Query};
use unsd_sync::config::{ConfigLoader, ResolvedConfig};
use unsd_sync::country::RegexCountryNormalizer;
use unsd_sync::docstore::DocumentStore;
use unsd_sync::domain::{Dataset, FIELD_REF_AREA, RecordFilter};
use unsd_sync::error::{FailureClass, SyncError};
use unsd_sync::mongo::MongoDocumentStore;
use unsd_sync::output::JsonOutput;
use unsd_sync::resolver::CodeResolver;
use unsd_sync::scheduler::{Scheduler, SchedulerOptions, TickOutcome, stop_on_termination};
use unsd_sync::store::SnapshotStore;
use unsd_sync::unsd::UnsdHttpClient;

#[derive(Parser)]
#[command(name = "unsd-sync")]
#[command(about = "Mirror UN energy balance and greenhouse-gas data into MongoDB")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Tick forever at the configured interval (default)")]
    Run,
    #[command(about = "Run a single tick and print its outcome")]
    Tick(TickArgs),
    #[command(about = "Show snapshot ages and collection sizes")]
    Status,
    #[command(about = "Read from the synchronized collections")]
    Query(QueryArgs),
}

#[derive(Args)]
struct TickArgs {
    /// Refresh even when the snapshots are fresh.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct QueryArgs {
    #[command(subcommand)]
    command: QueryCommand,
}

#[derive(Subcommand)]
enum QueryCommand {
    #[command(about = "Documents matching the filter")]
    Find(FilterArgs),
    #[command(about = "Average value per area for the filter")]
    Average(FilterArgs),
    #[command(about = "Distinct values of one field")]
    Distinct(DistinctArgs),
}

#[derive(Args)]
struct FilterArgs {
    #[arg(long, default_value = "ebal")]
    dataset: Dataset,
    #[arg(long)]
    ref_area: Option<String>,
    #[arg(long)]
    commodity: Option<String>,
    #[arg(long)]
    transaction: Option<String>,
    #[arg(long)]
    time_period: Option<i32>,
    #[arg(long)]
    indicator: Option<String>,
}

impl FilterArgs {
    fn filter(&self) -> RecordFilter {
        RecordFilter {
            ref_area: self.ref_area.clone(),
            commodity: self.commodity.clone(),
            transaction: self.transaction.clone(),
            time_period: self.time_period,
            indicator: self.indicator.clone(),
        }
    }
}

#[derive(Args)]
struct DistinctArgs {
    #[arg(long, default_value = "ebal")]
    dataset: Dataset,
    #[arg(long, default_value = FIELD_REF_AREA)]
    field: String,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(sync) = report.downcast_ref::<SyncError>() {
                return ExitCode::from(map_exit_code(sync.class()));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(class: FailureClass) -> u8 {
    match class {
        FailureClass::Config => 2,
        FailureClass::Fetch => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    init_tracing(&config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let scheduler = build_scheduler(&config)?;
            let stop = stop_on_termination()?;
            scheduler.run(&stop);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tick(args) => {
            let scheduler = build_scheduler(&config)?;
            let outcome = scheduler.run_once(args.force);
            JsonOutput::print_tick(&outcome).into_diagnostic()?;
            Ok(match outcome {
                TickOutcome::Failed { class, .. } => ExitCode::from(map_exit_code(class)),
                _ => ExitCode::SUCCESS,
            })
        }
        Commands::Status => {
            let snapshots = SnapshotStore::new(config.data_dir.clone());
            let store = MongoDocumentStore::connect(&config).ok();
            let report = app::status(
                &snapshots,
                store.as_ref().map(|store| store as &dyn DocumentStore),
                std::time::SystemTime::now(),
            );
            JsonOutput::print_status(&report).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Query(args) => {
            let query = match args.command {
                QueryCommand::Find(filter) => Query::Find {
                    dataset: filter.dataset,
                    filter: filter.filter(),
                },
                QueryCommand::Average(filter) => Query::Average {
                    dataset: filter.dataset,
                    filter: filter.filter(),
                },
                QueryCommand::Distinct(args) => Query::Distinct {
                    dataset: args.dataset,
                    field: args.field,
                },
            };
            let store = MongoDocumentStore::connect(&config)?;
            let result = app::run_query(&store, &query)?;
            JsonOutput::print_query(&result).into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

type UnsdApp = App<UnsdHttpClient, UnsdHttpClient, RegexCountryNormalizer, MongoDocumentStore>;

fn build_scheduler(config: &ResolvedConfig) -> miette::Result<Scheduler<UnsdApp>> {
    let snapshots = SnapshotStore::new(config.data_dir.clone());
    snapshots.ensure_root()?;
    let client = UnsdHttpClient::new(config)?;
    let resolver = CodeResolver::new(client.clone(), RegexCountryNormalizer::new()?);
    let store = MongoDocumentStore::connect(config)?;
    let app = App::new(
        snapshots,
        client,
        resolver,
        store,
        PipelineOptions::from_config(config),
    );
    Ok(Scheduler::new(app, SchedulerOptions::from_config(config)))
}

fn init_tracing(config: &ResolvedConfig) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = config.open_log_file()?.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();
    Ok(())
}
