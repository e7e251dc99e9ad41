use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use roster_enricher::{
    source_for_path, survey_work, BaselineStages, BatchRunner, CsvNameSource, EntitySource, HttpStageFactory,
    NameListSource, OutcomeStatus, ResultStore, RetryScheduler, RunConfig, StageConfig, StageFactory,
    TwoStagePipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roster-enricher", version, about = "Resumable research + classification of a list of names")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every name that has no row in the output file yet
    Run(RunArgs),
    /// Show how much of the list is already recorded
    Status(SourceArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// `.csv` files are read as tables, anything else as a name list
    Auto,
    List,
    Csv,
}

#[derive(Args)]
struct SourceArgs {
    /// Names to process: a text file (one per line) or a CSV table
    #[arg(long, env = "ENRICHER_INPUT")]
    input: PathBuf,

    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    format: InputFormat,

    /// Column holding the names when the input is a CSV table
    #[arg(long, default_value = CsvNameSource::DEFAULT_COLUMN)]
    column: String,

    #[arg(long, env = "ENRICHER_OUTPUT", default_value = "enriched_results.csv")]
    output: PathBuf,
}

impl SourceArgs {
    fn entity_source(&self) -> Box<dyn EntitySource> {
        match self.format {
            InputFormat::Auto => source_for_path(&self.input, &self.column),
            InputFormat::List => Box::new(NameListSource::new(&self.input)),
            InputFormat::Csv => Box::new(CsvNameSource::new(&self.input).with_column(&self.column)),
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Seconds to wait after a rate-limit response before retrying the same name [default: 60]
    #[arg(long, env = "ENRICHER_BACKOFF_SECS")]
    backoff_secs: Option<u64>,

    /// Seconds to wait between names [default: 5]
    #[arg(long, env = "ENRICHER_PACING_SECS")]
    pacing_secs: Option<u64>,

    /// Stop after this many names; the rest are picked up by the next run
    #[arg(long, env = "ENRICHER_MAX_ENTITIES")]
    max_entities: Option<usize>,

    #[arg(long, env = "ENRICHER_MODEL", default_value = StageConfig::DEFAULT_MODEL)]
    model: String,

    /// Who the names are, used to tell namesakes apart
    #[arg(long, env = "ENRICHER_SUBJECT", default_value = StageConfig::DEFAULT_SUBJECT)]
    subject: String,

    /// Use the offline baseline stages instead of the search and chat APIs
    #[arg(long)]
    offline: bool,

    /// Simulated latency of each offline stage, in milliseconds
    #[arg(long, default_value_t = 0)]
    offline_delay_ms: u64,
}

impl RunArgs {
    fn run_config(&self) -> RunConfig {
        let defaults = RunConfig::default();
        RunConfig {
            backoff_interval: self
                .backoff_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_interval),
            pacing_interval: self
                .pacing_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.pacing_interval),
            max_entities: self.max_entities.or(defaults.max_entities),
        }
    }

    fn stage_factory(&self) -> Result<Arc<dyn StageFactory>> {
        if self.offline {
            let delay = Duration::from_millis(self.offline_delay_ms);
            return Ok(Arc::new(BaselineStages::new().with_delay(delay)));
        }
        let config = StageConfig::from_env()
            .context("API credentials are required unless --offline is given")?
            .with_model(&self.model)
            .with_subject(&self.subject);
        Ok(Arc::new(HttpStageFactory::new(config)?))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Status(args) => status(args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.run_config();
    let pipeline = TwoStagePipeline::new(args.stage_factory()?);
    let scheduler = RetryScheduler::fixed(config.backoff_interval, config.pacing_interval);
    let store = ResultStore::new(&args.source.output);

    info!(
        input = %args.source.input.display(),
        output = %store.path().display(),
        backoff_secs = config.backoff_interval.as_secs(),
        pacing_secs = config.pacing_interval.as_secs(),
        "Starting roster enricher"
    );

    let mut runner = BatchRunner::new(args.source.entity_source(), store, pipeline, scheduler)
        .with_max_entities(config.max_entities);
    let report = runner.run().await.context("run aborted")?;

    let elapsed = report.finished_at - report.started_at;
    info!(
        run_id = %report.run_id,
        source_total = report.source_total,
        already_recorded = report.already_recorded,
        attempted = report.attempted,
        succeeded = report.succeeded,
        parse_failures = report.parse_failures,
        operation_errors = report.operation_errors,
        deferred = report.deferred,
        elapsed_secs = elapsed.num_seconds(),
        "Done"
    );
    Ok(())
}

fn status(args: SourceArgs) -> Result<()> {
    let store = ResultStore::new(&args.output);
    let plan = survey_work(&args.entity_source(), &store).context("could not compute work set")?;

    println!("Source entities:   {}", plan.source_total);
    println!("Already recorded:  {}", plan.already_recorded());
    println!("Remaining:         {}", plan.pending.len());
    println!("Ledger rows by status:");
    for status in [OutcomeStatus::Success, OutcomeStatus::ParseFailure, OutcomeStatus::OperationError] {
        let count = plan.ledger.status_counts().get(&status).copied().unwrap_or(0);
        println!("  {:<16} {}", status.to_string(), count);
    }
    if plan.ledger.skipped_rows() > 0 {
        println!("Skipped rows:      {}", plan.ledger.skipped_rows());
    }
    Ok(())
}
