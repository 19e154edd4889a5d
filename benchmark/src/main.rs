mod console;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use engine_bench::{
    BenchConfig, BenchError, Benchmark, ExplainMode, RunOverrides, report_writer, row_counts_match,
};
use tokio_util::sync::CancellationToken;

/// Exit code for configuration failures and runs where no engine was reachable
const EXIT_SETUP_FAILURE: u8 = 2;

#[derive(Parser)]
#[command(name = "engine-bench")]
#[command(about = "Benchmark analytical queries across ClickHouse, CedarDB and PostgreSQL")]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the benchmark and write the report
    Run(RunArgs),
    /// Validate the configuration and query coverage without connecting
    Check(Selection),
    /// Compare the row count of a table across engines
    RowCounts {
        #[command(flatten)]
        selection: Selection,

        /// Table to count, optionally schema-qualified
        #[arg(short, long)]
        table: String,
    },
}

#[derive(Args)]
struct Selection {
    /// Path to the benchmark configuration (TOML)
    #[arg(short, long, default_value = "bench.toml")]
    config: PathBuf,

    /// Comma-separated engine names (default: all)
    #[arg(long, value_delimiter = ',')]
    engines: Vec<String>,

    /// Comma-separated query ids (default: all)
    #[arg(long, value_delimiter = ',')]
    queries: Vec<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    selection: Selection,

    /// Untimed executions before the timed one
    #[arg(long)]
    warmup: Option<usize>,

    /// Per-query timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Tolerance band for approximate comparisons, in percent
    #[arg(long)]
    tolerance: Option<f64>,

    /// Output directory for the report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run all engines concurrently for each query
    #[arg(long)]
    parallel: bool,

    /// When to capture EXPLAIN plans
    #[arg(long, value_enum)]
    explain: Option<ExplainArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExplainArg {
    Off,
    Before,
    After,
}

impl From<ExplainArg> for ExplainMode {
    fn from(arg: ExplainArg) -> Self {
        match arg {
            ExplainArg::Off => ExplainMode::Off,
            ExplainArg::Before => ExplainMode::Before,
            ExplainArg::After => ExplainMode::After,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Check(selection) => check(selection),
        Command::RowCounts { selection, table } => row_counts(selection, &table).await,
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let configuration = e
                .downcast_ref::<BenchError>()
                .is_some_and(BenchError::is_configuration);
            if configuration {
                ExitCode::from(EXIT_SETUP_FAILURE)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn load(selection: &Selection, overrides: &RunOverrides) -> Result<(BenchConfig, Benchmark)> {
    let mut config = BenchConfig::load(&selection.config)
        .with_context(|| format!("Failed to load configuration '{}'", selection.config.display()))?;
    config.apply(overrides);
    config.validate()?;

    let (benchmark, warnings) =
        Benchmark::from_config(&config, &selection.engines, &selection.queries)?;
    for warning in &warnings {
        tracing::debug!(query = %warning.query, engine = %warning.engine, "no variant");
    }
    Ok((config, benchmark))
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let overrides = RunOverrides {
        warmup_runs: args.warmup,
        timeout_secs: args.timeout,
        tolerance_pct: args.tolerance,
        output: args.output,
        explain: args.explain.map(ExplainMode::from),
        parallel: args.parallel,
    };
    let (config, benchmark) = load(&args.selection, &overrides)?;

    console::print_banner();
    console::print_plan(&benchmark);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; finishing the current run");
            on_signal.cancel();
        }
    });

    let report = benchmark.execute(&cancel).await;
    console::print_report(&report);

    let files = report_writer::write(&report, &config.run.output).context("Failed to write report")?;
    console::print_files(&files);

    if report.connectivity_prevented_all_runs() {
        eprintln!("Error: no engine could be reached");
        return Ok(ExitCode::from(EXIT_SETUP_FAILURE));
    }
    Ok(ExitCode::SUCCESS)
}

fn check(selection: Selection) -> Result<ExitCode> {
    let (_, benchmark) = load(&selection, &RunOverrides::default())?;
    console::print_plan(&benchmark);
    println!(
        "Configuration OK: {} engines, {} queries",
        benchmark.engines().len(),
        benchmark.query_ids().len()
    );
    Ok(ExitCode::SUCCESS)
}

async fn row_counts(selection: Selection, table: &str) -> Result<ExitCode> {
    let (_, benchmark) = load(&selection, &RunOverrides::default())?;
    let counts = benchmark.row_counts(table).await;
    console::print_row_counts(table, &counts);

    if row_counts_match(&counts) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
