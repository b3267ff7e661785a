use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use camino::Utf8Path;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use houndsleuth::app::{App, RunOptions, RunOutcome, RunReport};
use houndsleuth::bucket::{LocalBucket, ObjectStore};
use houndsleuth::config::{BucketConfig, ConfigLoader, ResolvedConfig};
use houndsleuth::error::SleuthError;
use houndsleuth::ledger::{FileLedger, Ledger};
use houndsleuth::output::{JsonOutput, OutputMode};
use houndsleuth::s3::HttpBucket;

#[derive(Parser)]
#[command(name = "houndsleuth")]
#[command(about = "Dispatch completed bucket uploads to their analysis handlers, at most once each")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Check the bucket once and dispatch new jobs")]
    Run(RunArgs),
    #[command(about = "List job folders already claimed")]
    Ledger(CommonArgs),
    #[command(about = "Show the prefix to handler routing table")]
    Routes(CommonArgs),
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<SleuthError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SleuthError) -> u8 {
    match error {
        SleuthError::MissingConfig
        | SleuthError::ConfigRead(_)
        | SleuthError::ConfigParse(_)
        | SleuthError::InvalidConfig(_) => 2,
        SleuthError::Credentials(_)
        | SleuthError::BucketHttp(_)
        | SleuthError::BucketStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let config = ConfigLoader::resolve(args.common.config.as_deref())?;
            init_tracing(config.log_file.as_deref())?;
            let mode = output_mode(args.common.json);
            let options = RunOptions {
                dry_run: args.dry_run,
            };
            let ledger = FileLedger::new(config.ledger_path.clone());
            match &config.bucket {
                BucketConfig::Http { url, token_env } => {
                    let store = HttpBucket::new(url, token_env.as_deref())
                        .inspect_err(|err| tracing::error!(error = %err, "run aborted"))?;
                    run_once(App::new(store, ledger, &config), options, mode)
                }
                BucketConfig::Local { root } => {
                    let store = LocalBucket::new(root.clone());
                    run_once(App::new(store, ledger, &config), options, mode)
                }
            }
        }
        Commands::Ledger(args) => {
            let config = ConfigLoader::resolve(args.config.as_deref())?;
            init_tracing(None)?;
            let ledger = FileLedger::new(config.ledger_path.clone());
            let mut claimed = ledger.load_claimed()?.into_iter().collect::<Vec<_>>();
            claimed.sort();
            match output_mode(args.json) {
                OutputMode::Json => JsonOutput::print_ledger(&claimed).into_diagnostic(),
                OutputMode::Text => {
                    for id in &claimed {
                        println!("{id}");
                    }
                    Ok(())
                }
            }
        }
        Commands::Routes(args) => {
            let config = ConfigLoader::resolve(args.config.as_deref())?;
            match output_mode(args.json) {
                OutputMode::Json => {
                    JsonOutput::print_routes(config.routing.routes()).into_diagnostic()
                }
                OutputMode::Text => {
                    print_routes(&config);
                    Ok(())
                }
            }
        }
    }
}

fn output_mode(json: bool) -> OutputMode {
    if json {
        OutputMode::Json
    } else {
        OutputMode::Text
    }
}

fn init_tracing(log_file: Option<&Utf8Path>) -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (writer, ansi) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_str().is_empty() {
                    std::fs::create_dir_all(parent.as_std_path()).into_diagnostic()?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .into_diagnostic()?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(writer)
        .init();
    Ok(())
}

fn run_once<S: ObjectStore, L: Ledger>(
    mut app: App<S, L>,
    options: RunOptions,
    mode: OutputMode,
) -> miette::Result<()> {
    let outcome = app.run(options)?;
    match mode {
        OutputMode::Json => JsonOutput::print_run(&outcome).into_diagnostic()?,
        OutputMode::Text => match &outcome {
            RunOutcome::Skipped { lock } => println!("skipped: lock {lock} is held by another run"),
            RunOutcome::Completed(report) => print_run_summary(report),
        },
    }
    Ok(())
}

fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    let verb = if report.dry_run { "ready" } else { "discovered" };
    println!("{cyan}houndsleuth: {} {verb}{reset}", report.discovered.len());
    for failure in &report.prefix_failures {
        println!(
            "{yellow}  prefix {} skipped: {}{reset}",
            failure.prefix, failure.message
        );
    }
    if report.dry_run {
        for job in &report.discovered {
            println!("{cyan}  {} ({}){reset}", job.id, job.prefix);
        }
        return;
    }
    for job in &report.jobs {
        let color = if job.outcome.is_success() { green } else { red };
        let handler = job
            .handler
            .as_ref()
            .map(|path| path.as_str())
            .unwrap_or("-");
        println!("{color}  {} -> {handler}: {:?}{reset}", job.id, job.outcome);
        if !job.stage.is_complete() {
            println!(
                "{yellow}    staging incomplete: {} of {} objects failed{reset}",
                job.stage.failed,
                job.stage.failed + job.stage.downloaded
            );
        }
    }
    println!(
        "{green}succeeded: {}{reset}  {red}failed: {}{reset}",
        report.succeeded(),
        report.failed()
    );
}

fn print_routes(config: &ResolvedConfig) {
    for route in config.routing.routes() {
        println!("{}\t{}", route.prefix, route.handler);
    }
}
