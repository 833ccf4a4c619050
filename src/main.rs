use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use grader::batch::{BatchRunner, LevelRun, LevelSelection};
use grader::config::GraderConfig;
use grader::discovery;
use grader::grading::report::generate_report;
use grader::grading::{self, GradingEngine};
use grader::overrides::OverrideStore;
use grader::runner::PtyRunner;
use grader::suite::TestSuite;

#[derive(Parser, Debug)]
#[command(name = "grader", about = "Grade terminal programs against known-good binaries")]
struct Cli {
    /// Path to the grader TOML configuration
    #[arg(long, env = "GRADER_CONFIG")]
    config: Option<PathBuf>,

    /// Grade every level with the binaries of this one level
    #[arg(long, global = true)]
    binaries_from: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the submissions directory against the test suite
    Check,
    /// Show the verdict of every test of a level
    Overview(OverviewArgs),
    /// Print the capture of one submission on one test.
    /// The binary is run again, so output near the deadline can differ from an earlier overview.
    Show(TestArgs),
    /// Compare one submission with one reference binary on one test.
    /// Both binaries are run again, so output near the deadline can differ from an earlier overview.
    Compare(CompareArgs),
    /// Manually mark a test as ok or not ok
    Mark(MarkArgs),
    /// Append a test input to a level
    AddTest(AddTestArgs),
    /// Grade every level and write the CSV report
    Report,
}

#[derive(Args, Debug)]
struct OverviewArgs {
    #[arg(long)]
    level: String,

    /// Only show this submission
    #[arg(long)]
    submission: Option<String>,
}

#[derive(Args, Debug)]
struct TestArgs {
    #[arg(long)]
    level: String,

    #[arg(long)]
    submission: String,

    /// Zero-based test index
    #[arg(long)]
    test: usize,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[command(flatten)]
    target: TestArgs,

    /// Reference binary name
    #[arg(long)]
    reference: String,
}

#[derive(Args, Debug)]
struct MarkArgs {
    #[command(flatten)]
    target: TestArgs,

    #[arg(long, conflicts_with = "not_ok", required_unless_present = "not_ok")]
    ok: bool,

    #[arg(long)]
    not_ok: bool,
}

#[derive(Args, Debug)]
struct AddTestArgs {
    #[arg(long)]
    level: String,

    /// Test input on one line; a literal `\n` stands for a newline
    input: String,

    /// Do not append a trailing newline
    #[arg(long)]
    no_newline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = GraderConfig::load(cli.config.as_deref())?;

    discovery::preflight(&config).context("Preflight checks failed")?;

    match cli.command {
        Command::Check => {
            info!("Submissions directory and test suite are consistent");
            Ok(())
        }
        Command::Overview(args) => overview(&config, cli.binaries_from.as_deref(), args).await,
        Command::Show(args) => show(&config, cli.binaries_from.as_deref(), args).await,
        Command::Compare(args) => compare(&config, cli.binaries_from.as_deref(), args).await,
        Command::Mark(args) => mark(&config, cli.binaries_from.as_deref(), args),
        Command::AddTest(args) => add_test(&config, args),
        Command::Report => report(&config, cli.binaries_from.as_deref()).await,
    }
}

fn batch_runner(config: &GraderConfig) -> BatchRunner {
    BatchRunner::new(Arc::new(PtyRunner::from_config(config))).with_workers(config.workers)
}

async fn capture_level(
    config: &GraderConfig,
    level: &str,
    selection: &LevelSelection,
) -> Result<LevelRun> {
    let suite = TestSuite::load(&config.tests_file)?;
    let run = batch_runner(config)
        .capture_level(config, &suite, level, selection)
        .await
        .with_context(|| format!("Failed to run level {}", level))?;
    Ok(run)
}

async fn overview(
    config: &GraderConfig,
    binaries_from: Option<&str>,
    args: OverviewArgs,
) -> Result<()> {
    let mut selection = LevelSelection::binaries_from(binaries_from.map(str::to_string));
    if let Some(name) = &args.submission {
        selection = selection.only_submission(name.clone());
    }
    let run = capture_level(config, &args.level, &selection).await?;
    if let Some(name) = &args.submission {
        if run.submission(name).is_none() {
            bail!("No submission {} in {}", name, args.level);
        }
    }

    let store = OverrideStore::open(&config.overrides_file)?;
    let engine = GradingEngine::new(&store);
    for submission in &run.submissions {
        let verdicts = engine.overview(submission, &run.references, &args.level)?;
        let passed = verdicts.iter().filter(|v| v.passed()).count();
        let unknown = verdicts.iter().filter(|v| v.is_unknown()).count();
        println!(
            "{} ({}/{}, {} unknown)",
            submission.name, passed, run.test_count, unknown
        );
        for (i, verdict) in verdicts.iter().enumerate() {
            println!("  test #{}: [{}] {}", i, verdict.source(), verdict);
        }
    }
    Ok(())
}

async fn show(
    config: &GraderConfig,
    binaries_from: Option<&str>,
    args: TestArgs,
) -> Result<()> {
    let selection = LevelSelection::binaries_from(binaries_from.map(str::to_string))
        .only_submission(args.submission.clone())
        .only_reference(args.submission.clone());
    let run = capture_level(config, &args.level, &selection).await?;
    let binary = run
        .submission(&args.submission)
        .or_else(|| run.references.get(&args.submission))
        .with_context(|| format!("No binary {} in {}", args.submission, args.level))?;
    let capture = binary
        .capture(args.test)
        .with_context(|| format!("{} has no test #{}", args.level, args.test))?;

    println!("--- stdout ---\n{}", capture.stdout_lossy());
    println!("--- stderr ---\n{}", capture.stderr_lossy());
    println!("--- timed out: {} ---", capture.timed_out);
    Ok(())
}

async fn compare(
    config: &GraderConfig,
    binaries_from: Option<&str>,
    args: CompareArgs,
) -> Result<()> {
    let target = args.target;
    let selection = LevelSelection::binaries_from(binaries_from.map(str::to_string))
        .only_submission(target.submission.clone())
        .only_reference(args.reference.clone());
    let run = capture_level(config, &target.level, &selection).await?;
    let submission = run
        .submission(&target.submission)
        .with_context(|| format!("No submission {} in {}", target.submission, target.level))?;
    let reference = run
        .references
        .get(&args.reference)
        .with_context(|| format!("No reference binary {} in {}", args.reference, target.level))?;

    let cmp = grading::compare(submission, reference, target.test)?;
    println!(
        "{} vs {} on {} test #{}",
        submission.name, reference.name, target.level, target.test
    );
    println!("  stdout matches: {}", cmp.stdout_matches);
    println!("  stderr matches: {}", cmp.stderr_matches);
    println!(
        "  timed out: {} / {}",
        cmp.submission_timed_out, cmp.reference_timed_out
    );
    println!("  equivalent: {}", cmp.is_match());
    Ok(())
}

fn mark(config: &GraderConfig, binaries_from: Option<&str>, args: MarkArgs) -> Result<()> {
    let target = args.target;
    let suite = TestSuite::load(&config.tests_file)?;
    discovery::validate_target(
        config,
        &suite,
        &target.level,
        binaries_from,
        &target.submission,
        target.test,
    )?;

    let store = OverrideStore::open(&config.overrides_file)?;
    store.set(&target.submission, &target.level, target.test, args.ok)?;
    Ok(())
}

fn add_test(config: &GraderConfig, args: AddTestArgs) -> Result<()> {
    let mut suite = TestSuite::load(&config.tests_file)?;
    let index = suite.add_test(&args.level, &args.input, !args.no_newline)?;
    suite.save(&config.tests_file)?;
    println!("Added {} test #{}", args.level, index);
    Ok(())
}

async fn report(config: &GraderConfig, binaries_from: Option<&str>) -> Result<()> {
    let suite = TestSuite::load(&config.tests_file)?;
    let store = OverrideStore::open(&config.overrides_file)?;
    let report = generate_report(
        config,
        &suite,
        &batch_runner(config),
        &store,
        binaries_from,
    )
    .await?;
    report.write(&config.report_file)?;
    Ok(())
}
