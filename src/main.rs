use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use streval::artifact::{ArtifactStore, VariantKind};
use streval::config::Config;
use streval::lookup::{Corpus, FsGroundTruth, JsonlProvideCode, ProvideCodeSource};
use streval::pipeline::{
    self, EvaluateSettings, HistorySettings, RepairSettings, StartFrom,
};
use streval::repair::{ChainFixer, CommandFixer, CommandValidator, EndBlockFixer, Fixer};
use streval::report::{output_path, write_report_json};
use streval::score::{SimilarityScorer, Weights};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "streval=info";

#[derive(Parser, Debug)]
#[command(
    name = "streval",
    about = "Repair and score generated Structured Text functions",
    version
)]
struct Cli {
    /// Config file (default: ./streval.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write generation outputs into the current slots
    Ingest(IngestArgs),
    /// Run the validate/fix loop over stored functions
    Repair(RepairArgs),
    /// Derive no-provide variants from the current texts
    Strip(StripArgs),
    /// Score a variant against ground truth
    Evaluate(EvaluateArgs),
    /// Score every recorded version and report trends
    History(HistoryArgs),
    /// Validate stored texts without fixing them
    Check(CheckArgs),
    /// Compare two evaluation summaries
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct Scope {
    /// Store root (overrides paths.output_root)
    #[arg(long)]
    root: Option<PathBuf>,
    /// Restrict to these projects (repeatable; default: all)
    #[arg(long = "project")]
    projects: Vec<String>,
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Store root (overrides paths.output_root)
    #[arg(long)]
    root: Option<PathBuf>,
    /// Restrict to these projects (repeatable; default: every project with results)
    #[arg(long = "project")]
    projects: Vec<String>,
    /// Directory with the per-project generation outputs
    #[arg(long)]
    results_root: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RepairArgs {
    #[command(flatten)]
    scope: Scope,
    #[arg(long)]
    max_attempts: Option<usize>,
    /// Start from the current text even when a pristine backup exists
    #[arg(long)]
    from_current: bool,
    /// Skip no-provide derivation
    #[arg(long)]
    no_strip: bool,
    /// Directory with the generation results.jsonl files
    #[arg(long)]
    results_root: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct StripArgs {
    #[command(flatten)]
    scope: Scope,
    #[arg(long)]
    results_root: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VariantArg {
    Current,
    NoProvide,
    Pristine,
}

impl From<VariantArg> for VariantKind {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Current => VariantKind::Current,
            VariantArg::NoProvide => VariantKind::NoProvide,
            VariantArg::Pristine => VariantKind::Pristine,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CorpusArg {
    GenerationContext,
    ProjectCode,
}

impl From<CorpusArg> for Corpus {
    fn from(arg: CorpusArg) -> Self {
        match arg {
            CorpusArg::GenerationContext => Corpus::GenerationContext,
            CorpusArg::ProjectCode => Corpus::ProjectCode,
        }
    }
}

#[derive(Args, Debug)]
struct ScoringArgs {
    /// Dataset directory holding the ground-truth corpora
    #[arg(long)]
    dataset: Option<PathBuf>,
    #[arg(long, value_enum)]
    corpus: Option<CorpusArg>,
    /// Four comma-separated component weights
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    weights: Option<Vec<f64>>,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    scope: Scope,
    #[command(flatten)]
    scoring: ScoringArgs,
    #[arg(long, value_enum, default_value_t = VariantArg::Current)]
    variant: VariantArg,
    /// Where to write the batch summary
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[command(flatten)]
    scope: Scope,
    #[command(flatten)]
    scoring: ScoringArgs,
    /// Score whole texts instead of implementation parts
    #[arg(long)]
    keep_declarations: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[command(flatten)]
    scope: Scope,
    #[arg(long, value_enum, default_value_t = VariantArg::Current)]
    variant: VariantArg,
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    baseline: PathBuf,
    compare: PathBuf,
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    match cli.command {
        Commands::Ingest(args) => run_ingest(&config, args),
        Commands::Repair(args) => run_repair(&config, args),
        Commands::Strip(args) => run_strip(&config, args),
        Commands::Evaluate(args) => run_evaluate(&config, args),
        Commands::History(args) => run_history(&config, args),
        Commands::Check(args) => run_check(&config, args),
        Commands::Compare(args) => run_compare(args),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn store_for(config: &Config, scope: &Scope) -> ArtifactStore {
    ArtifactStore::new(
        scope
            .root
            .clone()
            .unwrap_or_else(|| config.paths.output_root.clone()),
    )
}

fn selected_projects(store: &ArtifactStore, scope: &Scope) -> Result<Vec<String>> {
    let projects = pipeline::select_projects(store, &scope.projects)
        .with_context(|| format!("Failed to list projects under '{}'", store.root().display()))?;
    if projects.is_empty() {
        return Err(anyhow!(
            "no projects found under '{}'",
            store.root().display()
        ));
    }
    Ok(projects)
}

fn provide_source(config: &Config, results_root: Option<PathBuf>) -> JsonlProvideCode {
    JsonlProvideCode::new(results_root.unwrap_or_else(|| config.paths.results_root().to_path_buf()))
}

fn build_fixer(config: &Config) -> Result<ChainFixer> {
    let mut fixers: Vec<Box<dyn Fixer>> = Vec::new();
    if config.repair.static_fixer {
        fixers.push(Box::new(EndBlockFixer));
    }
    if config.fixer.is_configured() {
        fixers.push(Box::new(CommandFixer::new(
            config.fixer.command.clone(),
            config.fixer.timeout(),
        )));
    }
    if fixers.is_empty() {
        return Err(anyhow!(
            "no fixer available: enable repair.static_fixer or set fixer.command"
        ));
    }
    Ok(ChainFixer::new(fixers))
}

fn build_validator(config: &Config) -> Result<CommandValidator> {
    if !config.validator.is_configured() {
        return Err(anyhow!(
            "no validator configured: set validator.command or STREVAL_VALIDATOR_CMD"
        ));
    }
    Ok(CommandValidator::new(
        config.validator.command.clone(),
        config.validator.timeout(),
    ))
}

fn scoring_weights(config: &Config, args: &ScoringArgs) -> Result<Weights> {
    let weights = match &args.weights {
        Some(values) => {
            let values: [f64; 4] = values.as_slice().try_into().map_err(|_| {
                anyhow!("--weights takes exactly four values, got {}", values.len())
            })?;
            Weights::with_tolerance(values, config.scoring.weight_tolerance)?
        }
        None => config.weights()?,
    };
    Ok(weights)
}

fn ground_truth(config: &Config, args: &ScoringArgs) -> FsGroundTruth {
    let dataset = args
        .dataset
        .clone()
        .unwrap_or_else(|| config.paths.dataset_root.clone());
    let corpus = args.corpus.map(Corpus::from).unwrap_or(config.scoring.corpus);
    FsGroundTruth::new(dataset, corpus)
}

fn run_ingest(config: &Config, args: IngestArgs) -> Result<()> {
    let store = ArtifactStore::new(args.root.unwrap_or_else(|| config.paths.output_root.clone()));
    let results_root = args
        .results_root
        .unwrap_or_else(|| config.paths.results_root().to_path_buf());
    let projects = if args.projects.is_empty() {
        pipeline::list_generation_projects(&results_root).with_context(|| {
            format!("Failed to list generations under '{}'", results_root.display())
        })?
    } else {
        args.projects
    };
    if projects.is_empty() {
        return Err(anyhow!(
            "no generation results found under '{}'",
            results_root.display()
        ));
    }

    let report = pipeline::ingest_projects(&store, &results_root, &projects);
    let path = output_path(args.output.as_ref(), store.root(), "ingest");
    write_report_json(&path, &report)?;
    println!("Written: {}", report.total_written);
    println!("Report: {}", path.display());
    Ok(())
}

fn run_repair(config: &Config, args: RepairArgs) -> Result<()> {
    let store = store_for(config, &args.scope);
    let projects = selected_projects(&store, &args.scope)?;
    let validator = build_validator(config)?;
    let fixer = build_fixer(config)?;
    let provide = provide_source(config, args.results_root);
    let provide_ref: Option<&dyn ProvideCodeSource> = if args.no_strip {
        None
    } else {
        Some(&provide)
    };

    let settings = RepairSettings {
        max_attempts: args.max_attempts.unwrap_or(config.repair.max_attempts),
        retry: config.retry_policy(),
        workers: config.repair.workers,
        start_from: if args.from_current {
            StartFrom::Current
        } else {
            StartFrom::Pristine
        },
    };
    let report =
        pipeline::repair_projects(&store, &validator, &fixer, provide_ref, &projects, &settings);

    let path = output_path(args.output.as_ref(), store.root(), "repair");
    write_report_json(&path, &report)?;
    println!("Artifacts: {}", report.totals.artifacts);
    println!("Validated: {}", report.totals.validated);
    if !report.failed_projects.is_empty() {
        println!("Projects not listed: {}", report.failed_projects.len());
    }
    println!("Report: {}", path.display());
    Ok(())
}

fn run_strip(config: &Config, args: StripArgs) -> Result<()> {
    let store = store_for(config, &args.scope);
    let projects = selected_projects(&store, &args.scope)?;
    let provide = provide_source(config, args.results_root);
    let report = pipeline::strip_projects(&store, &provide, &projects, config.repair.workers);

    let path = output_path(args.output.as_ref(), store.root(), "strip");
    write_report_json(&path, &report)?;
    println!("Derived: {}/{}", report.derived, report.total);
    if !report.failed_projects.is_empty() {
        println!("Projects not listed: {}", report.failed_projects.len());
    }
    println!("Report: {}", path.display());
    Ok(())
}

fn run_evaluate(config: &Config, args: EvaluateArgs) -> Result<()> {
    let store = store_for(config, &args.scope);
    let projects = selected_projects(&store, &args.scope)?;
    let references = ground_truth(config, &args.scoring);
    let settings = EvaluateSettings {
        weights: scoring_weights(config, &args.scoring)?,
        trend_epsilon: config.scoring.trend_epsilon,
        variant: args.variant.into(),
        corpus: args.scoring.corpus.map(Corpus::from).unwrap_or(config.scoring.corpus),
        workers: config.scoring.workers,
    };
    let scorer = SimilarityScorer::default();

    let (reports, summary) =
        pipeline::evaluate_projects(&store, &references, &scorer, &projects, &settings);
    for report in &reports {
        let path = output_path(
            None,
            store.root(),
            &format!("evaluation-{}", report.project_name),
        );
        write_report_json(&path, report)?;
    }
    let path = output_path(args.output.as_ref(), store.root(), "evaluation-summary");
    write_report_json(&path, &summary)?;

    println!("Projects: {}", summary.success_count);
    println!("Cases: {}", summary.overall_statistics.total_files);
    if let Some(averages) = summary.overall_statistics.average_scores {
        println!("CodeBLEU: {:.4}", averages.codebleu);
    }
    println!("Report: {}", path.display());
    Ok(())
}

fn run_history(config: &Config, args: HistoryArgs) -> Result<()> {
    let store = store_for(config, &args.scope);
    let projects = selected_projects(&store, &args.scope)?;
    let references = ground_truth(config, &args.scoring);
    let settings = HistorySettings {
        weights: scoring_weights(config, &args.scoring)?,
        trend_epsilon: config.scoring.trend_epsilon,
        strip_declarations: config.scoring.strip_declarations_in_history && !args.keep_declarations,
        workers: config.scoring.workers,
    };
    let scorer = SimilarityScorer::default();

    let (reports, summary) =
        pipeline::evaluate_histories(&store, &references, &scorer, &projects, &settings);
    for report in &reports {
        let path = output_path(
            None,
            store.root(),
            &format!("history-{}", report.project_name),
        );
        write_report_json(&path, report)?;
        println!(
            "{}: {} functions, {} improved, {} regressed -> {}",
            report.project_name,
            report.functions.len(),
            report.trend_counts.improvement,
            report.trend_counts.regression,
            path.display()
        );
    }
    let path = output_path(None, store.root(), "history-summary");
    write_report_json(&path, &summary)?;
    if !summary.failed_projects.is_empty() {
        println!("Projects not evaluated: {}", summary.failed_projects.len());
    }
    println!("Summary: {}", path.display());
    Ok(())
}

fn run_check(config: &Config, args: CheckArgs) -> Result<()> {
    let store = store_for(config, &args.scope);
    let projects = selected_projects(&store, &args.scope)?;
    let validator = build_validator(config)?;
    let report = pipeline::check_compile_rate(
        &store,
        &validator,
        &config.retry_policy(),
        &projects,
        args.variant.into(),
        config.repair.workers,
    );

    let path = output_path(args.output.as_ref(), store.root(), "compile-rate");
    write_report_json(&path, &report)?;
    println!("Passed: {}/{}", report.total_passed_files, report.total_files);
    if !report.failed_projects.is_empty() {
        println!("Projects not listed: {}", report.failed_projects.len());
    }
    println!("Report: {}", path.display());
    Ok(())
}

fn run_compare(args: CompareArgs) -> Result<()> {
    let report = pipeline::compare_summaries(&args.baseline, &args.compare)?;
    let root = args
        .compare
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    let path = output_path(args.output.as_ref(), &root, "compare");
    write_report_json(&path, &report)?;
    println!("Report: {}", path.display());
    Ok(())
}
