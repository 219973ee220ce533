//! cubam CLI — fit annotation models, generate synthetic label sets and run
//! the majority-vote baseline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use cubam::synthetic::{
    error_rates, generate_data, majority_vote, BiasGenerator, ErrorRates, LabelGenerator,
    SignalGenerator, SyntheticData,
};
use cubam::uncertainty::{estimate_uncertainty, Uncertainty};
use cubam::{
    AnnotationModel, BiasModel, BiasModelParam, FitReport, InitFrom1dConfig, LabelDataset,
    MajorityModel, MajorityModelParam, ModelVariant, OptimizeConfig, SignalModel,
    SignalModelParam, UncertaintyConfig,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "cubam")]
#[command(about = "Aggregate noisy binary crowd annotations (signal, bias and majority models)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a model to a label file.
    Fit(CliFitArgs),

    /// Generate a synthetic label file.
    Synth(CliSynthArgs),

    /// Majority vote with random tie-breaking.
    Majority(CliMajorityArgs),
}

#[derive(Debug, Clone, Args)]
struct CliFitArgs {
    /// Model variant (signal-1d, signal-nd, bias, majority or a class name).
    #[arg(long)]
    model: ModelVariant,

    /// Path to the label file.
    #[arg(long)]
    data: PathBuf,

    /// JSON fit configuration; missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the number of outer iterations.
    #[arg(long)]
    iters: Option<usize>,

    /// Seed of the random generator.
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Estimate posterior uncertainty after fitting (signal-1d only).
    #[arg(long)]
    uncertainty: bool,

    /// Ground-truth JSON (as written by `synth --truth`) to score the fit against.
    #[arg(long)]
    truth: Option<PathBuf>,

    /// Path to write the fit result (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliSynthArgs {
    /// Generative model (signal-1d, signal-nd or bias).
    #[arg(long)]
    model: ModelVariant,

    /// Number of images.
    #[arg(long)]
    images: usize,

    /// Number of workers; every worker labels every image.
    #[arg(long)]
    workers: usize,

    /// Trait dimension of signal-nd.
    #[arg(long, default_value = "2")]
    dim: usize,

    /// Seed of the random generator.
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Path to write the label file.
    #[arg(long)]
    out: PathBuf,

    /// Path to write generating parameters and ground truth (JSON).
    #[arg(long)]
    truth: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliMajorityArgs {
    /// Path to the label file.
    #[arg(long)]
    data: PathBuf,

    /// Seed of the tie-breaking noise.
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Ground-truth JSON to score the vote against.
    #[arg(long)]
    truth: Option<PathBuf>,
}

// ── Configuration ──────────────────────────────────────────────────────────

/// Everything `fit` can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct FitConfig {
    optimize: OptimizeConfig,
    /// Signal hyper-parameters; the variant's defaults when absent.
    signal: Option<SignalModelParam>,
    bias: BiasModelParam,
    majority: MajorityModelParam,
    /// Initialize a 2-D signal model from a 1-D fit before fitting it.
    init_from_1d: Option<InitFrom1dConfig>,
    uncertainty: UncertaintyConfig,
}

impl FitConfig {
    fn load(path: Option<&Path>, variant: ModelVariant) -> CliResult<Self> {
        match path {
            Some(p) => Self::parse(&std::fs::read_to_string(p)?, variant),
            None => Ok(Self::default()),
        }
    }

    /// Parse a JSON config for `variant`. A `signal` block without `dim`
    /// takes the variant's default dimension.
    fn parse(text: &str, variant: ModelVariant) -> CliResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let dim_given = value.pointer("/signal/dim").is_some();
        let mut config: Self = serde_json::from_value(value)?;
        if let Some(signal) = config.signal.as_mut() {
            if !dim_given && variant == ModelVariant::SignalNd {
                signal.dim = SignalModelParam::default_nd().dim;
            }
        }
        Ok(config)
    }
}

/// Ground truth as stored by `synth --truth`; other fields are ignored.
#[derive(Debug, Deserialize)]
struct TruthFile {
    truth: Vec<bool>,
}

fn load_truth(path: &Path) -> CliResult<Vec<bool>> {
    let text = std::fs::read_to_string(path)?;
    let file: TruthFile = serde_json::from_str(&text)?;
    Ok(file.truth)
}

#[derive(Debug, Serialize)]
struct FitOutput {
    model: ModelVariant,
    report: FitReport,
    labels: Vec<bool>,
    model_param: Vec<f64>,
    worker_param: Vec<f64>,
    image_param: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uncertainty: Option<Uncertainty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_rates: Option<ErrorRates>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fit(args) => run_fit(&args),
        Commands::Synth(args) => run_synth(&args),
        Commands::Majority(args) => run_majority(&args),
    }
}

// ── fit ────────────────────────────────────────────────────────────────────

fn build_configured_model(
    variant: ModelVariant,
    dataset: Arc<LabelDataset>,
    config: &FitConfig,
) -> CliResult<Box<dyn AnnotationModel>> {
    Ok(match variant {
        ModelVariant::Signal1d | ModelVariant::SignalNd => {
            let prm = config.signal.clone().unwrap_or_else(|| {
                if variant == ModelVariant::SignalNd {
                    SignalModelParam::default_nd()
                } else {
                    SignalModelParam::default()
                }
            });
            Box::new(SignalModel::with_param(variant, dataset, &prm)?)
        }
        ModelVariant::Bias => Box::new(BiasModel::new(dataset, config.bias.clone())?),
        ModelVariant::Majority => Box::new(MajorityModel::new(dataset, config.majority.clone())),
    })
}

fn run_fit(args: &CliFitArgs) -> CliResult<()> {
    let mut config = FitConfig::load(args.config.as_deref(), args.model)?;
    if let Some(n) = args.iters {
        config.optimize.num_iter = n;
    }

    tracing::info!("Loading labels: {}", args.data.display());
    let dataset = Arc::new(LabelDataset::load(&args.data)?);
    tracing::info!(
        images = dataset.num_images(),
        workers = dataset.num_workers(),
        labels = dataset.num_labels(),
        "dataset loaded"
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut model: Box<dyn AnnotationModel> = match &config.init_from_1d {
        Some(init) => {
            let prm = config
                .signal
                .clone()
                .unwrap_or_else(SignalModelParam::default_nd);
            let mut nd = SignalModel::with_param(args.model, Arc::clone(&dataset), &prm)?;
            let base = nd.init_from_1d(init, &config.optimize, &mut rng)?;
            tracing::info!(iterations = base.iterations, "initialized from a 1-D fit");
            Box::new(nd)
        }
        None => build_configured_model(args.model, Arc::clone(&dataset), &config)?,
    };

    let report = cubam::optimize_param(&mut *model, &config.optimize, &mut rng)?;
    tracing::info!(
        iterations = report.iterations,
        reinitializations = report.reinitializations,
        degenerate_image_steps = report.degenerate_image_steps,
        objective = report.objective.unwrap_or(f64::NAN),
        "{} fit complete",
        args.model
    );

    let uncertainty = if args.uncertainty {
        Some(estimate_uncertainty(&*model, &config.uncertainty)?)
    } else {
        None
    };

    let labels = model.image_labels();
    let error_rates = match &args.truth {
        Some(path) => {
            let rates = error_rates(&labels, &load_truth(path)?)?;
            tracing::info!(
                error_rate = rates.error_rate,
                false_alarm_rate = rates.false_alarm_rate,
                miss_rate = rates.miss_rate,
                "scored against ground truth"
            );
            Some(rates)
        }
        None => None,
    };

    let output = FitOutput {
        model: args.model,
        report,
        labels,
        model_param: model.model_param_raw(),
        worker_param: model.worker_param_raw(),
        image_param: model.image_param_raw(),
        uncertainty,
        error_rates,
    };
    let json = serde_json::to_string_pretty(&output)?;
    std::fs::write(&args.out, &json)?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}

// ── synth ──────────────────────────────────────────────────────────────────

fn write_synthetic<G: LabelGenerator>(
    generator: &G,
    args: &CliSynthArgs,
    rng: &mut StdRng,
) -> CliResult<SyntheticData<G::WorkerParam, G::ImageParam>> {
    let data = generate_data(generator, args.images, args.workers, rng)?;
    data.dataset.save(&args.out)?;
    tracing::info!(
        labels = data.dataset.num_labels(),
        "Labels written to {}",
        args.out.display()
    );
    if let Some(path) = &args.truth {
        std::fs::write(path, serde_json::to_string_pretty(&data)?)?;
        tracing::info!("Ground truth written to {}", path.display());
    }
    Ok(data)
}

fn run_synth(args: &CliSynthArgs) -> CliResult<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let positives = match args.model {
        ModelVariant::Signal1d => {
            let data = write_synthetic(&SignalGenerator::new(1), args, &mut rng)?;
            data.truth.iter().filter(|&&t| t).count()
        }
        ModelVariant::SignalNd => {
            let data = write_synthetic(&SignalGenerator::new(args.dim), args, &mut rng)?;
            data.truth.iter().filter(|&&t| t).count()
        }
        ModelVariant::Bias => {
            let data = write_synthetic(&BiasGenerator::default(), args, &mut rng)?;
            data.truth.iter().filter(|&&t| t).count()
        }
        ModelVariant::Majority => {
            return Err(format!("no generator for the {} model", args.model).into());
        }
    };
    println!(
        "{} images ({} positive), {} workers",
        args.images, positives, args.workers
    );
    Ok(())
}

// ── majority ───────────────────────────────────────────────────────────────

fn run_majority(args: &CliMajorityArgs) -> CliResult<()> {
    let dataset = LabelDataset::load(&args.data)?;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let labels = majority_vote(&dataset, &mut rng);
    let positives = labels.iter().filter(|&&l| l).count();
    println!("{} of {} images voted positive", positives, labels.len());

    if let Some(path) = &args.truth {
        let rates = error_rates(&labels, &load_truth(path)?)?;
        println!("  error rate:        {:.4}", rates.error_rate);
        println!("  false alarm rate:  {:.4}", rates.false_alarm_rate);
        println!("  miss rate:         {:.4}", rates.miss_rate);
    }
    Ok(())
}
