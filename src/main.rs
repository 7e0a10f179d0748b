use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use social_eval::eval::{self, EvalSettings, EvaluationDriver, Report, Summary};
use social_eval::llm::{self, BackendConfig};
use social_eval::prompt::Lang;
use social_eval::stats::StatsAggregator;
use social_eval::taxonomy::SkillTaxonomy;

/// Social competence evaluation for chat models.
///
/// Two evaluations are available:
///
///   gae  Goal achievement. The model steers a branching story and is scored
///        on how often it reaches the protagonist's goal.
///
///   iae  Interpersonal abilities. The model answers multiple-choice skill
///        questions about a dialogue.
///
/// Logging: set RUST_LOG=debug to see prompts and raw model output.
#[derive(Parser)]
#[command(name = "social-eval")]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Goal achievement over branching stories
    Gae(GaeArgs),
    /// Interpersonal ability skill quiz
    Iae(IaeArgs),
}

#[derive(Args)]
struct ModelArgs {
    /// Model name for the chat-completions API, or a path to a .gguf file
    #[arg(long)]
    model: String,

    /// Corpus file or directory
    #[arg(long = "data_path", visible_alias = "data-path")]
    data_path: PathBuf,

    /// Write a JSON report to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Attempts per model call before giving up on it
    #[arg(long, default_value_t = llm::DEFAULT_MAX_ATTEMPTS)]
    max_retries: u32,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = llm::remote::DEFAULT_API_BASE)]
    api_base: String,

    /// API key for the chat-completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    temperature: f32,

    /// HTTP timeout per request, in seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Layers to offload to GPU (local models only)
    #[arg(long, default_value_t = 0)]
    gpu_layers: u32,

    /// Context window in tokens (local models only)
    #[arg(long, default_value_t = 8092)]
    ctx_size: u32,

    /// Maximum tokens generated per answer (local models only)
    #[arg(long, default_value_t = 1024)]
    max_tokens: usize,
}

impl ModelArgs {
    fn backend(&self) -> BackendConfig {
        BackendConfig {
            model: self.model.clone(),
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
            temperature: self.temperature,
            timeout_secs: self.timeout_secs,
            n_gpu_layers: self.gpu_layers,
            n_ctx: self.ctx_size,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Args)]
struct GaeArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Story language
    #[arg(long, value_enum, default_value = "cn")]
    lang: Lang,

    /// Report only this story category
    #[arg(long)]
    category: Option<String>,

    /// Episodes per story
    #[arg(long, default_value_t = eval::DEFAULT_EPISODES)]
    episodes: usize,
}

#[derive(Args)]
struct IaeArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Only evaluate this language (default: every standard file found)
    #[arg(long, value_enum)]
    lang: Option<Lang>,

    /// Report only this skill or skill category
    #[arg(long, visible_alias = "category")]
    ability: Option<String>,
}

fn print_summary(title: &str, summary: &Summary, filter: Option<&str>, average_from: usize) {
    println!("\n=== {title} ===");
    match summary {
        Summary::Breakdown(all) => {
            for (key, pct) in all {
                println!("{key}: {pct:.2}%");
            }
            if !all.is_empty() && all.len() >= average_from {
                let avg = all.values().sum::<f64>() / all.len() as f64;
                println!("\nOverall Average: {avg:.2}%");
            }
        }
        Summary::Single(pct) => println!("{}: {pct:.2}%", filter.unwrap_or("Result")),
    }
}

fn finish(
    args: &ModelArgs,
    language: Option<Lang>,
    filter: Option<&str>,
    results: Summary,
    stats: &StatsAggregator,
) -> Result<()> {
    let Some(output) = &args.output else {
        return Ok(());
    };

    let report = Report {
        model: args.model.clone(),
        data_path: args.data_path.display().to_string(),
        language,
        filter: filter.map(str::to_string),
        results,
        counts: stats.tallies().clone(),
    };
    report
        .write_to(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("\nResults saved to {}", output.display());
    Ok(())
}

fn run_gae(args: GaeArgs) -> Result<()> {
    println!("Running Goal Achievement Evaluation...");
    println!("  Model    : {}", args.model.model);
    println!("  Data path: {}", args.model.data_path.display());
    println!("  Language : {}", args.lang);
    if let Some(category) = &args.category {
        println!("  Category : {category}");
    }

    let docs = eval::load_stories(&args.model.data_path, args.lang)
        .context("failed to load story corpus")?;
    let mut maker = llm::connect(&args.model.backend()).context("failed to set up model")?;

    let settings = EvalSettings {
        episodes: args.episodes,
        max_attempts: args.model.max_retries,
    };
    let stats = EvaluationDriver::new(maker.as_mut(), settings).goal_achievement(
        &docs,
        args.lang,
        &mut rand::rng(),
    );

    let filter = args.category.as_deref();
    let results = eval::select_category(&stats, filter);
    print_summary("Goal Achievement Results", &results, filter, 2);
    finish(&args.model, Some(args.lang), filter, results, &stats)
}

fn run_iae(args: IaeArgs) -> Result<()> {
    println!("Running Interpersonal Ability Evaluation...");
    println!("  Model    : {}", args.model.model);
    println!("  Data path: {}", args.model.data_path.display());
    if let Some(ability) = &args.ability {
        println!("  Ability  : {ability}");
    }

    let taxonomy = SkillTaxonomy::standard();
    let items = eval::load_quiz(&args.model.data_path, args.lang)
        .context("failed to load quiz corpus")?;
    let mut maker = llm::connect(&args.model.backend()).context("failed to set up model")?;

    let settings = EvalSettings {
        max_attempts: args.model.max_retries,
        ..EvalSettings::default()
    };
    let stats =
        EvaluationDriver::new(maker.as_mut(), settings).interpersonal(&items, &mut rand::rng());

    let filter = args.ability.as_deref();
    let results = eval::select_ability(&stats, &taxonomy, filter);
    print_summary("Evaluation Results", &results, filter, 1);
    finish(&args.model, args.lang, filter, results, &stats)
}

fn main() -> Result<()> {
    // Control verbosity with RUST_LOG:
    //   RUST_LOG=info   progress, transitions and contained failures
    //   RUST_LOG=debug  + prompts, raw model output and parsed decisions
    //   RUST_LOG=trace  + fully rendered chat templates (local models)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gae(args) => run_gae(args)?,
        Commands::Iae(args) => run_iae(args)?,
    }

    info!("Evaluation finished");
    Ok(())
}
