use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use proxy_harvester::{
    extract::{CoordinatorConfig, ExtractionCoordinator, ExtractionRun, ExtractorConfig, ExtractorRegistry},
    proxy::{ProxyCandidate, ProxyParser, ProxyType},
    store::{ProxyStore, SqliteStore},
    validate::{HttpProber, PresetStore, ValidationPool, ValidationResult},
    Config,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Collects proxy candidates from public sources and scores them by live probing
#[derive(Parser)]
#[command(name = "proxy-harvester")]
#[command(about = "Collects proxy candidates from public sources and scores them by live probing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database URL
    #[arg(short, long, default_value = "sqlite://proxies.db")]
    database: String,

    /// Path to a MaxMind country/city database for country lookup
    #[arg(long)]
    mmdb: Option<String>,

    /// TOML file with extra validation presets
    #[arg(long)]
    preset_file: Option<PathBuf>,

    /// Do not write candidates or results to the database
    #[arg(long)]
    no_store: bool,
}

#[derive(Args, Clone)]
struct ExtractArgs {
    /// Sources to run (default: all registered sources)
    #[arg(short, long = "source")]
    sources: Vec<String>,
    /// Sources extracted at once
    #[arg(short = 'n', long, default_value = "8")]
    concurrency: usize,
    /// Budget for the whole run in seconds
    #[arg(long, default_value = "120")]
    deadline: u64,
    /// Maximum candidates per source (0 = unlimited)
    #[arg(long, default_value = "0")]
    limit: usize,
    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,
}

#[derive(Args, Clone)]
struct ValidateArgs {
    /// Validation preset
    #[arg(short, long)]
    preset: Option<String>,
    /// Target URLs probed through each candidate (repeatable)
    #[arg(long = "target")]
    targets: Vec<String>,
    /// Endpoint used to learn our own egress IP
    #[arg(long, default_value = proxy_harvester::validate::DEFAULT_ECHO_URL)]
    echo_url: String,
    /// Skip anonymity detection against the echo endpoint
    #[arg(long)]
    no_echo: bool,
    /// Output file for usable proxies
    #[arg(short = 'u', long)]
    usable: Option<PathBuf>,
    /// Print results as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered sources
    Sources,
    /// Extract candidates from sources
    Extract {
        #[command(flatten)]
        args: ExtractArgs,
        /// Output file for merged candidates
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate candidates from a file or from the database
    Validate {
        /// Input file containing proxies (default: candidates in the database)
        input: Option<PathBuf>,
        /// Proxy type for lines without a scheme
        #[arg(short = 't', long, default_value = "http")]
        proxy_type: String,
        /// Validate at most this many candidates from the database
        #[arg(long)]
        max: Option<u32>,
        #[command(flatten)]
        validate: ValidateArgs,
    },
    /// List validation presets
    Presets,
    /// Extract then validate everything found
    Run {
        #[command(flatten)]
        extract: ExtractArgs,
        #[command(flatten)]
        validate: ValidateArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,proxy_harvester=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::new()
        .with_database_url(cli.database.clone())
        .with_mmdb_path(cli.mmdb.clone())
        .with_preset_file(cli.preset_file.as_ref().map(|p| p.display().to_string()));

    match cli.command {
        Commands::Sources => {
            let registry = ExtractorRegistry::new();
            let extractor_config = ExtractorConfig::default();
            for name in registry.list_available() {
                match registry.create(&name, &extractor_config) {
                    Ok(extractor) => println!("{:<20} {}", name, extractor.kind()),
                    Err(e) => println!("{:<20} unavailable: {}", name, e),
                }
            }
        }
        Commands::Extract { args, output } => {
            let store = open_store(&config, cli.no_store).await?;
            let run = extract(&config, &args).await?;
            let candidates = run.proxy_candidates();

            if let Some(store) = &store {
                store.upsert_candidates(&candidates).await?;
            }

            if let Some(output_path) = output {
                ProxyParser::save_to_file(&candidates, &output_path, true)?;
                println!("Saved {} candidates to {:?}", candidates.len(), output_path);
            } else {
                for candidate in &candidates {
                    println!("{}", candidate);
                }
            }
        }
        Commands::Validate {
            input,
            proxy_type,
            max,
            validate: args,
        } => {
            let store = open_store(&config, cli.no_store).await?;
            let candidates = match input {
                Some(path) => {
                    let ptype: ProxyType = proxy_type.parse().map_err(anyhow::Error::msg)?;
                    let candidates = ProxyParser::parse_file(&path, ptype, "file")?;
                    println!("Loaded {} proxies from {:?}", candidates.len(), path);
                    candidates
                }
                None => {
                    let store = store
                        .as_ref()
                        .context("no input file given and the database is disabled")?;
                    let candidates = store.list_candidates(max).await?;
                    println!("Loaded {} candidates from the database", candidates.len());
                    candidates
                }
            };

            validate(&config, &args, candidates, store.as_ref()).await?;
        }
        Commands::Presets => {
            let presets = config.preset_store().context("failed to load presets")?;
            println!(
                "{:<12} {:>6} {:>6} {:>6} {:>8} {:>6} {:>5} {:>6}",
                "name", "conn", "speed", "anon", "timeout", "conc", "min", "thr"
            );
            for name in presets.list_presets() {
                let p = presets.get_preset(&name)?;
                println!(
                    "{:<12} {:>6.2} {:>6.2} {:>6.2} {:>6}ms {:>6} {:>5} {:>6.1}",
                    name,
                    p.connectivity_weight,
                    p.speed_weight,
                    p.anonymity_weight,
                    p.timeout_ms,
                    p.concurrency,
                    p.min_successful_attempts,
                    p.usability_threshold
                );
            }
        }
        Commands::Run { extract: extract_args, validate: args } => {
            let store = open_store(&config, cli.no_store).await?;
            let run = extract(&config, &extract_args).await?;
            let candidates = run.proxy_candidates();

            if let Some(store) = &store {
                store.upsert_candidates(&candidates).await?;
            }
            validate(&config, &args, candidates, store.as_ref()).await?;
        }
    }

    Ok(())
}

async fn open_store(config: &Config, disabled: bool) -> Result<Option<SqliteStore>> {
    if disabled {
        return Ok(None);
    }
    let store = SqliteStore::connect(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    Ok(Some(store))
}

async fn extract(config: &Config, args: &ExtractArgs) -> Result<ExtractionRun> {
    let coordinator_config = CoordinatorConfig::new()
        .with_concurrency(args.concurrency)
        .with_deadline(Duration::from_secs(args.deadline))
        .with_per_source_limit(args.limit)
        .with_extractor_config(ExtractorConfig::new().with_timeout(Duration::from_secs(args.timeout)));

    let mut coordinator = ExtractionCoordinator::new(Arc::new(ExtractorRegistry::new()), coordinator_config);
    if let Some(geo) = config.geo_locator().context("failed to open MMDB file")? {
        coordinator = coordinator.with_geo_locator(geo);
    }

    let selection = (!args.sources.is_empty()).then_some(args.sources.as_slice());
    let run = coordinator.run_extraction(selection).await?;

    for (source, outcome) in run.per_source_outcome() {
        match &outcome.error {
            Some(error) => eprintln!(
                "{:<20} {:?} {} candidates ({}ms, {} attempts): {}",
                source, outcome.status, outcome.count, outcome.duration_ms, outcome.attempts, error.cause
            ),
            None => println!(
                "{:<20} {:?} {} candidates ({}ms)",
                source, outcome.status, outcome.count, outcome.duration_ms
            ),
        }
    }
    println!("Total unique candidates: {}", run.total_candidates());
    Ok(run)
}

async fn validate(
    config: &Config,
    args: &ValidateArgs,
    candidates: Vec<ProxyCandidate>,
    store: Option<&SqliteStore>,
) -> Result<Vec<ValidationResult>> {
    let config = config
        .clone()
        .with_target_urls(args.targets.clone())
        .with_echo_url((!args.no_echo).then(|| args.echo_url.clone()));
    let preset = args.preset.clone().unwrap_or_else(|| config.default_preset.clone());

    let presets = config.preset_store().context("failed to load presets")?;
    let prober = HttpProber::new(config.echo_url.clone())?;
    let pool = ValidationPool::new(Arc::new(prober), Arc::new(presets), config.target_urls.clone())
        .with_default_preset(config.default_preset.clone());

    let mut results = pool.validate_batch(candidates.clone(), &preset).await?;
    results.sort_by(|a, b| b.overall_score.total_cmp(&a.overall_score));

    if let Some(store) = store {
        let batch_id = store.append_validation_results(&results).await?;
        info!(%batch_id, "stored validation results");
    }

    for result in &results {
        if args.json {
            println!("{}", serde_json::to_string(result)?);
        } else if result.is_usable {
            println!(
                "  {} score {:.1} ({}ms, {})",
                result.candidate,
                result.overall_score,
                result.latency_ms.unwrap_or_default(),
                result
                    .anonymity
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
    }

    let usable: Vec<ProxyCandidate> = candidates
        .into_iter()
        .filter(|c| {
            let key = c.key();
            results.iter().any(|r| r.candidate == key && r.is_usable)
        })
        .collect();
    println!("Results: {} usable, {} not usable", usable.len(), results.len() - usable.len());

    if let Some(path) = &args.usable {
        ProxyParser::save_to_file(&usable, path, true)?;
        println!("Saved {} usable proxies to {:?}", usable.len(), path);
    }

    Ok(results)
}
