//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use schemalib_cache::{ClearScope, SmartCache};
use schemalib_core::{BuildConfig, BuildReport, ProgressReporter, build_library};
use schemalib_corpus::EmitOptions;
use schemalib_fetcher::{EntityFetcher, FetchProgress, combine_raw};
use schemalib_gateway::{CliGateway, Gateway};
use schemalib_shared::{
    AppConfig, CacheConfig, CorpusConfig, FetchConfig, FetchMode, GatewayConfig, StageCounts,
    UsageConfig, init_config, load_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// schemalib: turn a CRM org's schema into a relationship graph and corpus.
#[derive(Parser)]
#[command(
    name = "schemalib",
    version,
    about = "Extract CRM schema metadata and build a token-bounded corpus.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Which corpus views `build` writes.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum EmitFormat {
    Md,
    Jsonl,
    Both,
    None,
}

impl EmitFormat {
    fn options(self) -> Option<EmitOptions> {
        match self {
            Self::Md => Some(EmitOptions {
                markdown: true,
                jsonl: false,
            }),
            Self::Jsonl => Some(EmitOptions {
                markdown: false,
                jsonl: true,
            }),
            Self::Both => Some(EmitOptions::default()),
            Self::None => None,
        }
    }
}

/// Flags shared by `build` and `fetch`.
#[derive(Args, Debug)]
pub(crate) struct FetchArgs {
    /// Output root (defaults to `defaults.output_dir`).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Org alias or username passed as `--target-org`.
    #[arg(short = 'a', long, env = "SCHEMALIB_ACCOUNT")]
    pub account: Option<String>,

    /// Path to the platform CLI (defaults to `gateway.program`, then PATH).
    #[arg(long)]
    pub sf_path: Option<PathBuf>,

    /// Seed entity for a neighborhood fetch (repeatable).
    #[arg(long = "seed")]
    pub seeds: Vec<String>,

    /// Relationship hops to follow from the seeds.
    #[arg(long, default_value_t = 1)]
    pub depth: u32,

    /// Describe at most this many listed entities.
    #[arg(long)]
    pub max_objects: Option<usize>,

    /// Reuse raw files and stats left by a previous run.
    #[arg(long)]
    pub resume: bool,

    /// Keep noise entities (feeds, history, shares, events).
    #[arg(long)]
    pub no_prefilter: bool,

    /// Namespace to exclude (repeatable; adds to `fetch.ignore_namespaces`).
    #[arg(long = "ignore-namespace")]
    pub ignore_namespaces: Vec<String>,

    /// Worker pool width.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Entities per describe batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between describe batches, in seconds.
    #[arg(long)]
    pub batch_pause_secs: Option<u64>,

    /// Extra attempts per failing describe.
    #[arg(long)]
    pub retries: Option<u32>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the full pipeline: fetch, graph, stats, annotate, corpus.
    Build {
        #[command(flatten)]
        fetch: FetchArgs,

        /// Skip usage sampling.
        #[arg(long)]
        no_stats: bool,

        /// Records sampled per entity.
        #[arg(long)]
        sample_size: Option<usize>,

        /// Fill-rate fields kept per entity.
        #[arg(long)]
        top_n: Option<usize>,

        /// Collect flows, triggers, validation and workflow rules.
        #[arg(long)]
        automation: bool,

        /// Collect object and field permissions.
        #[arg(long)]
        security: bool,

        /// Corpus views to write.
        #[arg(long, value_enum, default_value = "both")]
        emit: EmitFormat,

        /// Token budget per chunk.
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Overlap budget for continuation parts.
        #[arg(long)]
        overlap_tokens: Option<usize>,

        /// HuggingFace tokenizer file for exact counts.
        #[arg(long)]
        tokenizer: Option<PathBuf>,

        /// Run without the SmartCache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Fetch stage only: list, describe and combine into `schema.json`.
    Fetch {
        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Rebuild `schema.json` from the raw describe files of a previous run.
    Combine {
        /// Output root holding `raw/`.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Print entry counts, size and per-operation breakdown.
    Stats,
    /// Remove entries.
    Clear {
        /// Only entries of this operation (describe, stats, automation, ...).
        #[arg(long)]
        op: Option<String>,

        /// Only entries older than this many hours.
        #[arg(long, conflicts_with = "op")]
        older_than_hours: Option<u64>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "schemalib=info",
        1 => "schemalib=debug",
        _ => "schemalib=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build {
            fetch,
            no_stats,
            sample_size,
            top_n,
            automation,
            security,
            emit,
            max_tokens,
            overlap_tokens,
            tokenizer,
            no_cache,
        } => {
            let config = load_config()?;
            let mut usage = UsageConfig::from(&config);
            usage.sample_size = sample_size.unwrap_or(usage.sample_size);
            usage.top_n = top_n.unwrap_or(usage.top_n);

            let mut corpus = CorpusConfig::from(&config);
            corpus.max_tokens = max_tokens.unwrap_or(corpus.max_tokens);
            corpus.overlap_tokens = overlap_tokens.unwrap_or(corpus.overlap_tokens);
            if tokenizer.is_some() {
                corpus.tokenizer_file = tokenizer;
            }

            let build = BuildOptions {
                stats: !no_stats,
                usage,
                automation,
                security,
                corpus,
                emit: emit.options(),
                cache: !no_cache && config.cache.enabled,
            };
            cmd_build(&config, &fetch, build).await
        }
        Command::Fetch { fetch } => cmd_fetch(&fetch).await,
        Command::Combine { out } => cmd_combine(out).await,
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats().await,
            CacheAction::Clear {
                op,
                older_than_hours,
            } => cmd_cache_clear(op, older_than_hours).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// `build` settings beyond the fetch flags.
struct BuildOptions {
    stats: bool,
    usage: UsageConfig,
    automation: bool,
    security: bool,
    corpus: CorpusConfig,
    emit: Option<EmitOptions>,
    cache: bool,
}

/// Merge the fetch flags over the config file.
fn fetch_config(config: &AppConfig, args: &FetchArgs) -> FetchConfig {
    let mut fetch = FetchConfig::from(config);
    if let Some(out) = &args.out {
        fetch.out_root = out.clone();
    }
    if args.account.is_some() {
        fetch.account = args.account.clone();
    }
    if !args.seeds.is_empty() {
        fetch.mode = FetchMode::Neighborhood {
            seeds: args.seeds.clone(),
            depth: args.depth,
        };
    }
    fetch.max_objects = args.max_objects;
    fetch.resume = args.resume;
    if args.no_prefilter {
        fetch.prefilter_noise = false;
    }
    fetch.ignore_namespaces.extend(args.ignore_namespaces.iter().cloned());
    fetch.concurrency = args.concurrency.unwrap_or(fetch.concurrency);
    fetch.batch_size = args.batch_size.unwrap_or(fetch.batch_size);
    if let Some(secs) = args.batch_pause_secs {
        fetch.batch_pause = Duration::from_secs(secs);
    }
    fetch.retries = args.retries.unwrap_or(fetch.retries);
    fetch
}

fn gateway(config: &AppConfig, args: &FetchArgs) -> Result<Arc<dyn Gateway>> {
    let mut gateway_config = GatewayConfig::from(config);
    if args.sf_path.is_some() {
        gateway_config.program = args.sf_path.clone();
    }
    let gateway = CliGateway::new(gateway_config)?;
    info!(program = %gateway.program().display(), "using platform CLI");
    Ok(Arc::new(gateway))
}

async fn cmd_build(config: &AppConfig, args: &FetchArgs, options: BuildOptions) -> Result<()> {
    let fetch = fetch_config(config, args);
    let mut usage = options.usage;
    usage.out_root = fetch.out_root.clone();
    usage.account = fetch.account.clone();
    usage.resume = fetch.resume;
    usage.concurrency = fetch.concurrency;

    let build = BuildConfig {
        usage: options.stats.then_some(usage),
        automation: options.automation,
        security: options.security,
        corpus: options.corpus,
        emit: options.emit,
        cache: options.cache.then(|| CacheConfig::from(config)),
        metadata_timeout: Duration::from_secs(config.stats.query_timeout_secs),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        fetch,
    };

    info!(
        out = %build.fetch.out_root.display(),
        account = build.fetch.account.as_deref().unwrap_or("<default>"),
        "building schema library"
    );

    let gateway = gateway(config, args)?;
    let reporter = CliProgress::new();
    let report = build_library(&build, gateway, &reporter).await?;

    print_build_summary(&report);
    Ok(())
}

async fn cmd_fetch(args: &FetchArgs) -> Result<()> {
    let config = load_config()?;
    let fetch = fetch_config(&config, args);
    let gateway = gateway(&config, args)?;

    let reporter = CliProgress::new();
    reporter.phase("Fetching entity describes");
    let report = EntityFetcher::new(gateway, fetch).run(&reporter).await?;
    reporter.spinner.finish_and_clear();

    println!();
    println!("  Fetch complete");
    print_stages(&[StageCounts {
        stage: "fetch".into(),
        attempted: report.attempted(),
        succeeded: report.succeeded(),
    }]);
    println!("  Resumed: {}", report.resumed);
    println!("  Schema:  {}", report.schema_path.display());
    println!("  Time:    {:.1}s", report.duration.as_secs_f64());
    if !report.errors.is_empty() {
        println!("  Failed:  {} (see raw/_errors.log)", report.errors.len());
    }
    println!();
    Ok(())
}

async fn cmd_combine(out: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let out_root = out.unwrap_or_else(|| FetchConfig::from(&config).out_root);
    let raw_dir = out_root.join("raw");
    if !raw_dir.is_dir() {
        return Err(eyre!("no raw/ directory under '{}'", out_root.display()));
    }
    let schema_path = out_root.join("schema.json");
    let count = combine_raw(&raw_dir, &schema_path)?;
    println!("Combined {count} entities into {}", schema_path.display());
    Ok(())
}

async fn cmd_cache_stats() -> Result<()> {
    let config = load_config()?;
    let cache = SmartCache::open(&CacheConfig::from(&config))?;

    let mut by_operation: BTreeMap<String, (usize, u64)> = BTreeMap::new();
    for entry in cache.entries() {
        let slot = by_operation.entry(entry.operation).or_default();
        slot.0 += 1;
        slot.1 += entry.size_bytes;
    }
    let stats = cache.stats();

    println!();
    println!("  Cache:      {}", cache.root().display());
    println!("  Entries:    {}", stats.entry_count);
    println!("  Compressed: {}", stats.compressed_entries);
    println!("  Size:       {:.1} KiB", stats.size_bytes as f64 / 1024.0);
    for (operation, (count, bytes)) in &by_operation {
        println!("    {operation:<12} {count:>6} entries  {:>10.1} KiB", *bytes as f64 / 1024.0);
    }
    println!();
    Ok(())
}

async fn cmd_cache_clear(op: Option<String>, older_than_hours: Option<u64>) -> Result<()> {
    let config = load_config()?;
    let cache = SmartCache::open(&CacheConfig::from(&config))?;

    let scope = match (op, older_than_hours) {
        (Some(op), _) => ClearScope::Operation(op),
        (None, Some(hours)) => ClearScope::OlderThan(Duration::from_secs(hours * 3600)),
        (None, None) => ClearScope::All,
    };
    let removed = cache.clear(&scope);
    info!(?scope, removed, "cache cleared");
    println!("Removed {removed} cache entries");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

fn print_stages(stages: &[StageCounts]) {
    for stage in stages {
        println!(
            "  {:<11} {:>6} / {:<6} succeeded",
            stage.stage, stage.succeeded, stage.attempted
        );
    }
}

fn print_build_summary(report: &BuildReport) {
    println!();
    println!("  Schema library built");
    println!("  Run:      {}", report.run_id);
    print_stages(&report.stages);
    println!("  Junctions: {}", report.annotate.junctions);
    if let Some(corpus) = &report.corpus {
        println!(
            "  Chunks:   {} ({} split parts)",
            corpus.chunks, corpus.split_chunks
        );
    }
    println!("  Errors:   {}", report.error_count);
    println!("  Manifest: {}", report.manifest_path.display());
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn entity_done(&self, stage: &str, name: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{stage} [{current}/{total}] {name}"));
    }

    fn done(&self, _report: &BuildReport) {
        self.spinner.finish_and_clear();
    }
}

impl FetchProgress for CliProgress {
    fn entity_fetched(&self, name: &str, current: usize, total: usize) {
        self.entity_done("fetch", name, current, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn build_flags_override_config() {
        let cli = parse(&[
            "schemalib", "build", "--out", "/tmp/org", "--seed", "Account", "--seed", "Case",
            "--depth", "2", "--resume", "--ignore-namespace", "pkg", "--concurrency", "4",
        ]);
        let Command::Build { fetch, .. } = cli.command else {
            panic!("expected build");
        };
        let config = fetch_config(&AppConfig::default(), &fetch);
        assert_eq!(config.out_root, PathBuf::from("/tmp/org"));
        assert_eq!(
            config.mode,
            FetchMode::Neighborhood {
                seeds: vec!["Account".into(), "Case".into()],
                depth: 2
            }
        );
        assert!(config.resume);
        assert!(config.ignore_namespaces.contains(&"pkg".to_string()));
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn emit_formats_map_to_options() {
        assert!(EmitFormat::None.options().is_none());
        let md = EmitFormat::Md.options().unwrap();
        assert!(md.markdown && !md.jsonl);
        let both = EmitFormat::Both.options().unwrap();
        assert!(both.markdown && both.jsonl);
    }

    #[test]
    fn cache_clear_flags_conflict() {
        assert!(
            Cli::try_parse_from(["schemalib", "cache", "clear", "--op", "describe", "--older-than-hours", "2"])
                .is_err()
        );
        let cli = parse(&["schemalib", "-vv", "cache", "clear", "--older-than-hours", "6"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheAction::Clear {
                    op: None,
                    older_than_hours: Some(6)
                }
            }
        ));
    }
}
