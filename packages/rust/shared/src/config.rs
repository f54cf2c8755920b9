//! Application configuration for schemalib.
//!
//! User config lives at `~/.schemalib/schemalib.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::{BackoffPolicy, BackoffStrategy};
use crate::error::{Result, SchemaLibError};
use crate::types::FetchMode;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "schemalib.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".schemalib";

// ---------------------------------------------------------------------------
// Config structs (matching schemalib.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// External command gateway settings.
    #[serde(default)]
    pub gateway: GatewaySection,

    /// Entity fetch settings.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Usage sampling settings.
    #[serde(default)]
    pub stats: StatsSection,

    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheSection,

    /// Corpus emission settings.
    #[serde(default)]
    pub corpus: CorpusSection,

    /// Vector upload settings.
    #[serde(default)]
    pub upload: UploadSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default output root for run artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Default org alias / username passed as `--target-org`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Worker pool width for describe and stats calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            account: None,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output_dir() -> String {
    "schemalib-out".into()
}
fn default_concurrency() -> usize {
    10
}

/// `[gateway]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    /// Explicit path to the platform CLI. Searched on `PATH` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// How many times a rate-limited call is retried.
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,

    /// Base wait before the first rate-limit retry; doubles per attempt.
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,

    /// Minimum ms between the starts of two consecutive calls.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// API versions tried, in order, when a plain describe returns nothing.
    #[serde(default = "default_api_versions")]
    pub api_versions: Vec<String>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            program: None,
            rate_limit_retries: default_rate_limit_retries(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            throttle_ms: default_throttle_ms(),
            api_versions: default_api_versions(),
        }
    }
}

fn default_rate_limit_retries() -> u32 {
    3
}
fn default_rate_limit_backoff_secs() -> u64 {
    30
}
fn default_throttle_ms() -> u64 {
    0
}
fn default_api_versions() -> Vec<String> {
    ["64.0", "63.0", "62.0", "61.0"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Entities described per batch before the mandatory pause.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches, in seconds.
    #[serde(default = "default_batch_pause_secs")]
    pub batch_pause_secs: u64,

    /// Extra attempts per failing entity.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base backoff between per-entity attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// `linear` or `exponential`.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,

    /// Drop change-event, feed, history and share entities up front.
    #[serde(default = "default_true")]
    pub prefilter_noise: bool,

    /// Namespace prefixes excluded from the run.
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,

    /// Per-call timeout for a describe, in seconds.
    #[serde(default = "default_describe_timeout_secs")]
    pub describe_timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_secs: default_batch_pause_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            backoff_strategy: BackoffStrategy::default(),
            prefilter_noise: true,
            ignore_namespaces: Vec::new(),
            describe_timeout_secs: default_describe_timeout_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_batch_pause_secs() -> u64 {
    30
}
fn default_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_true() -> bool {
    true
}
fn default_describe_timeout_secs() -> u64 {
    300
}

/// `[stats]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSection {
    /// Records sampled per entity for fill rates.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,

    /// ORDER BY clause for the sample query.
    #[serde(default = "default_order_by")]
    pub order_by: String,

    /// Fields listed explicitly when `FIELDS(ALL)` is rejected.
    #[serde(default = "default_explicit_field_limit")]
    pub explicit_field_limit: usize,

    /// Fields kept in the ranked fill-rate list.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Extra attempts for the count query.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-call timeout for stats queries, in seconds.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for StatsSection {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            order_by: default_order_by(),
            explicit_field_limit: default_explicit_field_limit(),
            top_n: default_top_n(),
            retries: default_retries(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_sample_size() -> usize {
    100
}
fn default_order_by() -> String {
    "LastModifiedDate DESC".into()
}
fn default_explicit_field_limit() -> usize {
    100
}
fn default_top_n() -> usize {
    25
}
fn default_query_timeout_secs() -> u64 {
    180
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Whether remote calls consult the cache at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cache directory (`~` is expanded).
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Entries older than this are treated as misses.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,

    /// Store new entries gzip-compressed.
    #[serde(default = "default_true")]
    pub compression: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            max_age_hours: default_max_age_hours(),
            compression: true,
        }
    }
}

fn default_cache_dir() -> String {
    "~/.schemalib/cache".into()
}
fn default_max_age_hours() -> u64 {
    24
}

/// `[corpus]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSection {
    /// Hard token budget per chunk.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens repeated at the start of each continuation part.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,

    /// Rows in the usage fill-rate table.
    #[serde(default = "default_top_n")]
    pub top_fill: usize,

    /// Rows in the markdown fields table before it is truncated.
    #[serde(default = "default_max_field_rows")]
    pub max_field_rows: usize,

    /// Field count above which field chunks are batched.
    #[serde(default = "default_field_batch_threshold")]
    pub field_batch_threshold: usize,

    /// Fields per batch chunk.
    #[serde(default = "default_field_batch_size")]
    pub field_batch_size: usize,

    /// Optional `tokenizer.json` for exact token counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_file: Option<String>,
}

impl Default for CorpusSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            top_fill: default_top_n(),
            max_field_rows: default_max_field_rows(),
            field_batch_threshold: default_field_batch_threshold(),
            field_batch_size: default_field_batch_size(),
            tokenizer_file: None,
        }
    }
}

fn default_max_tokens() -> usize {
    6000
}
fn default_overlap_tokens() -> usize {
    200
}
fn default_max_field_rows() -> usize {
    500
}
fn default_field_batch_threshold() -> usize {
    100
}
fn default_field_batch_size() -> usize {
    50
}

/// `[upload]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSection {
    /// Records per upsert call.
    #[serde(default = "default_upload_batch_size")]
    pub batch_size: usize,

    /// Extra attempts per failing batch.
    #[serde(default = "default_upload_retries")]
    pub max_retries: u32,

    /// Base backoff between batch attempts.
    #[serde(default = "default_upload_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            batch_size: default_upload_batch_size(),
            max_retries: default_upload_retries(),
            backoff_ms: default_upload_backoff_ms(),
        }
    }
}

fn default_upload_batch_size() -> usize {
    96
}
fn default_upload_retries() -> u32 {
    5
}
fn default_upload_backoff_ms() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Explicit program path; `None` means search `PATH`.
    pub program: Option<PathBuf>,
    /// Rate-limit retries before surfacing `RateLimited`.
    pub rate_limit_retries: u32,
    /// Backoff applied between rate-limit retries.
    pub rate_limit_backoff: BackoffPolicy,
    /// Minimum interval between consecutive call starts.
    pub throttle: Duration,
    /// Timeout for calls that don't pass their own.
    pub default_timeout: Duration,
}

impl From<&AppConfig> for GatewayConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            program: config.gateway.program.as_deref().map(expand_home),
            rate_limit_retries: config.gateway.rate_limit_retries,
            rate_limit_backoff: BackoffPolicy::exponential(Duration::from_secs(
                config.gateway.rate_limit_backoff_secs,
            )),
            throttle: Duration::from_millis(config.gateway.throttle_ms),
            default_timeout: Duration::from_secs(config.stats.query_timeout_secs),
        }
    }
}

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Org alias passed to every call.
    pub account: Option<String>,
    /// Output root; `raw/` and `schema.json` live underneath.
    pub out_root: PathBuf,
    /// Full listing or seeded neighborhood.
    pub mode: FetchMode,
    /// Drop noise entities at every expansion step.
    pub prefilter_noise: bool,
    /// Namespaces excluded at every expansion step.
    pub ignore_namespaces: Vec<String>,
    /// Truncate the `All` listing (after filtering).
    pub max_objects: Option<usize>,
    /// Reuse raw files left by a previous run.
    pub resume: bool,
    /// Entities per batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
    /// Worker pool width within a batch.
    pub concurrency: usize,
    /// Extra attempts per failing entity.
    pub retries: u32,
    /// Backoff between those attempts.
    pub backoff: BackoffPolicy,
    /// API versions for the describe fallback chain.
    pub api_versions: Vec<String>,
    /// Per-call describe timeout.
    pub describe_timeout: Duration,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            account: config.defaults.account.clone(),
            out_root: expand_home(&config.defaults.output_dir),
            mode: FetchMode::All,
            prefilter_noise: config.fetch.prefilter_noise,
            ignore_namespaces: config.fetch.ignore_namespaces.clone(),
            max_objects: None,
            resume: false,
            batch_size: config.fetch.batch_size,
            batch_pause: Duration::from_secs(config.fetch.batch_pause_secs),
            concurrency: config.defaults.concurrency,
            retries: config.fetch.retries,
            backoff: BackoffPolicy::new(
                Duration::from_millis(config.fetch.backoff_ms),
                config.fetch.backoff_strategy,
            ),
            api_versions: config.gateway.api_versions.clone(),
            describe_timeout: Duration::from_secs(config.fetch.describe_timeout_secs),
        }
    }
}

/// Runtime usage-sampling configuration.
#[derive(Debug, Clone)]
pub struct UsageConfig {
    /// Org alias passed to every call.
    pub account: Option<String>,
    /// Output root; summaries go to `stats/` underneath.
    pub out_root: PathBuf,
    /// Records sampled per entity.
    pub sample_size: usize,
    /// ORDER BY clause of the sample query (`None` for unordered).
    pub order_by: Option<String>,
    /// Fields used by the explicit fallback query.
    pub explicit_field_limit: usize,
    /// Ranked fields kept per entity.
    pub top_n: usize,
    /// Extra attempts for the count query.
    pub retries: u32,
    /// Reuse summaries persisted by a previous run.
    pub resume: bool,
    /// Worker pool width.
    pub concurrency: usize,
    /// Per-call timeout.
    pub query_timeout: Duration,
}

impl From<&AppConfig> for UsageConfig {
    fn from(config: &AppConfig) -> Self {
        let order_by = config.stats.order_by.trim();
        Self {
            account: config.defaults.account.clone(),
            out_root: expand_home(&config.defaults.output_dir),
            sample_size: config.stats.sample_size,
            order_by: (!order_by.is_empty()).then(|| order_by.to_string()),
            explicit_field_limit: config.stats.explicit_field_limit,
            top_n: config.stats.top_n,
            retries: config.stats.retries,
            resume: false,
            concurrency: config.defaults.concurrency,
            query_timeout: Duration::from_secs(config.stats.query_timeout_secs),
        }
    }
}

/// Runtime cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache root directory.
    pub dir: PathBuf,
    /// Freshness window.
    pub max_age: Duration,
    /// Write new entries gzip-compressed.
    pub compression: bool,
}

impl From<&AppConfig> for CacheConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            dir: expand_home(&config.cache.dir),
            max_age: Duration::from_secs(config.cache.max_age_hours * 3600),
            compression: config.cache.compression,
        }
    }
}

/// Runtime corpus configuration.
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    /// Hard token budget per chunk.
    pub max_tokens: usize,
    /// Overlap budget for continuation parts.
    pub overlap_tokens: usize,
    /// Rows in the fill-rate table.
    pub top_fill: usize,
    /// Rows in the markdown fields table.
    pub max_field_rows: usize,
    /// Field count above which field chunks are batched.
    pub field_batch_threshold: usize,
    /// Fields per batch chunk.
    pub field_batch_size: usize,
    /// Optional HuggingFace tokenizer file.
    pub tokenizer_file: Option<PathBuf>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CorpusConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_tokens: config.corpus.max_tokens,
            overlap_tokens: config.corpus.overlap_tokens,
            top_fill: config.corpus.top_fill,
            max_field_rows: config.corpus.max_field_rows,
            field_batch_threshold: config.corpus.field_batch_threshold,
            field_batch_size: config.corpus.field_batch_size,
            tokenizer_file: config.corpus.tokenizer_file.as_deref().map(expand_home),
        }
    }
}

/// Runtime upload configuration.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Records per upsert call.
    pub batch_size: usize,
    /// Extra attempts per failing batch.
    pub max_retries: u32,
    /// Backoff between attempts.
    pub backoff: BackoffPolicy,
}

impl From<&AppConfig> for UploadConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            batch_size: config.upload.batch_size,
            max_retries: config.upload.max_retries,
            backoff: BackoffPolicy::exponential(Duration::from_millis(config.upload.backoff_ms)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.schemalib/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SchemaLibError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.schemalib/schemalib.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SchemaLibError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SchemaLibError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SchemaLibError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SchemaLibError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SchemaLibError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
