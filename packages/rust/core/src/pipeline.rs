//! End-to-end `build` pipeline: fetch → graph → stats → automation/security
//! → annotate → corpus → run manifest.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, instrument, warn};

use schemalib_cache::SmartCache;
use schemalib_corpus::{ChunkEmitter, CorpusReport, EmitOptions, emit_corpus};
use schemalib_fetcher::{EntityFetcher, EntityFilter, FetchProgress, FetchReport, load_schema};
use schemalib_gateway::Gateway;
use schemalib_graph::RelationshipGraph;
use schemalib_shared::io::write_json;
use schemalib_shared::{
    CacheConfig, CorpusConfig, FetchConfig, Result, RunId, RunManifest, SchemaLibError,
    StageCounts, UsageConfig,
};
use schemalib_usage::{UsageProgress, UsageReport, UsageSampler};

use crate::annotate::{AnnotateReport, OBJECTS_DIR, StageData, write_annotations};
use crate::automation::AutomationCollector;
use crate::remote::RemoteContext;
use crate::security::SecurityCollector;

const CORPUS_DIR: &str = "corpus";
const MANIFEST_FILE: &str = "run.json";

/// Configuration for the `build_library` pipeline.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Fetch settings; `out_root` is the root of every artifact.
    pub fetch: FetchConfig,
    /// Usage sampling; `None` skips the stage.
    pub usage: Option<UsageConfig>,
    /// Collect flows, triggers, validation and workflow rules.
    pub automation: bool,
    /// Collect object and field permissions.
    pub security: bool,
    pub corpus: CorpusConfig,
    /// Corpus views to write; `None` skips emission.
    pub emit: Option<EmitOptions>,
    /// Cache settings; `None` runs uncached.
    pub cache: Option<CacheConfig>,
    /// Per-call timeout of automation and security queries.
    pub metadata_timeout: Duration,
    /// Tool version string recorded in `run.json`.
    pub tool_version: String,
}

/// Result of the `build_library` pipeline.
#[derive(Debug)]
pub struct BuildReport {
    pub run_id: RunId,
    pub fetch: FetchReport,
    pub usage: Option<UsageReport>,
    pub annotate: AnnotateReport,
    pub corpus: Option<CorpusReport>,
    /// Attempted vs succeeded per stage, as recorded in `run.json`.
    pub stages: Vec<StageCounts>,
    pub error_count: usize,
    pub manifest_path: PathBuf,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a stage finishes one entity.
    fn entity_done(&self, stage: &str, name: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, report: &BuildReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn entity_done(&self, _stage: &str, _name: &str, _current: usize, _total: usize) {}
    fn done(&self, _report: &BuildReport) {}
}

/// Routes a stage's own progress callback into a [`ProgressReporter`].
struct StageProgress<'a> {
    stage: &'static str,
    inner: &'a dyn ProgressReporter,
}

impl FetchProgress for StageProgress<'_> {
    fn entity_fetched(&self, name: &str, current: usize, total: usize) {
        self.inner.entity_done(self.stage, name, current, total);
    }
}

impl UsageProgress for StageProgress<'_> {
    fn entity_sampled(&self, name: &str, current: usize, total: usize) {
        self.inner.entity_done(self.stage, name, current, total);
    }
}

/// Run the full `build` pipeline.
///
/// 1. Fetch: list and describe entities into `schema.json`
/// 2. Load the combined schema and build the relationship graph
/// 3. Sample usage (optional)
/// 4. Collect automation and security metadata (optional)
/// 5. Write annotated objects, the index files and the CSV rollups
/// 6. Emit the corpus (optional)
/// 7. Write `run.json` and flush cache statistics
///
/// Per-entity failures are counted, never fatal.
#[instrument(skip_all, fields(out = %config.fetch.out_root.display()))]
pub async fn build_library(
    config: &BuildConfig,
    gateway: Arc<dyn Gateway>,
    progress: &dyn ProgressReporter,
) -> Result<BuildReport> {
    let start = Instant::now();
    let started_at = Utc::now();
    let run_id = RunId::new();
    let out_root = config.fetch.out_root.clone();

    info!(%run_id, out = %out_root.display(), "starting build pipeline");

    let cache = config.cache.as_ref().and_then(|c| match SmartCache::open(c) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "cache unavailable, continuing uncached");
            None
        }
    });

    let mut stages = Vec::new();

    // --- Phase 1: Fetch ---
    progress.phase("Fetching entity describes");
    let fetcher = EntityFetcher::new(Arc::clone(&gateway), config.fetch.clone());
    let fetch = fetcher
        .run(&StageProgress {
            stage: "fetch",
            inner: progress,
        })
        .await?;
    stages.push(StageCounts {
        stage: "fetch".into(),
        attempted: fetch.attempted(),
        succeeded: fetch.succeeded(),
    });
    let mut error_count = fetch.errors.len();

    // --- Phase 2: Graph ---
    progress.phase("Building relationship graph");
    let entities = load_schema(&fetch.schema_path)?;
    if entities.is_empty() {
        return Err(SchemaLibError::validation(format!(
            "no entities in {}",
            fetch.schema_path.display()
        )));
    }
    let graph = RelationshipGraph::build(&entities);
    let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();

    // --- Phase 3: Usage ---
    let usage = match &config.usage {
        Some(usage_config) => {
            progress.phase("Sampling usage");
            let mut sampler = UsageSampler::new(Arc::clone(&gateway), usage_config.clone());
            if let Some(cache) = &cache {
                sampler = sampler.with_cache(Arc::clone(cache));
            }
            let report = sampler
                .summarize_all(
                    &entities,
                    &StageProgress {
                        stage: "stats",
                        inner: progress,
                    },
                )
                .await?;
            stages.push(StageCounts {
                stage: "stats".into(),
                attempted: entities.len(),
                succeeded: report.summaries.len().saturating_sub(report.count_failures),
            });
            error_count += report.count_failures;
            Some(report)
        }
        None => None,
    };

    // --- Phase 4: Automation / security ---
    let remote = RemoteContext {
        gateway: Arc::clone(&gateway),
        cache: cache.clone(),
        account: config.fetch.account.clone(),
        timeout: config.metadata_timeout,
    };

    let automation = if config.automation {
        progress.phase("Collecting automation");
        let collected = AutomationCollector::new(remote.clone()).collect(&names).await;
        stages.push(StageCounts {
            stage: "automation".into(),
            attempted: names.len(),
            succeeded: collected.complete,
        });
        Some(collected.by_entity)
    } else {
        None
    };

    let security = if config.security {
        progress.phase("Collecting security");
        let collected = SecurityCollector::new(remote).collect(&names).await;
        stages.push(StageCounts {
            stage: "security".into(),
            attempted: names.len(),
            succeeded: collected.complete,
        });
        Some(collected.by_entity)
    } else {
        None
    };

    // --- Phase 5: Annotate ---
    progress.phase("Writing annotated objects");
    let filter = EntityFilter::from_config(&config.fetch);
    let annotate = write_annotations(
        &out_root,
        &entities,
        &graph,
        &filter,
        StageData {
            usage: usage.as_ref().map(|u| &u.summaries),
            automation: automation.as_ref(),
            security: security.as_ref(),
        },
    )?;
    stages.push(StageCounts {
        stage: "annotate".into(),
        attempted: entities.len(),
        succeeded: annotate.objects,
    });
    error_count += annotate.failed.len();

    // --- Phase 6: Corpus ---
    let corpus = match config.emit {
        Some(options) => {
            progress.phase("Emitting corpus");
            let emitter = ChunkEmitter::new(config.corpus.clone());
            let report = emit_corpus(
                &emitter,
                &out_root.join(OBJECTS_DIR),
                &out_root.join(CORPUS_DIR),
                options,
            )?;
            stages.push(StageCounts {
                stage: "corpus".into(),
                attempted: report.entities + report.skipped,
                succeeded: report.entities,
            });
            error_count += report.skipped;
            Some(report)
        }
        None => None,
    };

    // --- Phase 7: Manifest ---
    progress.phase("Writing run manifest");
    let cache_stats = cache.as_ref().and_then(|cache| {
        if let Err(e) = cache.flush_stats() {
            warn!(error = %e, "failed to flush cache stats");
        }
        serde_json::to_value(cache.stats()).ok()
    });
    let manifest = RunManifest {
        run_id: run_id.clone(),
        tool_version: config.tool_version.clone(),
        account: config.fetch.account.clone(),
        started_at,
        finished_at: Utc::now(),
        stages: stages.clone(),
        error_count,
        cache: cache_stats,
    };
    let manifest_path = out_root.join(MANIFEST_FILE);
    write_json(&manifest_path, &manifest)?;

    let report = BuildReport {
        run_id,
        fetch,
        usage,
        annotate,
        corpus,
        stages,
        error_count,
        manifest_path,
        elapsed: start.elapsed(),
    };

    info!(
        run_id = %report.run_id,
        entities = entities.len(),
        errors = report.error_count,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "build pipeline complete"
    );

    progress.done(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use schemalib_gateway::testing::ScriptedGateway;
    use schemalib_shared::io::read_json;
    use schemalib_shared::{BackoffPolicy, FetchMode};
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn org() -> Vec<Value> {
        vec![
            json!({
                "name": "Account", "label": "Account", "queryable": true,
                "fields": [
                    {"name": "Id", "type": "id"},
                    {"name": "Name", "type": "string", "nameField": true}
                ],
                "childRelationships": [
                    {"childSObject": "Order", "field": "AccountId", "cascadeDelete": true, "relationshipName": "Orders"}
                ]
            }),
            json!({
                "name": "Order", "label": "Order", "queryable": true,
                "fields": [
                    {"name": "Id", "type": "id"},
                    {"name": "AccountId", "type": "reference", "referenceTo": ["Account"], "relationshipName": "Account"}
                ],
                "childRelationships": []
            }),
            json!({
                "name": "AccountHistory", "queryable": false,
                "fields": [{"name": "AccountId", "type": "reference", "referenceTo": ["Account"]}],
                "childRelationships": []
            }),
        ]
    }

    fn config(out_root: &Path) -> BuildConfig {
        BuildConfig {
            fetch: FetchConfig {
                account: Some("test-org".into()),
                out_root: out_root.to_path_buf(),
                mode: FetchMode::All,
                prefilter_noise: false,
                ignore_namespaces: Vec::new(),
                max_objects: None,
                resume: false,
                batch_size: 10,
                batch_pause: Duration::ZERO,
                concurrency: 2,
                retries: 0,
                backoff: BackoffPolicy::exponential(Duration::from_millis(1)),
                api_versions: vec!["64.0".into()],
                describe_timeout: Duration::from_secs(5),
            },
            usage: Some(UsageConfig {
                account: Some("test-org".into()),
                out_root: out_root.to_path_buf(),
                sample_size: 5,
                order_by: None,
                explicit_field_limit: 10,
                top_n: 5,
                retries: 0,
                resume: false,
                concurrency: 2,
                query_timeout: Duration::from_secs(5),
            }),
            automation: true,
            security: true,
            corpus: CorpusConfig::default(),
            emit: Some(EmitOptions::default()),
            cache: Some(CacheConfig {
                dir: out_root.join(".cache"),
                max_age: Duration::from_secs(3600),
                compression: true,
            }),
            metadata_timeout: Duration::from_secs(5),
            tool_version: "0.0.0-test".into(),
        }
    }

    #[tokio::test]
    async fn builds_every_artifact() {
        let tmp = std::env::temp_dir().join(format!("sl-pipeline-test-{}", Uuid::now_v7()));
        let gateway = Arc::new(ScriptedGateway::catalog(org()));

        let report = build_library(&config(&tmp), gateway.clone(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.fetch.succeeded(), 3);
        assert_eq!(report.annotate.objects, 3);
        assert_eq!(report.error_count, 0);

        for file in [
            "schema.json",
            "sobject-list.json",
            "sobject-list.clean.json",
            "relationships-index.json",
            "objects/Account.json",
            "stats/Account.usage.json",
            "object_counts.csv",
            "field_fill_rates.csv",
            "edges.csv",
            "nodes.clean.csv",
            "corpus/md/Account.md",
            "corpus/chunks.jsonl",
            "run.json",
        ] {
            assert!(tmp.join(file).exists(), "missing {file}");
        }

        let order: Value = read_json(&tmp.join("objects/Order.json")).unwrap();
        let outbound = &order["_relationshipMetadata"]["outbound"][0];
        assert_eq!(outbound["target"], "Account");
        assert_eq!(outbound["kind"], "MasterDetail");
        assert!(order["_relationshipMetadata"]["automationSummary"].is_object());
        assert!(order["_relationshipMetadata"]["usageSummary"]["queryable"].as_bool().unwrap());

        let history: Value = read_json(&tmp.join("objects/AccountHistory.json")).unwrap();
        assert_eq!(history["_relationshipMetadata"]["usageSummary"]["queryable"], false);

        let manifest: Value = read_json(&report.manifest_path).unwrap();
        let stage_names: Vec<&str> = manifest["stages"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["stage"].as_str())
            .collect();
        assert_eq!(
            stage_names,
            vec!["fetch", "stats", "automation", "security", "annotate", "corpus"]
        );
        assert_eq!(manifest["account"], "test-org");
        assert!(manifest["cache"]["writes"].as_u64().unwrap() > 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn resumed_cached_rerun_makes_no_calls() {
        let tmp = std::env::temp_dir().join(format!("sl-pipeline-test-{}", Uuid::now_v7()));
        let first = Arc::new(ScriptedGateway::catalog(org()));
        let mut cfg = config(&tmp);
        build_library(&cfg, first.clone(), &SilentProgress).await.unwrap();
        assert!(first.call_count() > 0);
        let schema_before = std::fs::read(tmp.join("schema.json")).unwrap();

        cfg.fetch.resume = true;
        if let Some(usage) = cfg.usage.as_mut() {
            usage.resume = true;
        }
        let second = Arc::new(ScriptedGateway::catalog(org()));
        let report = build_library(&cfg, second.clone(), &SilentProgress).await.unwrap();
        assert_eq!(second.call_count(), 0);
        assert_eq!(report.fetch.resumed, 3);
        assert_eq!(std::fs::read(tmp.join("schema.json")).unwrap(), schema_before);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn optional_stages_can_be_skipped() {
        let tmp = std::env::temp_dir().join(format!("sl-pipeline-test-{}", Uuid::now_v7()));
        let gateway = Arc::new(ScriptedGateway::catalog(org()));
        let mut cfg = config(&tmp);
        cfg.usage = None;
        cfg.automation = false;
        cfg.security = false;
        cfg.emit = None;
        cfg.cache = None;

        let report = build_library(&cfg, gateway.clone(), &SilentProgress).await.unwrap();
        // One listing plus one describe per entity.
        assert_eq!(gateway.call_count(), 4);
        assert!(report.usage.is_none());
        assert!(report.corpus.is_none());
        assert!(!tmp.join("corpus").exists());

        let account: Value = read_json(&tmp.join("objects/Account.json")).unwrap();
        assert!(account["_relationshipMetadata"].get("usageSummary").is_none());

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
