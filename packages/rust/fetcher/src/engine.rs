//! Batched, bounded-concurrency entity describe engine.
//!
//! The fetcher lists entities, picks the working set (everything, or a
//! seeded neighborhood expanded breadth-first), and describes each entity
//! through the gateway. Entities are processed in fixed-size batches with a
//! mandatory pause between batches; within a batch a semaphore bounds the
//! number of concurrent describes. Every described entity is persisted to
//! `raw/<name>.json` immediately, so an interrupted run can be resumed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use schemalib_gateway::{Gateway, result_of};
use schemalib_shared::io::{ensure_dir, read_json, write_atomic, write_json};
use schemalib_shared::{
    BackoffPolicy, EntityDescribe, FetchConfig, FetchMode, GatewayError, GatewayErrorKind, Result,
    SchemaLibError,
};

use crate::filter::EntityFilter;
use crate::schema::write_schema;

const RAW_DIR: &str = "raw";
const LIST_FILE: &str = "_list.json";
const ERRORS_FILE: &str = "_errors.log";
const SCHEMA_FILE: &str = "schema.json";
const SOBJECT_LIST_FILE: &str = "sobject-list.json";

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Lifecycle of one entity within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Pending,
    Described,
    Persisted,
    Failed,
}

/// Summary of a completed fetch.
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Every entity the run considered, sorted.
    pub names: Vec<String>,
    /// Final state per considered entity.
    pub states: BTreeMap<String, EntityState>,
    /// Entities described through the gateway in this run.
    pub described: usize,
    /// Entities taken from a previous run's raw files.
    pub resumed: usize,
    /// Failures (entity, message).
    pub errors: Vec<(String, String)>,
    /// The combined artifact.
    pub schema_path: PathBuf,
    /// Total duration of the fetch.
    pub duration: Duration,
}

impl FetchReport {
    pub fn attempted(&self) -> usize {
        self.names.len()
    }

    pub fn succeeded(&self) -> usize {
        self.states
            .values()
            .filter(|s| **s == EntityState::Persisted)
            .count()
    }
}

/// Per-entity progress callback.
pub trait FetchProgress: Send + Sync {
    fn entity_fetched(&self, name: &str, current: usize, total: usize);
}

/// No-op progress for headless/test usage.
pub struct SilentFetchProgress;

impl FetchProgress for SilentFetchProgress {
    fn entity_fetched(&self, _name: &str, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// EntityFetcher
// ---------------------------------------------------------------------------

/// Describe settings handed to each worker task.
#[derive(Debug, Clone)]
struct DescribePlan {
    account: Option<String>,
    api_versions: Vec<String>,
    retries: u32,
    backoff: BackoffPolicy,
    timeout: Duration,
}

/// What a describe worker hands back.
enum TaskOutcome {
    Persisted(EntityDescribe),
    /// Described but the raw file could not be written.
    Unpersisted(EntityDescribe, String),
    Failed(String),
}

/// Mutable bookkeeping shared across batches of one run.
#[derive(Default)]
struct RunState {
    states: BTreeMap<String, EntityState>,
    describes: BTreeMap<String, EntityDescribe>,
    errors: Vec<(String, String)>,
    described: usize,
    resumed: usize,
    completed: usize,
    /// A batch has already gone to the gateway; every later batch of the
    /// run, including those of later neighborhood levels, waits first.
    remote_batch_ran: bool,
}

/// Lists and describes entities through a [`Gateway`].
pub struct EntityFetcher {
    gateway: Arc<dyn Gateway>,
    config: FetchConfig,
    filter: EntityFilter,
}

impl EntityFetcher {
    pub fn new(gateway: Arc<dyn Gateway>, config: FetchConfig) -> Self {
        let filter = EntityFilter::from_config(&config);
        Self {
            gateway,
            config,
            filter,
        }
    }

    /// Directory holding per-entity raw describes.
    pub fn raw_dir(&self) -> PathBuf {
        self.config.out_root.join(RAW_DIR)
    }

    /// Run the fetch: list, select, describe, persist, combine.
    ///
    /// Per-entity failures are recorded in the report and `raw/_errors.log`;
    /// only a failed listing (or no valid seed) aborts the run.
    #[instrument(skip_all, fields(out_root = %self.config.out_root.display()))]
    pub async fn run(&self, progress: &dyn FetchProgress) -> Result<FetchReport> {
        let start = Instant::now();
        let raw_dir = self.raw_dir();
        ensure_dir(&raw_dir)?;

        info!(
            mode = ?self.config.mode,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            resume = self.config.resume,
            "starting fetch"
        );

        let listing = self.list_entities(&raw_dir).await?;
        let listed: BTreeSet<&str> = listing.iter().map(String::as_str).collect();
        let mut run = RunState::default();

        let considered: BTreeSet<String> = match &self.config.mode {
            FetchMode::All => {
                let mut names: Vec<String> = listing
                    .iter()
                    .filter(|n| self.filter.admits(n))
                    .cloned()
                    .collect();
                names.sort();
                names.dedup();
                if let Some(max) = self.config.max_objects {
                    names.truncate(max);
                }
                self.describe_all(&names, &mut run, progress).await;
                names.into_iter().collect()
            }
            FetchMode::Neighborhood { seeds, depth } => {
                let mut frontier: Vec<String> = Vec::new();
                for seed in seeds {
                    if !listed.contains(seed.as_str()) {
                        warn!(seed = %seed, "seed not found in entity listing");
                        run.errors
                            .push((seed.clone(), "not found in entity listing".into()));
                    } else if self.filter.namespace_ignored(seed) {
                        warn!(seed = %seed, "seed is in an ignored namespace, skipping");
                    } else {
                        frontier.push(seed.clone());
                    }
                }
                frontier.sort();
                frontier.dedup();
                if frontier.is_empty() {
                    return Err(SchemaLibError::validation(
                        "none of the requested seeds can be fetched",
                    ));
                }

                let mut visited: BTreeSet<String> = frontier.iter().cloned().collect();
                let mut level = 0;
                loop {
                    self.describe_all(&frontier, &mut run, progress).await;
                    if level >= *depth {
                        break;
                    }

                    let mut next = BTreeSet::new();
                    for name in &frontier {
                        let Some(describe) = run.describes.get(name) else {
                            continue;
                        };
                        for neighbor in describe.neighbors() {
                            if listed.contains(neighbor.as_str())
                                && self.filter.admits(&neighbor)
                                && !visited.contains(&neighbor)
                            {
                                next.insert(neighbor);
                            }
                        }
                    }
                    if next.is_empty() {
                        break;
                    }

                    debug!(level = level + 1, added = next.len(), "expanding neighborhood");
                    visited.extend(next.iter().cloned());
                    frontier = next.into_iter().collect();
                    level += 1;
                }
                visited
            }
        };

        let names: Vec<String> = considered.into_iter().collect();
        write_json(
            &self.config.out_root.join(SOBJECT_LIST_FILE),
            &json!({ "result": names }),
        )?;
        self.write_error_log(&raw_dir, &run.errors)?;

        let schema_path = self.config.out_root.join(SCHEMA_FILE);
        write_schema(&schema_path, run.describes.values())?;

        let report = FetchReport {
            names,
            states: run.states,
            described: run.described,
            resumed: run.resumed,
            errors: run.errors,
            schema_path,
            duration: start.elapsed(),
        };

        info!(
            attempted = report.attempted(),
            succeeded = report.succeeded(),
            described = report.described,
            resumed = report.resumed,
            errors = report.errors.len(),
            duration_ms = report.duration.as_millis() as u64,
            "fetch completed"
        );

        Ok(report)
    }

    /// The full entity listing, reused from `raw/_list.json` when resuming.
    async fn list_entities(&self, raw_dir: &Path) -> Result<Vec<String>> {
        let list_path = raw_dir.join(LIST_FILE);
        if self.config.resume && list_path.exists() {
            match read_json::<Value>(&list_path).map(|v| list_names(&v)) {
                Ok(Some(names)) if !names.is_empty() => {
                    info!(count = names.len(), "reusing entity listing from previous run");
                    return Ok(names);
                }
                _ => warn!(path = %list_path.display(), "stale entity listing, listing again"),
            }
        }

        let commands: [&[&str]; 2] = [
            &["sobject", "list", "--sobject", "all", "--json"],
            &["force", "schema", "sobject", "list", "--sobject", "all", "--json"],
        ];

        let mut last_err: Option<GatewayError> = None;
        for command in commands {
            let args: Vec<String> = command.iter().map(|s| s.to_string()).collect();
            match self
                .gateway
                .invoke(&args, self.config.account.as_deref(), self.config.describe_timeout)
                .await
            {
                Ok(value) => {
                    if let Some(names) = list_names(&value).filter(|n| !n.is_empty()) {
                        write_json(&list_path, &json!({ "result": names }))?;
                        info!(count = names.len(), "listed entities");
                        return Ok(names);
                    }
                    debug!(?args, "listing returned no names, trying fallback");
                }
                Err(e) => {
                    warn!(?args, error = %e, "listing command failed");
                    let fatal = matches!(
                        e.kind(),
                        GatewayErrorKind::RateLimited | GatewayErrorKind::Timeout
                    );
                    last_err = Some(e);
                    if fatal {
                        break;
                    }
                }
            }
        }

        Err(match last_err {
            Some(e) => e.into(),
            None => SchemaLibError::validation("entity listing returned no names"),
        })
    }

    /// Describe `names` in paced batches, updating `run`.
    async fn describe_all(&self, names: &[String], run: &mut RunState, progress: &dyn FetchProgress) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let plan = DescribePlan {
            account: self.config.account.clone(),
            api_versions: self.config.api_versions.clone(),
            retries: self.config.retries,
            backoff: self.config.backoff,
            timeout: self.config.describe_timeout,
        };
        let raw_dir = self.raw_dir();
        let total = names.len();

        for (batch_index, batch) in names.chunks(self.config.batch_size.max(1)).enumerate() {
            if run.remote_batch_ran && !self.config.batch_pause.is_zero() {
                info!(
                    batch = batch_index + 1,
                    pause_secs = self.config.batch_pause.as_secs(),
                    "pausing between batches"
                );
                tokio::time::sleep(self.config.batch_pause).await;
            }

            let mut handles = Vec::new();

            for name in batch {
                if run.states.contains_key(name) {
                    continue;
                }
                let path = raw_dir.join(format!("{name}.json"));

                if self.config.resume && path.exists() {
                    match read_json::<EntityDescribe>(&path) {
                        Ok(describe) => {
                            run.states.insert(name.clone(), EntityState::Persisted);
                            run.describes.insert(name.clone(), describe);
                            run.resumed += 1;
                            run.completed += 1;
                            progress.entity_fetched(name, run.completed, total);
                            continue;
                        }
                        Err(e) => {
                            warn!(entity = %name, error = %e, "unreadable raw describe, fetching again");
                        }
                    }
                }

                run.states.insert(name.clone(), EntityState::Pending);

                let gateway = Arc::clone(&self.gateway);
                let sem = Arc::clone(&semaphore);
                let plan = plan.clone();
                let name = name.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = sem.acquire().await.expect("semaphore closed");
                    let outcome = match describe_with_retries(gateway.as_ref(), &name, &plan).await
                    {
                        Ok(describe) => match write_json(&path, &describe) {
                            Ok(()) => TaskOutcome::Persisted(describe),
                            Err(e) => TaskOutcome::Unpersisted(describe, e.to_string()),
                        },
                        Err(message) => TaskOutcome::Failed(message),
                    };
                    (name, outcome)
                }));
            }

            if !handles.is_empty() {
                run.remote_batch_ran = true;
            }

            for handle in handles {
                match handle.await {
                    Ok((name, TaskOutcome::Persisted(describe))) => {
                        run.states.insert(name.clone(), EntityState::Persisted);
                        run.describes.insert(name.clone(), describe);
                        run.described += 1;
                        run.completed += 1;
                        progress.entity_fetched(&name, run.completed, total);
                    }
                    Ok((name, TaskOutcome::Unpersisted(describe, message))) => {
                        // Still usable for this run's schema, but not resumable.
                        warn!(entity = %name, error = %message, "failed to persist describe");
                        run.states.insert(name.clone(), EntityState::Described);
                        run.describes.insert(name.clone(), describe);
                        run.errors.push((name.clone(), message));
                        run.described += 1;
                        run.completed += 1;
                        progress.entity_fetched(&name, run.completed, total);
                    }
                    Ok((name, TaskOutcome::Failed(message))) => {
                        warn!(entity = %name, error = %message, "describe failed");
                        run.states.insert(name.clone(), EntityState::Failed);
                        run.errors.push((name.clone(), message));
                        run.completed += 1;
                        progress.entity_fetched(&name, run.completed, total);
                    }
                    Err(e) => {
                        run.errors.push(("task".into(), e.to_string()));
                    }
                }
            }
        }
    }

    /// `raw/_errors.log`: one failed entity per line; removed when clean.
    fn write_error_log(&self, raw_dir: &Path, errors: &[(String, String)]) -> Result<()> {
        let path = raw_dir.join(ERRORS_FILE);
        if errors.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| SchemaLibError::io(&path, e))?;
            }
            return Ok(());
        }

        let mut body: String = errors
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        body.push('\n');
        write_atomic(&path, body.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// Describe helpers
// ---------------------------------------------------------------------------

/// Names out of a listing response: a list of strings or of `{name}` objects.
fn list_names(value: &Value) -> Option<Vec<String>> {
    let items = result_of(value).unwrap_or(value).as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect(),
    )
}

/// Describe command variants, tried in order until one yields a describe.
fn describe_commands(name: &str, api_versions: &[String]) -> Vec<Vec<String>> {
    let primary: Vec<String> = ["sobject", "describe", "--sobject", name, "--json"]
        .into_iter()
        .map(String::from)
        .collect();
    let legacy: Vec<String> = ["force", "schema", "sobject", "describe", "--sobject", name, "--json"]
        .into_iter()
        .map(String::from)
        .collect();

    let mut commands = vec![primary.clone(), legacy];
    for version in api_versions {
        let mut versioned = primary.clone();
        versioned.push("--api-version".into());
        versioned.push(version.clone());
        commands.push(versioned);
    }
    commands
}

/// The describe object inside a response: `result` when it is an object,
/// else the top level when it carries a `name`.
fn extract_describe(value: &Value) -> Option<EntityDescribe> {
    let candidate = match result_of(value) {
        Some(result) if result.is_object() => result,
        _ if value.get("name").is_some() => value,
        _ => return None,
    };
    match serde_json::from_value(candidate.clone()) {
        Ok(describe) => Some(describe),
        Err(e) => {
            debug!(error = %e, "describe payload did not parse");
            None
        }
    }
}

/// One pass over the describe fallback chain.
async fn describe_once(
    gateway: &dyn Gateway,
    name: &str,
    plan: &DescribePlan,
) -> std::result::Result<EntityDescribe, String> {
    let mut last = String::from("no describe output");
    for args in describe_commands(name, &plan.api_versions) {
        match gateway.invoke(&args, plan.account.as_deref(), plan.timeout).await {
            Ok(value) => {
                if let Some(describe) = extract_describe(&value) {
                    return Ok(describe);
                }
                last = "describe returned no entity".into();
            }
            Err(e) => {
                let kind = e.kind();
                last = e.to_string();
                // Fallbacks only help with command or version mismatches.
                if matches!(kind, GatewayErrorKind::RateLimited | GatewayErrorKind::Timeout) {
                    break;
                }
            }
        }
    }
    Err(last)
}

async fn describe_with_retries(
    gateway: &dyn Gateway,
    name: &str,
    plan: &DescribePlan,
) -> std::result::Result<EntityDescribe, String> {
    let mut attempt = 0;
    loop {
        match describe_once(gateway, name, plan).await {
            Ok(describe) => return Ok(describe),
            Err(message) if attempt < plan.retries => {
                debug!(entity = %name, attempt = attempt + 1, error = %message, "retrying describe");
                plan.backoff.wait(attempt).await;
                attempt += 1;
            }
            Err(message) => return Err(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemalib_gateway::testing::{ScriptedGateway, arg_value, is_list};

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sl-fetch-test-{}", uuid::Uuid::now_v7()))
    }

    fn config(out_root: &Path, mode: FetchMode) -> FetchConfig {
        FetchConfig {
            account: Some("test-org".into()),
            out_root: out_root.to_path_buf(),
            mode,
            prefilter_noise: true,
            ignore_namespaces: vec!["pkg".into()],
            max_objects: None,
            resume: false,
            batch_size: 2,
            batch_pause: Duration::ZERO,
            concurrency: 3,
            retries: 1,
            backoff: BackoffPolicy::exponential(Duration::from_millis(1)),
            api_versions: vec!["64.0".into()],
            describe_timeout: Duration::from_secs(5),
        }
    }

    fn org() -> Vec<Value> {
        vec![
            json!({
                "name": "Account", "label": "Account", "queryable": true,
                "fields": [{"name": "Id", "type": "id"}, {"name": "Name", "type": "string", "nameField": true}],
                "childRelationships": [
                    {"childSObject": "Contact", "field": "AccountId"},
                    {"childSObject": "Opportunity", "field": "AccountId"},
                    {"childSObject": "AccountHistory", "field": "AccountId"}
                ]
            }),
            json!({
                "name": "Contact",
                "fields": [{"name": "AccountId", "type": "reference", "referenceTo": ["Account"]}],
                "childRelationships": []
            }),
            json!({
                "name": "Opportunity",
                "fields": [{"name": "AccountId", "type": "reference", "referenceTo": ["Account"]}],
                "childRelationships": [{"childSObject": "pkg__Quote__c", "field": "Opportunity__c"}]
            }),
            json!({"name": "AccountHistory", "fields": []}),
            json!({"name": "AccountShare", "fields": []}),
            json!({"name": "pkg__Quote__c", "fields": []}),
        ]
    }

    fn sorted_names(report: &FetchReport) -> Vec<&str> {
        report.names.iter().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn all_mode_filters_and_writes_artifacts() {
        let tmp = temp_dir();
        let gateway = Arc::new(ScriptedGateway::catalog(org()));
        let fetcher = EntityFetcher::new(gateway.clone(), config(&tmp, FetchMode::All));

        let report = fetcher.run(&SilentFetchProgress).await.unwrap();

        assert_eq!(sorted_names(&report), vec!["Account", "Contact", "Opportunity"]);
        assert_eq!(report.succeeded(), 3);
        assert!(report.errors.is_empty());
        assert!(tmp.join("raw").join("Account.json").exists());
        assert!(!tmp.join("raw").join("AccountHistory.json").exists());
        assert!(!tmp.join("raw").join("_errors.log").exists());

        let list: Value = read_json(&tmp.join("sobject-list.json")).unwrap();
        assert_eq!(list["result"].as_array().unwrap().len(), 3);

        let schema = crate::schema::load_schema(&report.schema_path).unwrap();
        assert_eq!(schema.len(), 3);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn resumed_run_makes_no_calls_and_same_schema() {
        let tmp = temp_dir();
        let first = Arc::new(ScriptedGateway::catalog(org()));
        let mut cfg = config(&tmp, FetchMode::All);
        cfg.resume = true;

        EntityFetcher::new(first.clone(), cfg.clone())
            .run(&SilentFetchProgress)
            .await
            .unwrap();
        assert!(first.call_count() > 0);
        let schema_before = std::fs::read(tmp.join("schema.json")).unwrap();

        let second = Arc::new(ScriptedGateway::catalog(org()));
        let report = EntityFetcher::new(second.clone(), cfg)
            .run(&SilentFetchProgress)
            .await
            .unwrap();

        assert_eq!(second.call_count(), 0);
        assert_eq!(report.resumed, 3);
        assert_eq!(report.described, 0);
        assert_eq!(std::fs::read(tmp.join("schema.json")).unwrap(), schema_before);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn neighborhood_respects_depth_and_filters() {
        let tmp = temp_dir();

        let seeds = || vec!["Contact".to_string()];
        let at_depth = |depth| FetchMode::Neighborhood {
            seeds: seeds(),
            depth,
        };

        let gateway = Arc::new(ScriptedGateway::catalog(org()));
        let report = EntityFetcher::new(gateway, config(&tmp.join("d0"), at_depth(0)))
            .run(&SilentFetchProgress)
            .await
            .unwrap();
        assert_eq!(sorted_names(&report), vec!["Contact"]);

        let gateway = Arc::new(ScriptedGateway::catalog(org()));
        let report = EntityFetcher::new(gateway, config(&tmp.join("d1"), at_depth(1)))
            .run(&SilentFetchProgress)
            .await
            .unwrap();
        assert_eq!(sorted_names(&report), vec!["Account", "Contact"]);

        // Deeper levels reach Opportunity via Account but never the history
        // table (noise) or the quote (ignored namespace).
        for depth in [2, 3] {
            let gateway = Arc::new(ScriptedGateway::catalog(org()));
            let out = tmp.join(format!("d{depth}"));
            let report = EntityFetcher::new(gateway, config(&out, at_depth(depth)))
                .run(&SilentFetchProgress)
                .await
                .unwrap();
            assert_eq!(sorted_names(&report), vec!["Account", "Contact", "Opportunity"]);
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn batches_are_paced_across_neighborhood_levels() {
        let tmp = temp_dir();
        let mut cfg = config(
            &tmp,
            FetchMode::Neighborhood {
                seeds: vec!["Contact".into()],
                depth: 2,
            },
        );
        cfg.batch_size = 1;
        cfg.batch_pause = Duration::from_millis(60);

        let gateway = Arc::new(ScriptedGateway::catalog(org()));
        let started = Instant::now();
        let report = EntityFetcher::new(gateway, cfg)
            .run(&SilentFetchProgress)
            .await
            .unwrap();

        // One single-entity batch per level: Contact, Account, Opportunity.
        assert_eq!(sorted_names(&report), vec!["Account", "Contact", "Opportunity"]);
        assert!(started.elapsed() >= Duration::from_millis(120));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn unknown_seeds_are_rejected() {
        let tmp = temp_dir();
        let gateway = Arc::new(ScriptedGateway::catalog(org()));
        let mode = FetchMode::Neighborhood {
            seeds: vec!["Nope".into()],
            depth: 1,
        };
        let err = EntityFetcher::new(gateway, config(&tmp, mode))
            .run(&SilentFetchProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("seeds"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_the_run_continues() {
        let tmp = temp_dir();
        let catalog = ScriptedGateway::catalog(org());
        let gateway = Arc::new(ScriptedGateway::new(move |args| {
            if is_list(args) {
                return Ok(json!({"result": ["Account", "Broken"]}));
            }
            if arg_value(args, "--sobject") == Some("Broken") {
                return Err(GatewayError::Malformed("garbage".into()));
            }
            catalog.respond(args)
        }));

        let report = EntityFetcher::new(gateway.clone(), config(&tmp, FetchMode::All))
            .run(&SilentFetchProgress)
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.states.get("Broken"), Some(&EntityState::Failed));
        assert_eq!(report.errors.len(), 1);
        let log = std::fs::read_to_string(tmp.join("raw").join("_errors.log")).unwrap();
        assert_eq!(log, "Broken\n");

        // 1 listing + Account + Broken: (3 variants) x (1 + 1 retry)
        assert_eq!(gateway.call_count(), 1 + 1 + 6);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn max_objects_truncates_the_listing() {
        let tmp = temp_dir();
        let gateway = Arc::new(ScriptedGateway::catalog(org()));
        let mut cfg = config(&tmp, FetchMode::All);
        cfg.max_objects = Some(1);

        let report = EntityFetcher::new(gateway, cfg)
            .run(&SilentFetchProgress)
            .await
            .unwrap();
        assert_eq!(sorted_names(&report), vec!["Account"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn describe_chain_order() {
        let commands = describe_commands("Account", &["64.0".into(), "63.0".into()]);
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0][0], "sobject");
        assert_eq!(commands[1][0], "force");
        assert_eq!(commands[3].last().map(String::as_str), Some("63.0"));
    }

    #[test]
    fn describe_extraction_shapes() {
        assert!(extract_describe(&json!({"result": {"name": "A"}})).is_some());
        assert!(extract_describe(&json!({"name": "A", "fields": []})).is_some());
        assert!(extract_describe(&json!({"result": []})).is_none());
        assert!(extract_describe(&json!({"status": 1})).is_none());
    }

    #[test]
    fn listing_shapes() {
        let names = list_names(&json!({"result": ["A", {"name": "B"}, 3]})).unwrap();
        assert_eq!(names, vec!["A", "B"]);
        assert!(list_names(&json!({"result": {"x": 1}})).is_none());
    }
}
