//! The usage sampler.
//!
//! For each entity: reuse a persisted summary (resume), else a cached one,
//! else query. Non-queryable entities never reach the gateway. The query
//! ladder is `COUNT()`, then `FIELDS(ALL)` sampling with retries, then an
//! explicit field list. Nothing in this stage is a hard failure: an entity
//! whose queries all fail still gets a summary, just an emptier one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use schemalib_cache::SmartCache;
use schemalib_gateway::{Gateway, QueryApi, query, records_of, total_size_of};
use schemalib_shared::io::{ensure_dir, read_json, write_json};
use schemalib_shared::{
    BackoffPolicy, EntityDescribe, GatewayError, Result, UsageConfig, UsageSummary,
};

use crate::fill::{fill_rates, top_fill_rates};
use crate::rollup::write_usage_rollups;

const STATS_DIR: &str = "stats";
const CACHE_OP: &str = "stats";
const QUERY_BACKOFF: Duration = Duration::from_millis(100);

/// Where a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSource {
    Resumed,
    Cached,
    NotQueryable,
    Sampled,
}

/// Outcome of [`UsageSampler::summarize_all`].
#[derive(Debug, Clone, Default)]
pub struct UsageReport {
    pub summaries: BTreeMap<String, UsageSummary>,
    pub resumed: usize,
    pub cached: usize,
    pub not_queryable: usize,
    pub sampled: usize,
    /// Entities whose count query never succeeded.
    pub count_failures: usize,
    pub duration: Duration,
}

/// Per-entity progress callback.
pub trait UsageProgress: Send + Sync {
    fn entity_sampled(&self, name: &str, current: usize, total: usize);
}

/// No-op [`UsageProgress`].
pub struct SilentUsageProgress;

impl UsageProgress for SilentUsageProgress {
    fn entity_sampled(&self, _name: &str, _current: usize, _total: usize) {}
}

#[derive(Clone)]
pub struct UsageSampler {
    gateway: Arc<dyn Gateway>,
    cache: Option<Arc<SmartCache>>,
    config: UsageConfig,
}

impl UsageSampler {
    pub fn new(gateway: Arc<dyn Gateway>, config: UsageConfig) -> Self {
        Self {
            gateway,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SmartCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.config.out_root.join(STATS_DIR)
    }

    /// Usage summary for one entity. Always produces a summary.
    pub async fn summarize(&self, entity: &EntityDescribe) -> UsageSummary {
        self.summarize_traced(entity).await.0
    }

    /// Summaries for every entity on the bounded worker pool, then the CSV
    /// rollups under the output root.
    #[instrument(skip_all, fields(entities = entities.len()))]
    pub async fn summarize_all(
        &self,
        entities: &[EntityDescribe],
        progress: &dyn UsageProgress,
    ) -> Result<UsageReport> {
        let start = Instant::now();
        ensure_dir(&self.stats_dir())?;

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(entities.len());
        for entity in entities {
            let sampler = self.clone();
            let sem = Arc::clone(&semaphore);
            let entity = entity.clone();
            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let (summary, source) = sampler.summarize_traced(&entity).await;
                (entity.name, summary, source)
            }));
        }

        let total = handles.len();
        let mut report = UsageReport::default();
        for (done, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok((name, summary, source)) => {
                    match source {
                        UsageSource::Resumed => report.resumed += 1,
                        UsageSource::Cached => report.cached += 1,
                        UsageSource::NotQueryable => report.not_queryable += 1,
                        UsageSource::Sampled => report.sampled += 1,
                    }
                    if summary.queryable && summary.object_count.is_none() {
                        report.count_failures += 1;
                    }
                    progress.entity_sampled(&name, done + 1, total);
                    report.summaries.insert(name, summary);
                }
                Err(e) => warn!(error = %e, "usage task failed"),
            }
        }

        write_usage_rollups(&self.config.out_root, &report.summaries)?;
        report.duration = start.elapsed();

        info!(
            entities = report.summaries.len(),
            sampled = report.sampled,
            resumed = report.resumed,
            cached = report.cached,
            not_queryable = report.not_queryable,
            duration_ms = report.duration.as_millis() as u64,
            "usage sampling complete"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(entity = %entity.name))]
    async fn summarize_traced(&self, entity: &EntityDescribe) -> (UsageSummary, UsageSource) {
        let path = self.stats_dir().join(format!("{}.usage.json", entity.name));

        if self.config.resume && path.exists() {
            match read_json::<UsageSummary>(&path) {
                Ok(summary) => {
                    debug!("reusing persisted usage summary");
                    return (summary, UsageSource::Resumed);
                }
                Err(e) => warn!(error = %e, "unreadable usage summary, sampling again"),
            }
        }

        let sample_size = self.config.sample_size.to_string();
        let params = [("sample_size", sample_size.as_str())];

        if let Some(summary) = self
            .cache
            .as_ref()
            .and_then(|c| c.get_as::<UsageSummary>(&entity.name, CACHE_OP, &params))
        {
            self.persist(&path, &summary);
            return (summary, UsageSource::Cached);
        }

        if !entity.queryable {
            let summary = UsageSummary {
                generated_at: Some(Utc::now()),
                ..UsageSummary::not_queryable()
            };
            self.persist(&path, &summary);
            return (summary, UsageSource::NotQueryable);
        }

        let object_count = self.count(&entity.name).await;
        let records = self.sample(entity).await;
        let top = top_fill_rates(fill_rates(&entity.fields, &records), self.config.top_n);

        let summary = UsageSummary {
            queryable: true,
            object_count,
            sampled_count: records.len(),
            field_fill_rates_top: top,
            generated_at: Some(Utc::now()),
        };
        debug!(
            count = ?summary.object_count,
            sampled = summary.sampled_count,
            "usage sampled"
        );

        self.persist(&path, &summary);
        if let Some(cache) = &self.cache {
            cache.put_as(&entity.name, CACHE_OP, &params, &summary);
        }
        (summary, UsageSource::Sampled)
    }

    async fn count(&self, name: &str) -> Option<u64> {
        let soql = format!("SELECT COUNT() FROM {name}");
        let backoff = BackoffPolicy::exponential(QUERY_BACKOFF);

        for attempt in 0..=self.config.retries {
            match self.run_query(&soql).await {
                Ok(response) => {
                    if let Some(total) = total_size_of(&response) {
                        return Some(total);
                    }
                    debug!(attempt, "count response without totalSize");
                }
                Err(e) => debug!(attempt, error = %e, "count query failed"),
            }
            if attempt < self.config.retries {
                backoff.wait(attempt).await;
            }
        }
        warn!(entity = name, "record count unavailable");
        None
    }

    async fn sample(&self, entity: &EntityDescribe) -> Vec<Value> {
        let suffix = self.sample_suffix();
        let backoff = BackoffPolicy::exponential(QUERY_BACKOFF);

        let soql = format!("SELECT FIELDS(ALL) FROM {} {suffix}", entity.name);
        for attempt in 0..=self.config.retries {
            match self.run_query(&soql).await {
                Ok(response) if !records_of(&response).is_empty() => {
                    return records_of(&response).to_vec();
                }
                Ok(_) => debug!(attempt, "FIELDS(ALL) sample came back empty"),
                Err(e) => debug!(attempt, error = %e, "FIELDS(ALL) sample failed"),
            }
            if attempt < self.config.retries {
                backoff.wait(attempt).await;
            }
        }

        let explicit: Vec<&str> = entity
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .filter(|n| !n.is_empty())
            .take(self.config.explicit_field_limit.max(1))
            .collect();
        if explicit.is_empty() {
            return Vec::new();
        }

        let soql = format!("SELECT {} FROM {} {suffix}", explicit.join(", "), entity.name);
        match self.run_query(&soql).await {
            Ok(response) => records_of(&response).to_vec(),
            Err(e) => {
                warn!(error = %e, "explicit-field sample failed, fill rates will be empty");
                Vec::new()
            }
        }
    }

    fn sample_suffix(&self) -> String {
        match &self.config.order_by {
            Some(order) => format!("ORDER BY {order} LIMIT {}", self.config.sample_size),
            None => format!("LIMIT {}", self.config.sample_size),
        }
    }

    async fn run_query(&self, soql: &str) -> std::result::Result<Value, GatewayError> {
        query(
            self.gateway.as_ref(),
            soql,
            self.config.account.as_deref(),
            QueryApi::Data,
            self.config.query_timeout,
        )
        .await
    }

    fn persist(&self, path: &Path, summary: &UsageSummary) {
        if let Err(e) = write_json(path, summary) {
            warn!(path = %path.display(), error = %e, "failed to persist usage summary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemalib_gateway::testing::{ScriptedGateway, query_text};
    use schemalib_shared::CacheConfig;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sl-usage-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(out_root: &Path) -> UsageConfig {
        UsageConfig {
            account: Some("dev".into()),
            out_root: out_root.to_path_buf(),
            sample_size: 3,
            order_by: Some("LastModifiedDate DESC".into()),
            explicit_field_limit: 2,
            top_n: 2,
            retries: 1,
            resume: false,
            concurrency: 4,
            query_timeout: Duration::from_secs(5),
        }
    }

    fn lead() -> EntityDescribe {
        serde_json::from_value(json!({
            "name": "Lead",
            "fields": [
                {"name": "Id", "type": "id"},
                {"name": "Email", "type": "email"},
                {"name": "Company", "type": "string"}
            ]
        }))
        .unwrap()
    }

    fn healthy_org() -> ScriptedGateway {
        ScriptedGateway::new(|args| {
            let soql = query_text(args).unwrap_or_default();
            if soql.starts_with("SELECT COUNT()") {
                return Ok(json!({"result": {"totalSize": 42, "records": []}}));
            }
            Ok(json!({"result": {"totalSize": 3, "records": [
                {"Id": "1", "Email": "a@x.io", "Company": ""},
                {"Id": "2", "Email": null, "Company": "Acme"},
                {"Id": "3", "Email": "c@x.io", "Company": null}
            ]}}))
        })
    }

    #[tokio::test]
    async fn samples_count_and_ranks_fields() {
        let tmp = temp_dir();
        let gateway = Arc::new(healthy_org());
        let sampler = UsageSampler::new(gateway.clone(), config(&tmp));

        let summary = sampler.summarize(&lead()).await;
        assert_eq!(summary.object_count, Some(42));
        assert_eq!(summary.sampled_count, 3);
        let top: Vec<_> = summary
            .field_fill_rates_top
            .iter()
            .map(|r| (r.field.as_str(), r.non_null))
            .collect();
        assert_eq!(top, vec![("Id", 3), ("Email", 2)]);

        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            query_text(&calls[1]),
            Some("SELECT FIELDS(ALL) FROM Lead ORDER BY LastModifiedDate DESC LIMIT 3")
        );
        assert!(tmp.join("stats/Lead.usage.json").exists());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn non_queryable_entities_make_no_calls() {
        let tmp = temp_dir();
        let gateway = Arc::new(healthy_org());
        let sampler = UsageSampler::new(gateway.clone(), config(&tmp));

        let mut entity = lead();
        entity.queryable = false;
        let summary = sampler.summarize(&entity).await;

        assert!(!summary.queryable);
        assert_eq!(summary.object_count, None);
        assert_eq!(summary.sampled_count, 0);
        assert_eq!(gateway.call_count(), 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn falls_back_to_explicit_fields() {
        let tmp = temp_dir();
        let gateway = Arc::new(ScriptedGateway::new(|args| {
            let soql = query_text(args).unwrap_or_default();
            if soql.contains("FIELDS(ALL)") || soql.contains("COUNT()") {
                return Err(GatewayError::NonZeroExit {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "MALFORMED_QUERY".into(),
                });
            }
            Ok(json!({"result": {"records": [{"Id": "1", "Email": "a@x.io"}]}}))
        }));
        let sampler = UsageSampler::new(gateway.clone(), config(&tmp));

        let summary = sampler.summarize(&lead()).await;
        assert_eq!(summary.object_count, None);
        assert_eq!(summary.sampled_count, 1);

        let last = gateway.calls().pop().unwrap();
        assert_eq!(
            query_text(&last),
            Some("SELECT Id, Email FROM Lead ORDER BY LastModifiedDate DESC LIMIT 3")
        );
        // count: 2 attempts, FIELDS(ALL): 2 attempts, explicit: 1
        assert_eq!(gateway.call_count(), 5);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn total_failure_still_emits_a_summary() {
        let tmp = temp_dir();
        let gateway = Arc::new(ScriptedGateway::new(|_| {
            Err(GatewayError::Malformed("garbage".into()))
        }));
        let sampler = UsageSampler::new(gateway, config(&tmp));

        let summary = sampler.summarize(&lead()).await;
        assert!(summary.queryable);
        assert_eq!(summary.sampled_count, 0);
        assert!(summary.field_fill_rates_top.is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn resume_and_cache_skip_queries() {
        let tmp = temp_dir();
        let cache = Arc::new(
            SmartCache::open(&CacheConfig {
                dir: tmp.join("cache"),
                max_age: Duration::from_secs(3600),
                compression: true,
            })
            .unwrap(),
        );

        let first = Arc::new(healthy_org());
        let sampler = UsageSampler::new(first, config(&tmp)).with_cache(Arc::clone(&cache));
        let original = sampler.summarize(&lead()).await;

        // Same cache, fresh output root: served from cache.
        let other_root = tmp.join("second");
        let second = Arc::new(healthy_org());
        let cached = UsageSampler::new(second.clone(), config(&other_root))
            .with_cache(Arc::clone(&cache))
            .summarize(&lead())
            .await;
        assert_eq!(cached, original);
        assert_eq!(second.call_count(), 0);
        assert!(other_root.join("stats/Lead.usage.json").exists());

        // No cache, resume on: served from the persisted file.
        let third = Arc::new(healthy_org());
        let mut resumed_config = config(&tmp);
        resumed_config.resume = true;
        let resumed = UsageSampler::new(third.clone(), resumed_config)
            .summarize(&lead())
            .await;
        assert_eq!(resumed, original);
        assert_eq!(third.call_count(), 0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn summarize_all_writes_rollups() {
        let tmp = temp_dir();
        let sampler = UsageSampler::new(Arc::new(healthy_org()), config(&tmp));

        let mut setup: EntityDescribe = lead();
        setup.name = "SetupEntityAccess".into();
        setup.queryable = false;

        let report = sampler
            .summarize_all(&[lead(), setup], &SilentUsageProgress)
            .await
            .unwrap();
        assert_eq!(report.summaries.len(), 2);
        assert_eq!(report.sampled, 1);
        assert_eq!(report.not_queryable, 1);

        let counts = std::fs::read_to_string(tmp.join("object_counts.csv")).unwrap();
        assert_eq!(
            counts,
            "object,count,sampled,queryable\nLead,42,3,true\nSetupEntityAccess,,0,false\n"
        );
        let fills = std::fs::read_to_string(tmp.join("field_fill_rates.csv")).unwrap();
        assert!(fills.starts_with("object,field,non_null_pct,sample_size,non_null_count\n"));
        assert!(fills.contains("Lead,Id,1,3,3\n"));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
