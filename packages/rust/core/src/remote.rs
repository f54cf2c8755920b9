//! Query plumbing shared by the automation and security collectors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use schemalib_cache::SmartCache;
use schemalib_gateway::{Gateway, QueryApi, query, records_of};

/// Entity names per `IN (...)` clause.
pub const IN_BATCH_SIZE: usize = 100;

/// Gateway, optional cache, and call settings for metadata queries.
#[derive(Clone)]
pub struct RemoteContext {
    pub gateway: Arc<dyn Gateway>,
    pub cache: Option<Arc<SmartCache>>,
    pub account: Option<String>,
    pub timeout: Duration,
}

impl RemoteContext {
    /// Records of `soql`, or `None` (logged) when the query fails.
    pub(crate) async fn records(&self, what: &str, soql: &str, api: QueryApi) -> Option<Vec<Value>> {
        match query(
            self.gateway.as_ref(),
            soql,
            self.account.as_deref(),
            api,
            self.timeout,
        )
        .await
        {
            Ok(response) => Some(records_of(&response).to_vec()),
            Err(e) => {
                warn!(query = what, error = %e, "metadata query failed, continuing without it");
                None
            }
        }
    }

    pub(crate) fn cached<T: DeserializeOwned>(&self, entity: &str, operation: &str) -> Option<T> {
        self.cache.as_ref()?.get_as(entity, operation, &[])
    }

    pub(crate) fn store<T: Serialize>(&self, entity: &str, operation: &str, value: &T) {
        if let Some(cache) = &self.cache {
            cache.put_as(entity, operation, &[], value);
        }
    }
}

/// What one `IN (...)` batch produced.
pub(crate) struct Batch<T> {
    pub by_entity: BTreeMap<String, T>,
    /// Every query of the batch succeeded; only complete batches are cached.
    pub complete: bool,
}

/// Per-entity results of a batched collector run.
#[derive(Debug, Clone, Default)]
pub struct Collected<T> {
    pub by_entity: BTreeMap<String, T>,
    /// Entities answered from the cache.
    pub cached: usize,
    /// Entities whose data is complete (cached or from a fully successful batch).
    pub complete: usize,
}

impl RemoteContext {
    /// Serve `names` from the cache where possible, query the rest in
    /// batches of [`IN_BATCH_SIZE`], and cache complete results per entity.
    /// Every name gets an entry; entities without data get `T::default()`.
    pub(crate) async fn collect_batched<T, F, Fut>(
        &self,
        operation: &str,
        names: &[String],
        mut fetch_batch: F,
    ) -> Collected<T>
    where
        T: Default + Serialize + DeserializeOwned,
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = Batch<T>>,
    {
        let mut collected = Collected {
            by_entity: BTreeMap::new(),
            cached: 0,
            complete: 0,
        };
        let mut pending = Vec::new();
        for name in names {
            match self.cached::<T>(name, operation) {
                Some(value) => {
                    collected.by_entity.insert(name.clone(), value);
                    collected.cached += 1;
                }
                None => pending.push(name.clone()),
            }
        }
        collected.complete = collected.cached;
        debug!(operation, cached = collected.cached, pending = pending.len(), "cache pass done");

        for batch_names in pending.chunks(IN_BATCH_SIZE) {
            let mut batch = fetch_batch(batch_names.to_vec()).await;
            for name in batch_names {
                let value = batch.by_entity.remove(name).unwrap_or_default();
                if batch.complete {
                    self.store(name, operation, &value);
                    collected.complete += 1;
                }
                collected.by_entity.insert(name.clone(), value);
            }
        }
        collected
    }
}

/// String at a JSON pointer.
pub(crate) fn str_at<'a>(record: &'a Value, pointer: &str) -> Option<&'a str> {
    record.pointer(pointer).and_then(Value::as_str)
}

/// Boolean at a JSON pointer; absent or non-boolean is `false`.
pub(crate) fn bool_at(record: &Value, pointer: &str) -> bool {
    record.pointer(pointer).and_then(Value::as_bool).unwrap_or(false)
}
