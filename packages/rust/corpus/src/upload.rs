//! Hands finished chunks to an embedding service and a vector store.
//!
//! Both collaborators sit behind traits; index creation and deletion are
//! the store's business, not the uploader's.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use schemalib_shared::{Result, SchemaLibError, UploadConfig};

use crate::emit::Chunk;

/// Turns texts into vectors, one per input, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Stores vectors by id, replacing existing ids.
#[async_trait]
pub trait VectorSink: Send + Sync {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub batches: usize,
    pub batches_failed: usize,
    pub records_sent: usize,
    pub records_failed: usize,
    pub duration: Duration,
}

/// Per-batch progress callback.
pub trait UploadProgress: Send + Sync {
    fn batch_done(&self, batch: usize, total: usize, ok: bool);
}

pub struct SilentUploadProgress;

impl UploadProgress for SilentUploadProgress {
    fn batch_done(&self, _batch: usize, _total: usize, _ok: bool) {}
}

pub struct CorpusUploader {
    embedder: Arc<dyn Embedder>,
    sink: Arc<dyn VectorSink>,
    config: UploadConfig,
}

impl CorpusUploader {
    pub fn new(embedder: Arc<dyn Embedder>, sink: Arc<dyn VectorSink>, config: UploadConfig) -> Self {
        Self {
            embedder,
            sink,
            config,
        }
    }

    /// Embed and upsert `chunks` in batches. A batch that still fails after
    /// its retries is counted and skipped; the rest continue.
    #[instrument(skip_all, fields(chunks = chunks.len()))]
    pub async fn upload(&self, chunks: &[Chunk], progress: &dyn UploadProgress) -> UploadReport {
        let start = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let total = chunks.len().div_ceil(batch_size);
        let mut report = UploadReport::default();

        for (index, batch) in chunks.chunks(batch_size).enumerate() {
            report.batches += 1;
            let ok = self.send_with_retries(index + 1, batch).await;
            if ok {
                report.records_sent += batch.len();
            } else {
                report.batches_failed += 1;
                report.records_failed += batch.len();
            }
            progress.batch_done(index + 1, total, ok);
        }

        report.duration = start.elapsed();
        info!(
            batches = report.batches,
            failed_batches = report.batches_failed,
            sent = report.records_sent,
            failed = report.records_failed,
            "upload complete"
        );
        report
    }

    async fn send_with_retries(&self, batch_no: usize, batch: &[Chunk]) -> bool {
        for attempt in 0..=self.config.max_retries {
            match self.send(batch).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(batch = batch_no, attempt, error = %e, "upload batch failed");
                    if attempt < self.config.max_retries {
                        self.config.backoff.wait(attempt).await;
                    }
                }
            }
        }
        false
    }

    async fn send(&self, batch: &[Chunk]) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(SchemaLibError::Upload(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| VectorRecord {
                id: chunk.id.clone(),
                values,
                metadata: record_metadata(chunk),
            })
            .collect();
        self.sink.upsert(&records).await
    }
}

/// Chunk metadata plus object, section, text and a SHA-256 of the text.
pub fn record_metadata(chunk: &Chunk) -> Map<String, Value> {
    let mut metadata = match serde_json::to_value(&chunk.metadata) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    metadata.insert("object".into(), Value::from(chunk.object.as_str()));
    metadata.insert("section".into(), Value::from(chunk.section.as_str()));
    metadata.insert("text".into(), Value::from(chunk.text.as_str()));
    metadata.insert("contentHash".into(), Value::from(content_hash(&chunk.text)));
    metadata
}

pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
