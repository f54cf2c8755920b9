//! Token-bounded corpus emission for semantic indexing.
//!
//! This crate provides:
//! - [`TokenEstimator`]: heuristic or exact (feature `hf-tokenizer`) counts
//! - [`Splitter`]: line/whitespace splitting with overlap and exact reassembly
//! - [`ChunkEmitter`] / [`emit_corpus`]: per-entity markdown and `chunks.jsonl`
//! - [`CorpusUploader`]: batched embedding + vector upsert with retries

mod emit;
mod render;
mod split;
mod tokens;
pub mod upload;

pub use emit::{Chunk, ChunkEmitter, ChunkMetadata, CorpusReport, EmitOptions, emit_corpus, read_chunks};
pub use render::{inbound_sentence, md_escape, outbound_sentence, sanitize_filename};
pub use split::{Splitter, TextPart, reassemble};
pub use tokens::TokenEstimator;
pub use upload::{
    CorpusUploader, Embedder, SilentUploadProgress, UploadProgress, UploadReport, VectorRecord,
    VectorSink,
};
