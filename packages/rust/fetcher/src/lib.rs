//! Resumable entity listing and describe orchestration.
//!
//! This crate provides:
//! - [`filter`]: noise and namespace filtering of entity names
//! - [`engine`]: the batched, bounded-concurrency [`EntityFetcher`]
//! - [`schema`]: the combined `schema.json` artifact (write, load, rebuild)

pub mod engine;
pub mod filter;
pub mod schema;

pub use engine::{EntityFetcher, EntityState, FetchProgress, FetchReport, SilentFetchProgress};
pub use filter::{EntityFilter, NOISE_EXACT, NOISE_SUFFIXES, is_noise};
pub use schema::{combine_raw, load_schema, write_schema};
