//! Record counts and sampled field fill rates per entity.
//!
//! This crate provides:
//! - [`UsageSampler`]: count + sample queries with a fallback ladder,
//!   resumable through `stats/<name>.usage.json` and cached in the
//!   [`SmartCache`](schemalib_cache::SmartCache)
//! - [`fill_rates`] / [`top_fill_rates`]: the fill-rate arithmetic
//! - [`write_usage_rollups`]: `object_counts.csv` and `field_fill_rates.csv`

mod fill;
mod rollup;
mod sampler;

pub use fill::{fill_rates, top_fill_rates};
pub use rollup::write_usage_rollups;
pub use sampler::{SilentUsageProgress, UsageProgress, UsageReport, UsageSampler, UsageSource};
