use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use schemalib_shared::io::{csv_row, write_atomic};
use schemalib_shared::{Result, UsageSummary};

const COUNTS_FILE: &str = "object_counts.csv";
const FILLS_FILE: &str = "field_fill_rates.csv";

/// Write `object_counts.csv` and `field_fill_rates.csv` under `out_root`.
/// Rows are ordered by entity name (case-insensitive); fill rows within an
/// entity keep their ranking.
pub fn write_usage_rollups(out_root: &Path, summaries: &BTreeMap<String, UsageSummary>) -> Result<()> {
    let mut names: Vec<&String> = summaries.keys().collect();
    names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));

    let mut counts = csv_row(&["object", "count", "sampled", "queryable"]);
    counts.push('\n');
    let mut fills = csv_row(&["object", "field", "non_null_pct", "sample_size", "non_null_count"]);
    fills.push('\n');

    for name in names {
        let summary = &summaries[name];
        counts.push_str(&csv_row(&[
            name.clone(),
            summary.object_count.map(|c| c.to_string()).unwrap_or_default(),
            summary.sampled_count.to_string(),
            summary.queryable.to_string(),
        ]));
        counts.push('\n');

        for rate in &summary.field_fill_rates_top {
            fills.push_str(&csv_row(&[
                name.clone(),
                rate.field.clone(),
                rate.non_null_pct.to_string(),
                rate.sample_size.to_string(),
                rate.non_null.to_string(),
            ]));
            fills.push('\n');
        }
    }

    write_atomic(&out_root.join(COUNTS_FILE), counts.as_bytes())?;
    write_atomic(&out_root.join(FILLS_FILE), fills.as_bytes())?;
    debug!(entities = summaries.len(), "wrote usage rollups");
    Ok(())
}
