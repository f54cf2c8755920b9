//! CSV rollups of the relationship graph.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::info;

use schemalib_shared::io::{csv_row, write_atomic};
use schemalib_shared::{EntityDescribe, EntityRelationshipSummary, RelationshipEdge, Result};

use crate::{RelationshipGraph, summarize_object};

const EDGE_HEADER: &[&str] = &["source", "field", "target", "type", "polymorphic", "extraInfo"];

const NODE_HEADER: &[&str] = &[
    "object",
    "label",
    "custom",
    "nameField",
    "fieldTypeCounts",
    "outbound_count",
    "inbound_count",
    "outbound_polymorphic_count",
    "outbound_clean_count",
    "inbound_clean_count",
    "isLikelyJunction",
];

/// Row counts of the four rollup files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupReport {
    pub edges: usize,
    pub edges_clean: usize,
    pub nodes: usize,
    pub nodes_clean: usize,
}

/// Write `edges.csv`, `edges.clean.csv`, `nodes.csv` and `nodes.clean.csv`
/// under `out_root`. `included` selects the clean subset.
pub fn write_rollups(
    out_root: &Path,
    entities: &[EntityDescribe],
    graph: &RelationshipGraph,
    included: &BTreeSet<String>,
) -> Result<RollupReport> {
    let clean = graph.clean(included);

    let report = RollupReport {
        edges: write_edges_csv(&out_root.join("edges.csv"), graph.edges())?,
        edges_clean: write_edges_csv(
            &out_root.join("edges.clean.csv"),
            clean.values().flat_map(|s| s.outbound.iter()),
        )?,
        nodes: write_nodes_csv(&out_root.join("nodes.csv"), entities, graph.summaries(), &clean)?,
        nodes_clean: write_nodes_csv(
            &out_root.join("nodes.clean.csv"),
            entities.iter().filter(|e| included.contains(&e.name)),
            graph.summaries(),
            &clean,
        )?,
    };

    info!(
        edges = report.edges,
        edges_clean = report.edges_clean,
        nodes = report.nodes,
        nodes_clean = report.nodes_clean,
        "wrote graph rollups"
    );
    Ok(report)
}

/// One row per edge, sorted by source, field, target.
pub fn write_edges_csv<'a>(
    path: &Path,
    edges: impl IntoIterator<Item = &'a RelationshipEdge>,
) -> Result<usize> {
    let mut edges: Vec<&RelationshipEdge> = edges.into_iter().collect();
    edges.sort_by(|a, b| (&a.source, &a.field, &a.target).cmp(&(&b.source, &b.field, &b.target)));

    let mut out = csv_row(EDGE_HEADER);
    out.push('\n');
    for edge in &edges {
        out.push_str(&csv_row(&[
            edge.source.as_str(),
            edge.field.as_str(),
            edge.target.as_str(),
            edge.kind.label(),
            bool_str(edge.polymorphic),
            edge.extra_type_info.as_deref().unwrap_or(""),
        ]));
        out.push('\n');
    }

    write_atomic(path, out.as_bytes())?;
    Ok(edges.len())
}

/// One row per entity, sorted case-insensitively by name. Clean counts are
/// zero for entities outside the clean subset.
pub fn write_nodes_csv<'a>(
    path: &Path,
    entities: impl IntoIterator<Item = &'a EntityDescribe>,
    full: &BTreeMap<String, EntityRelationshipSummary>,
    clean: &BTreeMap<String, EntityRelationshipSummary>,
) -> Result<usize> {
    let mut entities: Vec<&EntityDescribe> = entities.into_iter().collect();
    entities.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut out = csv_row(NODE_HEADER);
    out.push('\n');
    for entity in &entities {
        let summary = summarize_object(entity);
        let rels = full.get(&entity.name);
        let clean_rels = clean.get(&entity.name);
        let type_counts =
            serde_json::to_string(&summary.field_type_counts).unwrap_or_else(|_| "{}".into());

        out.push_str(&csv_row(&[
            entity.name.clone(),
            summary.label.unwrap_or_default(),
            bool_str(summary.custom).to_string(),
            summary.name_field.unwrap_or_default(),
            type_counts,
            rels.map_or(0, |r| r.outbound.len()).to_string(),
            rels.map_or(0, |r| r.inbound.len()).to_string(),
            rels.map_or(0, |r| r.outbound.iter().filter(|e| e.polymorphic).count())
                .to_string(),
            clean_rels.map_or(0, |r| r.outbound.len()).to_string(),
            clean_rels.map_or(0, |r| r.inbound.len()).to_string(),
            bool_str(rels.is_some_and(|r| r.is_junction)).to_string(),
        ]));
        out.push('\n');
    }

    write_atomic(path, out.as_bytes())?;
    Ok(entities.len())
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}
