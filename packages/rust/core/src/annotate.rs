//! Per-entity `objects/<name>.json` files plus the graph-level artifacts
//! (`relationships-index.json`, `sobject-list.clean.json`, CSV rollups).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use schemalib_fetcher::EntityFilter;
use schemalib_graph::{RelationshipGraph, RollupReport, summarize_object, write_rollups};
use schemalib_shared::io::{ensure_dir, write_json};
use schemalib_shared::{
    AnnotatedEntity, AutomationSummary, EntityDescribe, EntityRelationshipSummary,
    RelationshipMetadata, Result, SecuritySummary, UsageSummary,
};

pub const OBJECTS_DIR: &str = "objects";
const INDEX_FILE: &str = "relationships-index.json";
const CLEAN_LIST_FILE: &str = "sobject-list.clean.json";

/// Optional per-entity results of the stages that ran.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageData<'a> {
    pub usage: Option<&'a BTreeMap<String, UsageSummary>>,
    pub automation: Option<&'a BTreeMap<String, AutomationSummary>>,
    pub security: Option<&'a BTreeMap<String, SecuritySummary>>,
}

#[derive(Debug, Clone, Default)]
pub struct AnnotateReport {
    /// `objects/*.json` files written.
    pub objects: usize,
    /// Entities whose object file could not be written (entity, message).
    pub failed: Vec<(String, String)>,
    /// Entities in the clean subset.
    pub included: usize,
    pub junctions: usize,
    pub rollups: RollupReport,
}

/// Write every annotated entity and the graph-level artifacts under `out_root`.
/// The clean subset is the entities `filter` admits.
#[instrument(skip_all, fields(entities = entities.len(), out = %out_root.display()))]
pub fn write_annotations(
    out_root: &Path,
    entities: &[EntityDescribe],
    graph: &RelationshipGraph,
    filter: &EntityFilter,
    stages: StageData<'_>,
) -> Result<AnnotateReport> {
    let included: BTreeSet<String> = entities
        .iter()
        .filter(|e| filter.admits(&e.name))
        .map(|e| e.name.clone())
        .collect();
    let clean = graph.clean(&included);

    let objects_dir = out_root.join(OBJECTS_DIR);
    ensure_dir(&objects_dir)?;

    let mut report = AnnotateReport {
        included: included.len(),
        ..AnnotateReport::default()
    };
    for entity in entities {
        let annotated = annotate(entity, graph, &clean, filter, stages);
        if annotated.metadata.is_likely_junction {
            report.junctions += 1;
        }
        let path = objects_dir.join(format!("{}.json", entity.name));
        match write_json(&path, &annotated) {
            Ok(()) => report.objects += 1,
            Err(e) => {
                warn!(entity = %entity.name, error = %e, "failed to write object file");
                report.failed.push((entity.name.clone(), e.to_string()));
            }
        }
    }

    let index: Vec<_> = graph
        .summaries()
        .iter()
        .map(|(name, summary)| {
            json!({
                "name": name,
                "outbound": summary.outbound.len(),
                "inbound": summary.inbound.len(),
                "isLikelyJunction": summary.is_junction,
            })
        })
        .collect();
    let junctions: Vec<&String> = graph
        .summaries()
        .iter()
        .filter(|(_, s)| s.is_junction)
        .map(|(name, _)| name)
        .collect();
    write_json(
        &out_root.join(INDEX_FILE),
        &json!({
            "generatedAt": Utc::now().to_rfc3339(),
            "objectCount": index.len(),
            "objects": index,
            "junctions": junctions,
        }),
    )?;
    write_json(&out_root.join(CLEAN_LIST_FILE), &json!({ "result": included }))?;

    report.rollups = write_rollups(out_root, entities, graph, &included)?;

    info!(
        objects = report.objects,
        failed = report.failed.len(),
        included = report.included,
        junctions = report.junctions,
        "annotations written"
    );
    Ok(report)
}

/// The persisted form of one entity: describe with fields sorted by name and
/// child relationships by (child, field), plus its `_relationshipMetadata`.
pub fn annotate(
    entity: &EntityDescribe,
    graph: &RelationshipGraph,
    clean: &BTreeMap<String, EntityRelationshipSummary>,
    filter: &EntityFilter,
    stages: StageData<'_>,
) -> AnnotatedEntity {
    let mut describe = entity.clone();
    describe.fields.sort_by(|a, b| a.name.cmp(&b.name));
    describe
        .child_relationships
        .sort_by(|a, b| (&a.child_entity, &a.field).cmp(&(&b.child_entity, &b.field)));

    let full = graph.summary(&entity.name).cloned().unwrap_or_default();
    let clean = clean.get(&entity.name).cloned().unwrap_or_default();
    let name = entity.name.as_str();

    let metadata = RelationshipMetadata {
        outbound: full.outbound,
        inbound: full.inbound,
        outbound_clean: clean.outbound,
        inbound_clean: clean.inbound,
        is_likely_junction: full.is_junction,
        object_summary: summarize_object(entity),
        namespace: entity.namespace().map(String::from),
        namespace_ignored: filter
            .ignores_namespaces()
            .then(|| filter.namespace_ignored(name)),
        usage_summary: stages.usage.and_then(|m| m.get(name).cloned()),
        automation_summary: stages.automation.and_then(|m| m.get(name).cloned()),
        security_summary: stages.security.and_then(|m| m.get(name).cloned()),
    };

    AnnotatedEntity { describe, metadata }
}
