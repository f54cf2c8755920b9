//! Relationship graph over a complete set of entity describes.
//!
//! This crate provides:
//! - [`RelationshipGraph`]: outbound/inbound edges, master-detail inference,
//!   junction detection, and clean-subgraph filtering
//! - [`rollup`]: the `edges.csv` / `nodes.csv` rollups and their `.clean` twins

pub mod rollup;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, instrument};

use schemalib_shared::{
    EdgeKind, EntityDescribe, EntityRelationshipSummary, InboundEdge, ObjectSummary,
    RelationshipEdge,
};

pub use rollup::{RollupReport, write_edges_csv, write_nodes_csv, write_rollups};

/// Minimum distinct cascade-delete parents for an entity to count as a junction.
const JUNCTION_MIN_PARENTS: usize = 2;

/// Per-entity relationship summaries for one run.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    summaries: BTreeMap<String, EntityRelationshipSummary>,
}

impl RelationshipGraph {
    /// Build the graph. Needs the complete describe set: an edge's kind
    /// depends on the target's child relationships.
    #[instrument(skip_all, fields(entities = entities.len()))]
    pub fn build(entities: &[EntityDescribe]) -> Self {
        // (parent, child, field) -> cascadeDelete
        let mut inbound_index: HashMap<(&str, &str, &str), bool> = HashMap::new();
        // child -> distinct parents that delete it in cascade
        let mut cascade_parents: HashMap<&str, BTreeSet<&str>> = HashMap::new();

        for parent in entities {
            for rel in &parent.child_relationships {
                if rel.child_entity.is_empty() || rel.field.is_empty() {
                    continue;
                }
                let key = (parent.name.as_str(), rel.child_entity.as_str(), rel.field.as_str());
                let cascade = inbound_index.entry(key).or_insert(false);
                *cascade |= rel.cascade_delete;
                if rel.cascade_delete {
                    cascade_parents
                        .entry(rel.child_entity.as_str())
                        .or_default()
                        .insert(parent.name.as_str());
                }
            }
        }

        let is_junction = |name: &str| {
            cascade_parents
                .get(name)
                .is_some_and(|parents| parents.len() >= JUNCTION_MIN_PARENTS)
        };

        let mut summaries = BTreeMap::new();
        for entity in entities {
            let mut outbound = Vec::new();
            for field in entity.fields.iter().filter(|f| f.is_reference()) {
                let polymorphic = field.reference_to.len() > 1;
                for target in &field.reference_to {
                    let key = (target.as_str(), entity.name.as_str(), field.name.as_str());
                    let kind = if inbound_index.get(&key).copied().unwrap_or(false) {
                        EdgeKind::MasterDetail
                    } else {
                        EdgeKind::Lookup
                    };
                    outbound.push(RelationshipEdge {
                        source: entity.name.clone(),
                        field: field.name.clone(),
                        target: target.clone(),
                        kind,
                        polymorphic,
                        extra_type_info: field.extra_type_info.clone(),
                    });
                }
            }
            outbound.sort_by(|a, b| (&a.field, &a.target).cmp(&(&b.field, &b.target)));
            outbound.dedup_by(|a, b| a.field == b.field && a.target == b.target);

            let mut inbound: Vec<InboundEdge> = entity
                .child_relationships
                .iter()
                .filter(|rel| !rel.child_entity.is_empty() && !rel.field.is_empty())
                .map(|rel| InboundEdge {
                    from: rel.child_entity.clone(),
                    field: rel.field.clone(),
                    target: entity.name.clone(),
                    kind: if rel.cascade_delete {
                        EdgeKind::MasterDetail
                    } else {
                        EdgeKind::Lookup
                    },
                    cascade_delete: rel.cascade_delete,
                    relationship_name: rel.relationship_name.clone(),
                    junction_side: !rel.junction_id_list_names.is_empty(),
                })
                .collect();
            inbound.sort_by(|a, b| (&a.from, &a.field).cmp(&(&b.from, &b.field)));
            // Duplicate child relationships differ only in name; keep the
            // cascading one if any.
            inbound.dedup_by(|later, kept| {
                let same = later.from == kept.from && later.field == kept.field;
                if same && later.cascade_delete {
                    kept.cascade_delete = true;
                    kept.kind = EdgeKind::MasterDetail;
                }
                same
            });

            summaries.insert(
                entity.name.clone(),
                EntityRelationshipSummary {
                    outbound,
                    inbound,
                    is_junction: is_junction(&entity.name),
                },
            );
        }

        let junctions = summaries.values().filter(|s| s.is_junction).count();
        info!(entities = summaries.len(), junctions, "relationship graph built");

        Self { summaries }
    }

    pub fn summary(&self, name: &str) -> Option<&EntityRelationshipSummary> {
        self.summaries.get(name)
    }

    pub fn summaries(&self) -> &BTreeMap<String, EntityRelationshipSummary> {
        &self.summaries
    }

    /// Every outbound edge, grouped by source in name order.
    pub fn edges(&self) -> impl Iterator<Item = &RelationshipEdge> {
        self.summaries.values().flat_map(|s| s.outbound.iter())
    }

    /// Summaries restricted to `included`: only included entities, and only
    /// edges whose both endpoints are included.
    pub fn clean(&self, included: &BTreeSet<String>) -> BTreeMap<String, EntityRelationshipSummary> {
        let clean: BTreeMap<_, _> = self
            .summaries
            .iter()
            .filter(|(name, _)| included.contains(*name))
            .map(|(name, summary)| {
                let filtered = EntityRelationshipSummary {
                    outbound: summary
                        .outbound
                        .iter()
                        .filter(|e| included.contains(&e.target))
                        .cloned()
                        .collect(),
                    inbound: summary
                        .inbound
                        .iter()
                        .filter(|e| included.contains(&e.from))
                        .cloned()
                        .collect(),
                    is_junction: summary.is_junction,
                };
                (name.clone(), filtered)
            })
            .collect();
        debug!(included = included.len(), kept = clean.len(), "clean subgraph");
        clean
    }
}

/// Compact facts about an entity for rollups and overview text.
pub fn summarize_object(describe: &EntityDescribe) -> ObjectSummary {
    ObjectSummary {
        label: describe.label.clone(),
        custom: describe.custom,
        queryable: describe.queryable,
        createable: describe.createable,
        deletable: describe.deletable,
        name_field: describe.name_field().map(String::from),
        field_type_counts: describe.field_type_counts(),
    }
}
