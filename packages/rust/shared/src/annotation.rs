//! Derived per-entity data: relationship edges, usage profiles, automation
//! and security summaries, and the `_relationshipMetadata` block that ties
//! them to a persisted describe.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntityDescribe;

// ---------------------------------------------------------------------------
// Relationship edges
// ---------------------------------------------------------------------------

/// Lookup vs master-detail (cascade-delete) relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Lookup,
    MasterDetail,
}

impl EdgeKind {
    /// Human wording used in CSVs and corpus sentences.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Lookup => "Lookup",
            Self::MasterDetail => "Master-Detail",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// `source.field` references `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipEdge {
    pub source: String,
    pub field: String,
    pub target: String,
    pub kind: EdgeKind,
    /// The field can point at more than one entity type.
    pub polymorphic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_type_info: Option<String>,
}

/// `from.field` references `target` (the entity owning this edge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEdge {
    pub from: String,
    pub field: String,
    pub target: String,
    pub kind: EdgeKind,
    pub cascade_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_name: Option<String>,
    /// The referencing entity is itself a likely junction.
    #[serde(default)]
    pub junction_side: bool,
}

/// Both edge directions of one entity plus the junction verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelationshipSummary {
    pub outbound: Vec<RelationshipEdge>,
    pub inbound: Vec<InboundEdge>,
    pub is_junction: bool,
}

/// Compact facts about an entity used by node rollups and overview text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub custom: bool,
    pub queryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub createable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_field: Option<String>,
    pub field_type_counts: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// How often one field is populated in the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFillRate {
    pub field: String,
    pub non_null: usize,
    pub sample_size: usize,
    /// `non_null / sample_size`, in `0.0..=1.0`; `0.0` for an empty sample.
    pub non_null_pct: f64,
}

/// Record count and field fill rates for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub queryable: bool,
    pub object_count: Option<u64>,
    pub sampled_count: usize,
    pub field_fill_rates_top: Vec<FieldFillRate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

impl UsageSummary {
    /// Summary for entities that cannot be queried at all.
    pub fn not_queryable() -> Self {
        Self {
            queryable: false,
            object_count: None,
            sampled_count: 0,
            field_fill_rates_top: Vec::new(),
            generated_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowInfo {
    pub api_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_type: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub total_lines: usize,
    pub code_lines: usize,
    pub comment_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRuleInfo {
    pub name: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRuleInfo {
    pub name: String,
}

/// Declarative and programmatic automation attached to one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationSummary {
    #[serde(default)]
    pub flows: Vec<FlowInfo>,
    #[serde(default)]
    pub triggers: Vec<TriggerInfo>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRuleInfo>,
    #[serde(default)]
    pub workflow_rules: Vec<WorkflowRuleInfo>,
}

impl AutomationSummary {
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
            && self.triggers.is_empty()
            && self.validation_rules.is_empty()
            && self.workflow_rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Security
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GranteeKind {
    Profile,
    PermissionSet,
}

/// CRUD rights one profile or permission set holds on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectGrant {
    pub grantee: String,
    pub grantee_kind: GranteeKind,
    pub read: bool,
    pub create: bool,
    pub edit: bool,
    pub delete: bool,
    pub view_all: bool,
    pub modify_all: bool,
}

/// Who can edit or only read one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldGrant {
    pub field: String,
    #[serde(default)]
    pub editable_by: Vec<String>,
    #[serde(default)]
    pub read_only_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySummary {
    #[serde(default)]
    pub object_grants: Vec<ObjectGrant>,
    #[serde(default)]
    pub field_grants: Vec<FieldGrant>,
}

impl SecuritySummary {
    pub fn is_empty(&self) -> bool {
        self.object_grants.is_empty() && self.field_grants.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Annotated entity
// ---------------------------------------------------------------------------

/// The `_relationshipMetadata` block appended to each `objects/<name>.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipMetadata {
    pub outbound: Vec<RelationshipEdge>,
    pub inbound: Vec<InboundEdge>,
    pub outbound_clean: Vec<RelationshipEdge>,
    pub inbound_clean: Vec<InboundEdge>,
    pub is_likely_junction: bool,
    pub object_summary: ObjectSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_ignored: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_summary: Option<UsageSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation_summary: Option<AutomationSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_summary: Option<SecuritySummary>,
}

/// A describe plus its derived metadata, as persisted under `objects/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedEntity {
    #[serde(flatten)]
    pub describe: EntityDescribe,
    #[serde(rename = "_relationshipMetadata", default)]
    pub metadata: RelationshipMetadata,
}
