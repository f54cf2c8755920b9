//! Core domain types: run identity, fetch modes, and entity describes.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// FetchMode
// ---------------------------------------------------------------------------

/// Which entities a fetch run describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FetchMode {
    /// Every listed entity that survives the filters.
    All,
    /// Seeds plus everything reachable within `depth` relationship hops.
    Neighborhood { seeds: Vec<String>, depth: u32 },
}

// ---------------------------------------------------------------------------
// Entity describe
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// Structural metadata of one CRM entity, as returned by the describe call.
///
/// Keys this crate doesn't model are kept in `extra` so that persisted
/// describes round-trip without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescribe {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub custom: bool,
    #[serde(default = "default_true")]
    pub queryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub createable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletable: Option<bool>,
    #[serde(default)]
    pub fields: Vec<FieldDescribe>,
    #[serde(default)]
    pub child_relationships: Vec<ChildRelationship>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One field of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescribe {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default = "default_true")]
    pub nillable: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub external_id: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u64>,
    #[serde(default)]
    pub calculated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculated_formula: Option<String>,
    #[serde(default)]
    pub name_field: bool,
    #[serde(default)]
    pub reference_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_type_info: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A relationship in which another entity points at this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRelationship {
    #[serde(rename = "childSObject")]
    pub child_entity: String,
    #[serde(default)]
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_name: Option<String>,
    #[serde(default)]
    pub cascade_delete: bool,
    #[serde(default)]
    pub junction_id_list_names: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FieldDescribe {
    /// Lookup or master-detail field with at least one target.
    pub fn is_reference(&self) -> bool {
        self.field_type == "reference" && !self.reference_to.is_empty()
    }
}

impl EntityDescribe {
    /// Namespace prefix of this entity, if it belongs to a managed package.
    pub fn namespace(&self) -> Option<&str> {
        namespace_of(&self.name)
    }

    /// The field flagged as the record's display name.
    pub fn name_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name_field)
            .map(|f| f.name.as_str())
    }

    /// Count of fields per field type.
    pub fn field_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for field in &self.fields {
            *counts.entry(field.field_type.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Entities one relationship hop away: reference targets plus child entities.
    pub fn neighbors(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self
            .fields
            .iter()
            .filter(|f| f.is_reference())
            .flat_map(|f| f.reference_to.iter().cloned())
            .collect();
        out.extend(
            self.child_relationships
                .iter()
                .filter(|c| !c.child_entity.is_empty())
                .map(|c| c.child_entity.clone()),
        );
        out.remove(&self.name);
        out
    }
}

/// Namespace of an API name: `ns__Thing__c` → `ns`. Two-part names
/// (`Thing__c`) and standard names have none.
pub fn namespace_of(name: &str) -> Option<&str> {
    let mut parts = name.split("__");
    let first = parts.next()?;
    (parts.count() >= 2).then_some(first)
}

// ---------------------------------------------------------------------------
// RunManifest
// ---------------------------------------------------------------------------

/// Attempted vs succeeded counts for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub stage: String,
    pub attempted: usize,
    pub succeeded: usize,
}

/// The `run.json` written at the end of every build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Unique identifier for this run.
    pub run_id: RunId,
    /// Tool version that produced the run.
    pub tool_version: String,
    /// Org alias the run targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Per-stage counts, in pipeline order.
    pub stages: Vec<StageCounts>,
    /// Number of per-entity failures across all stages.
    pub error_count: usize,
    /// Cache statistics snapshot, when a cache was used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_and_parse() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse run id");
        assert_eq!(id, parsed);
    }

    #[test]
    fn namespace_needs_three_parts() {
        assert_eq!(namespace_of("pkg__Invoice__c"), Some("pkg"));
        assert_eq!(namespace_of("Invoice__c"), None);
        assert_eq!(namespace_of("Account"), None);
    }

    #[test]
    fn describe_keeps_unknown_keys() {
        let raw = serde_json::json!({
            "name": "Order",
            "label": "Order",
            "keyPrefix": "801",
            "fields": [
                {"name": "AccountId", "type": "reference", "referenceTo": ["Account"],
                 "nillable": false, "inlineHelpText": null}
            ],
            "childRelationships": [
                {"childSObject": "OrderItem", "field": "OrderId", "cascadeDelete": true}
            ]
        });
        let describe: EntityDescribe = serde_json::from_value(raw).expect("describe");
        assert!(describe.queryable);
        assert_eq!(describe.extra.get("keyPrefix"), Some(&Value::from("801")));
        assert!(describe.fields[0].is_reference());
        assert!(describe.fields[0].extra.contains_key("inlineHelpText"));
        assert_eq!(describe.child_relationships[0].child_entity, "OrderItem");

        let back = serde_json::to_value(&describe).expect("serialize");
        assert_eq!(back["keyPrefix"], "801");
        assert_eq!(back["childRelationships"][0]["childSObject"], "OrderItem");
    }

    #[test]
    fn neighbors_include_targets_and_children_but_not_self() {
        let describe: EntityDescribe = serde_json::from_value(serde_json::json!({
            "name": "Account",
            "fields": [
                {"name": "ParentId", "type": "reference", "referenceTo": ["Account"]},
                {"name": "OwnerId", "type": "reference", "referenceTo": ["User", "Group"]},
                {"name": "Name", "type": "string", "nameField": true}
            ],
            "childRelationships": [{"childSObject": "Contact", "field": "AccountId"}]
        }))
        .expect("describe");

        let n: Vec<_> = describe.neighbors().into_iter().collect();
        assert_eq!(n, vec!["Contact", "Group", "User"]);
        assert_eq!(describe.name_field(), Some("Name"));
        assert_eq!(describe.field_type_counts().get("reference"), Some(&2));
    }

    #[test]
    fn fetch_mode_serde_is_tagged() {
        let mode = FetchMode::Neighborhood {
            seeds: vec!["Account".into()],
            depth: 1,
        };
        let json = serde_json::to_value(&mode).expect("serialize");
        assert_eq!(json["mode"], "neighborhood");
        assert_eq!(json["depth"], 1);
    }
}
