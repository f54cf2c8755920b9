//! Object and field permissions per entity, grouped by profile or
//! permission set.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{info, instrument};

use schemalib_gateway::{QueryApi, soql_in_list};
use schemalib_shared::{FieldGrant, GranteeKind, ObjectGrant, SecuritySummary};

use crate::remote::{Batch, Collected, RemoteContext, bool_at, str_at};

/// Cache operation name for security summaries.
pub const SECURITY_OP: &str = "security";

pub struct SecurityCollector {
    ctx: RemoteContext,
}

impl SecurityCollector {
    pub fn new(ctx: RemoteContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(entities = names.len()))]
    pub async fn collect(&self, names: &[String]) -> Collected<SecuritySummary> {
        let collected = self
            .ctx
            .collect_batched(SECURITY_OP, names, |batch| self.fetch_batch(batch))
            .await;
        info!(
            entities = names.len(),
            cached = collected.cached,
            complete = collected.complete,
            "security collected"
        );
        collected
    }

    async fn fetch_batch(&self, names: Vec<String>) -> Batch<SecuritySummary> {
        let in_list = soql_in_list(&names);
        let mut by_entity: BTreeMap<String, SecuritySummary> = BTreeMap::new();
        let mut complete = true;

        let objects = self
            .ctx
            .records(
                "ObjectPermissions",
                &format!(
                    "SELECT SobjectType, PermissionsRead, PermissionsCreate, PermissionsEdit, \
                     PermissionsDelete, PermissionsViewAllRecords, PermissionsModifyAllRecords, \
                     Parent.Name, Parent.IsOwnedByProfile, Parent.Profile.Name \
                     FROM ObjectPermissions WHERE SobjectType IN ({in_list})"
                ),
                QueryApi::Data,
            )
            .await;
        match objects {
            Some(records) => {
                for record in &records {
                    let (Some(entity), Some((grantee, grantee_kind))) =
                        (str_at(record, "/SobjectType"), grantee_of(record))
                    else {
                        continue;
                    };
                    by_entity.entry(entity.to_string()).or_default().object_grants.push(ObjectGrant {
                        grantee,
                        grantee_kind,
                        read: bool_at(record, "/PermissionsRead"),
                        create: bool_at(record, "/PermissionsCreate"),
                        edit: bool_at(record, "/PermissionsEdit"),
                        delete: bool_at(record, "/PermissionsDelete"),
                        view_all: bool_at(record, "/PermissionsViewAllRecords"),
                        modify_all: bool_at(record, "/PermissionsModifyAllRecords"),
                    });
                }
            }
            None => complete = false,
        }

        let fields = self
            .ctx
            .records(
                "FieldPermissions",
                &format!(
                    "SELECT SobjectType, Field, PermissionsRead, PermissionsEdit, \
                     Parent.Name, Parent.IsOwnedByProfile, Parent.Profile.Name \
                     FROM FieldPermissions WHERE SobjectType IN ({in_list})"
                ),
                QueryApi::Data,
            )
            .await;
        match fields {
            Some(records) => {
                let mut grouped: BTreeMap<String, BTreeMap<String, FieldAccess>> = BTreeMap::new();
                for record in &records {
                    let (Some(entity), Some(field), Some((grantee, _))) = (
                        str_at(record, "/SobjectType"),
                        str_at(record, "/Field"),
                        grantee_of(record),
                    ) else {
                        continue;
                    };
                    let field = field.split_once('.').map_or(field, |(_, f)| f);
                    let access = grouped
                        .entry(entity.to_string())
                        .or_default()
                        .entry(field.to_string())
                        .or_default();
                    if bool_at(record, "/PermissionsEdit") {
                        access.editable.insert(grantee);
                    } else if bool_at(record, "/PermissionsRead") {
                        access.read_only.insert(grantee);
                    }
                }
                for (entity, fields) in grouped {
                    let summary = by_entity.entry(entity).or_default();
                    summary.field_grants = fields
                        .into_iter()
                        .map(|(field, access)| access.into_grant(field))
                        .filter(|g| !g.editable_by.is_empty() || !g.read_only_by.is_empty())
                        .collect();
                }
            }
            None => complete = false,
        }

        for summary in by_entity.values_mut() {
            summary
                .object_grants
                .sort_by(|a, b| (a.grantee_kind, &a.grantee).cmp(&(b.grantee_kind, &b.grantee)));
        }

        Batch { by_entity, complete }
    }
}

#[derive(Default)]
struct FieldAccess {
    editable: BTreeSet<String>,
    read_only: BTreeSet<String>,
}

impl FieldAccess {
    fn into_grant(self, field: String) -> FieldGrant {
        let read_only_by = self.read_only.difference(&self.editable).cloned().collect();
        FieldGrant {
            field,
            editable_by: self.editable.into_iter().collect(),
            read_only_by,
        }
    }
}

/// Profile name for profile-owned permission sets, otherwise the
/// permission set's own name.
fn grantee_of(record: &Value) -> Option<(String, GranteeKind)> {
    if bool_at(record, "/Parent/IsOwnedByProfile") {
        let name = str_at(record, "/Parent/Profile/Name").or_else(|| str_at(record, "/Parent/Name"))?;
        Some((name.to_string(), GranteeKind::Profile))
    } else {
        let name = str_at(record, "/Parent/Name")?;
        Some((name.to_string(), GranteeKind::PermissionSet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use schemalib_gateway::testing::{ScriptedGateway, query_text};
    use serde_json::json;

    fn parent(profile: Option<&str>, name: &str) -> Value {
        match profile {
            Some(p) => json!({"Name": name, "IsOwnedByProfile": true, "Profile": {"Name": p}}),
            None => json!({"Name": name, "IsOwnedByProfile": false, "Profile": null}),
        }
    }

    fn org() -> ScriptedGateway {
        ScriptedGateway::new(|args| {
            let soql = query_text(args).unwrap_or_default();
            let records = if soql.contains("FROM ObjectPermissions") {
                json!([
                    {"SobjectType": "Case", "PermissionsRead": true, "PermissionsCreate": true,
                     "PermissionsEdit": true, "PermissionsDelete": false,
                     "PermissionsViewAllRecords": false, "PermissionsModifyAllRecords": false,
                     "Parent": parent(Some("Support Agent"), "X00e1")},
                    {"SobjectType": "Case", "PermissionsRead": true, "PermissionsCreate": false,
                     "PermissionsEdit": false, "PermissionsDelete": false,
                     "PermissionsViewAllRecords": true, "PermissionsModifyAllRecords": false,
                     "Parent": parent(None, "Case_Auditor")},
                    {"SobjectType": "Case", "PermissionsRead": true, "Parent": parent(Some("Admin"), "X00e0")}
                ])
            } else if soql.contains("FROM FieldPermissions") {
                json!([
                    {"SobjectType": "Case", "Field": "Case.Reason", "PermissionsRead": true,
                     "PermissionsEdit": true, "Parent": parent(Some("Support Agent"), "X00e1")},
                    {"SobjectType": "Case", "Field": "Case.Reason", "PermissionsRead": true,
                     "PermissionsEdit": false, "Parent": parent(None, "Case_Auditor")},
                    {"SobjectType": "Case", "Field": "Case.Reason", "PermissionsRead": true,
                     "PermissionsEdit": false, "Parent": parent(Some("Admin"), "X00e0")},
                    {"SobjectType": "Case", "Field": "Case.Secret__c", "PermissionsRead": false,
                     "PermissionsEdit": false, "Parent": parent(None, "Case_Auditor")}
                ])
            } else {
                json!([])
            };
            Ok(json!({"status": 0, "result": {"totalSize": 0, "records": records}}))
        })
    }

    #[tokio::test]
    async fn groups_grants_by_grantee() {
        let gateway = Arc::new(org());
        let collector = SecurityCollector::new(RemoteContext {
            gateway: gateway.clone(),
            cache: None,
            account: Some("dev".into()),
            timeout: Duration::from_secs(5),
        });
        let collected = collector.collect(&["Case".to_string(), "Lead".to_string()]).await;
        assert_eq!(gateway.call_count(), 2);

        let case = &collected.by_entity["Case"];
        let grantees: Vec<(&str, GranteeKind)> = case
            .object_grants
            .iter()
            .map(|g| (g.grantee.as_str(), g.grantee_kind))
            .collect();
        assert_eq!(
            grantees,
            vec![
                ("Admin", GranteeKind::Profile),
                ("Support Agent", GranteeKind::Profile),
                ("Case_Auditor", GranteeKind::PermissionSet),
            ]
        );
        assert!(case.object_grants[2].view_all);
        assert!(!case.object_grants[0].create);

        assert_eq!(case.field_grants.len(), 1);
        let reason = &case.field_grants[0];
        assert_eq!(reason.field, "Reason");
        assert_eq!(reason.editable_by, vec!["Support Agent"]);
        assert_eq!(reason.read_only_by, vec!["Admin", "Case_Auditor"]);

        assert!(collected.by_entity["Lead"].is_empty());
    }
}
