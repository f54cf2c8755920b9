//! Flows, triggers, validation rules and workflow rules per entity.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use schemalib_gateway::{QueryApi, soql_in_list};
use schemalib_shared::{AutomationSummary, FlowInfo, TriggerInfo, ValidationRuleInfo, WorkflowRuleInfo};

use crate::remote::{Batch, Collected, RemoteContext, bool_at, str_at};

/// Cache operation name for automation summaries.
pub const AUTOMATION_OP: &str = "automation";

/// Collects [`AutomationSummary`] data through tooling and data queries.
pub struct AutomationCollector {
    ctx: RemoteContext,
}

impl AutomationCollector {
    pub fn new(ctx: RemoteContext) -> Self {
        Self { ctx }
    }

    /// One summary per name. A failed query leaves its part of the summary
    /// empty and keeps the batch out of the cache.
    #[instrument(skip_all, fields(entities = names.len()))]
    pub async fn collect(&self, names: &[String]) -> Collected<AutomationSummary> {
        let collected = self
            .ctx
            .collect_batched(AUTOMATION_OP, names, |batch| self.fetch_batch(batch))
            .await;
        let with_automation = collected.by_entity.values().filter(|s| !s.is_empty()).count();
        info!(
            entities = names.len(),
            cached = collected.cached,
            complete = collected.complete,
            with_automation,
            "automation collected"
        );
        collected
    }

    async fn fetch_batch(&self, names: Vec<String>) -> Batch<AutomationSummary> {
        let in_list = soql_in_list(&names);
        let mut by_entity: BTreeMap<String, AutomationSummary> = BTreeMap::new();
        let mut complete = true;

        let triggers = self
            .ctx
            .records(
                "ApexTrigger",
                &format!(
                    "SELECT Name, TableEnumOrId, Status, Body FROM ApexTrigger \
                     WHERE TableEnumOrId IN ({in_list})"
                ),
                QueryApi::Tooling,
            )
            .await;
        match triggers {
            Some(records) => {
                for record in &records {
                    let (Some(entity), Some(name)) =
                        (str_at(record, "/TableEnumOrId"), str_at(record, "/Name"))
                    else {
                        continue;
                    };
                    let (total_lines, code_lines, comment_lines) =
                        trigger_line_counts(str_at(record, "/Body").unwrap_or_default());
                    by_entity.entry(entity.to_string()).or_default().triggers.push(TriggerInfo {
                        name: name.to_string(),
                        status: str_at(record, "/Status").map(String::from),
                        total_lines,
                        code_lines,
                        comment_lines,
                    });
                }
            }
            None => complete = false,
        }

        let rules = self
            .ctx
            .records(
                "ValidationRule",
                &format!(
                    "SELECT ValidationName, EntityDefinition.QualifiedApiName, Active, \
                     ErrorDisplayField, ErrorMessage FROM ValidationRule \
                     WHERE EntityDefinition.QualifiedApiName IN ({in_list})"
                ),
                QueryApi::Tooling,
            )
            .await;
        match rules {
            Some(records) => {
                for record in &records {
                    let (Some(entity), Some(name)) = (
                        str_at(record, "/EntityDefinition/QualifiedApiName"),
                        str_at(record, "/ValidationName"),
                    ) else {
                        continue;
                    };
                    by_entity
                        .entry(entity.to_string())
                        .or_default()
                        .validation_rules
                        .push(ValidationRuleInfo {
                            name: name.to_string(),
                            active: bool_at(record, "/Active"),
                            error_field: str_at(record, "/ErrorDisplayField").map(String::from),
                            error_message: str_at(record, "/ErrorMessage").map(String::from),
                        });
                }
            }
            None => complete = false,
        }

        let workflows = self
            .ctx
            .records(
                "WorkflowRule",
                &format!("SELECT Name, TableEnumOrId FROM WorkflowRule WHERE TableEnumOrId IN ({in_list})"),
                QueryApi::Tooling,
            )
            .await;
        match workflows {
            Some(records) => {
                for record in &records {
                    let (Some(entity), Some(name)) =
                        (str_at(record, "/TableEnumOrId"), str_at(record, "/Name"))
                    else {
                        continue;
                    };
                    by_entity
                        .entry(entity.to_string())
                        .or_default()
                        .workflow_rules
                        .push(WorkflowRuleInfo { name: name.to_string() });
                }
            }
            None => complete = false,
        }

        let flows = self
            .ctx
            .records(
                "FlowDefinitionView",
                &format!(
                    "SELECT ApiName, Label, ProcessType, IsActive, TriggerObjectOrEvent.QualifiedApiName \
                     FROM FlowDefinitionView WHERE TriggerObjectOrEvent.QualifiedApiName IN ({in_list})"
                ),
                QueryApi::Data,
            )
            .await;
        match flows {
            Some(records) => {
                for record in &records {
                    let (Some(entity), Some(api_name)) = (
                        str_at(record, "/TriggerObjectOrEvent/QualifiedApiName"),
                        str_at(record, "/ApiName"),
                    ) else {
                        continue;
                    };
                    by_entity.entry(entity.to_string()).or_default().flows.push(FlowInfo {
                        api_name: api_name.to_string(),
                        label: str_at(record, "/Label").map(String::from),
                        process_type: str_at(record, "/ProcessType").map(String::from),
                        active: bool_at(record, "/IsActive"),
                    });
                }
            }
            None => complete = false,
        }

        for summary in by_entity.values_mut() {
            summary.flows.sort_by(|a, b| a.api_name.cmp(&b.api_name));
            summary.triggers.sort_by(|a, b| a.name.cmp(&b.name));
            summary.validation_rules.sort_by(|a, b| a.name.cmp(&b.name));
            summary.workflow_rules.sort_by(|a, b| a.name.cmp(&b.name));
        }

        Batch { by_entity, complete }
    }
}

/// `(total, code, comment)` line counts of a trigger body. Lines starting
/// with `//`, `/*` or `*` (after indentation) count as comments.
pub fn trigger_line_counts(body: &str) -> (usize, usize, usize) {
    let total = body.lines().count();
    let comments = body
        .lines()
        .map(str::trim_start)
        .filter(|l| l.starts_with("//") || l.starts_with("/*") || l.starts_with('*'))
        .count();
    (total, total - comments, comments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use schemalib_cache::SmartCache;
    use schemalib_gateway::testing::{ScriptedGateway, query_text};
    use schemalib_shared::{CacheConfig, GatewayError};
    use serde_json::json;
    use uuid::Uuid;

    fn org() -> ScriptedGateway {
        ScriptedGateway::new(|args| {
            let soql = query_text(args).unwrap_or_default();
            let records = if soql.contains("FROM ApexTrigger") {
                json!([{
                    "Name": "CaseTrigger", "TableEnumOrId": "Case", "Status": "Active",
                    "Body": "trigger CaseTrigger on Case (before insert) {\n  // stamp owner\n  /* block\n   * more\n   */\n  run();\n}"
                }])
            } else if soql.contains("FROM ValidationRule") {
                json!([{
                    "ValidationName": "Require_Reason",
                    "EntityDefinition": {"QualifiedApiName": "Case"},
                    "Active": true, "ErrorDisplayField": "Reason", "ErrorMessage": "Reason is required"
                }])
            } else if soql.contains("FROM WorkflowRule") {
                json!([{"Name": "Notify", "TableEnumOrId": "Lead"}])
            } else if soql.contains("FROM FlowDefinitionView") {
                json!([
                    {"ApiName": "Case_Escalate", "Label": "Escalate", "ProcessType": "AutoLaunchedFlow",
                     "IsActive": true, "TriggerObjectOrEvent": {"QualifiedApiName": "Case"}},
                    {"ApiName": "Orphan", "IsActive": false, "TriggerObjectOrEvent": null}
                ])
            } else {
                json!([])
            };
            Ok(json!({"status": 0, "result": {"totalSize": 0, "records": records}}))
        })
    }

    fn ctx(gateway: Arc<ScriptedGateway>, cache: Option<Arc<SmartCache>>) -> RemoteContext {
        RemoteContext {
            gateway,
            cache,
            account: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn counts_trigger_lines() {
        let body = "trigger T on Case (before insert) {\n  // note\n  /* a\n   * b\n   */\n  go();\n}";
        assert_eq!(trigger_line_counts(body), (7, 3, 4));
        assert_eq!(trigger_line_counts(""), (0, 0, 0));
    }

    #[tokio::test]
    async fn groups_results_per_entity() {
        let gateway = Arc::new(org());
        let collector = AutomationCollector::new(ctx(gateway.clone(), None));
        let names = vec!["Case".to_string(), "Lead".to_string(), "Account".to_string()];

        let collected = collector.collect(&names).await;
        assert_eq!(gateway.call_count(), 4);
        assert_eq!(collected.complete, 3);

        let case = &collected.by_entity["Case"];
        assert_eq!(case.triggers.len(), 1);
        assert_eq!(case.triggers[0].code_lines, 3);
        assert_eq!(case.triggers[0].comment_lines, 4);
        assert_eq!(case.validation_rules[0].error_field.as_deref(), Some("Reason"));
        assert_eq!(case.flows[0].api_name, "Case_Escalate");
        assert!(case.flows[0].active);

        assert_eq!(collected.by_entity["Lead"].workflow_rules[0].name, "Notify");
        assert!(collected.by_entity["Account"].is_empty());

        let tooling = gateway
            .calls()
            .iter()
            .filter(|c| c.iter().any(|a| a == "--use-tooling-api"))
            .count();
        assert_eq!(tooling, 3);
    }

    #[tokio::test]
    async fn complete_batches_are_cached() {
        let tmp = std::env::temp_dir().join(format!("sl-automation-test-{}", Uuid::now_v7()));
        let cache = Arc::new(
            SmartCache::open(&CacheConfig {
                dir: tmp.clone(),
                max_age: Duration::from_secs(3600),
                compression: true,
            })
            .unwrap(),
        );
        let names = vec!["Case".to_string()];

        let first = Arc::new(org());
        AutomationCollector::new(ctx(first.clone(), Some(cache.clone())))
            .collect(&names)
            .await;
        assert_eq!(first.call_count(), 4);

        let second = Arc::new(org());
        let collected = AutomationCollector::new(ctx(second.clone(), Some(cache)))
            .collect(&names)
            .await;
        assert_eq!(second.call_count(), 0);
        assert_eq!(collected.cached, 1);
        assert_eq!(collected.by_entity["Case"].triggers[0].name, "CaseTrigger");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failed_query_degrades_and_skips_cache() {
        let tmp = std::env::temp_dir().join(format!("sl-automation-test-{}", Uuid::now_v7()));
        let cache = Arc::new(
            SmartCache::open(&CacheConfig {
                dir: tmp.clone(),
                max_age: Duration::from_secs(3600),
                compression: false,
            })
            .unwrap(),
        );
        let inner = org();
        let gateway = Arc::new(ScriptedGateway::new(move |args| {
            if query_text(args).is_some_and(|q| q.contains("FROM FlowDefinitionView")) {
                return Err(GatewayError::NonZeroExit {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "INVALID_TYPE".into(),
                });
            }
            inner.respond(args)
        }));

        let names = vec!["Case".to_string()];
        let collected = AutomationCollector::new(ctx(gateway, Some(cache.clone())))
            .collect(&names)
            .await;
        let case = &collected.by_entity["Case"];
        assert!(case.flows.is_empty());
        assert_eq!(case.triggers.len(), 1);
        assert_eq!(collected.complete, 0);
        assert!(cache.get("Case", AUTOMATION_OP, &[]).is_none());

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
