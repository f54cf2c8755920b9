//! Markdown blocks for one annotated entity.
//!
//! Each block is a standalone section so the emitter can chunk them
//! independently; [`entity_markdown`] stitches the document view together.

use std::sync::LazyLock;

use regex::Regex;

use schemalib_shared::{
    AnnotatedEntity, AutomationSummary, FieldDescribe, InboundEdge, RelationshipEdge,
    SecuritySummary,
};

/// Escape table separators.
pub fn md_escape(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Safe file name: runs of anything outside `[A-Za-z0-9._-]` become `_`.
pub fn sanitize_filename(name: &str) -> String {
    static UNSAFE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));
    UNSAFE_RE.replace_all(name, "_").into_owned()
}

/// A fill fraction as a one-decimal percentage.
fn pct_fmt(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

fn opt_num(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn flag(value: bool) -> &'static str {
    if value { "Y" } else { "" }
}

// ---------------------------------------------------------------------------
// Sentences
// ---------------------------------------------------------------------------

pub fn outbound_sentence(edge: &RelationshipEdge) -> String {
    format!(
        "This object ('{}') has a {} relationship TO the '{}' object via the '{}' field.",
        edge.source,
        edge.kind.label(),
        edge.target,
        edge.field
    )
}

pub fn inbound_sentence(edge: &InboundEdge) -> String {
    format!(
        "This object ('{}') has an inbound {} relationship FROM the '{}' object via the '{}' field.",
        edge.target,
        edge.kind.label(),
        edge.from,
        edge.field
    )
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Title, key facts, and automation.
pub fn overview_block(entity: &AnnotatedEntity) -> String {
    let describe = &entity.describe;
    let meta = &entity.metadata;
    let label = describe.label.as_deref().unwrap_or(&describe.name);
    let usage = meta.usage_summary.as_ref();

    let mut out = Vec::new();
    out.push(format!("# {label} ({})", describe.name));
    out.push(String::new());

    let namespace = match meta.namespace.as_deref() {
        Some(ns) => format!("namespace: **{}**", md_escape(ns)),
        None => "namespace: *(none)*".to_string(),
    };
    out.push(format!(
        "> label: **{}** | API name: **{}** | custom: **{}** | {namespace} | junction?: **{}**",
        md_escape(label),
        md_escape(&describe.name),
        describe.custom,
        meta.is_likely_junction
    ));
    out.push(String::new());

    out.push("## Overview".to_string());
    out.push(format!("- **Queryable**: `{}`", describe.queryable));
    out.push(match &meta.object_summary.name_field {
        Some(field) => format!("- **Name field**: `{}`", md_escape(field)),
        None => "- **Name field**: *(not flagged)*".to_string(),
    });
    out.push(match usage.and_then(|u| u.object_count) {
        Some(count) => format!("- **Record count**: `{count}`"),
        None => "- **Record count**: *(not computed)*".to_string(),
    });
    out.push(format!(
        "- **Sampled for fill-rates**: `{}`",
        usage.map_or(0, |u| u.sampled_count)
    ));
    let type_counts = serde_json::to_string(&meta.object_summary.field_type_counts)
        .unwrap_or_else(|_| "{}".into());
    out.push(format!("- **Field types**: `{type_counts}`"));
    out.push(String::new());

    if let Some(automation) = meta.automation_summary.as_ref().filter(|a| !a.is_empty()) {
        push_automation(&mut out, automation);
    }

    out.join("\n")
}

fn push_automation(out: &mut Vec<String>, automation: &AutomationSummary) {
    out.push("## Automation".to_string());
    out.push(String::new());

    if !automation.flows.is_empty() {
        out.push("### Flows".to_string());
        for flow in &automation.flows {
            let mut line = format!("- `{}`", md_escape(&flow.api_name));
            if let Some(kind) = &flow.process_type {
                line.push_str(&format!(" ({kind})"));
            }
            if !flow.active {
                line.push_str(" *inactive*");
            }
            out.push(line);
        }
        out.push(String::new());
    }

    if !automation.triggers.is_empty() {
        out.push("### Apex Triggers".to_string());
        for trigger in &automation.triggers {
            out.push(format!(
                "- `{}`: {} total lines ({} code, {} comments)",
                md_escape(&trigger.name),
                trigger.total_lines,
                trigger.code_lines,
                trigger.comment_lines
            ));
        }
        out.push(String::new());
    }

    if !automation.validation_rules.is_empty() {
        out.push("### Validation Rules".to_string());
        for rule in &automation.validation_rules {
            let mut line = format!("- `{}`", md_escape(&rule.name));
            if !rule.active {
                line.push_str(" *inactive*");
            }
            if let Some(message) = &rule.error_message {
                line.push_str(&format!(": {}", md_escape(message)));
            }
            out.push(line);
        }
        out.push(String::new());
    }

    if !automation.workflow_rules.is_empty() {
        out.push("### Workflow Rules".to_string());
        for rule in &automation.workflow_rules {
            out.push(format!("- `{}`", md_escape(&rule.name)));
        }
        out.push(String::new());
    }
}

/// Clean edges in both directions as sentences.
pub fn relationships_block(entity: &AnnotatedEntity) -> String {
    let meta = &entity.metadata;
    let mut out = vec!["## Relationships".to_string(), String::new()];

    out.push("### Outbound (this object points **to**)\n".to_string());
    if meta.outbound_clean.is_empty() {
        out.push("- *(none)*".to_string());
    }
    for edge in &meta.outbound_clean {
        out.push(format!("- {}", md_escape(&outbound_sentence(edge))));
    }
    out.push(String::new());

    out.push("### Inbound (other objects point **to** this)\n".to_string());
    if meta.inbound_clean.is_empty() {
        out.push("- *(none)*".to_string());
    }
    for edge in &meta.inbound_clean {
        out.push(format!("- {}", md_escape(&inbound_sentence(edge))));
    }
    out.push(String::new());

    out.join("\n")
}

/// Top fill-rate table; empty when no rates were sampled.
pub fn usage_block(entity: &AnnotatedEntity, top_n: usize) -> String {
    let Some(usage) = &entity.metadata.usage_summary else {
        return String::new();
    };
    if usage.field_fill_rates_top.is_empty() {
        return String::new();
    }

    let mut out = vec![
        "## Top fields by fill-rate (sampled)".to_string(),
        String::new(),
        "| Field | Non-Null % | Non-Null | Sample |".to_string(),
        "|---|---:|---:|---:|".to_string(),
    ];
    for rate in usage.field_fill_rates_top.iter().take(top_n) {
        out.push(format!(
            "| `{}` | {} | {} | {} |",
            md_escape(&rate.field),
            pct_fmt(rate.non_null_pct),
            rate.non_null,
            rate.sample_size
        ));
    }
    out.push(String::new());
    out.join("\n")
}

/// Fields sorted by name, for stable output.
pub fn sorted_fields(entity: &AnnotatedEntity) -> Vec<&FieldDescribe> {
    let mut fields: Vec<&FieldDescribe> = entity.describe.fields.iter().collect();
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

/// Full field table, truncated to `max_rows`.
pub fn fields_table(entity: &AnnotatedEntity, max_rows: usize) -> String {
    let fields = sorted_fields(entity);
    let truncated = fields.len() > max_rows;

    let mut out = vec![
        if truncated { "## Fields (truncated)" } else { "## Fields" }.to_string(),
        String::new(),
        "| Field | Type | Req | Unique | ExtId | Len | Prec | Scale | Formula |".to_string(),
        "|---|---|---:|---:|---:|---:|---:|---:|---:|".to_string(),
    ];
    if fields.is_empty() {
        out.push("| *(none)* |  |  |  |  |  |  |  |  |".to_string());
    }
    for field in fields.iter().take(max_rows) {
        out.push(format!(
            "| `{}` | `{}` | {} | {} | {} | {} | {} | {} | {} |",
            md_escape(&field.name),
            field.field_type,
            flag(!field.nillable),
            flag(field.unique),
            flag(field.external_id),
            opt_num(field.length),
            opt_num(field.precision),
            opt_num(field.scale),
            flag(field.calculated)
        ));
    }
    out.push(String::new());
    if truncated {
        out.push(format!(
            "> Showing first {max_rows} of {} fields for brevity.",
            fields.len()
        ));
        out.push(String::new());
    }
    out.join("\n")
}

/// `name : type` lines.
pub fn slim_field_lines(fields: &[&FieldDescribe]) -> Vec<String> {
    fields
        .iter()
        .map(|f| format!("{} : {}", f.name, f.field_type))
        .collect()
}

/// Object grants and field-level security; empty when nothing is known.
pub fn security_block(entity: &AnnotatedEntity) -> String {
    let Some(security) = entity
        .metadata
        .security_summary
        .as_ref()
        .filter(|s| !s.is_empty())
    else {
        return String::new();
    };

    let mut out = vec!["## Security".to_string(), String::new()];
    push_object_grants(&mut out, security);

    let sentences: Vec<String> = security
        .field_grants
        .iter()
        .filter_map(|grant| {
            let mut clauses = Vec::new();
            if !grant.editable_by.is_empty() {
                clauses.push(format!("editable by {}", grant.editable_by.join(", ")));
            }
            if !grant.read_only_by.is_empty() {
                clauses.push(format!("read-only for {}", grant.read_only_by.join(", ")));
            }
            (!clauses.is_empty())
                .then(|| format!("The '{}' field is {}.", grant.field, clauses.join(" and ")))
        })
        .collect();

    if !sentences.is_empty() {
        out.push("### Field-Level Security Details".to_string());
        out.push(String::new());
        out.extend(sentences.iter().map(|s| format!("- {s}")));
        out.push(String::new());
    }
    out.join("\n")
}

fn push_object_grants(out: &mut Vec<String>, security: &SecuritySummary) {
    if security.object_grants.is_empty() {
        return;
    }
    out.push("### Object Permissions".to_string());
    out.push(String::new());
    out.push("| Grantee | Kind | Read | Create | Edit | Delete | View All | Modify All |".to_string());
    out.push("|---|---|---:|---:|---:|---:|---:|---:|".to_string());
    for grant in &security.object_grants {
        out.push(format!(
            "| {} | {:?} | {} | {} | {} | {} | {} | {} |",
            md_escape(&grant.grantee),
            grant.grantee_kind,
            flag(grant.read),
            flag(grant.create),
            flag(grant.edit),
            flag(grant.delete),
            flag(grant.view_all),
            flag(grant.modify_all)
        ));
    }
    out.push(String::new());
}

/// The per-entity markdown document.
pub fn entity_markdown(entity: &AnnotatedEntity, top_fill: usize, max_field_rows: usize) -> String {
    [
        overview_block(entity),
        relationships_block(entity),
        usage_block(entity, top_fill),
        fields_table(entity, max_field_rows),
        security_block(entity),
    ]
    .into_iter()
    .filter(|block| !block.is_empty())
    .collect::<Vec<_>>()
    .join("\n")
}
