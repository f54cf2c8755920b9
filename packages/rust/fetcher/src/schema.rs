//! The combined `schema.json` artifact.
//!
//! Written as `{"objects": [...]}` sorted by name and without timestamps, so
//! two runs over the same describes produce identical bytes.

use std::path::Path;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use schemalib_shared::io::{read_json, write_json};
use schemalib_shared::{EntityDescribe, Result, SchemaLibError};

/// Write `describes` (any order) as the combined schema artifact.
pub fn write_schema<'a>(
    path: &Path,
    describes: impl IntoIterator<Item = &'a EntityDescribe>,
) -> Result<usize> {
    let mut objects: Vec<&EntityDescribe> = describes.into_iter().collect();
    objects.sort_by(|a, b| a.name.cmp(&b.name));
    objects.dedup_by(|a, b| a.name == b.name);

    write_json(path, &json!({ "objects": objects }))?;
    info!(path = %path.display(), objects = objects.len(), "wrote combined schema");
    Ok(objects.len())
}

/// Load a combined schema. Accepts `{"objects": [...]}`,
/// `{"objects": {name: describe}}`, a bare list, or a bare name-keyed map.
pub fn load_schema(path: &Path) -> Result<Vec<EntityDescribe>> {
    let root: Value = read_json(path)?;
    let body = root.get("objects").cloned().unwrap_or(root);

    let mut out: Vec<EntityDescribe> = match body {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SchemaLibError::parse(format!("{}: {e}", path.display())))?,
        Value::Object(map) => {
            let mut items = Vec::with_capacity(map.len());
            for (name, mut describe) in map {
                if let Value::Object(obj) = &mut describe {
                    obj.entry("name").or_insert_with(|| Value::from(name.clone()));
                }
                let parsed: EntityDescribe = serde_json::from_value(describe).map_err(|e| {
                    SchemaLibError::parse(format!("{}: entity {name}: {e}", path.display()))
                })?;
                items.push(parsed);
            }
            items
        }
        _ => {
            return Err(SchemaLibError::parse(format!(
                "{}: expected a list or map of entity describes",
                path.display()
            )));
        }
    };

    out.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(path = %path.display(), objects = out.len(), "loaded schema");
    Ok(out)
}

/// Rebuild `schema.json` from every `raw/<name>.json` in `raw_dir`.
/// Files starting with `_` or `.` are bookkeeping and skipped; unreadable
/// files are logged and skipped.
pub fn combine_raw(raw_dir: &Path, out_path: &Path) -> Result<usize> {
    let read_dir = std::fs::read_dir(raw_dir).map_err(|e| SchemaLibError::io(raw_dir, e))?;

    let mut describes = Vec::new();
    for entry in read_dir.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('_') || name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        match read_json::<EntityDescribe>(&entry.path()) {
            Ok(describe) => describes.push(describe),
            Err(e) => warn!(file = %name, error = %e, "skipping unreadable raw describe"),
        }
    }

    write_schema(out_path, &describes)
}
