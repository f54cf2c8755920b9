//! Small filesystem helpers shared by every stage that persists artifacts.
//!
//! All writes go through a uniquely named temp file followed by a rename, so a
//! reader (or a resumed run) never sees a half-written artifact.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SchemaLibError};

/// Create `dir` and all parents.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| SchemaLibError::io(dir, e))
}

/// Write bytes atomically: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    std::fs::write(&temp, bytes).map_err(|e| SchemaLibError::io(&temp, e))?;
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(SchemaLibError::io(path, e));
    }
    Ok(())
}

/// Pretty-print `data` as JSON and write it atomically.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| SchemaLibError::validation(format!("JSON serialization failed: {e}")))?;
    write_atomic(path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| SchemaLibError::io(path, e))?;
    serde_json::from_str(content.trim_start_matches('\u{feff}'))
        .map_err(|e| SchemaLibError::parse(format!("{}: {e}", path.display())))
}

/// Quote one CSV field when it contains a separator, quote, or line break.
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Join fields into one CSV record (without the trailing newline).
pub fn csv_row<S: AsRef<str>>(fields: &[S]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("sl-io-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn write_then_read_json() {
        let tmp = temp_dir();
        let path = tmp.join("nested").join("value.json");
        write_json(&path, &serde_json::json!({"a": 1})).unwrap();

        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back["a"], 1);

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn read_json_tolerates_bom() {
        let tmp = temp_dir();
        let path = tmp.join("bom.json");
        std::fs::write(&path, "\u{feff}{\"ok\": true}").unwrap();
        let back: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(back["ok"], true);
        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_row(&["x", "y,z"]), "x,\"y,z\"");
    }
}
