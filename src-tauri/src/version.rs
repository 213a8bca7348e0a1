use crate::errors::{AppError, AppResult};
use serde_json::{json, Value};
use std::path::Path;

pub fn fallback_version_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "build_date": "2026-10-19",
        "author": "Markdown Editor Team",
        "description": "A simple Markdown editor with live preview, an AI assistant and document management."
    })
}

/// Contents of `version.json`, or the built-in metadata when the file is absent.
pub fn load_version_info(path: &Path) -> AppResult<Value> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "version file missing, using built-in metadata");
        return Ok(fallback_version_info());
    }

    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&raw)? {
        Value::Object(map) => Ok(Value::Object(map)),
        _ => Err(AppError::Internal(format!("{} is not a json object", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::load_version_info;

    #[test]
    fn missing_file_uses_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let info = load_version_info(&dir.path().join("version.json")).expect("info");
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn present_file_is_returned_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("version.json");
        std::fs::write(&path, r#"{"version":"9.9.9","channel":"beta"}"#).expect("write");

        let info = load_version_info(&path).expect("info");
        assert_eq!(info["version"], "9.9.9");
        assert_eq!(info["channel"], "beta");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("version.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(load_version_info(&path).is_err());
    }
}
