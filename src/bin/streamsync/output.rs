use serde::Serialize;
use std::io::Write;
use std::path::Path;
use streamsync::AcquisitionConfig;

/// Print `value` as JSON to stdout, or into `path` when given.
pub fn emit_json<T: Serialize>(value: &T, compact: bool, path: Option<&str>) -> Result<(), String> {
    let mut json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .map_err(|e| format!("JSON serialization failed: {}", e))?;
    json.push('\n');

    match path {
        Some(path) => std::fs::write(path, json)
            .map_err(|e| format!("Failed to write output file '{}': {}", path, e)),
        None => std::io::stdout()
            .lock()
            .write_all(json.as_bytes())
            .map_err(|e| format!("Failed to write to stdout: {}", e)),
    }
}

/// Configuration from `--config`, or the built-in defaults.
pub fn load_config(path: Option<&str>) -> Result<AcquisitionConfig, String> {
    let Some(path) = path else {
        return Ok(AcquisitionConfig::default());
    };
    AcquisitionConfig::load(Path::new(path))
        .map_err(|e| format!("Failed to load config '{}': {}", path, e))
}
