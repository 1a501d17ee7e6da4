// SPDX-License-Identifier: Apache-2.0

//! Layered configuration loading (§6): `--config` is repeatable and later
//! sources override earlier ones; `--set key=value` overrides win over all
//! file sources. Sources are URIs with a provider scheme (`file:`, `env:`,
//! `yaml:`); a bare path with no scheme is treated as `file:`.

use crate::env::resolve_env_refs_process;
use crate::error::ConfigError;
use crate::raw::RawConfig;

/// Reads the raw document text for one `--config` source.
fn read_source(uri: &str) -> Result<String, ConfigError> {
    if let Some(path) = uri.strip_prefix("file:") {
        std::fs::read_to_string(path).map_err(|e| ConfigError::SourceReadError {
            uri: uri.to_string(),
            details: e.to_string(),
        })
    } else if let Some(var) = uri.strip_prefix("env:") {
        std::env::var(var).map_err(|e| ConfigError::SourceReadError {
            uri: uri.to_string(),
            details: e.to_string(),
        })
    } else if let Some(inline) = uri.strip_prefix("yaml:") {
        Ok(inline.to_string())
    } else {
        std::fs::read_to_string(uri).map_err(|e| ConfigError::SourceReadError {
            uri: uri.to_string(),
            details: e.to_string(),
        })
    }
}

/// Deep-merges `overlay` into `base`; mapping keys are merged recursively,
/// every other value kind is replaced outright by the overlay's value.
fn merge_yaml(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_yaml(base_value, overlay_value),
                    None => {
                        let _ = base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

/// Applies a single `--set key=value` override. `key` is a `.`-separated
/// path into the document (e.g. `receivers.postgresql.collection_interval`);
/// `value` is parsed as YAML so numbers/bools/strings come out typed.
fn apply_set(doc: &mut serde_yaml::Value, key: &str, value: &str) -> Result<(), ConfigError> {
    let parsed_value: serde_yaml::Value =
        serde_yaml::from_str(value).unwrap_or_else(|_| serde_yaml::Value::String(value.to_string()));

    let segments: Vec<&str> = key.split('.').collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(ConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
            details: "key must be a non-empty dot-separated path".to_string(),
        });
    }

    let mut cursor = doc;
    for segment in &segments[..segments.len() - 1] {
        if !matches!(cursor, serde_yaml::Value::Mapping(_)) {
            *cursor = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        let map = cursor.as_mapping_mut().expect("just normalized to mapping");
        cursor = map
            .entry(serde_yaml::Value::String((*segment).to_string()))
            .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    }

    if !matches!(cursor, serde_yaml::Value::Mapping(_)) {
        *cursor = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
    }
    let map = cursor.as_mapping_mut().expect("just normalized to mapping");
    let _ = map.insert(
        serde_yaml::Value::String(segments[segments.len() - 1].to_string()),
        parsed_value,
    );
    Ok(())
}

/// Loads and merges every `--config` source in declaration order, applies
/// `--set` overrides, resolves `${env:...}` references, and parses the
/// result into a [`RawConfig`].
pub fn load(uris: &[String], overrides: &[(String, String)]) -> Result<RawConfig, ConfigError> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for uri in uris {
        let text = read_source(uri)?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text)?;
        merge_yaml(&mut merged, doc);
    }

    for (key, value) in overrides {
        apply_set(&mut merged, key, value)?;
    }

    let merged_text = serde_yaml::to_string(&merged)?;
    let resolved_text = resolve_env_refs_process(&merged_text)?;

    Ok(serde_yaml::from_str(&resolved_text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_source_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        std::fs::write(&a, "receivers:\n  postgresql:\n    collection_interval: 10s\n").unwrap();
        std::fs::write(&b, "receivers:\n  postgresql:\n    collection_interval: 30s\n").unwrap();

        let cfg = load(
            &[
                format!("file:{}", a.display()),
                format!("file:{}", b.display()),
            ],
            &[],
        )
        .unwrap();
        let interval = cfg.receivers["postgresql"]["collection_interval"]
            .as_str()
            .unwrap();
        assert_eq!(interval, "30s");
    }

    #[test]
    fn set_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        std::fs::write(&a, "receivers:\n  postgresql:\n    collection_interval: 10s\n").unwrap();

        let cfg = load(
            &[format!("file:{}", a.display())],
            &[("receivers.postgresql.collection_interval".to_string(), "5s".to_string())],
        )
        .unwrap();
        let interval = cfg.receivers["postgresql"]["collection_interval"]
            .as_str()
            .unwrap();
        assert_eq!(interval, "5s");
    }

    #[test]
    fn inline_yaml_source() {
        let cfg = load(&["yaml:receivers: {}\n".to_string()], &[]).unwrap();
        assert!(cfg.receivers.is_empty());
    }
}
