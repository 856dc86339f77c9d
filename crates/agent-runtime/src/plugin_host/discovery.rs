//! Plugin discovery: walk one level under a directory, parse `plugin.yaml`
//! manifests, and compute a content hash for reload detection.
//!
//! Grounded on the teacher's `skills::scanner`/`skills::loader` directory
//! walk (`SkillLoader::load_all` scans one level, skips non-directories,
//! tolerates individual failures without aborting the scan).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::types::{PluginError, PluginManifest};

pub struct DiscoveredPlugin {
    pub dir: PathBuf,
    pub manifest: PluginManifest,
    pub content_hash: String,
}

/// Walks one level under `dir`. Each subdirectory containing a
/// `plugin.yaml` is a candidate; candidates that fail to parse or fail
/// manifest validation are skipped (logged), not fatal to the scan.
pub fn discover(dir: &Path) -> Vec<DiscoveredPlugin> {
    let mut found = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "plugin discovery: cannot read directory");
            return found;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest_path = path.join("plugin.yaml");
        if !manifest_path.exists() {
            continue;
        }
        match load_one(&path, &manifest_path) {
            Ok(discovered) => found.push(discovered),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to discover plugin");
            }
        }
    }
    found
}

fn load_one(plugin_dir: &Path, manifest_path: &Path) -> Result<DiscoveredPlugin, PluginError> {
    let manifest_text = std::fs::read_to_string(manifest_path)?;
    let manifest: PluginManifest = serde_yaml::from_str(&manifest_text)
        .map_err(|e| PluginError::LoadFailed(plugin_dir.display().to_string(), e.to_string()))?;
    manifest.validate()?;

    let entry_path = plugin_dir.join(&manifest.entry);
    let entry_bytes = std::fs::read(&entry_path)?;
    let content_hash = content_hash(&manifest_text, &entry_bytes);

    Ok(DiscoveredPlugin {
        dir: plugin_dir.to_path_buf(),
        manifest,
        content_hash,
    })
}

/// SHA-256 over the manifest text and entry library bytes, so a changed
/// manifest or a changed binary both register as a reload (spec.md §4.7).
pub fn content_hash(manifest_text: &str, entry_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(manifest_text.as_bytes());
    hasher.update(entry_bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plugin(dir: &Path, id: &str, entry_contents: &str) {
        let plugin_dir = dir.join(id);
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.yaml"),
            format!(
                "id: {id}\nname: {id}\nversion: 1.0.0\ndescription: test plugin\nentry: main.so\npermissions: []\n"
            ),
        )
        .unwrap();
        std::fs::write(plugin_dir.join("main.so"), entry_contents).unwrap();
    }

    #[test]
    fn discovers_valid_plugins() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "sample-plugin", "binary-stub");
        let found = discover(dir.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].manifest.id, "sample-plugin");
    }

    #[test]
    fn skips_directories_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("not-a-plugin")).unwrap();
        let found = discover(dir.path());
        assert!(found.is_empty());
    }

    #[test]
    fn content_hash_changes_when_entry_changes() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "sample-plugin", "v1");
        let first = discover(dir.path());
        write_plugin(dir.path(), "sample-plugin-v2", "v2");
        let second = discover(dir.path());
        let h1 = &first.iter().find(|p| p.manifest.id == "sample-plugin").unwrap().content_hash;
        let h2 = &second.iter().find(|p| p.manifest.id == "sample-plugin-v2").unwrap().content_hash;
        assert_ne!(h1, h2);
    }

    #[test]
    fn rejects_manifest_with_traversal_entry() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("evil");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.yaml"),
            "id: evil\nname: evil\nversion: 1.0.0\ndescription: x\nentry: ../../etc/passwd\n",
        )
        .unwrap();
        let found = discover(dir.path());
        assert!(found.is_empty());
    }
}
