//! Skill manifest discovery: one directory per skill, each holding a
//! `manifest.yaml`/`manifest.yml` file with the skill's declarative
//! metadata. A malformed manifest is skipped with a warning rather than
//! failing the whole scan; a missing `name` field falls back to the
//! directory name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{instrument, warn};

/// One skill's declarative metadata, as found on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    #[serde(default = "default_description")]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Fields a skill implementation cares about that the core doesn't
    /// interpret (`input_schema`, `output_schema`, `prompt_template`,
    /// `execution`, ...); kept opaque on purpose.
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
    #[serde(skip)]
    pub path: PathBuf,
}

fn default_description() -> String {
    "(no description provided)".to_string()
}

impl SkillManifest {
    /// Builds a manifest directly, bypassing disk discovery. Used by
    /// [`crate::testing`] to seed an in-memory registry for deterministic
    /// scenario tests.
    #[must_use]
    pub fn for_test(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tags: Vec::new(),
            version: None,
            kind: None,
            extra: serde_yaml::Mapping::new(),
            path: PathBuf::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    #[serde(default = "default_description")]
    description: String,
    #[serde(default)]
    tags: Vec<String>,
    version: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(flatten)]
    extra: serde_yaml::Mapping,
}

const MANIFEST_FILENAMES: [&str; 2] = ["manifest.yaml", "manifest.yml"];

/// Immutable point-in-time view of every discovered skill. Readers hold an
/// `Arc` to one snapshot; `reload` swaps the registry's pointer to a new
/// one, so a reader never observes a partially-updated map.
#[derive(Debug, Default)]
pub struct SkillSnapshot {
    by_name: HashMap<String, SkillManifest>,
}

impl SkillSnapshot {
    pub fn get(&self, name: &str) -> Option<&SkillManifest> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &SkillManifest> {
        self.by_name.values()
    }

    #[must_use]
    pub fn by_tag(&self, tag: &str) -> Vec<&SkillManifest> {
        self.by_name
            .values()
            .filter(|m| m.tags.iter().any(|t| t == tag))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    #[must_use]
    pub fn counts_by_tag(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for m in self.by_name.values() {
            for tag in &m.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    #[must_use]
    pub fn counts_by_type(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for m in self.by_name.values() {
            let key = m.kind.clone().unwrap_or_else(|| "unspecified".to_string());
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }
}

/// Discovers and holds skill manifests. Directory scan is one level deep;
/// a missing skills directory yields an empty registry rather than an
/// error.
pub struct SkillRegistry {
    root: PathBuf,
    snapshot: RwLock<Arc<SkillSnapshot>>,
}

impl SkillRegistry {
    /// Discovers manifests under `root` and returns the populated registry.
    /// Never errors on a missing root; always errors if `root` exists but
    /// isn't a directory.
    #[instrument]
    pub fn discover(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let snapshot = Self::scan(&root)?;
        Ok(Self {
            root,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    fn scan(root: &Path) -> std::io::Result<SkillSnapshot> {
        let mut by_name = HashMap::new();

        if !root.exists() {
            return Ok(SkillSnapshot { by_name });
        }

        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let manifest_path = MANIFEST_FILENAMES
                .iter()
                .map(|name| path.join(name))
                .find(|p| p.exists());

            let Some(manifest_path) = manifest_path else {
                continue;
            };

            match Self::load_one(&manifest_path, &path) {
                Ok(manifest) => {
                    by_name.insert(manifest.name.clone(), manifest);
                }
                Err(err) => {
                    warn!(path = %manifest_path.display(), error = %err, "skipping malformed skill manifest");
                }
            }
        }

        Ok(SkillSnapshot { by_name })
    }

    fn load_one(manifest_path: &Path, skill_dir: &Path) -> Result<SkillManifest, String> {
        let raw = std::fs::read_to_string(manifest_path).map_err(|e| e.to_string())?;
        let parsed: RawManifest = serde_yaml::from_str(&raw).map_err(|e| e.to_string())?;

        let name = parsed.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| {
            skill_dir
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "unnamed-skill".to_string())
        });

        Ok(SkillManifest {
            name,
            description: parsed.description,
            tags: parsed.tags,
            version: parsed.version,
            kind: parsed.kind,
            extra: parsed.extra,
            path: skill_dir.to_path_buf(),
        })
    }

    /// Builds a registry directly from an in-memory manifest set, with no
    /// backing directory. `reload` on a registry built this way re-scans
    /// an empty/nonexistent root and clears the snapshot -- callers that
    /// need reload semantics under test should use [`Self::discover`]
    /// against a `tempfile` directory instead.
    #[must_use]
    pub fn in_memory(manifests: Vec<SkillManifest>) -> Self {
        let by_name = manifests.into_iter().map(|m| (m.name.clone(), m)).collect();
        Self {
            root: PathBuf::new(),
            snapshot: RwLock::new(Arc::new(SkillSnapshot { by_name })),
        }
    }

    /// Re-runs discovery and atomically swaps the visible snapshot.
    #[instrument(skip(self))]
    pub fn reload(&self) -> std::io::Result<()> {
        let fresh = Self::scan(&self.root)?;
        *self.snapshot.write().expect("snapshot lock poisoned") = Arc::new(fresh);
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<SkillSnapshot> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, yaml: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("manifest.yaml"), yaml).unwrap();
    }

    #[test]
    fn missing_root_yields_empty_registry() {
        let registry = SkillRegistry::discover("/nonexistent/skills/path/xyz").unwrap();
        assert_eq!(registry.snapshot().len(), 0);
    }

    #[test]
    fn discovers_well_formed_manifests_and_skips_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("summarize"),
            "name: summarize\ndescription: Summarize text content\ntags: [text]\n",
        );
        write_manifest(&tmp.path().join("broken"), "not: [valid, yaml: : :");

        let registry = SkillRegistry::discover(tmp.path()).unwrap();
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 1);
        assert!(snap.contains("summarize"));
    }

    #[test]
    fn name_falls_back_to_directory_name_when_absent() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(
            &tmp.path().join("my-skill"),
            "description: something\ntags: []\n",
        );

        let registry = SkillRegistry::discover(tmp.path()).unwrap();
        assert!(registry.snapshot().contains("my-skill"));
    }

    #[test]
    fn reload_is_atomic_from_readers_perspective() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = SkillRegistry::discover(tmp.path()).unwrap();
        assert_eq!(registry.snapshot().len(), 0);

        write_manifest(&tmp.path().join("new-skill"), "name: new-skill\n");
        registry.reload().unwrap();
        assert_eq!(registry.snapshot().len(), 1);
    }
}
