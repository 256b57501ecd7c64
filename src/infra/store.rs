use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::Result;

/// Manifest describing one pulled pipeline: which compiled sub-modules it is
/// made of and where their blobs live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: i32,
    pub modules: Vec<ModuleLayer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleLayer {
    /// Sub-module role: clip, unet, vae, llm.
    pub name: String,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct LocalArtifact {
    pub name: String,
    pub tag: String,
    pub size: u64,
    pub modified_at: i64,
    pub modules: usize,
}

/// On-disk layout under the store root:
/// `manifests/<name with / as -->/<tag>.json` and `blobs/sha256-<hex>`.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join("manifests"))?;
        fs::create_dir_all(root.join("blobs"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve_name(name: &str) -> (String, String) {
        let parts: Vec<&str> = name.splitn(2, ':').collect();
        let base = parts[0].to_string();
        let tag = parts.get(1).copied().unwrap_or("latest").to_string();
        (base, tag)
    }

    pub fn manifest_path(&self, name: &str, tag: &str) -> PathBuf {
        self.root
            .join("manifests")
            .join(name.replace('/', "--"))
            .join(format!("{}.json", tag))
    }

    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.root.join("blobs").join(digest.replace(':', "-"))
    }

    pub fn read_manifest(&self, name: &str) -> Result<Manifest> {
        let (base, tag) = Self::resolve_name(name);
        let path = self.manifest_path(&base, &tag);
        let content = fs::read_to_string(&path)
            .map_err(|_| anyhow::anyhow!("artifact '{}' not found, pull it first", name))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write_manifest(&self, name: &str, manifest: &Manifest) -> Result<()> {
        let (base, tag) = Self::resolve_name(name);
        let path = self.manifest_path(&base, &tag);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, serde_json::to_string_pretty(manifest)?)?;
        Ok(())
    }

    /// Store a blob, verifying its content digest first.
    pub fn create_blob(&self, digest: &str, data: &[u8]) -> Result<PathBuf> {
        let actual = digest_bytes(data);
        if actual != digest {
            anyhow::bail!("digest mismatch: expected {}, got {}", digest, actual);
        }
        let path = self.blob_path(digest);
        fs::write(&path, data)?;
        Ok(path)
    }

    pub fn stat_blob(&self, digest: &str) -> Option<u64> {
        fs::metadata(self.blob_path(digest)).ok().map(|m| m.len())
    }

    pub fn list_local(&self) -> Result<Vec<LocalArtifact>> {
        let mut out = Vec::new();
        let manifests = self.root.join("manifests");
        for entry in fs::read_dir(&manifests)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let name = dir
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .replace("--", "/");
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let tag = path
                    .file_stem()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string();
                let manifest: Manifest = serde_json::from_str(&fs::read_to_string(&path)?)?;
                let size = manifest.modules.iter().map(|m| m.size).sum();
                let modified_at = fs::metadata(&path)?
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                out.push(LocalArtifact {
                    name: name.clone(),
                    tag,
                    size,
                    modified_at,
                    modules: manifest.modules.len(),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Remove the manifest and any blobs no other manifest references.
    pub fn delete(&self, name: &str) -> Result<()> {
        let (base, tag) = Self::resolve_name(name);
        let path = self.manifest_path(&base, &tag);
        if !path.exists() {
            anyhow::bail!("artifact '{}' not found", name);
        }
        let manifest: Manifest = serde_json::from_str(&fs::read_to_string(&path)?)?;
        fs::remove_file(&path)?;
        if let Some(parent) = path.parent() {
            let _ = fs::remove_dir(parent);
        }

        let still_referenced: std::collections::HashSet<String> = self
            .list_local()?
            .iter()
            .filter_map(|a| {
                self.read_manifest(&format!("{}:{}", a.name, a.tag))
                    .ok()
                    .map(|m| m.modules.into_iter().map(|l| l.digest))
            })
            .flatten()
            .collect();

        for layer in manifest.modules {
            if !still_referenced.contains(&layer.digest) {
                let _ = fs::remove_file(self.blob_path(&layer.digest));
            }
        }
        Ok(())
    }
}

pub fn digest_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (PathBuf, ArtifactStore) {
        let root = std::env::temp_dir().join(format!("diffstudio-store-{}", uuid::Uuid::new_v4()));
        let store = ArtifactStore::new(&root).unwrap();
        (root, store)
    }

    fn manifest_for(data: &[u8]) -> Manifest {
        Manifest {
            schema_version: 2,
            modules: vec![ModuleLayer {
                name: "unet".to_string(),
                media_type: "application/vnd.diffstudio.module".to_string(),
                digest: digest_bytes(data),
                size: data.len() as u64,
            }],
        }
    }

    #[test]
    fn test_resolve_name() {
        assert_eq!(
            ArtifactStore::resolve_name("org/model:v2"),
            ("org/model".to_string(), "v2".to_string())
        );
        assert_eq!(
            ArtifactStore::resolve_name("model"),
            ("model".to_string(), "latest".to_string())
        );
    }

    #[test]
    fn test_blob_digest_verified() {
        let (root, store) = temp_store();
        let data = b"compiled module bytes";
        assert!(store.create_blob(&digest_bytes(data), data).is_ok());
        assert!(store.create_blob("sha256:deadbeef", data).is_err());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_manifest_roundtrip_and_list() {
        let (root, store) = temp_store();
        let data = b"unet blob";
        store.create_blob(&digest_bytes(data), data).unwrap();
        store
            .write_manifest("org/sd21:latest", &manifest_for(data))
            .unwrap();

        let read = store.read_manifest("org/sd21").unwrap();
        assert_eq!(read.modules.len(), 1);
        assert_eq!(read.modules[0].name, "unet");

        let local = store.list_local().unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].name, "org/sd21");
        assert_eq!(local[0].size, data.len() as u64);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_delete_removes_unreferenced_blobs() {
        let (root, store) = temp_store();
        let data = b"blob";
        store.create_blob(&digest_bytes(data), data).unwrap();
        store.write_manifest("m:latest", &manifest_for(data)).unwrap();

        store.delete("m").unwrap();
        assert!(store.read_manifest("m").is_err());
        assert!(store.stat_blob(&digest_bytes(data)).is_none());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn test_missing_manifest_error_mentions_pull() {
        let (root, store) = temp_store();
        let err = store.read_manifest("ghost").unwrap_err();
        assert!(err.to_string().contains("pull"));
        let _ = fs::remove_dir_all(root);
    }
}
