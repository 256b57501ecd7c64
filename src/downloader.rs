use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::{header, Client};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::infra::store::{ArtifactStore, Manifest};

/// Fetches compiled-pipeline artifacts from a registry over HTTP. Single
/// stream per blob with content digests verified after download.
pub struct Downloader {
    client: Client,
    registry_url: Url,
}

impl Downloader {
    pub fn new(registry_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(600))
                .build()?,
            registry_url: Url::parse(registry_url)
                .map_err(|e| anyhow!("invalid registry url {}: {}", registry_url, e))?,
        })
    }

    fn manifest_url(&self, name: &str, tag: &str) -> String {
        format!("{}v2/{}/manifests/{}", self.registry_url, name, tag)
    }

    fn blob_url(&self, name: &str, digest: &str) -> String {
        format!("{}v2/{}/blobs/{}", self.registry_url, name, digest)
    }

    pub async fn fetch_manifest(&self, name: &str, tag: &str) -> Result<Manifest> {
        let url = self.manifest_url(name, tag);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("failed to fetch manifest {}: {}", url, response.status());
        }

        Ok(response.json().await?)
    }

    /// Stream one blob to `dest`, reporting `(completed, total)` as it goes,
    /// then verify the digest.
    pub async fn download_blob<F>(
        &self,
        name: &str,
        digest: &str,
        dest: &Path,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(u64, u64) + Send,
    {
        let url = self.blob_url(name, digest);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("failed to fetch blob {}: {}", url, response.status());
        }

        let total = response.content_length().unwrap_or(0);
        let mut out = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut completed = 0u64;

        use tokio::io::AsyncWriteExt;
        while let Some(item) = stream.next().await {
            let chunk = item?;
            out.write_all(&chunk).await?;
            completed += chunk.len() as u64;
            progress(completed, total.max(completed));
        }
        out.flush().await?;

        verify_digest(dest, digest).await
    }

    /// Pull a full artifact: manifest plus every module blob not already in
    /// the store.
    pub async fn pull<F>(&self, name: &str, store: &ArtifactStore, mut progress: F) -> Result<()>
    where
        F: FnMut(&str, u64, u64) + Send,
    {
        let (base, tag) = ArtifactStore::resolve_name(name);
        let manifest = self.fetch_manifest(&base, &tag).await?;

        for layer in &manifest.modules {
            if store.stat_blob(&layer.digest).is_some() {
                log::debug!("blob {} already present, skipping", layer.digest);
                progress(&layer.name, layer.size, layer.size);
                continue;
            }
            let dest = store.blob_path(&layer.digest);
            let module = layer.name.clone();
            self.download_blob(&base, &layer.digest, &dest, |done, total| {
                progress(&module, done, total)
            })
            .await?;
        }

        store.write_manifest(name, &manifest)?;
        log::info!("pulled {} ({} modules)", name, manifest.modules.len());
        Ok(())
    }
}

async fn verify_digest(path: &Path, expected: &str) -> Result<()> {
    let path = path.to_owned();
    let expected = expected.to_owned();

    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        let digest = format!("sha256:{:x}", hasher.finalize());

        if digest != expected {
            let _ = std::fs::remove_file(&path);
            return Err(anyhow!("digest mismatch: expected {}, got {}", expected, digest));
        }
        Ok(())
    })
    .await?
}
