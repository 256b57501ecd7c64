use memmap2::Mmap;
use std::path::Path;

use crate::core::error::ConfigError;
use crate::core::Result;

#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    pub tensor_count: usize,
    pub total_bytes: u64,
    /// First few tensor names, for logging.
    pub names: Vec<String>,
}

/// Parse a custom `.safetensors` checkpoint header before any compile work,
/// so a broken path or file is reported up front rather than mid-pipeline.
pub fn inspect_checkpoint(path: &Path) -> Result<CheckpointInfo> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("safetensors") => {}
        _ => return Err(ConfigError::UnsupportedWeights(path.to_path_buf()).into()),
    }
    if !path.exists() {
        return Err(ConfigError::WeightsNotFound(path.to_path_buf()).into());
    }

    let file = std::fs::File::open(path)?;
    let total_bytes = file.metadata()?.len();
    let mmap = unsafe { Mmap::map(&file)? };

    let tensors = safetensors::SafeTensors::deserialize(&mmap)
        .map_err(|e| anyhow::anyhow!("invalid safetensors checkpoint {}: {}", path.display(), e))?;

    let mut names: Vec<String> = tensors.names().iter().map(|n| n.to_string()).collect();
    names.sort();
    let tensor_count = names.len();
    names.truncate(8);

    log::debug!(
        "checkpoint {}: {} tensors, {} bytes",
        path.display(),
        tensor_count,
        total_bytes
    );

    Ok(CheckpointInfo {
        tensor_count,
        total_bytes,
        names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("diffstudio-{}-{}", uuid::Uuid::new_v4(), name))
    }

    /// Minimal valid safetensors file: 8-byte LE header length, JSON header,
    /// then tensor data.
    fn write_minimal_safetensors(path: &Path) {
        let header = br#"{"model.weight":{"dtype":"F32","shape":[2],"data_offsets":[0,8]}}"#;
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(&(header.len() as u64).to_le_bytes()).unwrap();
        f.write_all(header).unwrap();
        f.write_all(&[0u8; 8]).unwrap();
    }

    #[test]
    fn test_inspect_valid_checkpoint() {
        let path = temp_file("ok.safetensors");
        write_minimal_safetensors(&path);
        let info = inspect_checkpoint(&path).unwrap();
        assert_eq!(info.tensor_count, 1);
        assert_eq!(info.names, vec!["model.weight".to_string()]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_ckpt_extension_rejected() {
        let path = temp_file("legacy.ckpt");
        std::fs::write(&path, b"not a safetensors file").unwrap();
        let err = inspect_checkpoint(&path).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_reported() {
        let path = temp_file("gone.safetensors");
        let err = inspect_checkpoint(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::WeightsNotFound(_))
        ));
    }

    #[test]
    fn test_garbage_header_rejected() {
        let path = temp_file("junk.safetensors");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(inspect_checkpoint(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
