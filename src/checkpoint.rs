//! # Model Checkpointing
//!
//! Save and load model weights and configurations.
//!
//! ## File Format
//!
//! Checkpoints are stored as a directory containing:
//! - `config.json` - Model configuration and training metadata
//! - `model.safetensors` - Model weights in safetensors format
//!
//! The configuration type is generic, so NTM and DNC checkpoints share the
//! same layout and helpers.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::dnc::{Dnc, DncConfig};
use crate::error::MemoryError;
use crate::ntm::{Ntm, NtmConfig};
use crate::MemoryResult;

/// Metadata stored with checkpoints
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CheckpointMetadata<C> {
    /// Model configuration
    pub config: C,
    /// Training step when saved
    pub step: Option<usize>,
    /// Training loss when saved
    pub loss: Option<f64>,
    /// Unix timestamp (seconds)
    pub timestamp: String,
    /// Crate version that wrote the checkpoint
    pub version: String,
}

impl<C> CheckpointMetadata<C> {
    pub fn new(config: C) -> Self {
        Self {
            config,
            step: None,
            loss: None,
            timestamp: unix_timestamp(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_training_info(mut self, step: usize, loss: f64) -> Self {
        self.step = Some(step);
        self.loss = Some(loss);
        self
    }
}

fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}")
}

/// Save a model checkpoint to a directory.
///
/// Creates the directory structure:
/// ```text
/// checkpoint_dir/
/// ├── config.json       # Model configuration and metadata
/// └── model.safetensors # Model weights
/// ```
pub fn save_checkpoint<C: Serialize + Clone>(
    config: &C,
    varmap: &VarMap,
    checkpoint_dir: impl AsRef<Path>,
    step: Option<usize>,
    loss: Option<f64>,
) -> MemoryResult<()> {
    let dir = checkpoint_dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut metadata = CheckpointMetadata::new(config.clone());
    if let (Some(s), Some(l)) = (step, loss) {
        metadata = metadata.with_training_info(s, l);
    }

    let config_json = serde_json::to_string_pretty(&metadata)
        .map_err(|e| MemoryError::Serialization(e.to_string()))?;
    fs::write(dir.join("config.json"), config_json)?;

    varmap
        .save(dir.join("model.safetensors"))
        .map_err(|e| MemoryError::Serialization(format!("failed to save weights: {e}")))?;

    log::info!("saved checkpoint to {dir:?}");
    Ok(())
}

/// Read only the metadata of a checkpoint.
pub fn load_metadata<C: DeserializeOwned>(
    checkpoint_dir: impl AsRef<Path>,
) -> MemoryResult<CheckpointMetadata<C>> {
    let config_str = fs::read_to_string(checkpoint_dir.as_ref().join("config.json"))?;
    serde_json::from_str(&config_str).map_err(|e| MemoryError::Serialization(e.to_string()))
}

/// Load an NTM checkpoint from a directory.
pub fn load_ntm_checkpoint(
    checkpoint_dir: impl AsRef<Path>,
    device: &Device,
) -> MemoryResult<(Ntm, VarMap, CheckpointMetadata<NtmConfig>)> {
    let dir = checkpoint_dir.as_ref();
    let metadata: CheckpointMetadata<NtmConfig> = load_metadata(dir)?;

    // Build the model first so the varmap holds every expected variable,
    // then overwrite the fresh values with the saved ones.
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = Ntm::new(metadata.config.clone(), vb)?;
    varmap
        .load(dir.join("model.safetensors"))
        .map_err(|e| MemoryError::Serialization(format!("failed to load weights: {e}")))?;

    log::info!("loaded NTM checkpoint from {dir:?}");
    Ok((model, varmap, metadata))
}

/// Load a DNC checkpoint from a directory.
pub fn load_dnc_checkpoint(
    checkpoint_dir: impl AsRef<Path>,
    device: &Device,
) -> MemoryResult<(Dnc, VarMap, CheckpointMetadata<DncConfig>)> {
    let dir = checkpoint_dir.as_ref();
    let metadata: CheckpointMetadata<DncConfig> = load_metadata(dir)?;

    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = Dnc::new(metadata.config.clone(), vb)?;
    varmap
        .load(dir.join("model.safetensors"))
        .map_err(|e| MemoryError::Serialization(format!("failed to load weights: {e}")))?;

    log::info!("loaded DNC checkpoint from {dir:?}");
    Ok((model, varmap, metadata))
}

/// Check if a checkpoint exists
pub fn checkpoint_exists(checkpoint_dir: impl AsRef<Path>) -> bool {
    let dir = checkpoint_dir.as_ref();
    dir.join("config.json").exists() && dir.join("model.safetensors").exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use tempfile::TempDir;

    #[test]
    fn test_checkpoint_metadata() {
        let metadata =
            CheckpointMetadata::new(NtmConfig::default()).with_training_info(1000, 0.5);
        assert_eq!(metadata.step, Some(1000));
        assert_eq!(metadata.loss, Some(0.5));
    }

    #[test]
    fn test_save_and_load_ntm_checkpoint() {
        let device = Device::Cpu;
        let config = NtmConfig {
            input_size: 5,
            output_size: 3,
            controller_size: 12,
            memory: MemoryConfig::tiny(),
            ..NtmConfig::default()
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _model = Ntm::new(config.clone(), vb).unwrap();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ntm-test");
        save_checkpoint(&config, &varmap, &path, Some(100), Some(0.25)).unwrap();
        assert!(checkpoint_exists(&path));

        let (model, _varmap, metadata) = load_ntm_checkpoint(&path, &device).unwrap();
        assert_eq!(metadata.step, Some(100));
        assert_eq!(metadata.loss, Some(0.25));
        assert_eq!(model.config().input_size, config.input_size);
    }

    #[test]
    fn test_save_and_load_dnc_roundtrips_weights() {
        let device = Device::Cpu;
        let config = DncConfig {
            input_size: 4,
            output_size: 2,
            controller_size: 10,
            memory: MemoryConfig::tiny(),
            ..DncConfig::default()
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _model = Dnc::new(config.clone(), vb).unwrap();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dnc-test");
        save_checkpoint(&config, &varmap, &path, None, None).unwrap();

        let (_model, loaded_varmap, _metadata) = load_dnc_checkpoint(&path, &device).unwrap();
        let original: Vec<_> = varmap.all_vars();
        let loaded: Vec<_> = loaded_varmap.all_vars();
        assert_eq!(original.len(), loaded.len());
    }

    #[test]
    fn test_missing_checkpoint_fails() {
        let device = Device::Cpu;
        let temp_dir = TempDir::new().unwrap();
        let result = load_ntm_checkpoint(temp_dir.path().join("absent"), &device);
        assert!(result.is_err());
    }
}
