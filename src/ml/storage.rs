//! Model artifact persistence
//!
//! A trained network is stored together with the schema it was trained
//! under, so detection runs can refuse inputs of the wrong shape.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use burn::prelude::*;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::features::FeatureSchema;
use super::network::{FeedForward, InferenceBackend, ModelConfig};
use crate::error::{IdsError, Result};

/// Version of the on-disk layout
pub const ARTIFACT_FORMAT_VERSION: u32 = 2;

/// Default artifact path, relative to the working directory
pub const DEFAULT_MODEL_PATH: &str = "fnn_ids_model.bin";

/// Trained model bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub schema: FeatureSchema,
    pub schema_version: u32,
    pub input_width: usize,
    pub model_config: ModelConfig,
    pub threshold: f32,
    pub trained_at: DateTime<Utc>,
    /// Rows the network was fitted on
    pub training_rows: usize,
    pub parameter_count: usize,
    /// Network weights as a burn binary record
    pub weights: Vec<u8>,
}

impl ModelArtifact {
    pub fn new<B: Backend>(
        schema: FeatureSchema,
        model_config: ModelConfig,
        threshold: f32,
        training_rows: usize,
        network: &FeedForward<B>,
    ) -> Result<Self> {
        Ok(Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            schema,
            schema_version: schema.version(),
            input_width: network.input_width(),
            model_config,
            threshold,
            trained_at: Utc::now(),
            training_rows,
            parameter_count: network.parameter_count(),
            weights: network.to_bytes()?,
        })
    }

    /// Rebuild the stored network on the CPU backend
    pub fn network(&self) -> Result<FeedForward<InferenceBackend>> {
        // The seed only fills the shell; every weight is overwritten by the record.
        let mut rng = StdRng::seed_from_u64(0);
        let shell = FeedForward::new(self.input_width, &self.model_config, &mut rng, &Default::default())?;
        let network = shell.load_bytes(&self.weights)?;
        if network.input_width() != self.input_width {
            return Err(IdsError::Model(format!(
                "stored weights take {} inputs, artifact declares {}",
                network.input_width(),
                self.input_width
            )));
        }
        Ok(network)
    }

    /// Write the artifact, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| IdsError::persistence(path, e))?;
        }

        let tmp = path.with_extension("tmp");
        {
            let file = File::create(&tmp).map_err(|e| IdsError::persistence(path, e))?;
            let mut writer = BufWriter::new(file);
            bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
                .map_err(|e| IdsError::persistence(path, e))?;
            writer.flush().map_err(|e| IdsError::persistence(path, e))?;
        }
        fs::rename(&tmp, path).map_err(|e| IdsError::persistence(path, e))?;

        info!(
            "Saved model ({} parameters, schema {}) to {}",
            self.parameter_count,
            self.schema,
            path.display()
        );
        Ok(())
    }

    /// Read an artifact written by [`ModelArtifact::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| IdsError::persistence(path, e))?;
        let mut reader = BufReader::new(file);
        let artifact: Self =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| IdsError::persistence(path, format!("corrupt artifact: {}", e)))?;

        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(IdsError::persistence(
                path,
                format!(
                    "unsupported artifact format {} (expected {})",
                    artifact.format_version, ARTIFACT_FORMAT_VERSION
                ),
            ));
        }
        artifact
            .network()
            .map_err(|e| IdsError::persistence(path, format!("unusable weights: {}", e)))?;

        debug!(
            "Loaded model from {} (schema {}, trained {})",
            path.display(),
            artifact.schema,
            artifact.trained_at.format("%Y-%m-%d %H:%M:%S")
        );
        Ok(artifact)
    }

    /// Fail if rows extracted with `schema` cannot be fed to this model
    pub fn check_schema(&self, schema: FeatureSchema) -> Result<()> {
        if schema.input_width() != self.input_width {
            return Err(IdsError::SchemaMismatch {
                expected: self.input_width,
                found: schema.input_width(),
            });
        }
        if schema != self.schema || schema.version() != self.schema_version {
            warn!(
                "Model was trained with schema {}/v{}, extracting with {}; widths agree",
                self.schema.name(),
                self.schema_version,
                schema
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::FeatureVector;
    use tempfile::TempDir;

    fn network(schema: FeatureSchema, config: &ModelConfig) -> FeedForward<InferenceBackend> {
        let mut rng = StdRng::seed_from_u64(3);
        FeedForward::new(schema.input_width(), config, &mut rng, &Default::default()).unwrap()
    }

    fn artifact(schema: FeatureSchema) -> ModelArtifact {
        let config = ModelConfig {
            hidden_width: 8,
            ..ModelConfig::default()
        };
        ModelArtifact::new(schema, config, 0.5, 100, &network(schema, &config)).unwrap()
    }

    #[test]
    fn test_save_load_predicts_identically() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("models").join("fnn.bin");
        let saved = artifact(FeatureSchema::PacketHeader);
        saved.save(&path).unwrap();

        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded, saved);

        let input = FeatureVector::from(vec![60.0, 64.0, 6.0, 1.0, 0.0]);
        let config = saved.model_config;
        let a = network(FeatureSchema::PacketHeader, &config).predict(&input).unwrap();
        let b = loaded.network().unwrap().predict(&input).unwrap();
        assert_eq!(a, b);
        assert_eq!(loaded.parameter_count, 5 * 8 + 8 + 2 * (8 * 8 + 8) + 8 + 1);
    }

    #[test]
    fn test_load_rejects_mismatched_weights() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fnn.bin");
        let mut tampered = artifact(FeatureSchema::PacketHeader);
        tampered.input_width = 3;
        tampered.save(&path).unwrap();

        assert!(matches!(
            ModelArtifact::load(&path),
            Err(IdsError::ModelPersistence { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.bin");
        match ModelArtifact::load(&path) {
            Err(IdsError::ModelPersistence { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result: {:?}", other.map(|a| a.input_width)),
        }
    }

    #[test]
    fn test_load_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("corrupt.bin");
        fs::write(&path, b"definitely not a model").unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(IdsError::ModelPersistence { .. })
        ));
    }

    #[test]
    fn test_check_schema_width() {
        let model = artifact(FeatureSchema::PacketHeader);
        assert!(model.check_schema(FeatureSchema::PacketHeader).is_ok());
        assert!(matches!(
            model.check_schema(FeatureSchema::CaptureTable),
            Err(IdsError::SchemaMismatch { expected: 5, found: 3 })
        ));
    }
}
