use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IdsError, Result};
use crate::ml::{FeatureSchema, LabelingMode, ModelConfig, TrainingConfig, DEFAULT_MODEL_PATH};
use crate::output::DEFAULT_CHART_PATH;

/// Everything a pipeline run needs, loadable from a TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub training: TrainingConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl PipelineConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IdsError::InvalidConfig(format!("failed to read config file {}: {}", path.display(), e))
        })?;

        let config: PipelineConfig = toml::from_str(&content).map_err(|e| {
            IdsError::InvalidConfig(format!("failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as TOML, e.g. for a configuration template
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IdsError::InvalidConfig(e.to_string()))
    }

    /// Reject values no run could succeed with
    pub fn validate(&self) -> Result<()> {
        self.training.validate()?;
        self.model.validate(self.extraction.train_schema.input_width())?;
        if self.output.model_path.as_os_str().is_empty() {
            return Err(IdsError::InvalidConfig("output.model_path is empty".to_string()));
        }
        if self.output.chart_path.as_os_str().is_empty() {
            return Err(IdsError::InvalidConfig("output.chart_path is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Schema used for training and plain extraction
    #[serde(default = "default_train_schema")]
    pub train_schema: FeatureSchema,

    /// Schema used for detection (unset = the schema stored in the model)
    #[serde(default)]
    pub detect_schema: Option<FeatureSchema>,

    /// How training rows get their labels
    #[serde(default)]
    pub labeling: LabelingMode,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            train_schema: default_train_schema(),
            detect_schema: None,
            labeling: LabelingMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Where the trained model is written and read back from
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Learning-curve PNG
    #[serde(default = "default_chart_path")]
    pub chart_path: PathBuf,

    /// Prefix for the chart captions
    #[serde(default)]
    pub title: Option<String>,

    /// Write a JSON run summary next to the CSV
    #[serde(default = "default_true")]
    pub summary: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            chart_path: default_chart_path(),
            title: None,
            summary: true,
        }
    }
}

fn default_train_schema() -> FeatureSchema {
    FeatureSchema::CaptureTable
}

fn default_model_path() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_PATH)
}

fn default_chart_path() -> PathBuf {
    PathBuf::from(DEFAULT_CHART_PATH)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::Activation;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.extraction.train_schema, FeatureSchema::CaptureTable);
        assert_eq!(config.extraction.labeling, LabelingMode::Placeholder);
        assert_eq!(config.training.epochs, 20);
        assert_eq!(config.model.hidden_width, 128);
        assert_eq!(config.output.model_path, PathBuf::from("fnn_ids_model.bin"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = PipelineConfig::default();
        config.extraction.labeling =
            LabelingMode::SourceAddresses(vec![IpAddr::V4(Ipv4Addr::new(10, 1, 1, 7))]);
        config.extraction.detect_schema = Some(FeatureSchema::PacketHeader);
        config.output.title = Some("FANET".to_string());

        let toml_str = config.to_toml().unwrap();
        let parsed: PipelineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fanet.toml");
        std::fs::write(
            &path,
            r#"
[extraction]
train_schema = "packet-header"

[model]
activation = "tanh"

[training]
epochs = 5
"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.extraction.train_schema, FeatureSchema::PacketHeader);
        assert_eq!(config.model.activation, Activation::Tanh);
        assert_eq!(config.model.hidden_layers, 3);
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.batch_size, 32);
        assert!(config.output.summary);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.toml");
        std::fs::write(&path, "[training]\nepochs = 0\n").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(IdsError::InvalidConfig(_))
        ));

        std::fs::write(&path, "[extraction]\ntrain_schema = \"flows\"\n").unwrap();
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(IdsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(PipelineConfig::load(temp.path().join("nope.toml")).is_err());
    }
}
