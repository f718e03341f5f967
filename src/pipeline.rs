//! End-to-end runs
//!
//! A [`Pipeline`] composes the capture reader, the feature extractor and the
//! classifier workflow. Each run is one synchronous pass over one capture.
//!
//! # Example
//! ```ignore
//! use fanet_ids::{Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::default())?;
//! let report = pipeline.train("trace.pcap".as_ref(), "results.csv".as_ref())?;
//! println!("test accuracy {:.3}", report.test.accuracy);
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::{CaptureReader, ReaderStats};
use crate::config::PipelineConfig;
use crate::error::{IdsError, Result};
use crate::ml::{
    evaluate, predict_all, predict_rows, split_indices, Dataset, DatasetBuilder, Evaluation,
    ExtractionStats, FeatureSchema, FeedForward, LabelingMode, ModelArtifact, Prediction, Trainer,
    TrainingBackend, TrainingHistory,
};
use crate::output::{render_learning_curves, write_annotated_csv, write_dataset_csv, write_json};

/// Outcome of a training run; serialized as the JSON run summary
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub started_at: DateTime<Utc>,
    pub input: PathBuf,
    pub schema: FeatureSchema,
    pub reader: ReaderStats,
    pub extraction: ExtractionStats,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub history: TrainingHistory,
    /// Metrics on the held-out test partition
    pub test: Evaluation,
    pub anomalous_predictions: usize,
    pub csv_path: PathBuf,
    pub chart_path: PathBuf,
    pub model_path: PathBuf,
    pub summary_path: Option<PathBuf>,
    /// Test-partition predictions, in the order written to the CSV
    #[serde(skip)]
    pub predictions: Vec<Prediction>,
}

/// Outcome of a detection run
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub input: PathBuf,
    pub schema: FeatureSchema,
    pub model_path: PathBuf,
    pub reader: ReaderStats,
    pub extraction: ExtractionStats,
    pub threshold: f32,
    pub anomalous: usize,
    pub csv_path: Option<PathBuf>,
    pub predictions: Vec<Prediction>,
}

impl DetectionReport {
    pub fn rows(&self) -> usize {
        self.predictions.len()
    }
}

/// Outcome of a plain feature extraction
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub input: PathBuf,
    pub schema: FeatureSchema,
    pub reader: ReaderStats,
    pub extraction: ExtractionStats,
    pub rows: usize,
    pub csv_path: PathBuf,
}

/// Reader -> extractor -> classifier
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read `input` and extract a dataset under `schema`
    pub fn load_dataset(
        &self,
        input: &Path,
        schema: FeatureSchema,
        labeling: LabelingMode,
    ) -> Result<(Dataset, ExtractionStats, ReaderStats)> {
        let mut reader = CaptureReader::open(input)?;
        let (dataset, stats) = DatasetBuilder::new(schema, labeling).build(reader.by_ref());
        Ok((dataset, stats, reader.stats()))
    }

    /// Write the feature table of `input` without training
    pub fn extract(&self, input: &Path, output: &Path) -> Result<ExtractionReport> {
        let schema = self.config.extraction.train_schema;
        let (dataset, extraction, reader) =
            self.load_dataset(input, schema, self.config.extraction.labeling.clone())?;
        if dataset.is_empty() {
            return Err(IdsError::EmptyDataset);
        }
        let rows = write_dataset_csv(output, &dataset)?;

        Ok(ExtractionReport {
            input: input.to_path_buf(),
            schema,
            reader,
            extraction,
            rows,
            csv_path: output.to_path_buf(),
        })
    }

    /// Train on `input`, annotate the test partition into `output`, save the model
    pub fn train(&self, input: &Path, output: &Path) -> Result<TrainingReport> {
        let started_at = Utc::now();
        let schema = self.config.extraction.train_schema;
        let training = self.config.training;

        let (dataset, extraction, reader) =
            self.load_dataset(input, schema, self.config.extraction.labeling.clone())?;
        if dataset.is_empty() {
            return Err(IdsError::EmptyDataset);
        }
        let required = training.minimum_rows();
        if dataset.len() < required {
            return Err(IdsError::InsufficientData {
                rows: dataset.len(),
                required,
            });
        }

        let partition = split_indices(dataset.len(), training.test_ratio, training.seed);
        info!(
            "Split {} rows into {} train / {} test (seed {})",
            dataset.len(),
            partition.train.len(),
            partition.test.len(),
            training.seed
        );

        let mut rng = StdRng::seed_from_u64(training.seed);
        let model = FeedForward::<TrainingBackend>::new(
            schema.input_width(),
            &self.config.model,
            &mut rng,
            &Default::default(),
        )?;
        let (model, history) = Trainer::new(training).fit(model, &dataset, &partition.train)?;

        let test = evaluate(&model, &dataset, &partition.test, training.threshold)?;
        info!(
            "Test loss {:.4}, accuracy {:.4} over {} rows",
            test.loss, test.accuracy, test.samples
        );

        let predictions = predict_rows(&model, &dataset, &partition.test, training.threshold)?;
        let anomalous_predictions = predictions.iter().filter(|p| p.is_anomalous()).count();
        write_annotated_csv(output, &dataset, &predictions)?;

        let chart_path = self.config.output.chart_path.clone();
        render_learning_curves(&chart_path, &history, self.config.output.title.as_deref())?;

        let model_path = self.config.output.model_path.clone();
        ModelArtifact::new(
            schema,
            self.config.model,
            training.threshold,
            partition.train.len(),
            &model,
        )?
        .save(&model_path)?;

        let mut report = TrainingReport {
            started_at,
            input: input.to_path_buf(),
            schema,
            reader,
            extraction,
            rows: dataset.len(),
            train_rows: partition.train.len(),
            test_rows: partition.test.len(),
            history,
            test,
            anomalous_predictions,
            csv_path: output.to_path_buf(),
            chart_path,
            model_path,
            summary_path: None,
            predictions,
        };

        if self.config.output.summary {
            let summary_path = summary_path(output);
            write_json(&summary_path, &report)?;
            report.summary_path = Some(summary_path);
        }

        Ok(report)
    }

    /// Score every packet of `input` with the saved model
    pub fn detect(&self, input: &Path, output: Option<&Path>) -> Result<DetectionReport> {
        let model_path = self.config.output.model_path.clone();
        let artifact = ModelArtifact::load(&model_path)?;
        let schema = self.config.extraction.detect_schema.unwrap_or(artifact.schema);
        artifact.check_schema(schema)?;

        let (dataset, extraction, reader) =
            self.load_dataset(input, schema, LabelingMode::Unlabeled)?;
        if dataset.is_empty() {
            return Err(IdsError::EmptyDataset);
        }

        let network = artifact.network()?;
        let predictions = predict_all(&network, &dataset, artifact.threshold)?;
        let anomalous = predictions.iter().filter(|p| p.is_anomalous()).count();
        if anomalous > 0 {
            warn!("{} of {} packets classified anomalous", anomalous, predictions.len());
        } else {
            info!("No anomalous packets among {}", predictions.len());
        }

        if let Some(output) = output {
            write_annotated_csv(output, &dataset, &predictions)?;
        }

        Ok(DetectionReport {
            input: input.to_path_buf(),
            schema,
            model_path,
            reader,
            extraction,
            threshold: artifact.threshold,
            anomalous,
            csv_path: output.map(Path::to_path_buf),
            predictions,
        })
    }
}

/// JSON run summary written beside the prediction table
///
/// `results.csv` gives `results.summary.json`. The name always differs from
/// `output`, whatever its extension.
pub fn summary_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "results".to_string());
    output.with_file_name(format!("{}.summary.json", stem))
}
