//! Feature extraction and feed-forward classification
//!
//! # Features
//! - Declared, versioned per-packet feature schemas
//! - Dataset assembly with explicit labeling modes
//! - Feed-forward network with Adam training and seeded splits
//! - Model artifacts that remember their schema
//!
//! # Example
//! ```ignore
//! use fanet_ids::capture::CaptureReader;
//! use fanet_ids::ml::{DatasetBuilder, FeatureSchema, LabelingMode};
//!
//! let reader = CaptureReader::open("trace.pcap")?;
//! let builder = DatasetBuilder::new(FeatureSchema::PacketHeader, LabelingMode::Unlabeled);
//! let (dataset, stats) = builder.build(reader);
//! ```

pub mod batch;
pub mod dataset;
pub mod features;
pub mod network;
pub mod prediction;
pub mod storage;
pub mod training;

pub use dataset::{Dataset, DatasetBuilder, ExtractionStats, LabelingMode, LABEL_ANOMALOUS, LABEL_NORMAL};
pub use features::{Cell, Column, ColumnKind, FeatureRow, FeatureSchema, FeatureVector, Unextractable, UNSPECIFIED_ADDR};
pub use batch::{RowBatch, RowBatcher};
pub use network::{Activation, FeedForward, InferenceBackend, ModelConfig, TrainingBackend};
pub use prediction::{annotate, decide, predict_all, predict_rows, Prediction, DEFAULT_THRESHOLD};
pub use storage::{ModelArtifact, ARTIFACT_FORMAT_VERSION, DEFAULT_MODEL_PATH};
pub use training::{evaluate, split_indices, EpochMetrics, Evaluation, Partition, Trainer, TrainingConfig, TrainingHistory};
