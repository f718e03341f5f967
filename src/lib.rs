//! Packet-capture classifier for FANET traces
//!
//! Reads pcap/pcapng captures, extracts per-packet feature rows under a
//! declared schema, trains a feed-forward binary classifier and flags
//! anomalous packets.

pub mod capture;
pub mod config;
pub mod error;
pub mod ml;
pub mod output;
pub mod pipeline;

pub use capture::{CaptureReader, CaptureRecord, ReaderStats};
pub use config::PipelineConfig;
pub use error::{IdsError, Result};
pub use ml::{Dataset, DatasetBuilder, FeatureSchema, LabelingMode, ModelArtifact};
pub use pipeline::{DetectionReport, ExtractionReport, Pipeline, TrainingReport};
